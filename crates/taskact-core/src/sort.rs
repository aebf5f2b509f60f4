use crate::error::TaskactError;
use crate::matcher::Actionable;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SORT: &str = "urgency-,annot";

// ---------------------------------------------------------------------------
// Sort spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortField {
    /// Matched text, lexicographic.
    Annot,
    /// Timestamp string, lexicographic.
    Entry,
    /// Task id, numeric.
    Id,
    /// Urgency, float.
    Urgency,
    /// Any other key compares the raw string form of that task attribute.
    Attr(String),
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortField::Annot => f.write_str("annot"),
            SortField::Entry => f.write_str("entry"),
            SortField::Id => f.write_str("id"),
            SortField::Urgency => f.write_str("urgency"),
            SortField::Attr(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

/// Ordered comparison keys parsed from `key[-|+][,key...]`. Keys are
/// evaluated left to right; the first non-equal result decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<SortKey>,
}

impl Default for SortSpec {
    fn default() -> Self {
        SortSpec {
            keys: vec![
                SortKey {
                    field: SortField::Urgency,
                    descending: true,
                },
                SortKey {
                    field: SortField::Annot,
                    descending: false,
                },
            ],
        }
    }
}

impl FromStr for SortSpec {
    type Err = TaskactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut keys = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            let (name, descending) = match part.strip_suffix('-') {
                Some(name) => (name, true),
                None => (part.strip_suffix('+').unwrap_or(part), false),
            };
            if name.is_empty() {
                return Err(TaskactError::InvalidSortSpec {
                    spec: s.to_string(),
                    reason: "empty sort key".to_string(),
                });
            }
            let field = match name {
                "annot" => SortField::Annot,
                "entry" => SortField::Entry,
                "id" => SortField::Id,
                "urgency" => SortField::Urgency,
                other => SortField::Attr(other.to_string()),
            };
            keys.push(SortKey { field, descending });
        }
        Ok(SortSpec { keys })
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", key.field)?;
            if key.descending {
                f.write_str("-")?;
            }
        }
        Ok(())
    }
}

impl SortSpec {
    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Stable sort: candidates equal under every key keep the matcher's
    /// emission order.
    pub fn sort(&self, items: &mut [Actionable]) {
        items.sort_by(|a, b| self.compare(a, b));
    }

    pub fn compare(&self, a: &Actionable, b: &Actionable) -> Ordering {
        for key in &self.keys {
            let ord = compare_field(&key.field, a, b);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

fn compare_field(field: &SortField, a: &Actionable, b: &Actionable) -> Ordering {
    match field {
        SortField::Annot => a.text.cmp(&b.text),
        SortField::Entry => a.entry.cmp(&b.entry),
        SortField::Id => a.task.id.cmp(&b.task.id),
        SortField::Urgency => {
            let ua = a.task.urgency().unwrap_or(0.0);
            let ub = b.task.urgency().unwrap_or(0.0);
            ua.partial_cmp(&ub).unwrap_or(Ordering::Equal)
        }
        SortField::Attr(name) => {
            let va = a.task.attr(name).unwrap_or_default();
            let vb = b.task.attr(name).unwrap_or_default();
            va.cmp(&vb)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
