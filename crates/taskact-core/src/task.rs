use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Annotation
// ---------------------------------------------------------------------------

/// One annotation from the export. `entry` keeps the tracker's raw
/// timestamp form (`20240101T120000Z`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub entry: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One record from the tracker's JSON export. Well-known fields are typed;
/// everything else stays in `extra` and is reached through [`Task::attr`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Working-set id. The tracker reports 0 for tasks outside the working set.
    #[serde(default)]
    pub id: u64,
    pub uuid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Task {
    /// String form of an attribute, or None if the task doesn't carry it.
    ///
    /// Strings are returned bare (no quotes), numbers and booleans via their
    /// display form, arrays as comma-joined items. `annotations` is not an
    /// attribute; it has its own accessor.
    pub fn attr(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.to_string()),
            "uuid" => Some(self.uuid.clone()),
            "description" => Some(self.description.clone()),
            "annotations" => None,
            _ => self.extra.get(name).and_then(value_to_string),
        }
    }

    pub fn urgency(&self) -> Option<f64> {
        self.extra.get("urgency").and_then(Value::as_f64)
    }

    /// Creation timestamp string, empty if the export lacked one.
    pub fn entry(&self) -> String {
        self.attr("entry").unwrap_or_default()
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(value_to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        let json = r#"{
            "id": 3,
            "uuid": "a1b2c3d4-0000-0000-0000-000000000000",
            "description": "pay rent",
            "entry": "20240101T120000Z",
            "project": "home",
            "urgency": 9.3,
            "tags": ["money", "monthly"],
            "annotations": [
                {"entry": "20240102T080000Z", "description": "Notes"}
            ]
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn typed_fields_and_extra_coexist() {
        let task = sample();
        assert_eq!(task.id, 3);
        assert_eq!(task.description, "pay rent");
        assert_eq!(task.annotations.len(), 1);
        assert_eq!(task.extra.get("project"), Some(&Value::from("home")));
    }

    #[test]
    fn attr_string_forms() {
        let task = sample();
        assert_eq!(task.attr("id").as_deref(), Some("3"));
        assert_eq!(task.attr("project").as_deref(), Some("home"));
        assert_eq!(task.attr("tags").as_deref(), Some("money,monthly"));
        assert_eq!(task.attr("urgency").as_deref(), Some("9.3"));
        assert_eq!(task.attr("due"), None);
        assert_eq!(task.attr("annotations"), None);
    }

    #[test]
    fn missing_id_defaults_to_zero() {
        let task: Task =
            serde_json::from_str(r#"{"uuid": "abc", "description": "done thing"}"#).unwrap();
        assert_eq!(task.id, 0);
        assert!(task.annotations.is_empty());
    }

    #[test]
    fn urgency_and_entry_accessors() {
        let task = sample();
        assert_eq!(task.urgency(), Some(9.3));
        assert_eq!(task.entry(), "20240101T120000Z");
        assert_eq!(task.annotations[0].entry, "20240102T080000Z");
    }
}
