use crate::error::{Result, TaskactError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Invocation mode. Rules opt into modes through their `modes` list, which
/// may also contain the wildcard entry `any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Normal,
    Batch,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Batch => "batch",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MODE_NAMES: &[&str] = &["normal", "batch", "any"];

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// What a rule matches against: the annotation list, or the string form of a
/// plain attribute (`description`, `project`, a UDA, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    Annotations,
    Attribute(String),
}

impl Default for Target {
    fn default() -> Self {
        Target::Annotations
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        if s == "annotations" {
            Target::Annotations
        } else {
            Target::Attribute(s)
        }
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Annotations => f.write_str("annotations"),
            Target::Attribute(name) => f.write_str(name),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionRule {
    pub name: String,
    #[serde(default)]
    pub target: Target,
    pub regex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_regex: Option<String>,
    pub command: String,
    #[serde(default = "default_modes")]
    pub modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_command: Option<String>,
}

fn default_modes() -> Vec<String> {
    MODE_NAMES.iter().map(|m| m.to_string()).collect()
}

impl ActionRule {
    /// The label constraint, or None when unset or trivial (empty after
    /// trimming).
    pub fn label_constraint(&self) -> Option<&str> {
        self.label_regex
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn applies_in(&self, mode: Mode) -> bool {
        self.modes
            .iter()
            .any(|m| m == mode.as_str() || m == "any")
    }
}

// ---------------------------------------------------------------------------
// Compiled rule set
// ---------------------------------------------------------------------------

/// A rule whose patterns compiled. `label_re` is None when no non-trivial
/// constraint was configured, or when the target is a plain attribute (the
/// constraint is ignored there, with a warning at load time).
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ActionRule,
    pub body_re: Regex,
    pub label_re: Option<Regex>,
}

/// A rule dropped at load time, kept around for diagnostics.
#[derive(Debug, Clone)]
pub struct InvalidRule {
    pub name: String,
    pub reason: String,
}

/// Rules compiled once per run. Invalid patterns are warned about here and
/// never re-examined during matching.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    invalid: Vec<InvalidRule>,
}

impl RuleSet {
    pub fn compile(actions: &[ActionRule]) -> RuleSet {
        let mut rules = Vec::new();
        let mut invalid = Vec::new();
        for action in actions {
            let body_re = match Regex::new(&action.regex) {
                Ok(re) => re,
                Err(e) => {
                    warn!(action = %action.name, "skipping action with invalid regex: {e}");
                    invalid.push(InvalidRule {
                        name: action.name.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let label_re = match (&action.target, action.label_constraint()) {
                (_, None) => None,
                (Target::Attribute(attr), Some(_)) => {
                    warn!(
                        action = %action.name,
                        "label_regex has no effect on attribute target '{attr}', ignoring"
                    );
                    None
                }
                (Target::Annotations, Some(pattern)) => match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(action = %action.name, "skipping action with invalid label_regex: {e}");
                        invalid.push(InvalidRule {
                            name: action.name.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                },
            };
            rules.push(CompiledRule {
                rule: action.clone(),
                body_re,
                label_re,
            });
        }
        RuleSet { rules, invalid }
    }

    /// Narrow the set by rule name for one invocation. Unknown names are an
    /// error so typos don't silently match nothing.
    pub fn retain_names(&mut self, include: &[String], exclude: &[String]) -> Result<()> {
        for name in include.iter().chain(exclude) {
            if !self.rules.iter().any(|r| &r.rule.name == name)
                && !self.invalid.iter().any(|r| &r.name == name)
            {
                return Err(TaskactError::UnknownAction(name.clone()));
            }
        }
        if !include.is_empty() {
            self.rules.retain(|r| include.contains(&r.rule.name));
        }
        self.rules.retain(|r| !exclude.contains(&r.rule.name));
        Ok(())
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn invalid(&self) -> &[InvalidRule] {
        &self.invalid
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
