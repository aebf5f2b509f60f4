use crate::error::{Result, TaskactError};
use crate::exec::{ExecutionOptions, RetryPolicy, SandboxPolicy};
use crate::paths;
use crate::rule::{ActionRule, Target, MODE_NAMES};
use crate::select::MultiMatchPolicy;
use crate::sort::{SortSpec, DEFAULT_SORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// GeneralConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Editor used by `$EDITOR` substitutions and the editnote builtin.
    #[serde(default = "default_editor")]
    pub editor: String,
    /// Directory prepended to PATH so rule scripts resolve first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_ext: Option<String>,
    #[serde(default = "default_task_bin")]
    pub task_bin: String,
    /// Extra arguments inserted before the filters on every export call.
    #[serde(default)]
    pub task_args: Vec<String>,
    /// Attributes projected into the environment as `TASK_<ATTR>`.
    #[serde(default = "default_task_attributes")]
    pub task_attributes: Vec<String>,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default)]
    pub on_multiple: MultiMatchPolicy,
    /// Advisory hook run when a scan produces zero candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_match_command: Option<String>,
}

fn default_editor() -> String {
    std::env::var("EDITOR")
        .ok()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| "vi".to_string())
}

fn default_task_bin() -> String {
    "task".to_string()
}

fn default_task_attributes() -> Vec<String> {
    ["description", "project", "priority", "tags"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_sort() -> String {
    DEFAULT_SORT.to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            editor: default_editor(),
            path_ext: None,
            task_bin: default_task_bin(),
            task_args: Vec::new(),
            task_attributes: default_task_attributes(),
            sort: default_sort(),
            on_multiple: MultiMatchPolicy::default(),
            no_match_command: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub retry_on_exit_codes: Vec<i32>,
    pub retry_on_spawn_failure: bool,
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        let fallback = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: if self.base_delay_ms == 0 {
                fallback.base_delay
            } else {
                Duration::from_millis(self.base_delay_ms)
            },
            max_delay: if self.max_delay_ms == 0 {
                fallback.max_delay
            } else {
                Duration::from_millis(self.max_delay_ms)
            },
            multiplier: if self.multiplier <= 0.0 {
                fallback.multiplier
            } else {
                self.multiplier
            },
            retry_on_exit_codes: self.retry_on_exit_codes.clone(),
            retry_on_spawn_failure: self.retry_on_spawn_failure,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Deadline for non-interactive commands; 0 means no deadline.
    pub timeout_seconds: u64,
    pub retry: RetrySettings,
    pub sandbox: SandboxPolicy,
}

impl ExecutionConfig {
    pub fn to_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            timeout: match self.timeout_seconds {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            sandbox: self.sandbox.clone(),
            retry: self.retry.to_policy(),
            ..ExecutionOptions::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub execution: ExecutionConfig,
    pub actions: Vec<ActionRule>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            general: GeneralConfig::default(),
            execution: ExecutionConfig::default(),
            actions: default_actions(),
        }
    }
}

/// The stock rule set used when no config file exists: open file-looking
/// annotations, keep per-task notes, open links.
fn default_actions() -> Vec<ActionRule> {
    let rule = |name: &str, regex: &str, command: &str| ActionRule {
        name: name.to_string(),
        target: Target::Annotations,
        regex: regex.to_string(),
        label_regex: None,
        command: command.to_string(),
        modes: MODE_NAMES.iter().map(|m| m.to_string()).collect(),
        filter_command: None,
        inline_command: None,
    };
    vec![
        rule("files", r"^[\.\/~]+.*\.(\w+)$", "xdg-open $FILE"),
        rule(
            "notes",
            r"^Notes(\..*)?$",
            "editnote ~/tasknotes/$UUID.txt \"$TASK_DESCRIPTION\" $UUID",
        ),
        rule("url", r"((?:www|http).*)", "xdg-open $LAST_MATCH"),
    ]
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(TaskactError::ConfigNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        Config::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Config> {
        let cfg: Config = serde_yaml::from_str(data)?;
        Ok(cfg)
    }

    /// Resolve the config for one invocation. An explicit path must exist;
    /// otherwise the discovered file is used when present, and the stock
    /// defaults when not. Returns the file actually read, if any.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Config::load(path)?, Some(path.to_path_buf())));
        }
        let discovered = paths::default_config_path()?;
        if discovered.exists() {
            return Ok((Config::load(&discovered)?, Some(discovered)));
        }
        Ok((Config::default(), None))
    }

    /// Executor defaults for this run.
    pub fn execution_options(&self) -> ExecutionOptions {
        self.execution.to_options()
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let mut seen: Vec<&str> = Vec::new();
        for action in &self.actions {
            if seen.contains(&action.name.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("duplicate action name '{}'", action.name),
                });
            }
            seen.push(&action.name);

            if action.command.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("action '{}' has an empty command", action.name),
                });
            }
            for mode in &action.modes {
                if !MODE_NAMES.contains(&mode.as_str()) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("action '{}' lists unknown mode '{mode}'", action.name),
                    });
                }
            }
            if matches!(action.target, Target::Attribute(_)) && action.label_constraint().is_some()
            {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "action '{}': label_regex has no effect on target '{}'",
                        action.name, action.target
                    ),
                });
            }
        }

        if self.general.sort.parse::<SortSpec>().is_err() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("invalid sort spec '{}'", self.general.sort),
            });
        }
        if self.general.editor.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "general.editor is empty, falling back to 'vi'".to_string(),
            });
        }
        if self.general.task_bin.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "general.task_bin is empty".to_string(),
            });
        }

        warnings
    }
}

pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
    warnings.iter().any(|w| w.level == WarnLevel::Error)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
