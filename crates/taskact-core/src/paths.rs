use crate::error::{Result, TaskactError};
use std::path::PathBuf;

pub const CONFIG_DIR: &str = "taskact";
pub const CONFIG_FILE: &str = "config.yml";

/// Expand a leading `~` or `~/` to the user's home directory. Other paths
/// pass through untouched (`~user` forms are not supported).
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return home::home_dir().ok_or(TaskactError::HomeNotFound);
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = home::home_dir().ok_or(TaskactError::HomeNotFound)?;
        return Ok(home.join(rest));
    }
    Ok(PathBuf::from(path))
}

/// Where the config file lives when no explicit path is given:
/// `$XDG_CONFIG_HOME/taskact/config.yml`, falling back to
/// `~/.config/taskact/config.yml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join(CONFIG_DIR).join(CONFIG_FILE));
        }
    }
    let home = home::home_dir().ok_or(TaskactError::HomeNotFound)?;
    Ok(home.join(".config").join(CONFIG_DIR).join(CONFIG_FILE))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
