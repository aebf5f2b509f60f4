use crate::task::Task;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Ordered map keeps child environments and diagnostics deterministic.
pub type EnvMap = BTreeMap<String, String>;

static VAR_RE: OnceLock<Regex> = OnceLock::new();

fn var_re() -> &'static Regex {
    VAR_RE.get_or_init(|| {
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .unwrap_or_else(|e| panic!("invalid variable regex: {e}"))
    })
}

/// Literal `$NAME` / `${NAME}` substitution against `env`. Matching is
/// boundary-aware, so `$ID` never rewrites a prefix of `$ID2`. Names not in
/// the map stay untouched; if the command later runs through a shell, the
/// shell gets its chance at them. Values are never re-expanded.
pub fn expand(command: &str, env: &EnvMap) -> String {
    var_re()
        .replace_all(command, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match env.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// EnvironmentBuilder
// ---------------------------------------------------------------------------

/// Builds child environments. The process environment is snapshotted once at
/// construction; every task gets a fresh copy extended with identity
/// variables and the configured `TASK_<ATTR>` projections.
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    base: EnvMap,
    attributes: Vec<String>,
}

impl EnvironmentBuilder {
    /// `path_ext` is prepended to PATH so rule scripts resolve first.
    /// `attributes` lists the task attributes projected as `TASK_<ATTR>`.
    pub fn new(editor: &str, path_ext: Option<&str>, attributes: &[String]) -> EnvironmentBuilder {
        let mut base: EnvMap = std::env::vars().collect();
        if let Some(ext) = path_ext.map(str::trim).filter(|s| !s.is_empty()) {
            let path = match base.get("PATH") {
                Some(existing) if !existing.is_empty() => format!("{ext}:{existing}"),
                _ => ext.to_string(),
            };
            base.insert("PATH".into(), path);
        }
        base.insert("EDITOR".into(), editor.to_string());
        EnvironmentBuilder {
            base,
            attributes: attributes.to_vec(),
        }
    }

    /// Environment without any task bound, for hooks and the task export.
    pub fn base(&self) -> &EnvMap {
        &self.base
    }

    pub fn for_task(&self, task: &Task) -> EnvMap {
        let mut env = self.base.clone();
        env.insert("UUID".into(), task.uuid.clone());
        env.insert("ID".into(), task.id.to_string());
        for attr in &self.attributes {
            if let Some(value) = task.attr(attr) {
                env.insert(format!("TASK_{}", attr.to_uppercase()), value);
            }
        }
        env
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        serde_json::from_str(
            r#"{
                "id": 7,
                "uuid": "abc",
                "description": "pay rent",
                "project": "home",
                "urgency": 4.5
            }"#,
        )
        .unwrap()
    }

    fn attrs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expand_both_forms() {
        let mut env = EnvMap::new();
        env.insert("FILE".into(), "/tmp/a.txt".into());
        assert_eq!(expand("vim $FILE", &env), "vim /tmp/a.txt");
        assert_eq!(expand("cp ${FILE}.bak x", &env), "cp /tmp/a.txt.bak x");
    }

    #[test]
    fn expand_respects_name_boundaries() {
        let mut env = EnvMap::new();
        env.insert("ID".into(), "7".into());
        env.insert("ID2".into(), "99".into());
        assert_eq!(expand("a $ID b $ID2", &env), "a 7 b 99");
        // $IDX is a different name, not "$ID" + "X".
        assert_eq!(expand("$IDX", &env), "$IDX");
        assert_eq!(expand("${ID}X", &env), "7X");
    }

    #[test]
    fn unknown_names_stay_literal() {
        let env = EnvMap::new();
        assert_eq!(expand("echo $NOPE ${ALSO_NOPE}", &env), "echo $NOPE ${ALSO_NOPE}");
        assert_eq!(expand("cost $$5 $1", &env), "cost $$5 $1");
    }

    #[test]
    fn values_are_not_re_expanded() {
        let mut env = EnvMap::new();
        env.insert("A".into(), "$B".into());
        env.insert("B".into(), "deep".into());
        assert_eq!(expand("$A", &env), "$B");
    }

    #[test]
    fn base_env_sets_editor_and_path_prefix() {
        let builder = EnvironmentBuilder::new("nano", Some("/opt/taskact/scripts"), &[]);
        assert_eq!(builder.base().get("EDITOR").map(String::as_str), Some("nano"));
        let path = builder.base().get("PATH").cloned().unwrap_or_default();
        assert!(path.starts_with("/opt/taskact/scripts"));
    }

    #[test]
    fn for_task_projects_configured_attributes() {
        let builder =
            EnvironmentBuilder::new("vi", None, &attrs(&["description", "project", "due"]));
        let env = builder.for_task(&task());
        assert_eq!(env.get("UUID").map(String::as_str), Some("abc"));
        assert_eq!(env.get("ID").map(String::as_str), Some("7"));
        assert_eq!(
            env.get("TASK_DESCRIPTION").map(String::as_str),
            Some("pay rent")
        );
        assert_eq!(env.get("TASK_PROJECT").map(String::as_str), Some("home"));
        // Absent attribute, absent variable.
        assert!(!env.contains_key("TASK_DUE"));
    }

    #[test]
    fn snapshot_is_taken_once() {
        std::env::set_var("TASKACT_SNAP_PROBE", "before");
        let builder = EnvironmentBuilder::new("vi", None, &[]);
        std::env::set_var("TASKACT_SNAP_PROBE", "after");
        let env = builder.for_task(&task());
        assert_eq!(
            env.get("TASKACT_SNAP_PROBE").map(String::as_str),
            Some("before")
        );
        std::env::remove_var("TASKACT_SNAP_PROBE");
    }

    #[test]
    fn identical_task_yields_identical_env() {
        let builder = EnvironmentBuilder::new("vi", None, &attrs(&["description"]));
        assert_eq!(builder.for_task(&task()), builder.for_task(&task()));
    }
}
