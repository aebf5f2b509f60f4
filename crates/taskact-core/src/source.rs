use crate::error::{Result, TaskactError};
use crate::exec::{Executor, RetryPolicy};
use crate::task::Task;
use tracing::debug;

/// Where tasks come from. The engine only needs an ordered collection of
/// attribute maps; tests substitute their own source.
pub trait TaskSource {
    fn fetch(&self, filters: &[String]) -> Result<Vec<Task>>;
}

// ---------------------------------------------------------------------------
// TaskwarriorSource
// ---------------------------------------------------------------------------

/// Overrides keeping the export machine-readable regardless of user rc.
const EXPORT_OVERRIDES: &[&str] = &[
    "rc.json.array=on",
    "rc.verbose=nothing",
    "rc.confirmation=off",
];

/// Fetches tasks by running `task ... export`. The filters become argv
/// entries verbatim; nothing is shell-interpreted. Runs through the shared
/// executor so cancellation reaches an in-flight export.
pub struct TaskwarriorSource {
    task_bin: String,
    extra_args: Vec<String>,
    executor: Executor,
}

impl TaskwarriorSource {
    pub fn new(
        task_bin: impl Into<String>,
        extra_args: Vec<String>,
        executor: Executor,
    ) -> TaskwarriorSource {
        TaskwarriorSource {
            task_bin: task_bin.into(),
            extra_args,
            executor,
        }
    }
}

impl TaskSource for TaskwarriorSource {
    fn fetch(&self, filters: &[String]) -> Result<Vec<Task>> {
        let mut argv: Vec<String> = Vec::with_capacity(filters.len() + 6);
        argv.push(self.task_bin.clone());
        argv.extend(EXPORT_OVERRIDES.iter().map(|s| s.to_string()));
        argv.extend(self.extra_args.iter().cloned());
        argv.extend(filters.iter().cloned());
        argv.push("export".to_string());

        let mut opts = self.executor.options();
        opts.capture_output = true;
        opts.interactive = false;
        opts.env = None;
        // Exports can be big; never truncate what we are about to parse.
        opts.output_limit = None;
        opts.retry = RetryPolicy::default();

        let result = self.executor.execute_argv(&argv, &opts)?;
        let body = result.stdout.trim();
        if body.is_empty() {
            return Ok(Vec::new());
        }
        let tasks: Vec<Task> = serde_json::from_str(body).map_err(TaskactError::TaskExport)?;
        debug!("fetched {} task(s) from {}", tasks.len(), self.task_bin);
        Ok(tasks)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::exec::ExecutionOptions;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn executor() -> Executor {
        Executor::new(ExecutionOptions::default(), CancelToken::new())
    }

    fn stub_task(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("task");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn fetch_parses_the_export() {
        let dir = TempDir::new().unwrap();
        let bin = stub_task(
            &dir,
            r#"echo '[{"id":1,"uuid":"u1","description":"a"},{"id":2,"uuid":"u2","description":"b"}]'"#,
        );
        let source = TaskwarriorSource::new(bin.to_string_lossy(), vec![], executor());
        let tasks = source.fetch(&[]).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].uuid, "u1");
        assert_eq!(tasks[1].description, "b");
    }

    #[test]
    fn filters_and_overrides_are_passed_as_argv() {
        let dir = TempDir::new().unwrap();
        let args_file = dir.path().join("args");
        let bin = stub_task(
            &dir,
            &format!("echo \"$@\" > {}\necho '[]'", args_file.display()),
        );
        let source = TaskwarriorSource::new(
            bin.to_string_lossy(),
            vec!["rc.hooks=off".into()],
            executor(),
        );
        let tasks = source
            .fetch(&["project:home".into(), "+next".into()])
            .unwrap();
        assert!(tasks.is_empty());
        let seen = std::fs::read_to_string(&args_file).unwrap();
        assert!(seen.contains("rc.json.array=on"));
        assert!(seen.contains("rc.hooks=off"));
        assert!(seen.contains("project:home +next export"));
    }

    #[test]
    fn empty_output_is_an_empty_task_list() {
        let dir = TempDir::new().unwrap();
        let bin = stub_task(&dir, "true");
        let source = TaskwarriorSource::new(bin.to_string_lossy(), vec![], executor());
        assert!(source.fetch(&[]).unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let bin = stub_task(&dir, "echo 'not json'");
        let source = TaskwarriorSource::new(bin.to_string_lossy(), vec![], executor());
        let err = source.fetch(&[]).unwrap_err();
        assert!(matches!(err, TaskactError::TaskExport(_)));
    }

    #[test]
    fn failing_export_surfaces_the_exit_code() {
        let dir = TempDir::new().unwrap();
        let bin = stub_task(&dir, "echo 'no matches' >&2\nexit 1");
        let source = TaskwarriorSource::new(bin.to_string_lossy(), vec![], executor());
        let err = source.fetch(&[]).unwrap_err();
        assert!(matches!(err, TaskactError::CommandFailed { code: 1, .. }));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let source = TaskwarriorSource::new("/nonexistent/task", vec![], executor());
        let err = source.fetch(&[]).unwrap_err();
        assert!(matches!(err, TaskactError::Spawn { .. }));
    }
}
