use crate::env::EnvMap;
use crate::error::{Result, TaskactError};
use crate::exec::{split_args, ExecutionResult, Executor, RetryPolicy};
use crate::io::write_if_missing;
use crate::paths::expand_tilde;
use chrono::Local;
use tracing::debug;

/// Engine-native command. Handlers run in-process and may still use the
/// Executor for any final subprocess work (the editor launch, typically).
pub trait Builtin {
    fn name(&self) -> &'static str;
    /// `args` excludes the builtin name itself.
    fn run(&self, args: &[String], env: &EnvMap, executor: &Executor) -> Result<ExecutionResult>;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Name→handler registry consulted before generic execution. The first
/// whitespace token of the expanded command selects the handler; anything
/// else falls through to the Executor.
pub struct BuiltinDispatcher {
    handlers: Vec<Box<dyn Builtin>>,
}

impl BuiltinDispatcher {
    pub fn with_defaults() -> BuiltinDispatcher {
        BuiltinDispatcher {
            handlers: vec![Box::new(EditNote)],
        }
    }

    pub fn register(&mut self, builtin: Box<dyn Builtin>) {
        self.handlers.push(builtin);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Run the matching builtin, or None when the command is not a builtin.
    pub fn dispatch(
        &self,
        command: &str,
        env: &EnvMap,
        executor: &Executor,
    ) -> Option<Result<ExecutionResult>> {
        let args = split_args(command);
        let first = args.first()?;
        let handler = self.handlers.iter().find(|h| h.name() == first)?;
        debug!(builtin = handler.name(), "dispatching builtin");
        Some(handler.run(&args[1..], env, executor))
    }
}

// ---------------------------------------------------------------------------
// editnote
// ---------------------------------------------------------------------------

/// `editnote FILE DESCRIPTION IDENTIFIER`: make sure the note file exists
/// (with a header naming the task), then open it in the configured editor.
struct EditNote;

impl Builtin for EditNote {
    fn name(&self) -> &'static str {
        "editnote"
    }

    fn run(&self, args: &[String], env: &EnvMap, executor: &Executor) -> Result<ExecutionResult> {
        if args.len() != 3 {
            return Err(TaskactError::Builtin {
                name: self.name().to_string(),
                message: format!(
                    "expected 3 arguments (file, description, identifier), got {}",
                    args.len()
                ),
            });
        }
        let path = expand_tilde(&args[0])?;
        let description = &args[1];
        let identifier = &args[2];

        let header = format!(
            "# {description} ({identifier})\nCreated: {}\n\n",
            Local::now().format("%Y-%m-%d")
        );
        if write_if_missing(&path, header.as_bytes())? {
            debug!("created note file {}", path.display());
        }

        let editor = env.get("EDITOR").map(String::as_str).unwrap_or("vi");
        let mut argv = split_args(editor);
        if argv.is_empty() {
            return Err(TaskactError::Builtin {
                name: self.name().to_string(),
                message: "EDITOR is empty".to_string(),
            });
        }
        argv.push(path.to_string_lossy().into_owned());

        let mut opts = executor.options();
        opts.interactive = true;
        opts.capture_output = false;
        opts.timeout = None;
        opts.retry = RetryPolicy::default();
        opts.env = Some(env.clone());
        executor.execute_argv(&argv, &opts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
