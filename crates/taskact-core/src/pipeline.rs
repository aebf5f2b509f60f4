use crate::builtins::BuiltinDispatcher;
use crate::config::Config;
use crate::env::{expand, EnvMap, EnvironmentBuilder};
use crate::error::Result;
use crate::exec::{ExecutionResult, Executor, RetryPolicy};
use crate::matcher::{Actionable, Matcher};
use crate::rule::{Mode, RuleSet};
use crate::select::{select, Menu, Selection};
use crate::sort::SortSpec;
use crate::source::TaskSource;
use serde::Serialize;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Run options
// ---------------------------------------------------------------------------

/// Per-invocation knobs, as opposed to the durable [`Config`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Passed to the task source verbatim, one argv entry each.
    pub filters: Vec<String>,
    pub mode: Mode,
    /// First matching rule wins per annotation or attribute.
    pub single: bool,
    /// A human is present; several candidates go to the menu.
    pub interactive: bool,
    /// Show candidates, execute nothing.
    pub list_only: bool,
    /// Run each candidate's inline command and attach its output when
    /// listing.
    pub inline: bool,
    /// Overrides the configured sort order when set.
    pub sort: Option<SortSpec>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            filters: Vec::new(),
            mode: Mode::Normal,
            single: true,
            interactive: false,
            list_only: false,
            inline: false,
            sort: None,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// One row of a listing, ready for table or JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ListedAction {
    pub action: String,
    pub task_id: u64,
    pub uuid: String,
    pub description: String,
    /// The annotation or attribute text that matched.
    pub text: String,
    /// The fully expanded command the rule would run.
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_output: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionReport {
    pub action: String,
    pub command: String,
    pub result: ExecutionResult,
}

/// What a run did. Errors are reserved for failures; "nothing matched" and
/// "user backed out of the menu" are ordinary outcomes.
#[derive(Debug)]
pub enum Outcome {
    NoMatches,
    Listed(Vec<ListedAction>),
    Executed(Vec<ActionReport>),
    Aborted,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The whole engine, end to end: fetch tasks, match rules, order the
/// candidates, decide, execute. Synchronous and single-threaded; the one
/// shared cancel token lives inside the executor.
pub struct Pipeline<'a> {
    config: &'a Config,
    source: &'a dyn TaskSource,
    executor: Executor,
    builtins: BuiltinDispatcher,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, source: &'a dyn TaskSource, executor: Executor) -> Pipeline<'a> {
        Pipeline {
            config,
            source,
            executor,
            builtins: BuiltinDispatcher::with_defaults(),
        }
    }

    pub fn run(&self, opts: &RunOptions, menu: &dyn Menu) -> Result<Outcome> {
        // Rule problems (bad --include, broken sort spec) surface before we
        // shell out to the task binary.
        let mut rules = RuleSet::compile(&self.config.actions);
        rules.retain_names(&opts.include, &opts.exclude)?;
        let sort = match &opts.sort {
            Some(spec) => spec.clone(),
            None => self.config.general.sort.parse()?,
        };

        let tasks = self.source.fetch(&opts.filters)?;
        debug!("{} task(s) to match against {} rule(s)", tasks.len(), rules.rules().len());

        let general = &self.config.general;
        let editor = match general.editor.trim() {
            "" => "vi",
            e => e,
        };
        let envs = EnvironmentBuilder::new(editor, general.path_ext.as_deref(), &general.task_attributes);

        let matcher = Matcher::new(&rules, &self.executor, opts.mode, opts.single);
        let mut found = matcher.match_tasks(&tasks, &envs);
        sort.sort(&mut found);

        if found.is_empty() {
            self.run_no_match_hook(envs.base());
            return Ok(Outcome::NoMatches);
        }
        if opts.list_only {
            return Ok(Outcome::Listed(self.listing(&found, opts.inline)));
        }

        match select(found.len(), opts.interactive, opts.mode, general.on_multiple)? {
            Selection::NoMatches => Ok(Outcome::NoMatches),
            Selection::Single | Selection::ExecuteFirst => self.execute_all(&found[..1]),
            Selection::ExecuteAll => self.execute_all(&found),
            Selection::ListOnly => Ok(Outcome::Listed(self.listing(&found, opts.inline))),
            Selection::Menu => match menu.choose(&found)? {
                Some(index) if index < found.len() => {
                    self.execute_all(&found[index..=index])
                }
                Some(index) => {
                    warn!("menu returned index {index} for {} candidate(s)", found.len());
                    Ok(Outcome::Aborted)
                }
                None => Ok(Outcome::Aborted),
            },
        }
    }

    /// Run one candidate: builtins first, otherwise the executor with the
    /// candidate's environment and inherited stdio. Public so an external
    /// picker can execute its own choice.
    pub fn execute(&self, actionable: &Actionable) -> Result<ExecutionResult> {
        let command = actionable.command();
        info!(action = %actionable.rule.name, task = %actionable.task.uuid, "running: {command}");
        match self
            .builtins
            .dispatch(&command, &actionable.env, &self.executor)
        {
            Some(result) => result,
            None => {
                let mut opts = self.executor.options();
                opts.interactive = true;
                opts.capture_output = false;
                opts.env = Some(actionable.env.clone());
                self.executor.execute(&command, &opts)
            }
        }
    }

    /// Execute candidates in order, stopping at the first failure. The
    /// failing command's error carries its execution result.
    fn execute_all(&self, chosen: &[Actionable]) -> Result<Outcome> {
        let mut reports = Vec::with_capacity(chosen.len());
        for actionable in chosen {
            let result = self.execute(actionable)?;
            reports.push(ActionReport {
                action: actionable.rule.name.clone(),
                command: actionable.command(),
                result,
            });
        }
        Ok(Outcome::Executed(reports))
    }

    fn listing(&self, found: &[Actionable], inline: bool) -> Vec<ListedAction> {
        found
            .iter()
            .map(|a| ListedAction {
                action: a.rule.name.clone(),
                task_id: a.task.id,
                uuid: a.task.uuid.clone(),
                description: a.task.description.clone(),
                text: a.text.clone(),
                command: a.command(),
                inline_output: if inline { self.inline_output(a) } else { None },
            })
            .collect()
    }

    /// Inline commands decorate listings; a broken one costs its row the
    /// decoration, nothing more.
    fn inline_output(&self, actionable: &Actionable) -> Option<String> {
        let command = actionable.inline_command()?;
        let mut opts = self.executor.options();
        opts.capture_output = true;
        opts.interactive = false;
        opts.retry = RetryPolicy::default();
        opts.env = Some(actionable.env.clone());
        match self.executor.execute(&command, &opts) {
            Ok(result) => Some(result.stdout.trim_end().to_string()),
            Err(e) => {
                warn!(action = %actionable.rule.name, "inline command failed: {e}");
                None
            }
        }
    }

    /// Advisory hook, captured and never fatal.
    fn run_no_match_hook(&self, base: &EnvMap) {
        let Some(hook) = self
            .config
            .general
            .no_match_command
            .as_deref()
            .filter(|h| !h.trim().is_empty())
        else {
            return;
        };
        let command = expand(hook, base);
        let mut opts = self.executor.options();
        opts.capture_output = true;
        opts.interactive = false;
        opts.retry = RetryPolicy::default();
        opts.env = Some(base.clone());
        if let Err(e) = self.executor.execute(&command, &opts) {
            warn!("no-match command failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
