use crate::env::{expand, EnvMap, EnvironmentBuilder};
use crate::exec::{Executor, RetryPolicy};
use crate::paths::expand_tilde;
use crate::rule::{ActionRule, CompiledRule, Mode, RuleSet, Target};
use crate::task::Task;
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::{debug, warn};

static ANNOTATION_RE: OnceLock<Regex> = OnceLock::new();

fn annotation_re() -> &'static Regex {
    ANNOTATION_RE.get_or_init(|| {
        Regex::new(r"^((\S+):\s+)?(.*)$").unwrap_or_else(|e| panic!("invalid split regex: {e}"))
    })
}

/// Split annotation text into an optional `label` (first whitespace-delimited
/// token ending in a colon) and the `body`. Text the pattern cannot handle
/// (embedded newlines) is treated as an unlabeled body.
pub fn split_annotation(text: &str) -> (Option<&str>, &str) {
    match annotation_re().captures(text) {
        Some(caps) => {
            let label = caps.get(2).map(|m| m.as_str());
            let body = caps.get(3).map(|m| m.as_str()).unwrap_or(text);
            (label, body)
        }
        None => (None, text),
    }
}

// ---------------------------------------------------------------------------
// Actionable
// ---------------------------------------------------------------------------

/// One executable candidate: a rule that matched a task's annotation or
/// attribute, with its own copy of the environment. Consumed by execution;
/// it never outlives the run.
#[derive(Debug, Clone)]
pub struct Actionable {
    /// The matched text as the user wrote it (annotation or attribute value).
    pub text: String,
    /// Annotation entry timestamp, or the task's own for attribute matches.
    pub entry: String,
    pub task: Task,
    pub rule: ActionRule,
    pub env: EnvMap,
}

impl Actionable {
    /// The rule's command template with all environment variables applied.
    pub fn command(&self) -> String {
        expand(&self.rule.command, &self.env)
    }

    pub fn inline_command(&self) -> Option<String> {
        self.rule
            .inline_command
            .as_deref()
            .map(|c| expand(c, &self.env))
    }
}

// ---------------------------------------------------------------------------
// Matcher
// ---------------------------------------------------------------------------

/// Applies compiled rules to tasks. Per task, annotation rules run first
/// (annotation order, then configured rule order), then plain-attribute
/// rules in configured order; that emission order is what the sorter's
/// stable sort preserves on ties.
pub struct Matcher<'a> {
    rules: &'a RuleSet,
    executor: &'a Executor,
    mode: Mode,
    single: bool,
}

impl<'a> Matcher<'a> {
    pub fn new(rules: &'a RuleSet, executor: &'a Executor, mode: Mode, single: bool) -> Matcher<'a> {
        Matcher {
            rules,
            executor,
            mode,
            single,
        }
    }

    pub fn match_tasks(&self, tasks: &[Task], envs: &EnvironmentBuilder) -> Vec<Actionable> {
        let mut out = Vec::new();
        for task in tasks {
            self.match_task(task, envs, &mut out);
        }
        out
    }

    fn match_task(&self, task: &Task, envs: &EnvironmentBuilder, out: &mut Vec<Actionable>) {
        let base = envs.for_task(task);
        let eligible: Vec<&CompiledRule> = self
            .rules
            .rules()
            .iter()
            .filter(|r| r.rule.applies_in(self.mode))
            .collect();

        for annotation in &task.annotations {
            let (label, body) = split_annotation(&annotation.description);
            for compiled in eligible
                .iter()
                .filter(|r| r.rule.target == Target::Annotations)
            {
                if let Some(label_re) = &compiled.label_re {
                    // An absent label is matched as the empty string.
                    if !label_re.is_match(label.unwrap_or("")) {
                        continue;
                    }
                }
                let Some(caps) = compiled.body_re.captures(body) else {
                    continue;
                };
                let mut env = base.clone();
                env.insert("LABEL".into(), label.unwrap_or("").to_string());
                env.insert("ANNOTATION".into(), annotation.description.clone());
                env.insert("FILE".into(), tilde_expanded(body));
                insert_match_vars(&mut env, &caps);
                if !self.passes_filter(&compiled.rule, &env) {
                    continue;
                }
                debug!(
                    action = %compiled.rule.name,
                    task = %task.uuid,
                    "annotation matched: {}",
                    annotation.description
                );
                out.push(Actionable {
                    text: annotation.description.clone(),
                    entry: annotation.entry.clone(),
                    task: task.clone(),
                    rule: compiled.rule.clone(),
                    env,
                });
                if self.single {
                    // First matching rule wins for this annotation.
                    break;
                }
            }
        }

        let mut matched_attrs: Vec<&str> = Vec::new();
        for compiled in eligible.iter() {
            let Target::Attribute(attr) = &compiled.rule.target else {
                continue;
            };
            if self.single && matched_attrs.contains(&attr.as_str()) {
                continue;
            }
            let Some(value) = task.attr(attr) else {
                continue;
            };
            let Some(caps) = compiled.body_re.captures(&value) else {
                continue;
            };
            let mut env = base.clone();
            env.insert("LABEL".into(), String::new());
            env.insert("ANNOTATION".into(), value.clone());
            env.insert("FILE".into(), value.clone());
            insert_match_vars(&mut env, &caps);
            if !self.passes_filter(&compiled.rule, &env) {
                continue;
            }
            debug!(
                action = %compiled.rule.name,
                task = %task.uuid,
                "attribute '{attr}' matched: {value}"
            );
            out.push(Actionable {
                text: value.clone(),
                entry: task.entry(),
                task: task.clone(),
                rule: compiled.rule.clone(),
                env,
            });
            matched_attrs.push(attr.as_str());
        }
    }

    /// Filter gate: the rule's filter command runs with the candidate's
    /// environment, output captured. Anything but a clean exit discards the
    /// candidate without failing the scan.
    fn passes_filter(&self, rule: &ActionRule, env: &EnvMap) -> bool {
        let Some(filter) = rule.filter_command.as_deref().filter(|f| !f.trim().is_empty()) else {
            return true;
        };
        let command = expand(filter, env);
        let mut opts = self.executor.options();
        opts.capture_output = true;
        opts.interactive = false;
        opts.retry = RetryPolicy::default();
        opts.env = Some(env.clone());
        match self.executor.execute(&command, &opts) {
            Ok(_) => true,
            Err(e) => {
                warn!(action = %rule.name, "filter command rejected candidate: {e}");
                false
            }
        }
    }
}

fn insert_match_vars(env: &mut EnvMap, caps: &Captures<'_>) {
    env.insert("LAST_MATCH".into(), caps[0].to_string());
    for i in 1..caps.len() {
        if let Some(group) = caps.get(i) {
            env.insert(format!("MATCH_{i}"), group.as_str().to_string());
        }
    }
}

fn tilde_expanded(body: &str) -> String {
    match expand_tilde(body) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("cannot expand '~' in '{body}': {e}");
            body.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
