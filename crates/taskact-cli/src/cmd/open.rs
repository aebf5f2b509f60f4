use crate::menu::StdinMenu;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Args;
use std::io::IsTerminal;
use std::path::Path;
use taskact_core::cancel::CancelToken;
use taskact_core::config::{self, Config};
use taskact_core::exec::Executor;
use taskact_core::pipeline::{Outcome, Pipeline, RunOptions};
use taskact_core::rule::Mode;
use taskact_core::sort::SortSpec;
use taskact_core::source::TaskwarriorSource;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct OpenArgs {
    /// Emit every matching action, not just the first per annotation
    #[arg(long, short = 'a')]
    pub all_matches: bool,

    /// Execute every candidate in order, without prompting
    #[arg(long, short = 'b')]
    pub batch: bool,

    /// List candidates without executing anything
    #[arg(long, short = 'l')]
    pub list: bool,

    /// Attach each candidate's inline command output when listing
    #[arg(long, short = 'i')]
    pub inline: bool,

    /// Sort order, e.g. "urgency-,annot" (suffix - for descending)
    #[arg(long, short = 's', value_name = "SPEC")]
    pub sort: Option<String>,

    /// Only consider these actions (repeatable or comma-separated)
    #[arg(long = "include", short = 'I', value_name = "ACTION", value_delimiter = ',')]
    pub include: Vec<String>,

    /// Skip these actions (repeatable or comma-separated)
    #[arg(long = "exclude", short = 'x', value_name = "ACTION", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Task filters passed to the tracker (e.g. +ACTIVE project:home)
    #[arg(value_name = "FILTER")]
    pub filters: Vec<String>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(
    config: Option<&Path>,
    args: OpenArgs,
    json: bool,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    let (cfg, config_file) = Config::load_or_default(config).context("failed to load config")?;
    if let Some(path) = &config_file {
        tracing::debug!("config: {}", path.display());
    }
    let warnings = cfg.validate();
    for w in &warnings {
        tracing::warn!("config: {}", w.message);
    }
    if config::has_errors(&warnings) {
        anyhow::bail!("config has errors; run 'taskact diagnostics'");
    }

    let sort = args
        .sort
        .as_deref()
        .map(str::parse::<SortSpec>)
        .transpose()
        .context("invalid --sort")?;

    // A menu only makes sense with a human on both ends of the terminal.
    let interactive = !args.batch
        && !args.list
        && std::io::stdin().is_terminal()
        && std::io::stdout().is_terminal();

    let executor = Executor::new(cfg.execution_options(), cancel);
    let source = TaskwarriorSource::new(
        cfg.general.task_bin.clone(),
        cfg.general.task_args.clone(),
        executor.clone(),
    );

    let opts = RunOptions {
        filters: args.filters,
        mode: if args.batch { Mode::Batch } else { Mode::Normal },
        single: !args.all_matches,
        interactive,
        list_only: args.list,
        inline: args.inline,
        sort,
        include: args.include,
        exclude: args.exclude,
    };

    let outcome = Pipeline::new(&cfg, &source, executor).run(&opts, &StdinMenu)?;
    report(outcome, json)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn report(outcome: Outcome, json: bool) -> anyhow::Result<()> {
    match outcome {
        Outcome::NoMatches => {
            if json {
                print_json(&serde_json::json!({ "matches": [] }))?;
            } else {
                println!("No matching actions.");
            }
        }
        Outcome::Listed(rows) => {
            if json {
                print_json(&rows)?;
            } else if rows.iter().any(|r| r.inline_output.is_some()) {
                for (i, row) in rows.iter().enumerate() {
                    let task = if row.task_id == 0 {
                        row.uuid.clone()
                    } else {
                        row.task_id.to_string()
                    };
                    println!(
                        "{:>3}) [{}] {} ({task}): {}",
                        i + 1,
                        row.action,
                        row.description,
                        row.text
                    );
                    if let Some(extra) = &row.inline_output {
                        for line in extra.lines() {
                            println!("     {line}");
                        }
                    }
                }
            } else {
                let table = rows
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        vec![
                            (i + 1).to_string(),
                            if r.task_id == 0 {
                                r.uuid.clone()
                            } else {
                                r.task_id.to_string()
                            },
                            r.action.clone(),
                            r.text.clone(),
                            r.command.clone(),
                        ]
                    })
                    .collect();
                print_table(&["#", "TASK", "ACTION", "TEXT", "COMMAND"], table);
            }
        }
        Outcome::Executed(reports) => {
            // The actions' own output already went to the terminal; stay
            // quiet unless asked for machine-readable results.
            if json {
                print_json(&reports)?;
            }
        }
        Outcome::Aborted => {
            if json {
                print_json(&serde_json::json!({ "aborted": true }))?;
            } else {
                eprintln!("No action chosen.");
            }
        }
    }
    Ok(())
}
