use crate::output::print_json;
use anyhow::Context;
use std::path::{Path, PathBuf};
use taskact_core::builtins::BuiltinDispatcher;
use taskact_core::config::{has_errors, Config, WarnLevel};
use taskact_core::exec::split_args;
use taskact_core::rule::RuleSet;

/// Health report: where the config came from, whether the binaries the rules
/// lean on resolve, which actions compiled, what the sandbox can enforce.
pub fn run(config: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let (cfg, config_file) = Config::load_or_default(config).context("failed to load config")?;
    let warnings = cfg.validate();
    let rules = RuleSet::compile(&cfg.actions);
    let builtins = BuiltinDispatcher::with_defaults();

    // The editor may carry arguments ("code --wait"); only the binary is
    // looked up.
    let editor_bin = split_args(&cfg.general.editor)
        .into_iter()
        .next()
        .unwrap_or_else(|| "vi".to_string());
    let binaries: Vec<(&str, String, Option<PathBuf>)> =
        [
            ("task", cfg.general.task_bin.clone()),
            ("editor", editor_bin),
            ("shell", "sh".to_string()),
        ]
        .into_iter()
        .map(|(label, bin)| {
            let resolved = which::which(&bin).ok();
            (label, bin, resolved)
        })
        .collect();

    let sandbox = &cfg.execution.sandbox;

    let exec = &cfg.execution;

    if json {
        let value = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "config": config_file,
            "sort": cfg.general.sort,
            "execution": {
                "timeout_seconds": exec.timeout_seconds,
                "retry_attempts": exec.retry.to_policy().max_attempts,
            },
            "binaries": binaries
                .iter()
                .map(|(label, bin, resolved)| serde_json::json!({
                    "name": label,
                    "binary": bin,
                    "resolved": resolved,
                }))
                .collect::<Vec<_>>(),
            "actions": {
                "valid": rules
                    .rules()
                    .iter()
                    .map(|r| r.rule.name.clone())
                    .collect::<Vec<_>>(),
                "invalid": rules
                    .invalid()
                    .iter()
                    .map(|r| serde_json::json!({ "name": r.name, "reason": r.reason }))
                    .collect::<Vec<_>>(),
            },
            "builtins": builtins.names(),
            "sandbox": {
                "restricted": sandbox.is_restricted(),
                "unsupported": sandbox.unsupported_knobs(),
            },
            "warnings": warnings,
        });
        print_json(&value)?;
    } else {
        println!("taskact:  {}", env!("CARGO_PKG_VERSION"));
        match &config_file {
            Some(path) => println!("Config:   {}", path.display()),
            None => println!("Config:   (built-in defaults)"),
        }
        for (label, bin, resolved) in &binaries {
            let name = format!("{label}:");
            match resolved {
                Some(path) => println!("{name:<9} ok ({})", path.display()),
                None => println!("{name:<9} not found ({bin})"),
            }
        }

        println!(
            "Actions:  {} valid, {} invalid",
            rules.rules().len(),
            rules.invalid().len()
        );
        for invalid in rules.invalid() {
            println!("  [invalid] {}: {}", invalid.name, invalid.reason);
        }
        println!("Builtins: {}", builtins.names().join(", "));
        println!("Sort:     {}", cfg.general.sort);
        let timeout = match exec.timeout_seconds {
            0 => "none".to_string(),
            secs => format!("{secs}s"),
        };
        println!(
            "Exec:     timeout {timeout}, {} attempt(s)",
            exec.retry.to_policy().max_attempts
        );

        if sandbox.is_restricted() {
            match sandbox.max_memory_mb {
                Some(mb) => println!("Sandbox:  memory limit {mb} MB"),
                None => println!("Sandbox:  on"),
            }
            for knob in sandbox.unsupported_knobs() {
                println!("  [unsupported] {knob}");
            }
        } else {
            println!("Sandbox:  off");
        }

        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
        if warnings.is_empty() {
            println!("Config is valid. No warnings.");
        }
    }

    if has_errors(&warnings) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
