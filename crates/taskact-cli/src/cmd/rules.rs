use crate::output::{print_json, print_table};
use anyhow::Context;
use std::path::Path;
use taskact_core::config::Config;
use taskact_core::rule::RuleSet;

pub fn run(config: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let (cfg, _) = Config::load_or_default(config).context("failed to load config")?;
    if json {
        return print_json(&cfg.actions);
    }

    let compiled = RuleSet::compile(&cfg.actions);
    let rows = cfg
        .actions
        .iter()
        .map(|action| {
            let status = if compiled.invalid().iter().any(|i| i.name == action.name) {
                "invalid"
            } else {
                "ok"
            };
            vec![
                action.name.clone(),
                action.target.to_string(),
                action.regex.clone(),
                action.modes.join(","),
                status.to_string(),
                action.command.clone(),
            ]
        })
        .collect();
    print_table(&["NAME", "TARGET", "REGEX", "MODES", "STATUS", "COMMAND"], rows);
    Ok(())
}
