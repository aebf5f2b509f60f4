use std::io::{self, Write};
use taskact_core::matcher::Actionable;
use taskact_core::select::Menu;
use taskact_core::Result;

/// Numbered prompt on the controlling terminal. Empty input, EOF, and
/// out-of-range answers back out without an error.
pub struct StdinMenu;

impl Menu for StdinMenu {
    fn choose(&self, candidates: &[Actionable]) -> Result<Option<usize>> {
        for (i, c) in candidates.iter().enumerate() {
            println!(
                "{:>3}) [{}] {} ({}): {}",
                i + 1,
                c.rule.name,
                c.task.description,
                task_ref(c),
                c.text
            );
        }
        print!("Select action [1-{}, empty cancels]: ", candidates.len());
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let answer = line.trim();
        if answer.is_empty() {
            return Ok(None);
        }
        match answer.parse::<usize>() {
            Ok(n) if (1..=candidates.len()).contains(&n) => Ok(Some(n - 1)),
            _ => {
                eprintln!("invalid selection '{answer}'");
                Ok(None)
            }
        }
    }
}

/// Working-set id when the task has one, uuid otherwise.
fn task_ref(c: &Actionable) -> String {
    if c.task.id == 0 {
        c.task.uuid.clone()
    } else {
        c.task.id.to_string()
    }
}
