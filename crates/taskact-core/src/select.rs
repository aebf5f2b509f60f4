use crate::error::{Result, TaskactError};
use crate::matcher::Actionable;
use crate::rule::Mode;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Multi-match policy
// ---------------------------------------------------------------------------

/// What to do with several candidates when nobody can be asked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiMatchPolicy {
    /// Print the candidates and execute none (advisory outcome).
    #[default]
    List,
    /// Execute the first candidate in sorted order.
    First,
    /// Treat the ambiguity as an error.
    Fail,
}

impl MultiMatchPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            MultiMatchPolicy::List => "list",
            MultiMatchPolicy::First => "first",
            MultiMatchPolicy::Fail => "fail",
        }
    }
}

impl fmt::Display for MultiMatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Zero candidates. Not an error; the caller may fire its no-match hook.
    NoMatches,
    /// Exactly one candidate: execute it.
    Single,
    /// Several candidates, someone to ask: delegate to the menu.
    Menu,
    /// Several candidates, nobody to ask: show them, run nothing.
    ListOnly,
    /// Batch mode: execute every candidate in order.
    ExecuteAll,
    /// Policy `first`: execute the top candidate.
    ExecuteFirst,
}

/// Decide how to proceed from the candidate count and invocation shape.
pub fn select(
    count: usize,
    interactive: bool,
    mode: Mode,
    on_multiple: MultiMatchPolicy,
) -> Result<Selection> {
    if count == 0 {
        return Ok(Selection::NoMatches);
    }
    if mode == Mode::Batch {
        return Ok(Selection::ExecuteAll);
    }
    if count == 1 {
        return Ok(Selection::Single);
    }
    if interactive {
        return Ok(Selection::Menu);
    }
    match on_multiple {
        MultiMatchPolicy::List => Ok(Selection::ListOnly),
        MultiMatchPolicy::First => Ok(Selection::ExecuteFirst),
        MultiMatchPolicy::Fail => Err(TaskactError::MultipleMatches { count }),
    }
}

// ---------------------------------------------------------------------------
// Menu collaborator
// ---------------------------------------------------------------------------

/// UI seam for interactive choice. The engine never talks to a terminal
/// itself; the binary (or an external picker) implements this.
pub trait Menu {
    /// Present candidates; return the chosen index, or None if the user
    /// aborted (advisory, not an error).
    fn choose(&self, candidates: &[Actionable]) -> Result<Option<usize>>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
