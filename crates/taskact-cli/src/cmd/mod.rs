pub mod diagnostics;
pub mod open;
pub mod rules;
