pub mod builtins;
pub mod cancel;
pub mod config;
pub mod env;
pub mod error;
pub mod exec;
pub mod io;
pub mod matcher;
pub mod paths;
pub mod pipeline;
pub mod rule;
pub mod select;
pub mod sort;
pub mod source;
pub mod task;

pub use error::{Result, TaskactError};
