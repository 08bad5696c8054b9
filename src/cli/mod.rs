pub mod commands;
pub mod format;
pub mod hash;
pub mod key;
pub mod progress;
pub mod run;
pub mod validate;

pub use commands::{Cli, Commands};
