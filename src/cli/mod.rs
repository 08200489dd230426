pub mod app;
pub mod check;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod limit;
pub mod output;
pub mod permission;
pub mod runtime;
pub mod service;
pub mod sweep;

pub use app::run;
pub use check::{cmd_check, CheckArgs};
pub use commands::Commands;
pub use context::CliContext;
pub use env::CliArgs;
pub use output::OutputFormat;
