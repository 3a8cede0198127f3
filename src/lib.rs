//! Assetline - configuration-driven asset build pipelines
//!
//! A project declares environment profiles, tasks with per-environment
//! targets, named sequences of steps and watch rules in one YAML file.
//! Option values may embed `<%= path %>` placeholders that are resolved
//! against the configuration, including the active environment, right
//! before each step runs. The actual work is done by plugins registered
//! by name.

pub mod cli;
pub mod config;
pub mod error;
pub mod plugin;
pub mod runner;
pub mod watch;

pub use error::{AssetlineError, Result};

/// Current version of Assetline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
