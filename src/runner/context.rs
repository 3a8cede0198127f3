//! Execution context for sequence runs
//!
//! The context carries the working directory and the verbosity used for
//! user-facing output.

use colored::Colorize;
use std::env;
use std::path::PathBuf;

/// Execution context shared by the runner and the watch loops
#[derive(Debug, Clone)]
pub struct Context {
    /// Directory plugin paths are relative to
    pub working_dir: PathBuf,

    /// Configuration file path
    pub config_path: Option<PathBuf>,

    /// Verbosity level
    pub verbosity: Verbosity,
}

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

impl Context {
    /// Create a new context with default settings
    pub fn new() -> Self {
        Context {
            working_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_path: None,
            verbosity: Verbosity::Normal,
        }
    }

    /// Create a context with a specific working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Set the configuration file path; the working directory follows it
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.working_dir = parent.to_path_buf();
        }
        self.config_path = Some(path);
        self
    }

    /// Set verbosity level
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Print info message
    pub fn print_info(&self, message: &str) {
        if self.verbosity >= Verbosity::Normal {
            eprintln!("{} {}", "[INFO]".green(), message);
        }
    }

    /// Print error message
    pub fn print_error(&self, message: &str) {
        if self.verbosity >= Verbosity::Quiet {
            eprintln!("{} {}", "[ERROR]".red().bold(), message);
        }
    }

    /// Print debug message (only in verbose mode)
    pub fn print_debug(&self, message: &str) {
        if self.verbosity >= Verbosity::Verbose {
            eprintln!("{} {}", "[DEBUG]".dimmed(), message);
        }
    }

    /// Print step start message
    pub fn print_step_start(&self, step: &str) {
        self.print_info(&format!("Running {}", step.bold()));
    }

    /// Print step complete message
    pub fn print_step_complete(&self, step: &str, artifacts: usize) {
        self.print_debug(&format!("{} done ({} artifact(s))", step, artifacts));
    }

    /// Print environment switch message
    pub fn print_environment(&self, name: &str) {
        self.print_info(&format!("Environment: {}", name.cyan()));
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
