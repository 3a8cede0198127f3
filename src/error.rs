//! Error types for assetline

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for assetline operations
pub type Result<T> = std::result::Result<T, AssetlineError>;

/// Main error type for assetline
#[derive(Error, Debug)]
pub enum AssetlineError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sequence execution errors
    #[error("{0}")]
    Run(#[from] RunError),

    /// Placeholder resolution errors outside of a running sequence
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// File watching errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid command line; clap renders the message
    #[error("{0}")]
    Usage(#[from] clap::Error),
}

impl AssetlineError {
    /// Process exit code for this failure class
    pub fn exit_code(&self) -> i32 {
        match self {
            AssetlineError::Config(_) => exit_code::CONFIG,
            AssetlineError::Run(err) => err.exit_code(),
            AssetlineError::Resolve(err) => err.exit_code(),
            AssetlineError::Watch(_) | AssetlineError::Io(_) => exit_code::FAILURE,
            AssetlineError::Usage(_) => exit_code::USAGE,
        }
    }
}

/// Exit codes reported by the binary
pub mod exit_code {
    pub const FAILURE: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const UNKNOWN_REFERENCE: i32 = 3;
    pub const PLUGIN: i32 = 4;
    pub const CYCLIC_REFERENCE: i32 = 5;
    /// Command-line misuse (sysexits `EX_USAGE`)
    pub const USAGE: i32 = 64;
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config file (searched: {0})")]
    NotFound(String),

    #[error("Failed to read '{path}': {error}")]
    Read { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Name '{0}' is reserved for environment switching")]
    ReservedName(String),

    #[error("Name '{0}' is declared more than once")]
    DuplicateName(String),

    #[error("Malformed placeholder in '{location}': {message}")]
    Template { location: String, message: String },

    #[error("Sequence '{0}' includes itself")]
    CircularSequence(String),

    #[error("Failed to load environment file '{path}': {error}")]
    DotEnv { path: PathBuf, error: String },
}

/// Placeholder resolution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("'{0}' is not defined")]
    Lookup(String),

    #[error("No environment is active (while looking up '{0}')")]
    NoActiveEnvironment(String),

    #[error("Unknown helper '{0}'")]
    UnknownHelper(String),

    #[error("Cyclic reference: {0}")]
    CyclicReference(String),

    #[error("'{0}' is a mapping and cannot be embedded in a string")]
    NotScalar(String),

    #[error("Helper '{name}' failed: {message}")]
    Helper { name: String, message: String },
}

impl ResolveError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::CyclicReference(_) => exit_code::CYCLIC_REFERENCE,
            ResolveError::Lookup(_)
            | ResolveError::NoActiveEnvironment(_)
            | ResolveError::UnknownHelper(_) => exit_code::UNKNOWN_REFERENCE,
            ResolveError::NotScalar(_) | ResolveError::Helper { .. } => exit_code::FAILURE,
        }
    }
}

/// Why a plugin invocation failed
#[derive(Error, Debug)]
pub enum PluginFailure {
    #[error("{0:#}")]
    Failed(anyhow::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("'{0}' is still running from a call that timed out")]
    Busy(String),
}

/// A failure surfaced by a plugin
#[derive(Error, Debug)]
#[error("plugin '{name}' failed: {cause}")]
pub struct PluginError {
    pub name: String,
    #[source]
    pub cause: PluginFailure,
}

/// Sequence execution errors
///
/// Every variant names the sequence, the zero-based step index and the
/// step (`task:target`) it happened in.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Sequence '{sequence}', step {index} ('{step}'): unknown task or target")]
    UnknownTask {
        sequence: String,
        index: usize,
        step: String,
    },

    #[error("Sequence '{sequence}', step {index} ('{step}'): no plugin registered as '{plugin}'")]
    UnknownPlugin {
        sequence: String,
        index: usize,
        step: String,
        plugin: String,
    },

    #[error("Sequence '{sequence}', step {index} ('{step}'): {source}")]
    Resolve {
        sequence: String,
        index: usize,
        step: String,
        #[source]
        source: ResolveError,
    },

    #[error("Sequence '{sequence}', step {index} ('{step}'): {source}")]
    Plugin {
        sequence: String,
        index: usize,
        step: String,
        #[source]
        source: PluginError,
    },
}

impl RunError {
    /// Name of the failing step, e.g. `compass:production`
    pub fn step(&self) -> &str {
        match self {
            RunError::UnknownTask { step, .. }
            | RunError::UnknownPlugin { step, .. }
            | RunError::Resolve { step, .. }
            | RunError::Plugin { step, .. } => step,
        }
    }

    /// Zero-based index of the failing step
    pub fn index(&self) -> usize {
        match self {
            RunError::UnknownTask { index, .. }
            | RunError::UnknownPlugin { index, .. }
            | RunError::Resolve { index, .. }
            | RunError::Plugin { index, .. } => *index,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::UnknownTask { .. } | RunError::UnknownPlugin { .. } => {
                exit_code::UNKNOWN_REFERENCE
            }
            RunError::Resolve { source, .. } => source.exit_code(),
            RunError::Plugin { .. } => exit_code::PLUGIN,
        }
    }
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for resolution operations
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Specialized result type for sequence execution
pub type RunResult<T> = std::result::Result<T, RunError>;
