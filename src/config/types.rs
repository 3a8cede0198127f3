//! Raw configuration types
//!
//! This module defines the data structures that represent an assetline.yml
//! file exactly as written. Option values stay as YAML values here; they are
//! parsed into [`OptionNode`](crate::config::OptionNode) trees when the
//! store is built.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    /// Interpreter used by the shell plugin (e.g., ["sh", "-c"])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<Vec<String>>,

    /// Upper bound for a single plugin invocation, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_timeout: Option<u64>,

    /// Quiet period used to coalesce file-system events, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,

    /// Free-form data reachable from placeholders (e.g. `pkg.name`)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub vars: IndexMap<String, Value>,

    /// Environment profiles
    #[serde(default)]
    pub environments: IndexMap<String, EnvironmentFile>,

    /// Task definitions
    #[serde(default)]
    pub tasks: IndexMap<String, TaskFile>,

    /// Named sequences of step references
    #[serde(default)]
    pub sequences: IndexMap<String, Vec<String>>,

    /// Watch rules
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub watch: IndexMap<String, WatchFile>,
}

/// An environment profile as written
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentFile {
    /// Root path of the environment
    pub root: String,

    /// Assets path of the environment
    pub assets: String,

    /// Arbitrary variables (e.g. NODE_ENV)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, Value>,
}

/// A task definition as written
///
/// Every key other than `plugin` and `options` is a target.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskFile {
    /// Plugin to invoke (defaults to the task name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    /// Options shared by all targets
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, Value>,

    /// Named targets
    #[serde(flatten)]
    pub targets: IndexMap<String, TargetFile>,
}

/// A target as written
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TargetFile {
    /// Options overriding the task options
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, Value>,

    /// Any other target data (files, src, dest, ...)
    #[serde(flatten)]
    pub data: IndexMap<String, Value>,
}

/// A watch rule as written
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WatchFile {
    /// Glob patterns (may contain placeholders)
    #[serde(deserialize_with = "deserialize_string_list")]
    pub files: Vec<String>,

    /// Step references to run on change
    #[serde(deserialize_with = "deserialize_string_list")]
    pub tasks: Vec<String>,

    /// Emit a live-reload notification after a successful run
    #[serde(default)]
    pub livereload: bool,
}

/// Custom deserializer that accepts a single string or a list of strings
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::String(s) => Ok(vec![s]),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(D::Error::custom(format!(
                    "expected a string, found {:?}",
                    other
                ))),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("expected a string or a list of strings")),
    }
}
