//! Configuration validation
//!
//! Structural checks that must pass before any task runs. References from
//! sequences to tasks and targets are checked per sequence by the runner, so
//! a typo in one sequence does not make the others unusable.

use crate::config::store::ENV_TASK;
use crate::config::types::ConfigFile;
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashSet;

/// Validate a complete configuration file
pub fn validate_config(config: &ConfigFile) -> ConfigResult<()> {
    if config.tasks.contains_key(ENV_TASK) {
        return Err(ConfigError::ReservedName(ENV_TASK.to_string()));
    }
    if config.sequences.contains_key(ENV_TASK) {
        return Err(ConfigError::ReservedName(ENV_TASK.to_string()));
    }

    for (name, task) in &config.tasks {
        validate_name("task", name)?;
        if task.plugin.as_deref() == Some("") {
            return Err(ConfigError::Invalid(format!(
                "task '{}' has an empty plugin name",
                name
            )));
        }
        for target in task.targets.keys() {
            validate_name("target", target)?;
        }
    }

    for (name, steps) in &config.sequences {
        validate_name("sequence", name)?;
        if config.tasks.contains_key(name) {
            return Err(ConfigError::DuplicateName(name.clone()));
        }
        if steps.iter().any(|step| step.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "sequence '{}' contains an empty step",
                name
            )));
        }
    }

    for (name, rule) in &config.watch {
        if rule.files.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "watch rule '{}' has no file patterns",
                name
            )));
        }
        if rule.tasks.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "watch rule '{}' has no tasks",
                name
            )));
        }
    }

    detect_circular_sequences(config)
}

/// Names are used as `task:target` references, so they cannot contain `:`
fn validate_name(kind: &str, name: &str) -> ConfigResult<()> {
    if name.trim().is_empty() || name.contains(':') || name.contains('.') {
        return Err(ConfigError::Invalid(format!(
            "invalid {} name '{}'",
            kind, name
        )));
    }
    Ok(())
}

/// Detect sequences that include themselves through other sequences
fn detect_circular_sequences(config: &ConfigFile) -> ConfigResult<()> {
    let mut visited = HashSet::new();
    for name in config.sequences.keys() {
        let mut stack = Vec::new();
        check_sequence_cycle(config, name, &mut visited, &mut stack)?;
    }
    Ok(())
}

/// Recursively check for cycles between sequences
fn check_sequence_cycle(
    config: &ConfigFile,
    name: &str,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
) -> ConfigResult<()> {
    if stack.iter().any(|s| s == name) {
        stack.push(name.to_string());
        return Err(ConfigError::CircularSequence(stack.join(" -> ")));
    }

    if visited.contains(name) {
        return Ok(());
    }

    let Some(steps) = config.sequences.get(name) else {
        return Ok(());
    };

    stack.push(name.to_string());
    for step in steps {
        if !step.contains(':') && config.sequences.contains_key(step.as_str()) {
            check_sequence_cycle(config, step, visited, stack)?;
        }
    }
    stack.pop();
    visited.insert(name.to_string());

    Ok(())
}
