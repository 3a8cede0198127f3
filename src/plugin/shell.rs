//! Command execution plugin
//!
//! Delegates a step to an external tool (a stylesheet compiler, a minifier,
//! an image optimizer) by running one or more commands through the
//! configured interpreter.
//!
//! Options:
//! - `command`: a command or list of commands, run in order
//! - `dir`: working directory, relative to the project
//! - `quiet`: discard the command's standard output
//! - `outputs`: glob patterns reported as artifacts once the commands succeed

use crate::plugin::{ArtifactList, Plugin, PluginContext, ResolvedOptions};
use anyhow::{bail, Context as _};
use std::path::Path;
use std::process::{Command as StdCommand, Stdio};

pub struct ShellPlugin;

impl Plugin for ShellPlugin {
    fn run(&self, ctx: &PluginContext, options: &ResolvedOptions) -> anyhow::Result<ArtifactList> {
        let commands = options
            .get_list("command")
            .with_context(|| format!("{}: 'command' must be a string or a list of strings", ctx.step()))?;
        if commands.is_empty() {
            bail!("{}: no command given", ctx.step());
        }

        let working_dir = match options.get_str("dir") {
            Some(dir) => ctx.working_dir.join(dir),
            None => ctx.working_dir.clone(),
        };
        let quiet = options.get_bool("quiet").unwrap_or(false);

        for command in &commands {
            execute_command(command, &working_dir, quiet, ctx)?;
        }

        match options.get_list("outputs") {
            Some(patterns) => collect_outputs(&ctx.working_dir, &patterns),
            None => Ok(Vec::new()),
        }
    }
}

/// Run a single command through the interpreter
fn execute_command(
    command: &str,
    working_dir: &Path,
    quiet: bool,
    ctx: &PluginContext,
) -> anyhow::Result<()> {
    let (program, interpreter_args) = ctx
        .interpreter
        .split_first()
        .context("interpreter is empty")?;

    let mut process = StdCommand::new(program);
    process.args(interpreter_args);
    process.arg(command);
    process.current_dir(working_dir);

    process.stdin(Stdio::null());
    process.stdout(if quiet { Stdio::null() } else { Stdio::inherit() });
    process.stderr(Stdio::inherit());

    for (key, value) in &ctx.variables {
        process.env(key, value);
    }

    tracing::debug!(step = %ctx.step(), command, dir = %working_dir.display(), "spawning command");

    let status = process
        .status()
        .with_context(|| format!("failed to start '{}'", command))?;

    if !status.success() {
        match status.code() {
            Some(code) => bail!("'{}' exited with code {}", command, code),
            None => bail!("'{}' was terminated by a signal", command),
        }
    }

    Ok(())
}

/// Expand output globs relative to the working directory
fn collect_outputs(working_dir: &Path, patterns: &[String]) -> anyhow::Result<ArtifactList> {
    let mut artifacts = Vec::new();
    for pattern in patterns {
        let full = working_dir.join(pattern);
        let full = full.to_string_lossy();
        for entry in glob::glob(&full).with_context(|| format!("invalid output pattern '{}'", pattern))? {
            let path = entry?;
            if path.is_file() {
                artifacts.push(path);
            }
        }
    }
    artifacts.sort();
    artifacts.dedup();
    Ok(artifacts)
}
