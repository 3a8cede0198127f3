//! File copy plugin
//!
//! Copies files matched by `src` globs under `cwd` into `dest`, keeping the
//! path relative to `cwd` (or only the file name with `flatten: true`).
//! Patterns starting with `!` exclude files matched by earlier patterns.
//! Mappings are given either directly in the options or as a `files` list.

use crate::plugin::{value_as_list, ArtifactList, Plugin, PluginContext, ResolvedOptions};
use anyhow::{anyhow, bail, Context as _};
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

pub struct CopyPlugin;

/// One `cwd/src → dest` mapping
#[derive(Debug, Clone, PartialEq)]
struct FileMapping {
    cwd: PathBuf,
    src: Vec<String>,
    dest: PathBuf,
    flatten: bool,
}

impl Plugin for CopyPlugin {
    fn run(&self, ctx: &PluginContext, options: &ResolvedOptions) -> anyhow::Result<ArtifactList> {
        let mappings = file_mappings(options).with_context(|| format!("{}: invalid copy options", ctx.step()))?;

        let mut artifacts = Vec::new();
        for mapping in &mappings {
            artifacts.extend(copy_mapping(&ctx.working_dir, mapping)?);
        }
        Ok(artifacts)
    }
}

fn file_mappings(options: &ResolvedOptions) -> anyhow::Result<Vec<FileMapping>> {
    match options.get("files") {
        Some(Value::Sequence(entries)) => entries.iter().map(mapping_from_value).collect(),
        Some(entry @ Value::Mapping(_)) => Ok(vec![mapping_from_value(entry)?]),
        Some(_) => bail!("'files' must be a mapping or a list of mappings"),
        None => Ok(vec![FileMapping {
            cwd: PathBuf::from(options.get_str("cwd").unwrap_or(".")),
            src: options.get_list("src").context("'src' is required")?,
            dest: PathBuf::from(options.get_str("dest").context("'dest' is required")?),
            flatten: options.get_bool("flatten").unwrap_or(false),
        }]),
    }
}

fn mapping_from_value(value: &Value) -> anyhow::Result<FileMapping> {
    let field = |key: &str| value.get(key);
    Ok(FileMapping {
        cwd: PathBuf::from(field("cwd").and_then(Value::as_str).unwrap_or(".")),
        src: field("src")
            .and_then(value_as_list)
            .ok_or_else(|| anyhow!("'src' is required in every files entry"))?,
        dest: PathBuf::from(
            field("dest")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("'dest' is required in every files entry"))?,
        ),
        flatten: field("flatten").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Files under `cwd` matched by the patterns, relative to `cwd`
fn expand(cwd: &Path, patterns: &[String]) -> anyhow::Result<BTreeSet<PathBuf>> {
    let mut matched = BTreeSet::new();
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            let exclude = glob::Pattern::new(negated)
                .with_context(|| format!("invalid pattern '{}'", pattern))?;
            matched.retain(|path: &PathBuf| !exclude.matches_path(path));
            continue;
        }

        let full = cwd.join(pattern);
        let full = full.to_string_lossy();
        for entry in glob::glob(&full).with_context(|| format!("invalid pattern '{}'", pattern))? {
            let path = entry?;
            if !path.is_file() {
                continue;
            }
            if let Ok(relative) = path.strip_prefix(cwd) {
                matched.insert(relative.to_path_buf());
            }
        }
    }
    Ok(matched)
}

fn copy_mapping(working_dir: &Path, mapping: &FileMapping) -> anyhow::Result<ArtifactList> {
    let cwd = working_dir.join(&mapping.cwd);
    let dest_root = working_dir.join(&mapping.dest);

    let mut written = Vec::new();
    for relative in expand(&cwd, &mapping.src)? {
        let target = if mapping.flatten {
            match relative.file_name() {
                Some(name) => dest_root.join(name),
                None => continue,
            }
        } else {
            dest_root.join(&relative)
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        fs::copy(cwd.join(&relative), &target).with_context(|| {
            format!(
                "failed to copy '{}' to '{}'",
                relative.display(),
                target.display()
            )
        })?;
        written.push(target);
    }

    tracing::debug!(
        cwd = %cwd.display(),
        dest = %dest_root.display(),
        count = written.len(),
        "copied files"
    );
    Ok(written)
}
