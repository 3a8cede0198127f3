//! Common test utilities

#![allow(dead_code)]

use assetline::config::{parse_config, ConfigStore};
use assetline::plugin::{PluginRegistry, PluginRegistryBuilder, ResolvedOptions};
use assetline::runner::{Context, Runner, Verbosity};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A site with source, development and production profiles
pub const SITE_CONFIG: &str = r#"
vars:
  assets: site/source/assets
environments:
  source:
    root: site/source
    assets: site/source/assets
  development:
    root: site/development
    assets: site/development/assets
    variables:
      NODE_ENV: development
  production:
    root: site/production
    assets: site/production/assets
    variables:
      NODE_ENV: production
tasks:
  compass:
    plugin: compass
    options:
      sassDir: "<%= env.options.source.assets %>/sass"
    development:
      options:
        cssDir: "<%= env.active.assets %>/css"
        outputStyle: expanded
    production:
      options:
        cssDir: "<%= env.active.assets %>/css"
        outputStyle: compressed
  copy:
    plugin: copy
    development:
      files:
        - cwd: "<%= env.options.source.assets %>"
          src: ["fonts/**/*"]
          dest: "<%= env.options.development.assets %>"
    production:
      files:
        - cwd: "<%= env.options.source.assets %>"
          src: ["fonts/**/*"]
          dest: "<%= env.options.production.assets %>"
sequences:
  development: [env:development, compass:development, copy:development]
  production: [env:production, compass:production, copy:production]
"#;

/// Create a temporary directory with an assetline.yml file
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("assetline.yml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Create a test config with an empty subdirectory beside it
pub fn create_test_config_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("assetline.yml");
    let sub_dir = temp_dir.path().join("subdir");

    fs::write(&config_path, content).unwrap();
    fs::create_dir(&sub_dir).unwrap();

    (temp_dir, config_path, sub_dir)
}

/// Write a file (and its parent directories) below `root`
pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

pub fn store(yaml: &str) -> ConfigStore {
    ConfigStore::load(parse_config(yaml).unwrap()).unwrap()
}

/// Every invocation as (`task:target`, resolved options)
pub type InvocationLog = Arc<Mutex<Vec<(String, ResolvedOptions)>>>;

/// Register plugins that record their invocations; `failing` ones return an error
pub fn recording_registry(plugins: &[&str], failing: &[&str]) -> (PluginRegistryBuilder, InvocationLog) {
    let log: InvocationLog = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PluginRegistry::builder();
    for &name in plugins {
        let log = Arc::clone(&log);
        let fail = failing.contains(&name);
        builder = builder.register_fn(name, move |ctx, options| {
            log.lock().unwrap().push((ctx.step(), options.clone()));
            if fail {
                anyhow::bail!("{} exited with code 1", ctx.step());
            }
            Ok(Vec::new())
        });
    }
    (builder, log)
}

/// A silent runner over `yaml` with recording plugins
pub fn recording_runner(yaml: &str, plugins: &[&str], failing: &[&str]) -> (Runner, InvocationLog) {
    let (builder, log) = recording_registry(plugins, failing);
    let runner = Runner::new(store(yaml), Arc::new(builder.build()))
        .with_context(Context::new().with_verbosity(Verbosity::Silent));
    (runner, log)
}

/// Steps recorded so far
pub fn invoked_steps(log: &InvocationLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|(step, _)| step.clone()).collect()
}
