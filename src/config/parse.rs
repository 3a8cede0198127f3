//! Configuration file parsing and discovery

use crate::config::store::ConfigStore;
use crate::config::types::ConfigFile;
use crate::error::{ConfigError, ConfigResult};
use indexmap::IndexMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["assetline.yml", "assetline.yaml"];

/// Environment file loaded next to the configuration file
const DOTENV_FILE: &str = ".env";

/// Find the configuration file by searching current and parent directories
pub fn find_config_file() -> ConfigResult<PathBuf> {
    find_config_file_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the configuration file starting from a specific directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            searched_paths.push(config_path.display().to_string());

            if config_path.is_file() {
                return Ok(config_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse configuration from a string
///
/// The document is read as a generic YAML value first, which rejects
/// duplicate keys (two tasks with the same name) instead of silently keeping
/// the last one.
pub fn parse_config(yaml: &str) -> ConfigResult<ConfigFile> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    if value.is_null() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_value(value)?)
}

/// Parse a configuration file from a path
pub fn parse_config_file(path: &Path) -> ConfigResult<ConfigFile> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    parse_config(&contents)
}

/// Read `KEY=value` pairs from the `.env` file in `dir`, if there is one
pub fn load_dotenv(dir: &Path) -> ConfigResult<IndexMap<String, String>> {
    let path = dir.join(DOTENV_FILE);
    let mut variables = IndexMap::new();
    if !path.is_file() {
        return Ok(variables);
    }

    let dotenv_error = |e: dotenvy::Error| ConfigError::DotEnv {
        path: path.clone(),
        error: e.to_string(),
    };
    for item in dotenvy::from_path_iter(&path).map_err(dotenv_error)? {
        let (key, value) = item.map_err(dotenv_error)?;
        variables.insert(key, value);
    }

    Ok(variables)
}

/// Load a store from a file, including the `.env` file beside it
pub fn load_store(path: &Path) -> ConfigResult<ConfigStore> {
    let file = parse_config_file(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let variables = load_dotenv(base_dir)?;
    ConfigStore::load_with_variables(file, variables)
}

/// Load a store with automatic file discovery
pub fn load_store_auto() -> ConfigResult<(ConfigStore, PathBuf)> {
    let config_path = find_config_file()?;
    let store = load_store(&config_path)?;
    Ok((store, config_path))
}
