//! The configuration store
//!
//! Holds environment profiles, task definitions, sequences and watch rules,
//! and answers dotted-path lookups for the template resolver. The loaded data
//! is shared and immutable; only the active environment changes, and each
//! clone of the store carries its own.

use crate::config::node::{KeyPath, OptionNode};
use crate::config::schema::validate_config;
use crate::config::types::{ConfigFile, EnvironmentFile, TaskFile};
use crate::error::{ConfigError, ConfigResult, ResolveError, ResolveResult};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

/// Name of the built-in environment-switch task
pub const ENV_TASK: &str = "env";

/// A named bundle of path roots and variables
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentProfile {
    pub name: String,
    pub root: OptionNode,
    pub assets: OptionNode,
    pub variables: IndexMap<String, OptionNode>,
}

impl EnvironmentProfile {
    fn from_file(
        name: &str,
        file: &EnvironmentFile,
        base_variables: &IndexMap<String, String>,
    ) -> ConfigResult<Self> {
        let location = format!("environments.{}", name);
        let mut variables = IndexMap::new();
        for (key, value) in base_variables {
            variables.insert(key.clone(), OptionNode::Text(value.clone()));
        }
        for (key, value) in &file.variables {
            let node = OptionNode::from_yaml(value, &format!("{}.variables.{}", location, key))?;
            variables.insert(key.clone(), node);
        }

        Ok(EnvironmentProfile {
            name: name.to_string(),
            root: OptionNode::from_text(&file.root, &format!("{}.root", location))?,
            assets: OptionNode::from_text(&file.assets, &format!("{}.assets", location))?,
            variables,
        })
    }

    /// The lookup tree for `env.options.<name>`
    ///
    /// Variables are reachable both under `variables.<key>` and directly,
    /// unless they collide with `name`, `root` or `assets`.
    fn lookup_node(&self) -> OptionNode {
        let mut map = IndexMap::new();
        map.insert("name".to_string(), OptionNode::Text(self.name.clone()));
        map.insert("root".to_string(), self.root.clone());
        map.insert("assets".to_string(), self.assets.clone());
        map.insert("variables".to_string(), OptionNode::Map(self.variables.clone()));
        for (key, value) in &self.variables {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        OptionNode::Map(map)
    }
}

/// A task and its targets
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinition {
    pub name: String,
    /// Registry name of the plugin bound to this task
    pub plugin: String,
    pub options: IndexMap<String, OptionNode>,
    pub targets: IndexMap<String, TargetDefinition>,
}

impl TaskDefinition {
    fn from_file(name: &str, file: &TaskFile) -> ConfigResult<Self> {
        let location = format!("tasks.{}", name);
        let mut targets = IndexMap::new();
        for (target_name, target) in &file.targets {
            let target_location = format!("{}.{}", location, target_name);
            targets.insert(
                target_name.clone(),
                TargetDefinition {
                    name: target_name.clone(),
                    options: OptionNode::map_from(
                        &target.options,
                        &format!("{}.options", target_location),
                    )?,
                    data: OptionNode::map_from(&target.data, &target_location)?,
                },
            );
        }

        Ok(TaskDefinition {
            name: name.to_string(),
            plugin: file.plugin.clone().unwrap_or_else(|| name.to_string()),
            options: OptionNode::map_from(&file.options, &format!("{}.options", location))?,
            targets,
        })
    }

    /// Options for a target: task options, then target options, then target data
    pub fn merged_options(&self, target: &TargetDefinition) -> IndexMap<String, OptionNode> {
        let mut merged = self.options.clone();
        for (key, value) in target.options.iter().chain(target.data.iter()) {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    fn lookup_node(&self) -> OptionNode {
        let mut map = IndexMap::new();
        map.insert("options".to_string(), OptionNode::Map(self.options.clone()));
        for (name, target) in &self.targets {
            let mut target_map = target.data.clone();
            target_map.insert("options".to_string(), OptionNode::Map(target.options.clone()));
            map.insert(name.clone(), OptionNode::Map(target_map));
        }
        OptionNode::Map(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetDefinition {
    pub name: String,
    pub options: IndexMap<String, OptionNode>,
    pub data: IndexMap<String, OptionNode>,
}

/// A watch rule, referencing tasks by name only
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRuleDefinition {
    pub name: String,
    pub files: Vec<OptionNode>,
    pub tasks: Vec<String>,
    pub livereload: bool,
}

/// Runner-wide settings from the configuration file
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub interpreter: Vec<String>,
    pub plugin_timeout: Option<Duration>,
    pub debounce: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            interpreter: vec!["sh".to_string(), "-c".to_string()],
            plugin_timeout: None,
            debounce: Duration::from_millis(250),
        }
    }
}

#[derive(Debug)]
struct StoreData {
    settings: Settings,
    environments: IndexMap<String, EnvironmentProfile>,
    tasks: IndexMap<String, TaskDefinition>,
    sequences: IndexMap<String, Vec<String>>,
    watch: Vec<WatchRuleDefinition>,
    /// Root of the lookup tree (everything except `env.active`)
    tree: OptionNode,
}

/// Loaded configuration plus the active environment
#[derive(Debug, Clone)]
pub struct ConfigStore {
    data: Arc<StoreData>,
    active: Option<String>,
}

impl ConfigStore {
    /// Build a store from a parsed configuration file
    pub fn load(file: ConfigFile) -> ConfigResult<Self> {
        Self::load_with_variables(file, IndexMap::new())
    }

    /// Build a store, seeding every environment with `base_variables`
    pub fn load_with_variables(
        file: ConfigFile,
        base_variables: IndexMap<String, String>,
    ) -> ConfigResult<Self> {
        validate_config(&file)?;

        let mut environments = IndexMap::new();
        for (name, env) in &file.environments {
            environments.insert(
                name.clone(),
                EnvironmentProfile::from_file(name, env, &base_variables)?,
            );
        }

        let mut tasks = IndexMap::new();
        for (name, task) in &file.tasks {
            tasks.insert(name.clone(), TaskDefinition::from_file(name, task)?);
        }

        let mut watch = Vec::new();
        for (name, rule) in &file.watch {
            let files = rule
                .files
                .iter()
                .enumerate()
                .map(|(i, pattern)| {
                    OptionNode::from_text(pattern, &format!("watch.{}.files[{}]", name, i))
                })
                .collect::<ConfigResult<Vec<_>>>()?;
            watch.push(WatchRuleDefinition {
                name: name.clone(),
                files,
                tasks: rule.tasks.clone(),
                livereload: rule.livereload,
            });
        }

        let tree = build_tree(&file, &environments, &tasks)?;

        let mut settings = Settings::default();
        if let Some(interpreter) = &file.interpreter {
            if interpreter.is_empty() {
                return Err(ConfigError::Invalid("interpreter must not be empty".to_string()));
            }
            settings.interpreter = interpreter.clone();
        }
        settings.plugin_timeout = file.plugin_timeout.map(Duration::from_secs);
        if let Some(ms) = file.debounce_ms {
            settings.debounce = Duration::from_millis(ms);
        }

        Ok(ConfigStore {
            data: Arc::new(StoreData {
                settings,
                environments,
                tasks,
                sequences: file.sequences,
                watch,
                tree,
            }),
            active: None,
        })
    }

    /// Value at a dotted path
    ///
    /// `env.active.<key>` is answered from the active environment.
    pub fn get(&self, path: &KeyPath) -> ResolveResult<&OptionNode> {
        let segments = path.segments();
        let missing = || ResolveError::Lookup(path.to_string());

        if segments.len() >= 2 && segments[0] == ENV_TASK && segments[1] == "active" {
            let active = self
                .active
                .as_deref()
                .ok_or_else(|| ResolveError::NoActiveEnvironment(path.to_string()))?;
            let mut node = self
                .data
                .tree
                .child(ENV_TASK)
                .and_then(|env| env.child("options"))
                .and_then(|options| options.child(active))
                .ok_or_else(missing)?;
            for segment in &segments[2..] {
                node = node.child(segment).ok_or_else(missing)?;
            }
            return Ok(node);
        }

        let mut node = &self.data.tree;
        for segment in segments {
            node = node.child(segment).ok_or_else(missing)?;
        }
        Ok(node)
    }

    /// Switch the environment seen by later lookups
    pub fn set_active_environment(&mut self, name: &str) -> ResolveResult<()> {
        if !self.data.environments.contains_key(name) {
            return Err(ResolveError::Lookup(format!("environments.{}", name)));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn active_environment(&self) -> Option<&EnvironmentProfile> {
        self.active
            .as_deref()
            .and_then(|name| self.data.environments.get(name))
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentProfile> {
        self.data.environments.get(name)
    }

    pub fn environments(&self) -> impl Iterator<Item = &EnvironmentProfile> {
        self.data.environments.values()
    }

    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.data.tasks.get(name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.data.tasks.values()
    }

    pub fn sequence(&self, name: &str) -> Option<&[String]> {
        self.data.sequences.get(name).map(Vec::as_slice)
    }

    pub fn sequences(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.data.sequences.iter()
    }

    pub fn watch_rules(&self) -> &[WatchRuleDefinition] {
        &self.data.watch
    }

    pub fn settings(&self) -> &Settings {
        &self.data.settings
    }
}

/// Assemble the lookup tree: `env.options.*`, each task, then `vars`
fn build_tree(
    file: &ConfigFile,
    environments: &IndexMap<String, EnvironmentProfile>,
    tasks: &IndexMap<String, TaskDefinition>,
) -> ConfigResult<OptionNode> {
    let mut root = IndexMap::new();

    let profiles = environments
        .iter()
        .map(|(name, profile)| (name.clone(), profile.lookup_node()))
        .collect();
    let mut env = IndexMap::new();
    env.insert("options".to_string(), OptionNode::Map(profiles));
    root.insert(ENV_TASK.to_string(), OptionNode::Map(env));

    for (name, task) in tasks {
        root.insert(name.clone(), task.lookup_node());
    }

    for (name, value) in &file.vars {
        if root.contains_key(name) {
            return Err(ConfigError::DuplicateName(name.clone()));
        }
        root.insert(name.clone(), OptionNode::from_yaml(value, &format!("vars.{}", name))?);
    }

    Ok(OptionNode::Map(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(yaml: &str) -> ConfigStore {
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        ConfigStore::load(file).unwrap()
    }

    const YAML: &str = r#"
vars:
  pkg:
    name: site
environments:
  source:
    root: site/source
    assets: site/source/assets
  development:
    root: site/development
    assets: site/development/assets
    variables:
      NODE_ENV: development
tasks:
  copy:
    options:
      mode: preserve
    development:
      dest: "<%= env.options.development.assets %>"
"#;

    #[test]
    fn test_get_environment_attributes() {
        let store = store(YAML);
        let node = store
            .get(&KeyPath::new(["env", "options", "source", "assets"]))
            .unwrap();
        assert_eq!(node, &OptionNode::Text("site/source/assets".to_string()));

        let node = store
            .get(&KeyPath::new(["env", "options", "development", "NODE_ENV"]))
            .unwrap();
        assert_eq!(node, &OptionNode::Text("development".to_string()));
    }

    #[test]
    fn test_get_task_and_vars() {
        let store = store(YAML);
        assert_eq!(
            store.get(&KeyPath::new(["copy", "options", "mode"])).unwrap(),
            &OptionNode::Text("preserve".to_string())
        );
        assert!(matches!(
            store.get(&KeyPath::new(["copy", "development", "dest"])).unwrap(),
            OptionNode::Template(_)
        ));
        assert_eq!(
            store.get(&KeyPath::new(["pkg", "name"])).unwrap(),
            &OptionNode::Text("site".to_string())
        );
    }

    #[test]
    fn test_get_missing_path() {
        let store = store(YAML);
        let result = store.get(&KeyPath::new(["env", "options", "staging", "root"]));
        assert_eq!(
            result,
            Err(ResolveError::Lookup("env.options.staging.root".to_string()))
        );
    }

    #[test]
    fn test_active_environment_lookup() {
        let mut store = store(YAML);
        let path = KeyPath::new(["env", "active", "assets"]);
        assert!(matches!(
            store.get(&path),
            Err(ResolveError::NoActiveEnvironment(_))
        ));

        store.set_active_environment("development").unwrap();
        assert_eq!(
            store.get(&path).unwrap(),
            &OptionNode::Text("site/development/assets".to_string())
        );

        store.set_active_environment("source").unwrap();
        assert_eq!(
            store.get(&path).unwrap(),
            &OptionNode::Text("site/source/assets".to_string())
        );
    }

    #[test]
    fn test_unknown_environment() {
        let mut store = store(YAML);
        assert!(store.set_active_environment("production").is_err());
        assert!(store.active_environment().is_none());
    }

    #[test]
    fn test_clones_have_independent_active_environment() {
        let mut first = store(YAML);
        let second = first.clone();
        first.set_active_environment("development").unwrap();
        assert_eq!(first.active_environment().unwrap().name, "development");
        assert!(second.active_environment().is_none());
    }

    #[test]
    fn test_base_variables_are_overridden_by_profile() {
        let file: ConfigFile = serde_yaml::from_str(YAML).unwrap();
        let mut base = IndexMap::new();
        base.insert("NODE_ENV".to_string(), "test".to_string());
        base.insert("API_KEY".to_string(), "secret".to_string());
        let store = ConfigStore::load_with_variables(file, base).unwrap();

        let dev = store.environment("development").unwrap();
        assert_eq!(
            dev.variables.get("NODE_ENV"),
            Some(&OptionNode::Text("development".to_string()))
        );
        let source = store.environment("source").unwrap();
        assert_eq!(
            source.variables.get("API_KEY"),
            Some(&OptionNode::Text("secret".to_string()))
        );
    }

    #[test]
    fn test_merged_options_target_wins() {
        let store = store(
            r#"
tasks:
  uglify:
    options:
      mangle: true
      banner: top
    production:
      options:
        mangle: false
      src: js/*.js
"#,
        );
        let task = store.task("uglify").unwrap();
        let target = task.targets.get("production").unwrap();
        let merged = task.merged_options(target);
        assert_eq!(merged.get("mangle"), Some(&OptionNode::Bool(false)));
        assert_eq!(merged.get("banner"), Some(&OptionNode::Text("top".to_string())));
        assert_eq!(merged.get("src"), Some(&OptionNode::Text("js/*.js".to_string())));
        assert_eq!(task.plugin, "uglify");
    }

    #[test]
    fn test_settings() {
        let store = store(
            r#"
interpreter: [bash, -c]
plugin-timeout: 30
debounce-ms: 100
"#,
        );
        let settings = store.settings();
        assert_eq!(settings.interpreter, vec!["bash", "-c"]);
        assert_eq!(settings.plugin_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.debounce, Duration::from_millis(100));
    }
}
