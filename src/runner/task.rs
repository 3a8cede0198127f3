//! Sequence execution
//!
//! A sequence is expanded into concrete steps and every step is checked
//! before the first one runs. Steps then execute strictly in order: options
//! are resolved against the store as it is at that point (earlier `env:`
//! steps may have switched the active environment) and the task's plugin is
//! invoked. The first failure ends the run.

use crate::config::{ConfigStore, TaskDefinition, ENV_TASK};
use crate::error::{ResolveError, RunError, RunResult};
use crate::plugin::{ArtifactList, PluginContext, PluginRegistry, ResolvedOptions};
use crate::runner::{Context, Resolver};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// A concrete step of an expanded sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `env:<name>`: switch the active environment
    Environment(String),
    /// `task:target`: invoke the task's plugin
    Task { task: String, target: String },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Environment(name) => write!(f, "{}:{}", ENV_TASK, name),
            Step::Task { task, target } => write!(f, "{}:{}", task, target),
        }
    }
}

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: Step,
    pub artifacts: ArtifactList,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub sequence: String,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn artifacts(&self) -> impl Iterator<Item = &std::path::PathBuf> {
        self.steps.iter().flat_map(|s| s.artifacts.iter())
    }
}

/// A step with its options resolved but not executed
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub step: Step,
    /// Plugin that would be invoked (none for environment switches)
    pub plugin: Option<String>,
    /// Environment active when the step runs
    pub environment: Option<String>,
    pub options: ResolvedOptions,
}

/// Executes sequences against a store and a plugin registry
///
/// Cloning a runner is cheap and gives an isolated active environment.
#[derive(Clone)]
pub struct Runner {
    store: ConfigStore,
    registry: Arc<PluginRegistry>,
    resolver: Resolver,
    context: Context,
}

impl Runner {
    pub fn new(store: ConfigStore, registry: Arc<PluginRegistry>) -> Self {
        Runner {
            store,
            registry,
            resolver: Resolver::new(),
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore {
        &mut self.store
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Run a named sequence (or a single `task:target` / task reference)
    pub fn run_sequence(&mut self, name: &str) -> RunResult<RunReport> {
        self.run(name, &[name.to_string()])
    }

    /// Run a list of step references; `label` names the run in errors
    pub fn run(&mut self, label: &str, references: &[String]) -> RunResult<RunReport> {
        let steps = self.expand(label, references)?;
        let mut reports = Vec::with_capacity(steps.len());

        for (index, step) in steps.into_iter().enumerate() {
            let artifacts = self.execute_step(label, index, &step)?;
            reports.push(StepReport { step, artifacts });
        }

        Ok(RunReport {
            sequence: label.to_string(),
            steps: reports,
        })
    }

    /// Resolve every step of a sequence without invoking any plugin
    pub fn plan(&self, label: &str, references: &[String]) -> RunResult<Vec<PlannedStep>> {
        let steps = self.expand(label, references)?;
        let mut store = self.store.clone();
        let mut planned = Vec::with_capacity(steps.len());

        for (index, step) in steps.into_iter().enumerate() {
            let (plugin, options) = match &step {
                Step::Environment(name) => {
                    store
                        .set_active_environment(name)
                        .map_err(|source| resolve_error(label, index, &step, source))?;
                    (None, ResolvedOptions::default())
                }
                Step::Task { task, target } => {
                    let definition = self.task_definition(task, label, index, &step)?;
                    let options =
                        self.resolve_options(&store, definition, target, label, index, &step)?;
                    (Some(definition.plugin.clone()), options)
                }
            };
            planned.push(PlannedStep {
                plugin,
                environment: store.active_environment().map(|env| env.name.clone()),
                options,
                step,
            });
        }

        Ok(planned)
    }

    /// Expand references into concrete steps and check each one
    pub fn expand(&self, label: &str, references: &[String]) -> RunResult<Vec<Step>> {
        let mut steps = Vec::new();
        for reference in references {
            self.expand_reference(label, reference, &mut steps)?;
        }
        Ok(steps)
    }

    fn expand_reference(&self, label: &str, reference: &str, steps: &mut Vec<Step>) -> RunResult<()> {
        let unknown = |steps: &Vec<Step>| RunError::UnknownTask {
            sequence: label.to_string(),
            index: steps.len(),
            step: reference.to_string(),
        };

        if let Some((task, target)) = reference.split_once(':') {
            if task == ENV_TASK {
                if self.store.environment(target).is_none() {
                    return Err(unknown(steps));
                }
                steps.push(Step::Environment(target.to_string()));
                return Ok(());
            }

            let definition = self.store.task(task).ok_or_else(|| unknown(steps))?;
            if !definition.targets.contains_key(target) {
                return Err(unknown(steps));
            }
            self.check_plugin(label, steps.len(), reference, definition)?;
            steps.push(Step::Task {
                task: task.to_string(),
                target: target.to_string(),
            });
            return Ok(());
        }

        if let Some(nested) = self.store.sequence(reference) {
            for inner in nested {
                self.expand_reference(label, inner, steps)?;
            }
            return Ok(());
        }

        // A bare task name runs every target in declaration order
        let definition = self.store.task(reference).ok_or_else(|| unknown(steps))?;
        if definition.targets.is_empty() {
            return Err(unknown(steps));
        }
        self.check_plugin(label, steps.len(), reference, definition)?;
        for target in definition.targets.keys() {
            steps.push(Step::Task {
                task: reference.to_string(),
                target: target.clone(),
            });
        }
        Ok(())
    }

    fn check_plugin(
        &self,
        label: &str,
        index: usize,
        reference: &str,
        definition: &TaskDefinition,
    ) -> RunResult<()> {
        if self.registry.contains(&definition.plugin) {
            return Ok(());
        }
        Err(RunError::UnknownPlugin {
            sequence: label.to_string(),
            index,
            step: reference.to_string(),
            plugin: definition.plugin.clone(),
        })
    }

    fn execute_step(&mut self, label: &str, index: usize, step: &Step) -> RunResult<ArtifactList> {
        match step {
            Step::Environment(name) => {
                self.store
                    .set_active_environment(name)
                    .map_err(|source| resolve_error(label, index, step, source))?;
                self.context.print_environment(name);
                Ok(Vec::new())
            }
            Step::Task { task, target } => {
                let definition = self.task_definition(task, label, index, step)?;
                let options =
                    self.resolve_options(&self.store, definition, target, label, index, step)?;
                let plugin_ctx = self.plugin_context(task, target, label, index, step)?;

                let name = step.to_string();
                self.context.print_step_start(&name);
                tracing::debug!(step = %name, plugin = %definition.plugin, options = ?options, "invoking plugin");

                let artifacts = self
                    .registry
                    .invoke(&definition.plugin, &plugin_ctx, &options)
                    .map_err(|source| RunError::Plugin {
                        sequence: label.to_string(),
                        index,
                        step: name.clone(),
                        source,
                    })?;

                self.context.print_step_complete(&name, artifacts.len());
                Ok(artifacts)
            }
        }
    }

    fn task_definition(
        &self,
        task: &str,
        label: &str,
        index: usize,
        step: &Step,
    ) -> RunResult<&TaskDefinition> {
        self.store.task(task).ok_or_else(|| RunError::UnknownTask {
            sequence: label.to_string(),
            index,
            step: step.to_string(),
        })
    }

    /// Task options, overridden by target options and target data, resolved
    fn resolve_options(
        &self,
        store: &ConfigStore,
        definition: &TaskDefinition,
        target: &str,
        label: &str,
        index: usize,
        step: &Step,
    ) -> RunResult<ResolvedOptions> {
        let target = definition.targets.get(target).ok_or_else(|| RunError::UnknownTask {
            sequence: label.to_string(),
            index,
            step: step.to_string(),
        })?;
        let merged = definition.merged_options(target);
        self.resolver
            .resolve_map(&merged, store)
            .map(ResolvedOptions::new)
            .map_err(|source| resolve_error(label, index, step, source))
    }

    fn plugin_context(
        &self,
        task: &str,
        target: &str,
        label: &str,
        index: usize,
        step: &Step,
    ) -> RunResult<PluginContext> {
        let mut variables = IndexMap::new();
        if let Some(env) = self.store.active_environment() {
            for (key, node) in &env.variables {
                let value = self
                    .resolver
                    .resolve_string(node, &self.store)
                    .map_err(|source| resolve_error(label, index, step, source))?;
                variables.insert(key.clone(), value);
            }
        }

        Ok(PluginContext {
            task: task.to_string(),
            target: target.to_string(),
            working_dir: self.context.working_dir.clone(),
            interpreter: self.store.settings().interpreter.clone(),
            environment: self.store.active_environment().map(|env| env.name.clone()),
            variables,
        })
    }
}

fn resolve_error(label: &str, index: usize, step: &Step, source: ResolveError) -> RunError {
    RunError::Resolve {
        sequence: label.to_string(),
        index,
        step: step.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn runner(yaml: &str) -> Runner {
        let store = ConfigStore::load(parse_config(yaml).unwrap()).unwrap();
        let registry = PluginRegistry::builder()
            .register_fn("noop", |_, _| Ok(Vec::new()))
            .build();
        Runner::new(store, Arc::new(registry))
    }

    const YAML: &str = r#"
environments:
  development:
    root: dev
    assets: dev/assets
tasks:
  copy:
    plugin: noop
    fonts:
      src: fonts/*
    images:
      src: img/*
  lint:
    plugin: missing
    all: {}
sequences:
  assets: [copy:fonts, copy:images]
  default: [env:development, assets]
  broken: [copy:fonts, copy:nope]
"#;

    fn names(steps: &[Step]) -> Vec<String> {
        steps.iter().map(Step::to_string).collect()
    }

    #[test]
    fn test_expand_nested_sequence() {
        let runner = runner(YAML);
        let steps = runner.expand("default", &["default".to_string()]).unwrap();
        assert_eq!(
            names(&steps),
            ["env:development", "copy:fonts", "copy:images"]
        );
    }

    #[test]
    fn test_expand_bare_task_runs_all_targets() {
        let runner = runner(YAML);
        let steps = runner.expand("copy", &["copy".to_string()]).unwrap();
        assert_eq!(names(&steps), ["copy:fonts", "copy:images"]);
    }

    #[test]
    fn test_expand_unknown_target() {
        let runner = runner(YAML);
        let err = runner.expand("broken", &["broken".to_string()]).unwrap_err();
        match err {
            RunError::UnknownTask { index, step, .. } => {
                assert_eq!(index, 1);
                assert_eq!(step, "copy:nope");
            }
            other => panic!("expected an unknown task error, got {:?}", other),
        }
    }

    #[test]
    fn test_expand_unknown_environment() {
        let runner = runner(YAML);
        let result = runner.expand("x", &["env:production".to_string()]);
        assert!(matches!(result, Err(RunError::UnknownTask { .. })));
    }

    #[test]
    fn test_expand_unregistered_plugin() {
        let runner = runner(YAML);
        let result = runner.expand("lint", &["lint:all".to_string()]);
        assert!(matches!(result, Err(RunError::UnknownPlugin { .. })));
    }

    #[test]
    fn test_run_reports_every_step() {
        let mut runner = runner(YAML);
        let report = runner.run_sequence("default").unwrap();
        assert_eq!(report.sequence, "default");
        assert_eq!(report.steps.len(), 3);
        assert_eq!(
            runner.store().active_environment().map(|e| e.name.as_str()),
            Some("development")
        );
    }

    #[test]
    fn test_plan_does_not_switch_runner_environment() {
        let runner = runner(YAML);
        let planned = runner.plan("default", &["default".to_string()]).unwrap();
        assert_eq!(planned.len(), 3);
        assert_eq!(planned[1].environment.as_deref(), Some("development"));
        assert_eq!(planned[1].plugin.as_deref(), Some("noop"));
        assert!(runner.store().active_environment().is_none());
    }
}
