//! Plugin registry
//!
//! Every task is bound to a plugin by name. The registry is closed: it is
//! filled once at startup through [`PluginRegistryBuilder`] and only read
//! afterwards. Any failure a plugin reports, including a panic or an expired
//! timeout, comes back as a [`PluginError`].

pub mod copy;
pub mod shell;

use crate::error::{PluginError, PluginFailure};
use indexmap::IndexMap;
use serde_yaml::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

pub use copy::CopyPlugin;
pub use shell::ShellPlugin;

/// Files a plugin produced
pub type ArtifactList = Vec<PathBuf>;

/// What a plugin knows about the step it runs for
#[derive(Debug, Clone, PartialEq)]
pub struct PluginContext {
    pub task: String,
    pub target: String,
    /// Directory relative option paths are resolved against
    pub working_dir: PathBuf,
    /// Interpreter for plugins that spawn commands (e.g. `sh -c`)
    pub interpreter: Vec<String>,
    /// Name of the active environment, if any
    pub environment: Option<String>,
    /// Resolved variables of the active environment
    pub variables: IndexMap<String, String>,
}

impl PluginContext {
    /// `task:target`
    pub fn step(&self) -> String {
        format!("{}:{}", self.task, self.target)
    }
}

/// Fully resolved options handed to a plugin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedOptions(IndexMap<String, Value>);

impl ResolvedOptions {
    pub fn new(map: IndexMap<String, Value>) -> Self {
        ResolvedOptions(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// A string or list of strings as a list
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        self.0.get(key).and_then(value_as_list)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &IndexMap<String, Value> {
        &self.0
    }
}

/// A string or list of strings as a list
pub fn value_as_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

/// A unit of work bound to a task
pub trait Plugin: Send + Sync {
    fn run(&self, ctx: &PluginContext, options: &ResolvedOptions) -> anyhow::Result<ArtifactList>;
}

impl<F> Plugin for F
where
    F: Fn(&PluginContext, &ResolvedOptions) -> anyhow::Result<ArtifactList> + Send + Sync,
{
    fn run(&self, ctx: &PluginContext, options: &ResolvedOptions) -> anyhow::Result<ArtifactList> {
        self(ctx, options)
    }
}

/// Closed name → plugin table
#[derive(Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    timeout: Option<Duration>,
    in_flight: Arc<InFlight>,
}

/// Steps whose plugin thread is still running
///
/// A timed-out call keeps its step here until the abandoned thread returns,
/// so the same step never runs twice at once.
#[derive(Default)]
struct InFlight {
    steps: Mutex<HashSet<String>>,
    released: Condvar,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `step`, waiting up to `limit` for an earlier call to finish
    fn acquire(&self, step: &str, limit: Duration) -> bool {
        let guard = self.lock();
        let (mut steps, _) = self
            .released
            .wait_timeout_while(guard, limit, |steps| steps.contains(step))
            .unwrap_or_else(PoisonError::into_inner);
        steps.insert(step.to_string())
    }

    fn release(&self, step: &str) {
        self.lock().remove(step);
        self.released.notify_all();
    }
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// Registry holding the built-in `shell` and `copy` plugins
    pub fn with_builtins() -> PluginRegistryBuilder {
        Self::builder()
            .register("shell", ShellPlugin)
            .register("copy", CopyPlugin)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Invoke the plugin registered as `name`
    pub fn invoke(
        &self,
        name: &str,
        ctx: &PluginContext,
        options: &ResolvedOptions,
    ) -> Result<ArtifactList, PluginError> {
        let wrap = |cause| PluginError {
            name: name.to_string(),
            cause,
        };

        let plugin = self.plugins.get(name).ok_or_else(|| {
            wrap(PluginFailure::Failed(anyhow::anyhow!(
                "no plugin registered as '{}'",
                name
            )))
        })?;

        match self.timeout {
            None => run_guarded(plugin.as_ref(), ctx, options).map_err(wrap),
            Some(limit) => {
                let in_flight = Arc::clone(&self.in_flight);
                run_with_timeout(Arc::clone(plugin), in_flight, ctx, options, limit).map_err(wrap)
            }
        }
    }
}

/// Builder for [`PluginRegistry`]
#[derive(Default)]
pub struct PluginRegistryBuilder {
    plugins: HashMap<String, Arc<dyn Plugin>>,
    timeout: Option<Duration>,
}

impl PluginRegistryBuilder {
    /// Register a plugin; a later registration under the same name replaces it
    pub fn register(mut self, name: impl Into<String>, plugin: impl Plugin + 'static) -> Self {
        self.plugins.insert(name.into(), Arc::new(plugin));
        self
    }

    /// Register a closure as a plugin
    pub fn register_fn<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&PluginContext, &ResolvedOptions) -> anyhow::Result<ArtifactList>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, handler)
    }

    /// Bound every invocation to `timeout`
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            plugins: self.plugins,
            timeout: self.timeout,
            in_flight: Arc::default(),
        }
    }
}

fn run_guarded(
    plugin: &dyn Plugin,
    ctx: &PluginContext,
    options: &ResolvedOptions,
) -> Result<ArtifactList, PluginFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| plugin.run(ctx, options))) {
        Ok(Ok(artifacts)) => Ok(artifacts),
        Ok(Err(err)) => Err(PluginFailure::Failed(err)),
        Err(payload) => Err(PluginFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Run on a separate thread so an expired call can be abandoned
///
/// The step stays claimed until that thread returns; a new call for it
/// waits up to `limit` and then fails as busy.
fn run_with_timeout(
    plugin: Arc<dyn Plugin>,
    in_flight: Arc<InFlight>,
    ctx: &PluginContext,
    options: &ResolvedOptions,
    limit: Duration,
) -> Result<ArtifactList, PluginFailure> {
    let step = ctx.step();
    if !in_flight.acquire(&step, limit) {
        return Err(PluginFailure::Busy(step));
    }

    let (tx, rx) = mpsc::channel();
    let ctx = ctx.clone();
    let options = options.clone();
    thread::spawn(move || {
        let result = run_guarded(plugin.as_ref(), &ctx, &options);
        in_flight.release(&step);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(PluginFailure::Timeout(limit)),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(PluginFailure::Panicked("plugin thread exited".to_string()))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> PluginContext {
        PluginContext {
            task: "compass".to_string(),
            target: "dev".to_string(),
            working_dir: PathBuf::from("."),
            interpreter: vec!["sh".to_string(), "-c".to_string()],
            environment: None,
            variables: IndexMap::new(),
        }
    }

    #[test]
    fn test_invoke_closure_plugin() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = PluginRegistry::builder()
            .register_fn("compass", move |_, options| {
                counter.fetch_add(1, Ordering::SeqCst);
                let css = options.get_str("cssDir").unwrap_or("css");
                Ok(vec![PathBuf::from(css).join("main.css")])
            })
            .build();

        let mut map = IndexMap::new();
        map.insert("cssDir".to_string(), Value::String("public/css".to_string()));
        let artifacts = registry
            .invoke("compass", &ctx(), &ResolvedOptions::new(map))
            .unwrap();

        assert_eq!(artifacts, vec![PathBuf::from("public/css/main.css")]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_wrapped() {
        let registry = PluginRegistry::builder()
            .register_fn("uglify", |_, _| {
                anyhow::bail!("unexpected token")
            })
            .build();

        let err = registry
            .invoke("uglify", &ctx(), &ResolvedOptions::default())
            .unwrap_err();
        assert_eq!(err.name, "uglify");
        assert!(matches!(err.cause, PluginFailure::Failed(_)));
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn test_panic_is_wrapped() {
        let registry = PluginRegistry::builder()
            .register_fn("svg2png", |_, _| {
                panic!("rasterizer crashed")
            })
            .build();

        let err = registry
            .invoke("svg2png", &ctx(), &ResolvedOptions::default())
            .unwrap_err();
        match err.cause {
            PluginFailure::Panicked(message) => assert_eq!(message, "rasterizer crashed"),
            other => panic!("expected a panic failure, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout() {
        let registry = PluginRegistry::builder()
            .register_fn("imagemin", |_, _| {
                thread::sleep(Duration::from_millis(500));
                Ok(Vec::new())
            })
            .timeout(Some(Duration::from_millis(20)))
            .build();

        let err = registry
            .invoke("imagemin", &ctx(), &ResolvedOptions::default())
            .unwrap_err();
        assert!(matches!(err.cause, PluginFailure::Timeout(_)));
    }

    #[test]
    fn test_timed_out_step_is_not_started_again_while_running() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let registry = PluginRegistry::builder()
            .register_fn("imagemin", move |_, _| {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
                r.fetch_sub(1, Ordering::SeqCst);
                Ok(Vec::new())
            })
            .timeout(Some(Duration::from_millis(50)))
            .build();

        let first = registry
            .invoke("imagemin", &ctx(), &ResolvedOptions::default())
            .unwrap_err();
        assert!(matches!(first.cause, PluginFailure::Timeout(_)));

        let second = registry
            .invoke("imagemin", &ctx(), &ResolvedOptions::default())
            .unwrap_err();
        match second.cause {
            PluginFailure::Busy(step) => assert_eq!(step, "compass:dev"),
            other => panic!("expected a busy failure, got {:?}", other),
        }

        thread::sleep(Duration::from_millis(400));
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        // Once the abandoned call returns the step can run again
        let third = registry
            .invoke("imagemin", &ctx(), &ResolvedOptions::default())
            .unwrap_err();
        assert!(matches!(third.cause, PluginFailure::Timeout(_)));
    }

    #[test]
    fn test_fast_plugin_within_timeout() {
        let registry = PluginRegistry::builder()
            .register_fn("copy", |_, _| Ok(vec![PathBuf::from("a")]))
            .timeout(Some(Duration::from_secs(5)))
            .build();

        let artifacts = registry
            .invoke("copy", &ctx(), &ResolvedOptions::default())
            .unwrap();
        assert_eq!(artifacts.len(), 1);
    }

    #[test]
    fn test_unregistered_plugin() {
        let registry = PluginRegistry::builder().build();
        assert!(!registry.contains("copy"));
        assert!(registry
            .invoke("copy", &ctx(), &ResolvedOptions::default())
            .is_err());
    }

    #[test]
    fn test_builtins() {
        let registry = PluginRegistry::with_builtins().build();
        assert_eq!(registry.names(), ["copy", "shell"]);
    }

    #[test]
    fn test_get_list() {
        let mut map = IndexMap::new();
        map.insert("one".to_string(), Value::String("a".to_string()));
        map.insert(
            "many".to_string(),
            Value::Sequence(vec![Value::String("a".to_string()), Value::String("b".to_string())]),
        );
        map.insert("flag".to_string(), Value::Bool(true));
        let options = ResolvedOptions::new(map);
        assert_eq!(options.get_list("one"), Some(vec!["a".to_string()]));
        assert_eq!(options.get_list("many").unwrap().len(), 2);
        assert_eq!(options.get_list("flag"), None);
        assert_eq!(options.get_bool("flag"), Some(true));
    }
}
