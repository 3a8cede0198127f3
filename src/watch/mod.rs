//! Watch subsystem
//!
//! Each watch rule gets its own trigger loop on a dedicated thread. Changed
//! paths are matched against every rule's globs and queued to the matching
//! rules. A rule runs its steps to completion before it looks at its queue
//! again, and everything that queued up meanwhile is merged into one cycle,
//! so a rule never overlaps itself while distinct rules run independently.
//!
//! A failed run is reported and the loop keeps going; only a successful run
//! of a rule with `livereload` enabled notifies the reload sink.

pub mod fs;
pub mod reload;

pub use fs::{watch_roots, FileWatcher};
pub use reload::{ConsoleReload, ReloadHub, ReloadSink};

use crate::config::WatchRuleDefinition;
use crate::error::{ConfigError, Result};
use crate::plugin::value_as_list;
use crate::runner::{Resolver, Runner};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Lifecycle of a single rule's trigger loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    Triggering,
    Stopped,
}

/// A watch rule with its patterns resolved and compiled
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub name: String,
    pub patterns: Vec<String>,
    pub tasks: Vec<String>,
    pub livereload: bool,
    include: GlobSet,
    exclude: GlobSet,
}

impl WatchRule {
    /// Compile patterns; a leading `!` excludes
    pub fn new(
        name: impl Into<String>,
        patterns: Vec<String>,
        tasks: Vec<String>,
        livereload: bool,
    ) -> Result<Self> {
        let name = name.into();
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        for pattern in &patterns {
            let (builder, raw) = match pattern.strip_prefix('!') {
                Some(negated) => (&mut exclude, negated),
                None => (&mut include, pattern.as_str()),
            };
            let glob = GlobBuilder::new(raw)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    ConfigError::Invalid(format!("watch rule '{}': {}", name, e))
                })?;
            builder.add(glob);
        }

        let build = |builder: GlobSetBuilder| {
            builder
                .build()
                .map_err(|e| ConfigError::Invalid(format!("watch rule '{}': {}", name, e)))
        };
        let include = build(include)?;
        let exclude = build(exclude)?;

        Ok(WatchRule {
            name,
            patterns,
            tasks,
            livereload,
            include,
            exclude,
        })
    }

    /// Resolve a configured rule's placeholders against the runner's store
    pub fn from_definition(
        definition: &WatchRuleDefinition,
        runner: &Runner,
    ) -> Result<Self> {
        let resolver: &Resolver = runner.resolver();
        let mut patterns = Vec::new();
        for node in &definition.files {
            let value = resolver.resolve(node, runner.store())?;
            let resolved = value_as_list(&value).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "watch rule '{}': file patterns must be strings",
                    definition.name
                ))
            })?;
            patterns.extend(resolved);
        }

        Self::new(
            definition.name.clone(),
            patterns,
            definition.tasks.clone(),
            definition.livereload,
        )
    }

    /// True if a path (relative to the working directory) triggers this rule
    pub fn matches(&self, path: &Path) -> bool {
        self.include.is_match(path) && !self.exclude.is_match(path)
    }
}

/// One rule's trigger loop body
pub struct TriggerLoop {
    rule: Arc<WatchRule>,
    base: Runner,
    sink: Arc<dyn ReloadSink>,
    state: Arc<Mutex<WatchState>>,
}

impl TriggerLoop {
    pub fn new(rule: Arc<WatchRule>, base: Runner, sink: Arc<dyn ReloadSink>) -> Self {
        TriggerLoop {
            rule,
            base,
            sink,
            state: Arc::new(Mutex::new(WatchState::Idle)),
        }
    }

    pub fn state(&self) -> WatchState {
        *lock(&self.state)
    }

    /// Run the rule's steps once for a batch of changes
    ///
    /// Each cycle starts from a fresh clone of the base runner, so an
    /// environment switched by one cycle does not leak into the next.
    pub fn cycle(&self, changed: &[PathBuf]) -> bool {
        self.set_state(WatchState::Triggering);
        let context = self.base.context().clone();
        let names: Vec<String> = changed.iter().map(|p| p.display().to_string()).collect();
        context.print_info(&format!(
            "[{}] {} changed",
            self.rule.name,
            names.join(", ")
        ));

        let mut runner = self.base.clone();
        let succeeded = match runner.run(&self.rule.name, &self.rule.tasks) {
            Ok(report) => {
                tracing::debug!(rule = %self.rule.name, steps = report.steps.len(), "watch cycle finished");
                if self.rule.livereload {
                    self.sink.notify(changed);
                }
                true
            }
            Err(err) => {
                tracing::warn!(rule = %self.rule.name, error = %err, "watch cycle failed");
                context.print_error(&err.to_string());
                false
            }
        };

        self.set_state(WatchState::Watching);
        succeeded
    }

    fn run(self, rx: Receiver<Vec<PathBuf>>) {
        self.set_state(WatchState::Watching);
        while let Ok(first) = rx.recv() {
            let changed = coalesce(first, &rx);
            self.cycle(&changed);
        }
        self.set_state(WatchState::Stopped);
        tracing::debug!(rule = %self.rule.name, "trigger loop stopped");
    }

    fn set_state(&self, state: WatchState) {
        *lock(&self.state) = state;
    }
}

/// Merge every batch already queued into `first`, sorted and deduplicated
fn coalesce(first: Vec<PathBuf>, rx: &Receiver<Vec<PathBuf>>) -> Vec<PathBuf> {
    let mut changed = first;
    while let Ok(more) = rx.try_recv() {
        changed.extend(more);
    }
    changed.sort();
    changed.dedup();
    changed
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct RuleSlot {
    rule: Arc<WatchRule>,
    sender: Mutex<Option<Sender<Vec<PathBuf>>>>,
    state: Arc<Mutex<WatchState>>,
}

/// Routes changed paths to the rules that match them
pub struct Dispatcher {
    root: PathBuf,
    canonical_root: Option<PathBuf>,
    slots: Vec<RuleSlot>,
}

impl Dispatcher {
    /// Queue `changed` to every matching rule; returns how many rules matched
    pub fn dispatch(&self, changed: &[PathBuf]) -> usize {
        let relative: Vec<PathBuf> = changed.iter().map(|p| self.relative(p)).collect();
        let mut triggered = 0;

        for slot in &self.slots {
            let matched: Vec<PathBuf> = relative
                .iter()
                .filter(|path| slot.rule.matches(path))
                .cloned()
                .collect();
            if matched.is_empty() {
                continue;
            }

            if let Some(sender) = lock(&slot.sender).as_ref() {
                tracing::debug!(rule = %slot.rule.name, paths = ?matched, "queueing trigger");
                if sender.send(matched).is_ok() {
                    triggered += 1;
                }
            }
        }

        triggered
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            return path.to_path_buf();
        }
        let roots = self.canonical_root.iter().chain(std::iter::once(&self.root));
        for root in roots {
            if let Ok(stripped) = path.strip_prefix(root) {
                return stripped.to_path_buf();
            }
        }
        path.to_path_buf()
    }

    fn close(&self) {
        for slot in &self.slots {
            lock(&slot.sender).take();
        }
    }
}

/// Running trigger loops for a set of watch rules
pub struct WatchSession {
    dispatcher: Arc<Dispatcher>,
    workers: Vec<JoinHandle<()>>,
}

impl WatchSession {
    /// Start one trigger loop per rule
    ///
    /// Every rule's steps are checked before any loop starts. Paths handed
    /// to [`dispatch`](Self::dispatch) are matched relative to the runner's
    /// working directory.
    pub fn start(runner: Runner, rules: Vec<WatchRule>, sink: Arc<dyn ReloadSink>) -> Result<Self> {
        for rule in &rules {
            runner.expand(&rule.name, &rule.tasks)?;
        }

        let root = runner.context().working_dir.clone();
        let canonical_root = root.canonicalize().ok();
        let mut slots = Vec::with_capacity(rules.len());
        let mut workers = Vec::with_capacity(rules.len());

        for rule in rules {
            let rule = Arc::new(rule);
            let (tx, rx) = mpsc::channel();
            let trigger = TriggerLoop::new(Arc::clone(&rule), runner.clone(), Arc::clone(&sink));
            let state = Arc::clone(&trigger.state);

            let worker = thread::Builder::new()
                .name(format!("watch-{}", rule.name))
                .spawn(move || trigger.run(rx))?;

            tracing::info!(rule = %rule.name, patterns = ?rule.patterns, "watching");
            workers.push(worker);
            slots.push(RuleSlot {
                rule,
                sender: Mutex::new(Some(tx)),
                state,
            });
        }

        Ok(WatchSession {
            dispatcher: Arc::new(Dispatcher {
                root,
                canonical_root,
                slots,
            }),
            workers,
        })
    }

    /// Start a session for every watch rule in the runner's configuration
    pub fn from_config(runner: Runner, sink: Arc<dyn ReloadSink>) -> Result<Self> {
        let rules = runner
            .store()
            .watch_rules()
            .iter()
            .map(|definition| WatchRule::from_definition(definition, &runner))
            .collect::<Result<Vec<_>>>()?;
        Self::start(runner, rules, sink)
    }

    pub fn dispatch(&self, changed: &[PathBuf]) -> usize {
        self.dispatcher.dispatch(changed)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn rules(&self) -> impl Iterator<Item = &WatchRule> {
        self.dispatcher.slots.iter().map(|slot| slot.rule.as_ref())
    }

    pub fn state(&self, rule: &str) -> Option<WatchState> {
        self.dispatcher
            .slots
            .iter()
            .find(|slot| slot.rule.name == rule)
            .map(|slot| *lock(&slot.state))
    }

    /// Stop accepting events, let queued cycles finish and join the loops
    pub fn stop(&mut self) {
        self.dispatcher.close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("watch worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_matching() {
        let rule = WatchRule::new(
            "styles",
            vec![
                "site/source/assets/sass/**/*.scss".to_string(),
                "!**/_tmp*.scss".to_string(),
            ],
            vec!["compass:development".to_string()],
            true,
        )
        .unwrap();

        assert!(rule.matches(Path::new("site/source/assets/sass/main.scss")));
        assert!(rule.matches(Path::new("site/source/assets/sass/partials/_grid.scss")));
        assert!(!rule.matches(Path::new("site/source/assets/sass/_tmp1.scss")));
        assert!(!rule.matches(Path::new("site/source/assets/js/app.js")));
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let rule = WatchRule::new("js", vec!["js/*.js".to_string()], vec!["x".to_string()], false)
            .unwrap();
        assert!(rule.matches(Path::new("js/app.js")));
        assert!(!rule.matches(Path::new("js/vendor/lib.js")));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = WatchRule::new("bad", vec!["a/[".to_string()], vec![], false);
        assert!(result.is_err());
    }

    #[test]
    fn test_coalesce_merges_queued_batches() {
        let (tx, rx) = mpsc::channel();
        tx.send(vec![PathBuf::from("b.scss")]).unwrap();
        tx.send(vec![PathBuf::from("a.scss"), PathBuf::from("b.scss")]).unwrap();

        let merged = coalesce(vec![PathBuf::from("c.scss")], &rx);
        assert_eq!(
            merged,
            vec![
                PathBuf::from("a.scss"),
                PathBuf::from("b.scss"),
                PathBuf::from("c.scss"),
            ]
        );
        assert!(rx.try_recv().is_err());
    }
}
