//! Filesystem change source for watch sessions
//!
//! Watches the directories the rules' patterns live under and feeds
//! debounced change batches into a [`Dispatcher`].

use crate::watch::{Dispatcher, WatchRule};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Handle to a running filesystem watcher
///
/// Dropping the debouncer closes its channel, which ends the event thread.
pub struct FileWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    thread: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Start watching `roots` recursively, dispatching every debounced batch
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        roots: Vec<PathBuf>,
        debounce: Duration,
    ) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();
        let mut debouncer = new_debouncer(debounce, tx)?;

        for root in &roots {
            if root.exists() {
                info!("Watching directory: {}", root.display());
                debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
            } else {
                warn!("Directory does not exist, skipping watch: {}", root.display());
            }
        }

        let thread = thread::Builder::new()
            .name("watch-events".to_string())
            .spawn(move || process_events(rx, &dispatcher))
            .map_err(notify::Error::io)?;

        Ok(FileWatcher {
            debouncer: Some(debouncer),
            thread: Some(thread),
        })
    }

    /// Stop watching and wait for the event thread to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.debouncer.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("watch event thread panicked");
            }
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn process_events(rx: mpsc::Receiver<DebounceEventResult>, dispatcher: &Dispatcher) {
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let mut changed: Vec<PathBuf> = events
                    .into_iter()
                    .filter(|event| {
                        matches!(
                            event.kind,
                            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                        )
                    })
                    .map(|event| event.path)
                    .collect();
                changed.sort();
                changed.dedup();
                if changed.is_empty() {
                    continue;
                }

                let triggered = dispatcher.dispatch(&changed);
                debug!(paths = changed.len(), rules = triggered, "dispatched changes");
            }
            Ok(Err(e)) => {
                error!("File watcher error: {}", e);
            }
            Err(_) => {
                info!("File watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Directories that must be watched to see every file the rules match
///
/// Each pattern contributes its leading literal directories; patterns whose
/// directory does not exist yet fall back to the closest existing ancestor.
/// Directories nested inside another root are dropped.
pub fn watch_roots<'a>(root: &Path, rules: impl IntoIterator<Item = &'a WatchRule>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for rule in rules {
        for pattern in &rule.patterns {
            if pattern.starts_with('!') {
                continue;
            }
            let mut dir = root.join(literal_prefix(pattern));
            while !dir.exists() && dir != root {
                match dir.parent() {
                    Some(parent) => dir = parent.to_path_buf(),
                    None => break,
                }
            }
            roots.push(dir);
        }
    }

    roots.sort();
    roots.dedup();
    let mut kept: Vec<PathBuf> = Vec::new();
    for dir in roots {
        if !kept.iter().any(|parent| dir.starts_with(parent)) {
            kept.push(dir);
        }
    }
    kept
}

/// The directory part of a pattern before its first glob component
fn literal_prefix(pattern: &str) -> PathBuf {
    let path = Path::new(pattern);
    let mut prefix = PathBuf::new();
    let components: Vec<Component> = path.components().collect();
    for (i, component) in components.iter().enumerate() {
        let text = component.as_os_str().to_string_lossy();
        let is_glob = text.contains(['*', '?', '[', '{']);
        // The last component names files, not a directory
        if is_glob || i + 1 == components.len() {
            break;
        }
        prefix.push(component);
    }
    prefix
}
