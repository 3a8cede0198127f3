//! Live-reload notification

use crate::runner::Context;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

/// Receives the changed paths after a watch rule's run succeeds
pub trait ReloadSink: Send + Sync {
    fn notify(&self, changed: &[PathBuf]);
}

/// Fans notifications out to every subscribed listener
///
/// Listeners whose receiver has been dropped are forgotten on the next
/// notification.
#[derive(Default)]
pub struct ReloadHub {
    listeners: Mutex<Vec<Sender<Vec<PathBuf>>>>,
}

impl ReloadHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Vec<PathBuf>> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Vec<PathBuf>>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ReloadSink for ReloadHub {
    fn notify(&self, changed: &[PathBuf]) {
        self.lock()
            .retain(|listener| listener.send(changed.to_vec()).is_ok());
    }
}

/// Prints `changed: <paths>` for each notification
pub struct ConsoleReload {
    context: Context,
}

impl ConsoleReload {
    pub fn new(context: Context) -> Self {
        ConsoleReload { context }
    }
}

impl ReloadSink for ConsoleReload {
    fn notify(&self, changed: &[PathBuf]) {
        let paths: Vec<String> = changed.iter().map(|p| p.display().to_string()).collect();
        self.context.print_info(&format!("changed: {}", paths.join(", ")));
    }
}
