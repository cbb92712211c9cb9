//! File watcher for the script being pushed by `ramen watch`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{DebounceEventResult, new_debouncer, notify::RecursiveMode};
use tokio::sync::mpsc;

/// Debounce window for editor save bursts.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Script change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    /// Script was written (or replaced).
    Modified(PathBuf),
    /// Script was removed.
    Removed(PathBuf),
}

/// Watches a single script file.
pub struct ScriptWatcher {
    /// Debouncer handle (kept alive to maintain watcher).
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<ScriptEvent>,
}

impl ScriptWatcher {
    /// Watch `path`, which must be an existing file.
    ///
    /// The parent directory is watched so that editors replacing the file
    /// through a rename are still seen.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let target = path.as_ref().canonicalize()?;
        if !target.is_file() {
            anyhow::bail!("Not a file: {}", target.display());
        }
        let watch_dir = target.parent().unwrap_or(Path::new(".")).to_path_buf();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!("File watch error: {}", e);
                    return;
                }
            };

            for event in events {
                if event.path != target {
                    continue;
                }

                let script_event = if event.path.exists() {
                    ScriptEvent::Modified(event.path)
                } else {
                    ScriptEvent::Removed(event.path)
                };
                let _ = tx.send(script_event);
            }
        })
        .map_err(|e| anyhow::anyhow!("Failed to create file watcher: {}", e))?;

        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow::anyhow!("Failed to watch {}: {}", watch_dir.display(), e))?;

        Ok(Self {
            _debouncer: debouncer,
            rx,
        })
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<ScriptEvent> {
        self.rx.recv().await
    }
}
