use crate::config::FileConfiguration;
use anyhow::Result;
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Watches a configuration file and broadcasts every version that parses.
/// Validation against the registered capabilities is left to the receiver.
pub struct ConfigWatcher {
    config_path: PathBuf,
    debounce: Duration,
    tx: broadcast::Sender<FileConfiguration>,
}

impl ConfigWatcher {
    pub fn new(config_path: impl Into<PathBuf>) -> (Self, broadcast::Receiver<FileConfiguration>) {
        let (tx, rx) = broadcast::channel(16);
        (
            Self {
                config_path: config_path.into(),
                debounce: Duration::from_millis(100),
                tx,
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileConfiguration> {
        self.tx.subscribe()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Blocks the calling thread; run it on a dedicated blocking task.
    pub fn watch(self) -> Result<()> {
        let (sync_tx, sync_rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher = recommended_watcher(sync_tx)?;
        watcher.watch(&self.config_path, RecursiveMode::NonRecursive)?;

        info!("Watching route configuration for changes: {:?}", self.config_path);

        let mut last_event: Option<Instant> = None;

        loop {
            match sync_rx.recv() {
                Ok(Ok(event)) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        continue;
                    }

                    let now = Instant::now();
                    if last_event.is_some_and(|last| now.duration_since(last) < self.debounce) {
                        continue;
                    }
                    last_event = Some(now);

                    debug!("Route configuration changed: {:?}", event);

                    // Editors write in several steps
                    std::thread::sleep(Duration::from_millis(50));

                    match FileConfiguration::load(&self.config_path) {
                        Ok(config) => {
                            if self.tx.send(config).is_err() {
                                debug!("No configuration subscribers, stopping watcher");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to parse changed configuration: {:#}", e);
                        }
                    }
                }
                Ok(Err(e)) => {
                    error!("Watch error: {:?}", e);
                }
                Err(e) => {
                    error!("Watch channel closed: {:?}", e);
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Spawn the watcher on a blocking task and hand back its receiver.
pub fn watch_config_async(
    config_path: PathBuf,
) -> (broadcast::Receiver<FileConfiguration>, tokio::task::JoinHandle<()>) {
    let (watcher, rx) = ConfigWatcher::new(config_path);

    let handle = tokio::task::spawn_blocking(move || {
        if let Err(e) = watcher.watch() {
            error!("Config watcher error: {:#}", e);
        }
    });

    (rx, handle)
}
