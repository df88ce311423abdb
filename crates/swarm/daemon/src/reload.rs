//! Configuration hot reload.
//!
//! The config file is polled for modification. A changed file is parsed,
//! validated and pushed into the coordinator; an invalid file is logged and
//! the running configuration stays in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use swarm_orchestrator::{OrchestrationCoordinator, SwarmConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            last_modified,
        }
    }

    /// Reload when the file changed since the last check. Returns whether a
    /// new configuration was applied.
    pub fn check(&mut self, coordinator: &OrchestrationCoordinator) -> bool {
        let current = modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return false;
        }
        self.last_modified = current;

        match SwarmConfig::load(&self.path).and_then(|config| coordinator.apply_config(config)) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Configuration reloaded");
                true
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Configuration reload rejected, keeping running configuration"
                );
                false
            }
        }
    }

    pub fn spawn(
        mut self,
        coordinator: Arc<OrchestrationCoordinator>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check(&coordinator);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Config watcher stopped");
        })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use swarm_orchestrator::{Collaborators, PassthroughDetector};
    use swarm_resilience::StaticProber;
    use swarm_types::{FixedMetricsSource, MemorySink, NoOpActionExecutor};

    fn coordinator() -> OrchestrationCoordinator {
        OrchestrationCoordinator::new(
            SwarmConfig::default(),
            Collaborators {
                executor: Arc::new(NoOpActionExecutor),
                metrics: Arc::new(FixedMetricsSource::healthy()),
                sink: Arc::new(MemorySink::new()),
                prober: Arc::new(StaticProber::new()),
                detector: Arc::new(PassthroughDetector),
            },
        )
        .unwrap()
    }

    fn rewrite(path: &Path, contents: &str) {
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.sync_all().unwrap();
        // make the change visible on filesystems with coarse timestamps
        let later = SystemTime::now() + Duration::from_secs(5);
        file.set_modified(later).unwrap();
    }

    #[test]
    fn test_changed_file_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.toml");
        std::fs::write(&path, "[orchestrator]\nmax_concurrent_orchestrations = 3\n").unwrap();

        let coordinator = coordinator();
        let mut watcher = ConfigWatcher::new(&path);
        assert!(!watcher.check(&coordinator));

        rewrite(&path, "[orchestrator]\nmax_concurrent_orchestrations = 7\n");
        assert!(watcher.check(&coordinator));
        assert_eq!(coordinator.config().max_concurrent_orchestrations, 7);
    }

    #[test]
    fn test_invalid_file_keeps_running_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarm.toml");
        std::fs::write(&path, "").unwrap();

        let coordinator = coordinator();
        let mut watcher = ConfigWatcher::new(&path);

        rewrite(&path, "[orchestrator]\ndecision_threshold = 4.0\n");
        assert!(!watcher.check(&coordinator));
        assert_eq!(coordinator.config().decision_threshold, 0.6);
    }
}
