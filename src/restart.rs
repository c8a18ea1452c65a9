//! Restart requests. The process restart itself belongs to the host; this side
//! only guards it with the restart flag so a changed res_map triggers at most
//! one restart per flag lifetime.

use crate::store::CatalogStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info, warn};

pub trait RestartCoordinator {
    fn signal_restart(&self);
}

/// Records restart requests so the caller can act on them after the pass.
#[derive(Debug, Default)]
pub struct RecordingRestart {
    requests: AtomicUsize,
}

impl RecordingRestart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> bool {
        self.count() > 0
    }

    pub fn count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl RestartCoordinator for RecordingRestart {
    fn signal_restart(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sets the restart flag and signals the coordinator. Returns false without
/// signalling when the flag already exists.
pub fn request_restart(store: &CatalogStore, coordinator: &dyn RestartCoordinator) -> bool {
    if store.restart_flag_exists() {
        warn!(
            "restart already requested ({} present), not restarting again",
            store.restart_flag_path().display()
        );
        return false;
    }
    if let Err(err) = store.create_restart_flag() {
        error!(
            "cannot write restart flag {}: {err}",
            store.restart_flag_path().display()
        );
    }
    info!("requesting client restart");
    coordinator.signal_restart();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OriginalSource;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> CatalogStore {
        CatalogStore::new(
            OriginalSource::File(temp.path().join("res_map.json")),
            temp.path().join("combined.json"),
            temp.path().join("res_map_restart"),
        )
    }

    #[test]
    fn restart_is_requested_once_per_flag() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let coordinator = RecordingRestart::new();

        assert!(request_restart(&store, &coordinator));
        assert!(!request_restart(&store, &coordinator));
        assert!(!request_restart(&store, &coordinator));
        assert_eq!(coordinator.count(), 1);
        assert!(store.restart_flag_exists());

        store.clear_restart_flag();
        assert!(request_restart(&store, &coordinator));
        assert_eq!(coordinator.count(), 2);
    }

    #[test]
    fn unwritable_flag_still_signals() {
        let temp = TempDir::new().unwrap();
        let store = CatalogStore::new(
            OriginalSource::File(temp.path().join("res_map.json")),
            temp.path().join("combined.json"),
            temp.path().join("missing").join("\0bad").join("flag"),
        );
        let coordinator = RecordingRestart::new();
        assert!(request_restart(&store, &coordinator));
        assert!(coordinator.requested());
    }
}
