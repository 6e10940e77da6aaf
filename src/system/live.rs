//! Live parameter bundles shared between the worker and a controller.
//!
//! A bundle is only ever read or written whole: readers take a copy, writers
//! replace or edit it under the lock. Each write bumps a generation counter so
//! readers can tell whether anything changed since their last copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::config::{SourceLiveConfig, TrackerLiveConfig};

struct Slot<T> {
    value: RwLock<T>,
    generation: AtomicU64,
}

/// Shared handle to one live bundle. Clones refer to the same bundle.
pub struct LiveConfig<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for LiveConfig<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone> LiveConfig<T> {
    pub fn new(value: T) -> Self {
        Self {
            slot: Arc::new(Slot {
                value: RwLock::new(value),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Copy of the current bundle.
    pub fn snapshot(&self) -> T {
        self.slot.value.read().clone()
    }

    /// Copy of the current bundle together with its generation.
    pub fn snapshot_with_generation(&self) -> (T, u64) {
        let guard = self.slot.value.read();
        (guard.clone(), self.slot.generation.load(Ordering::Acquire))
    }

    /// Replace the whole bundle.
    pub fn replace(&self, value: T) {
        let mut guard = self.slot.value.write();
        *guard = value;
        self.slot.generation.fetch_add(1, Ordering::Release);
    }

    /// Edit the bundle in place. The edit is discarded when `f` fails.
    pub fn update<R, E>(&self, f: impl FnOnce(&mut T) -> Result<R, E>) -> Result<R, E> {
        let mut guard = self.slot.value.write();
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        *guard = draft;
        self.slot.generation.fetch_add(1, Ordering::Release);
        Ok(out)
    }

    /// Number of writes since creation.
    pub fn generation(&self) -> u64 {
        self.slot.generation.load(Ordering::Acquire)
    }
}

/// The two live bundles of a pipeline.
#[derive(Clone)]
pub struct LiveParameterStore {
    pub source: LiveConfig<SourceLiveConfig>,
    pub tracker: LiveConfig<TrackerLiveConfig>,
}

impl LiveParameterStore {
    pub fn new(source: SourceLiveConfig, tracker: TrackerLiveConfig) -> Self {
        Self {
            source: LiveConfig::new(source),
            tracker: LiveConfig::new(tracker),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::config::{ConfigError, DetectorKind};

    #[test]
    fn test_clones_share_the_bundle() {
        let live = LiveConfig::new(TrackerLiveConfig::default());
        let other = live.clone();
        other.replace(TrackerLiveConfig {
            detector: DetectorKind::Harris,
            ..TrackerLiveConfig::default()
        });
        assert_eq!(live.snapshot().detector, DetectorKind::Harris);
        assert_eq!(live.generation(), 1);
    }

    #[test]
    fn test_failed_update_leaves_bundle_untouched() {
        let live = LiveConfig::new(SourceLiveConfig::default());
        let result: Result<(), ConfigError> = live.update(|cfg| {
            cfg.paused = true;
            cfg.set_field("clip_fraction", "0.9")
        });
        assert!(result.is_err());
        assert_eq!(live.snapshot(), SourceLiveConfig::default());
        assert_eq!(live.generation(), 0);
    }

    #[test]
    fn test_writes_from_another_thread_are_visible() {
        let store = LiveParameterStore::new(SourceLiveConfig::default(), TrackerLiveConfig::default());
        let remote = store.clone();
        thread::spawn(move || {
            remote
                .tracker
                .update(|cfg| cfg.set_field("max_features", "42"))
                .unwrap();
        })
        .join()
        .unwrap();

        let (cfg, generation) = store.tracker.snapshot_with_generation();
        assert_eq!(cfg.max_features, 42);
        assert_eq!(generation, 1);
    }
}
