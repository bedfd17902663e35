//! Force-refresh of heavily requested cache entries.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::media_kind::{CacheKey, FREQUENCY_SET_KEY};
use crate::state_store::MediaStateStore;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    pub max_items_per_run: usize,
    pub threshold_multiplier: u32,
    pub count_per_upstream_page: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_items_per_run: 3,
            threshold_multiplier: 2,
            count_per_upstream_page: 5,
        }
    }
}

impl EvictionPolicy {
    /// Minimum frequency score an entry needs before it is evicted.
    pub fn threshold(&self) -> f64 {
        f64::from(self.threshold_multiplier) * self.count_per_upstream_page as f64
    }
}

pub struct Evictor {
    cache_root: PathBuf,
    store: Arc<dyn MediaStateStore>,
}

impl Evictor {
    pub fn new(cache_root: PathBuf, store: Arc<dyn MediaStateStore>) -> Self {
        Self { cache_root, store }
    }

    /// Resets and deletes the highest-scoring entries at or above the
    /// threshold. Never fails; returns the members whose score was reset.
    pub fn evict(&self, policy: &EvictionPolicy) -> Vec<String> {
        let threshold = policy.threshold();
        let candidates =
            match self
                .store
                .top_by_score(FREQUENCY_SET_KEY, threshold, policy.max_items_per_run)
            {
                Ok(candidates) => candidates,
                Err(err) => {
                    error!("Evictor: failed to read frequency scores: {}", err);
                    return Vec::new();
                }
            };

        let mut evicted = Vec::with_capacity(candidates.len());
        for (member, score) in candidates {
            let Some(directory) = CacheKey::directory_for_member(&self.cache_root, &member)
            else {
                warn!("Evictor[{}]: not a cache member, skipping", member);
                continue;
            };
            if let Err(err) = self.store.set_score(FREQUENCY_SET_KEY, &member, 0.0) {
                warn!("Evictor[{}]: failed to reset score: {}", member, err);
                continue;
            }
            match fs::remove_dir_all(&directory) {
                Ok(()) => info!("Evictor[{}]: removed entry (score {})", member, score),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!("Evictor[{}]: no directory on disk", member)
                }
                Err(err) => {
                    warn!(
                        "Evictor[{}]: failed to remove {}: {}",
                        member,
                        directory.display(),
                        err
                    );
                    continue;
                }
            }
            evicted.push(member);
        }
        evicted
    }
}

/// Background eviction thread, stopped with `stop()`.
pub struct EvictionLoop {
    stop_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EvictionLoop {
    /// Runs one eviction immediately, then once per `interval`.
    pub fn spawn(evictor: Arc<Evictor>, policy: EvictionPolicy, interval: Duration) -> Self {
        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop_requested);
        let handle = thread::Builder::new()
            .name("eviction".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    let evicted = evictor.evict(&policy);
                    debug!("Evictor: run finished, {} evicted", evicted.len());
                    let next_run = Instant::now() + interval;
                    while Instant::now() < next_run {
                        if stop_flag.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(STOP_POLL_INTERVAL.min(interval));
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!("Evictor: failed to start eviction thread: {}", err);
                None
            }
        };
        Self {
            stop_requested,
            handle,
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Blocks until the loop exits on its own (only after `stop`).
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Evictor: eviction thread panicked");
            }
        }
    }

    pub fn stop(self) {
        self.stop_requested.store(true, Ordering::Relaxed);
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::{EvictionLoop, EvictionPolicy, Evictor};
    use crate::media_kind::FREQUENCY_SET_KEY;
    use crate::state_store::{InMemoryStateStore, MediaStateStore};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn seed(store: &InMemoryStateStore, root: &Path, entries: &[(&str, f64)]) {
        for (member, score) in entries {
            store
                .set_score(FREQUENCY_SET_KEY, member, *score)
                .expect("seed score");
            let directory = root.join(member);
            fs::create_dir_all(&directory).expect("mkdir");
            fs::write(directory.join("1.jpg"), b"jpeg").expect("write");
        }
    }

    #[test]
    fn test_evicts_entries_at_or_above_threshold_only() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryStateStore::new());
        seed(
            &store,
            root.path(),
            &[
                ("images/A1040", 12.0),
                ("images/B1040", 8.0),
                ("images/C1040", 10.0),
                ("images/D1040", 9.0),
            ],
        );
        let evictor = Evictor::new(root.path().to_path_buf(), store.clone());

        let evicted = evictor.evict(&EvictionPolicy::default());

        assert_eq!(evicted, vec!["images/A1040", "images/C1040"]);
        for member in ["images/A1040", "images/C1040"] {
            assert!(!root.path().join(member).exists());
            assert_eq!(
                store.score(FREQUENCY_SET_KEY, member).ok().flatten(),
                Some(0.0)
            );
        }
        for (member, score) in [("images/B1040", 8.0), ("images/D1040", 9.0)] {
            assert!(root.path().join(member).join("1.jpg").exists());
            assert_eq!(
                store.score(FREQUENCY_SET_KEY, member).ok().flatten(),
                Some(score)
            );
        }
    }

    #[test]
    fn test_takes_at_most_max_items_highest_first() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryStateStore::new());
        seed(
            &store,
            root.path(),
            &[
                ("songs/A0", 40.0),
                ("songs/B0", 30.0),
                ("songs/C0", 20.0),
                ("songs/D0", 11.0),
            ],
        );
        let evictor = Evictor::new(root.path().to_path_buf(), store.clone());

        let evicted = evictor.evict(&EvictionPolicy::default());

        assert_eq!(evicted, vec!["songs/A0", "songs/B0", "songs/C0"]);
        assert!(root.path().join("songs/D0").exists());
    }

    #[test]
    fn test_bad_member_is_skipped_and_missing_directory_is_fine() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryStateStore::new());
        store
            .set_score(FREQUENCY_SET_KEY, "../escape", 50.0)
            .expect("seed");
        store
            .set_score(FREQUENCY_SET_KEY, "images/Gone1040", 20.0)
            .expect("seed");
        let evictor = Evictor::new(root.path().to_path_buf(), store.clone());

        let evicted = evictor.evict(&EvictionPolicy::default());

        assert_eq!(evicted, vec!["images/Gone1040"]);
        assert_eq!(
            store.score(FREQUENCY_SET_KEY, "../escape").ok().flatten(),
            Some(50.0)
        );
    }

    #[test]
    fn test_eviction_loop_runs_immediately_and_stops() {
        let root = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryStateStore::new());
        seed(&store, root.path(), &[("images/Hot1040", 25.0)]);
        let evictor = Arc::new(Evictor::new(root.path().to_path_buf(), store.clone()));

        let eviction_loop =
            EvictionLoop::spawn(evictor, EvictionPolicy::default(), Duration::from_secs(60));
        let deadline = Instant::now() + Duration::from_secs(5);
        while store
            .score(FREQUENCY_SET_KEY, "images/Hot1040")
            .ok()
            .flatten()
            != Some(0.0)
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(eviction_loop.is_running());
        eviction_loop.stop();

        assert!(!root.path().join("images/Hot1040").exists());
    }
}
