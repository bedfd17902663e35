//! On-disk cache entries keyed by `CacheKey`, with demand tracking.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::downloader::PARTIAL_SUFFIX;
use crate::error::MediaError;
use crate::media_kind::{CacheKey, FREQUENCY_SET_KEY};
use crate::state_store::MediaStateStore;

/// A populated cache directory and its files in stable (name) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub directory: PathBuf,
    pub files: Vec<PathBuf>,
}

pub struct CacheStore {
    root: PathBuf,
    store: Arc<dyn MediaStateStore>,
    populate_attempts: u32,
}

/// Completed media files in `directory`, sorted by name. A missing directory
/// lists as empty; subdirectories and partial downloads are skipped.
pub fn list_media_files(directory: &Path) -> Result<Vec<PathBuf>, MediaError> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(error.into()),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let is_partial = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| extension == PARTIAL_SUFFIX);
        if !is_partial {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl CacheStore {
    pub fn new(root: PathBuf, store: Arc<dyn MediaStateStore>, populate_attempts: u32) -> Self {
        Self {
            root,
            store,
            populate_attempts: populate_attempts.max(1),
        }
    }

    pub fn directory(&self, key: &CacheKey) -> PathBuf {
        key.directory(&self.root)
    }

    /// `None` for both a missing and an empty directory.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, MediaError> {
        let directory = self.directory(key);
        let files = list_media_files(&directory)?;
        if files.is_empty() {
            return Ok(None);
        }
        Ok(Some(CacheEntry { directory, files }))
    }

    fn record_access(&self, key: &CacheKey) {
        let member = key.member();
        match self.store.increment_score(FREQUENCY_SET_KEY, &member, 1.0) {
            Ok(score) => debug!("Cache[{}]: frequency now {}", member, score),
            Err(error) => warn!(
                "Cache[{}]: failed to record access: {}",
                member, error
            ),
        }
    }

    fn discard_empty_directory(directory: &Path) {
        match fs::remove_dir(directory) {
            Ok(()) => debug!("Cache: removed empty {}", directory.display()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => debug!(
                "Cache: left {} in place: {}",
                directory.display(),
                error
            ),
        }
    }

    /// Returns the files for `key`, running `populate` on a miss.
    ///
    /// `populate` fills the entry directory; the files returned are always
    /// what a fresh listing of that directory finds. Every call counts toward
    /// the key's frequency score. A populate pass that leaves the directory
    /// empty is repeated up to the configured attempt count; after that the
    /// empty directory is removed and an empty list is returned. Errors from
    /// `populate` propagate immediately.
    pub fn get_files<F>(&self, key: &CacheKey, mut populate: F) -> Result<Vec<PathBuf>, MediaError>
    where
        F: FnMut(&Path) -> Result<(), MediaError>,
    {
        self.record_access(key);
        if let Some(entry) = self.lookup(key)? {
            debug!(
                "Cache[{}]: hit, {} files in {}",
                key.member(),
                entry.files.len(),
                entry.directory.display()
            );
            return Ok(entry.files);
        }

        let directory = self.directory(key);
        for attempt in 1..=self.populate_attempts {
            info!(
                "Cache[{}]: miss, populate attempt {}/{}",
                key.member(),
                attempt,
                self.populate_attempts
            );
            populate(&directory)?;
            let files = list_media_files(&directory)?;
            if !files.is_empty() {
                return Ok(files);
            }
        }

        warn!(
            "Cache[{}]: no files after {} attempts",
            key.member(),
            self.populate_attempts
        );
        Self::discard_empty_directory(&directory);
        Ok(Vec::new())
    }
}
