//! Shared key-value storage port used for frequency scores, pagination
//! cursors, and per-consumer selection indices.
//!
//! Every read-modify-write through this port is best effort. Callers must not
//! depend on exact counts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("state store lock poisoned: {0}")]
    Poisoned(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow string, hash, and sorted-set operations.
pub trait MediaStateStore: Send + Sync {
    /// Adds `amount` to a member's score (creating it at zero) and returns the new score.
    fn increment_score(&self, set: &str, member: &str, amount: f64) -> Result<f64, StoreError>;
    fn set_score(&self, set: &str, member: &str, score: f64) -> Result<(), StoreError>;
    fn score(&self, set: &str, member: &str) -> Result<Option<f64>, StoreError>;
    /// Members with `score >= min_score`, highest first, at most `limit`.
    /// Ties order by member, descending.
    fn top_by_score(
        &self,
        set: &str,
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError>;
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
}

pub(crate) fn sort_descending(entries: &mut [(String, f64)]) {
    entries.sort_by(|left, right| {
        right
            .1
            .total_cmp(&left.1)
            .then_with(|| right.0.cmp(&left.0))
    });
}

#[derive(Debug, Default)]
struct InMemoryState {
    scores: HashMap<String, HashMap<String, f64>>,
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// Process-local store; used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InMemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|err| StoreError::Poisoned(err.to_string()))
    }
}

impl MediaStateStore for InMemoryStateStore {
    fn increment_score(&self, set: &str, member: &str, amount: f64) -> Result<f64, StoreError> {
        let mut state = self.lock()?;
        let score = state
            .scores
            .entry(set.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(0.0);
        *score += amount;
        Ok(*score)
    }

    fn set_score(&self, set: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .scores
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    fn score(&self, set: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .scores
            .get(set)
            .and_then(|members| members.get(member))
            .copied())
    }

    fn top_by_score(
        &self,
        set: &str,
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let state = self.lock()?;
        let mut entries: Vec<(String, f64)> = state
            .scores
            .get(set)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, score)| **score >= min_score)
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();
        sort_descending(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.strings.get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()?
            .hashes
            .get(key)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }
}
