//! In-process document tree with the same merge semantics as the remote
//! backends. Used for local development and, with recording switched on,
//! as the fake in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use smartbin_common::paths::{join, segments};
use tokio::time::Instant;

use super::{checked_path, set_at, StateStore, StoreError};

/// One applied update, as seen by the store.
#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    /// When the merge was applied (after any simulated latency).
    pub at: Instant,
    pub path: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug)]
pub struct MemoryStore {
    root: Mutex<Value>,
    history: Option<Mutex<Vec<RecordedUpdate>>>,
    offline: AtomicBool,
    latency: Duration,
    ack_delay: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that keeps no write history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
            history: None,
            offline: AtomicBool::new(false),
            latency: Duration::ZERO,
            ack_delay: Duration::ZERO,
        }
    }

    /// A store that records every applied update, see [`Self::history`].
    #[must_use]
    pub fn recording() -> Self {
        Self {
            history: Some(Mutex::new(Vec::new())),
            ..Self::new()
        }
    }

    /// Delay every call by `latency` before it takes effect.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Apply updates immediately but answer only after `delay`, like a
    /// remote write whose response is slow.
    #[must_use]
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Updates applied so far, oldest first. Always empty unless the store
    /// was built with [`Self::recording`].
    #[must_use]
    pub fn history(&self) -> Vec<RecordedUpdate> {
        self.history
            .as_ref()
            .map(|history| lock(history).clone())
            .unwrap_or_default()
    }

    /// Full document, for assertions.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        lock(&self.root).clone()
    }

    async fn enter(&self) -> Result<(), StoreError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        checked_path(path)?;
        self.enter().await?;

        let root = lock(&self.root);
        let mut node = &*root;
        for segment in segments(path) {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(match node {
            Value::Null => None,
            Value::Object(map) if map.is_empty() => None,
            other => Some(other.clone()),
        })
    }

    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), StoreError> {
        checked_path(path)?;
        for field in fields.keys() {
            checked_path(field)?;
        }
        self.enter().await?;

        {
            let mut root = lock(&self.root);
            for (field, value) in fields {
                let full = join(path, field);
                set_at(&mut root, &full, value.clone());
            }
        }

        if let Some(history) = &self.history {
            lock(history).push(RecordedUpdate {
                at: Instant::now(),
                path: path.to_string(),
                fields: fields.clone(),
            });
        }
        if !self.ack_delay.is_zero() {
            tokio::time::sleep(self.ack_delay).await;
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
