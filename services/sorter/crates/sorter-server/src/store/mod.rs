//! Remote state store: a slash-addressed JSON document tree.
//!
//! Every backend offers the same two calls. `get` returns the subtree at a
//! path (or `None` when nothing is stored there). `update` merges a set of
//! slash-path fields relative to a path; named fields are overwritten and
//! everything else is kept. There is no versioning and no conflict
//! detection, the last write wins.

mod firebase;
mod memory;
mod valkey;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use smartbin_common::paths::segments;
use smartbin_common::{StoreBackend, StoreSettings};
use thiserror::Error;

pub use firebase::FirebaseStore;
pub use memory::{MemoryStore, RecordedUpdate};
pub use valkey::ValkeyStore;

/// Failure talking to the remote store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid store path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: &'static str },

    #[error("store request timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed store document: {0}")]
    Malformed(String),

    #[error("store writer stopped")]
    WriterClosed,

    #[error("store write queue is full")]
    QueueFull,
}

impl StoreError {
    /// Whether a write that failed this way may still have been applied.
    /// A timed-out or dropped request can reach the store after the caller
    /// gave up on it.
    #[must_use]
    pub fn may_have_applied(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Port implemented by every store backend.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Subtree at `path`, or `None` when the path holds nothing.
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Merge `fields` (slash paths relative to `path`) into the document.
    async fn update(&self, path: &str, fields: &Map<String, Value>) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Run a store call with an upper bound on its duration.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

pub(crate) fn checked_path(path: &str) -> Result<(), StoreError> {
    smartbin_common::validate_path(path).map_err(|reason| StoreError::InvalidPath {
        path: path.to_string(),
        reason,
    })
}

/// Overwrite the node at slash `path` inside `root`, creating intermediate
/// objects and replacing scalars in the way. A `null` value removes the node.
pub(crate) fn set_at(root: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = segments(path).collect();
    let Some((leaf, parents)) = parts.split_last() else {
        return;
    };

    let mut node = root;
    for part in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry((*part).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if value.is_null() {
            map.remove(*leaf);
        } else {
            map.insert((*leaf).to_string(), value);
        }
    }
}

/// Build the backend selected by `settings`.
///
/// Valkey connects and verifies with PING before returning; Firebase is
/// stateless HTTP and only validates its URL here.
pub async fn connect(settings: &StoreSettings) -> Result<Arc<dyn StateStore>> {
    let timeout = Duration::from_secs(settings.store_timeout_secs);

    match settings.store_backend {
        StoreBackend::Firebase => {
            let Some(url) = settings.firebase_url.as_deref() else {
                bail!("SMARTBIN_FIREBASE_URL is required for the firebase backend");
            };
            let auth = settings
                .firebase_auth_file
                .as_deref()
                .map(read_secret)
                .transpose()?;
            let store = FirebaseStore::new(url, auth, timeout)
                .context("failed to initialise Firebase client")?;
            tracing::info!(url, "using Firebase Realtime Database store");
            Ok(Arc::new(store))
        }
        StoreBackend::Valkey => {
            let password = settings
                .valkey_pass_file
                .as_deref()
                .map(read_secret)
                .transpose()?;
            let store = ValkeyStore::connect(settings, password, timeout)
                .await
                .context("failed to initialise Valkey connection")?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; bin state is not shared with the device");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Read a secret from a mounted file, trimming the trailing newline.
pub fn read_secret(path: &str) -> Result<String> {
    Ok(std::fs::read_to_string(path)
        .with_context(|| format!("failed to read secret from {path}"))?
        .trim()
        .to_string())
}
