//! Bin lid lifecycle.
//!
//! Every accepted classification starts one cycle: an open update is
//! issued immediately, and a close update follows one dwell interval after
//! the open was handed to the store. Cycles run as their own tasks and
//! outlive the request that started them.
//!
//! All updates made by one controller go through a single bounded writer
//! queue, so they reach the store in the order they were issued. A new
//! cycle is refused with [`StoreError::QueueFull`] when the queue is full.
//! Across cycles there is no other coordination under
//! [`CyclePolicy::Independent`]: an older cycle's close can land while a
//! newer cycle's lid is open, exactly as the bin device has always observed
//! it. [`CyclePolicy::SingleActive`] cancels the pending close of the
//! previous cycle instead.
//!
//! An open that fails in a way that may still have reached the store
//! (timeout, dropped connection) is followed by the close all the same.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use smartbin_common::config::DEFAULT_WRITE_QUEUE;
use smartbin_common::{
    level_field, timing, validate_level, BinLevels, BinState, BinUpdate, Compartment,
    CyclePolicy, WasteClass, ROOT,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::store::{bounded, StateStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Time between handing the open to the store and issuing the close.
    pub dwell: Duration,
    pub policy: CyclePolicy,
    /// Upper bound on each store call, and on waiting for an open.
    pub store_timeout: Duration,
    /// Capacity of the writer queue.
    pub write_queue: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(timing::DEFAULT_DWELL_SECS),
            policy: CyclePolicy::default(),
            store_timeout: Duration::from_secs(timing::DEFAULT_STORE_TIMEOUT_SECS),
            write_queue: DEFAULT_WRITE_QUEUE,
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Open and close were both applied.
    Closed,
    /// The close was cancelled before it was issued.
    CloseCancelled,
    /// The open was refused before reaching the store, so no close was
    /// issued.
    OpenFailed(StoreError),
    /// The open failed but may have been applied; the close was issued
    /// after the dwell and applied.
    OpenUnconfirmed(StoreError),
    /// The close failed. The lid may stay reported open until another
    /// update lands.
    CloseFailed(StoreError),
    /// The cycle task panicked or was aborted.
    Aborted,
}

type Ack = Result<(), StoreError>;

/// Answer of the writer task for one update.
struct Written {
    /// When the update was handed to the store.
    dispatched_at: Instant,
    result: Ack,
}

struct WriteRequest {
    update: BinUpdate,
    ack: oneshot::Sender<Written>,
}

/// Handle to the single writer task of a controller.
#[derive(Clone)]
struct StoreWriter {
    tx: mpsc::Sender<WriteRequest>,
}

impl StoreWriter {
    fn spawn(store: Arc<dyn StateStore>, timeout: Duration, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriteRequest>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let dispatched_at = Instant::now();
                let result = bounded(timeout, store.update(ROOT, request.update.fields())).await;
                // The issuer may have stopped waiting.
                let _ = request.ack.send(Written {
                    dispatched_at,
                    result,
                });
            }
            tracing::debug!("store writer stopped");
        });
        Self { tx }
    }

    /// Reserve a queue slot without waiting.
    fn try_reserve(&self) -> Result<mpsc::Permit<'_, WriteRequest>, StoreError> {
        self.tx.try_reserve().map_err(|err| match err {
            TrySendError::Full(()) => StoreError::QueueFull,
            TrySendError::Closed(()) => StoreError::WriterClosed,
        })
    }

    /// Queue an update in a reserved slot. The receiver resolves once the
    /// store answered, or at once when no slot was reserved.
    fn submit(
        slot: Result<mpsc::Permit<'_, WriteRequest>, StoreError>,
        update: BinUpdate,
    ) -> oneshot::Receiver<Written> {
        let (ack, rx) = oneshot::channel();
        match slot {
            Ok(permit) => permit.send(WriteRequest { update, ack }),
            Err(error) => {
                let _ = ack.send(Written {
                    dispatched_at: Instant::now(),
                    result: Err(error),
                });
            }
        }
        rx
    }

    /// Queue an update, waiting for room, and wait for the store.
    async fn write(&self, update: BinUpdate) -> Ack {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(WriteRequest { update, ack }).await.is_err() {
            return Err(StoreError::WriterClosed);
        }
        rx.await
            .map_or(Err(StoreError::WriterClosed), |written| written.result)
    }

    /// Like [`Self::write`], but refuses with [`StoreError::QueueFull`]
    /// instead of waiting for room.
    async fn try_write(&self, update: BinUpdate) -> Ack {
        Self::submit(self.try_reserve(), update)
            .await
            .map_or(Err(StoreError::WriterClosed), |written| written.result)
    }
}

/// Cancellation flag for one pending close. Cloned into the cycle handle
/// and, under `single_active`, into the controller.
#[derive(Clone)]
struct CloseTimer(Arc<watch::Sender<bool>>);

impl CloseTimer {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self(Arc::new(tx)), rx)
    }

    fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Resolves when the close is cancelled. Never resolves once every
/// `CloseTimer` clone is gone.
async fn close_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Per-cycle handle returned by [`BinLifecycleController::report_classification`].
///
/// Dropping it leaves the cycle running.
#[must_use = "dropping the handle leaves the cycle running unobserved"]
pub struct CycleHandle {
    id: u64,
    label: WasteClass,
    opened: watch::Receiver<Option<Ack>>,
    issued_at: Instant,
    ack_timeout: Duration,
    timer: CloseTimer,
    task: JoinHandle<CycleOutcome>,
}

impl CycleHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> WasteClass {
        self.label
    }

    /// Wait until the store has acknowledged (or refused) the open update.
    ///
    /// Gives up with [`StoreError::Timeout`] once the store timeout has
    /// passed since the cycle started, however long the writer queue is.
    /// The cycle itself keeps running.
    pub async fn opened(&self) -> Result<(), StoreError> {
        let mut rx = self.opened.clone();
        let ack = async move {
            let ack = rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|state| (*state).clone());
            ack.unwrap_or(Err(StoreError::WriterClosed))
        };
        tokio::time::timeout_at(self.issued_at + self.ack_timeout, ack)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.ack_timeout)))
    }

    /// Cancel the pending close. No effect once the close was issued.
    pub fn cancel_close(&self) {
        self.timer.cancel();
    }

    /// Wait for the cycle to finish.
    pub async fn wait(self) -> CycleOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(cycle = self.id, error = %err, "bin cycle task aborted");
                CycleOutcome::Aborted
            }
        }
    }
}

struct Inner {
    store: Arc<dyn StateStore>,
    writer: StoreWriter,
    config: LifecycleConfig,
    active: Mutex<Option<CloseTimer>>,
    next_id: AtomicU64,
}

/// Maps classifications to store updates and owns the auto-close timing.
#[derive(Clone)]
pub struct BinLifecycleController {
    inner: Arc<Inner>,
}

impl BinLifecycleController {
    /// Must be called inside a tokio runtime; spawns the writer task.
    pub fn new(store: Arc<dyn StateStore>, config: LifecycleConfig) -> Self {
        let writer = StoreWriter::spawn(
            Arc::clone(&store),
            config.store_timeout,
            config.write_queue,
        );
        Self {
            inner: Arc::new(Inner {
                store,
                writer,
                config,
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    /// Start an open/close cycle for `label` without waiting on the store.
    pub fn report_classification(&self, label: WasteClass) -> CycleHandle {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let issued_at = Instant::now();

        // The previous close is cancelled before the new open is queued, and
        // only once a queue slot for that open is held.
        let slot = inner.writer.try_reserve();
        let (timer, cancel_rx) = CloseTimer::new();
        if slot.is_ok() && inner.config.policy == CyclePolicy::SingleActive {
            if let Some(previous) = lock(&inner.active).replace(timer.clone()) {
                previous.cancel();
            }
        }
        let open_ack = StoreWriter::submit(slot, BinUpdate::open(label, Utc::now()));

        let (opened_tx, opened_rx) = watch::channel(None);
        let cycle = Cycle {
            id,
            label,
            writer: inner.writer.clone(),
            issued_at,
            dwell: inner.config.dwell,
        };
        let task = tokio::spawn(cycle.run(open_ack, opened_tx, cancel_rx));

        tracing::info!(cycle = id, waste_type = %label, "bin cycle started");
        CycleHandle {
            id,
            label,
            opened: opened_rx,
            issued_at,
            ack_timeout: inner.config.store_timeout,
            timer,
            task,
        }
    }

    /// Current fill levels, or `None` when they cannot be read.
    pub async fn read_bin_levels(&self) -> Option<BinLevels> {
        match bounded(self.inner.config.store_timeout, self.inner.store.get(ROOT)).await {
            Ok(Some(doc)) => Some(BinLevels::from_document(&doc)),
            Ok(None) => {
                tracing::warn!("bin document is empty; no levels to report");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to read bin levels");
                None
            }
        }
    }

    /// Current lid state, `None` when no document exists yet.
    pub async fn read_bin_state(&self) -> Result<Option<BinState>, StoreError> {
        let doc = bounded(self.inner.config.store_timeout, self.inner.store.get(ROOT)).await?;
        Ok(doc.as_ref().map(BinState::from_document))
    }

    /// Record a fill level (percent) for one compartment.
    pub async fn set_level(&self, compartment: Compartment, level: f64) -> Result<(), StoreError> {
        validate_level(level).map_err(|reason| StoreError::InvalidField {
            field: level_field(compartment),
            reason,
        })?;
        self.inner
            .writer
            .try_write(BinUpdate::level(compartment, level))
            .await?;
        tracing::info!(%compartment, level, "bin level updated");
        Ok(())
    }

    /// Close the lid now, outside any cycle.
    pub async fn close_now(&self) -> Result<(), StoreError> {
        self.inner.writer.write(BinUpdate::close()).await?;
        tracing::info!("bin lid closed manually");
        Ok(())
    }
}

struct Cycle {
    id: u64,
    label: WasteClass,
    writer: StoreWriter,
    issued_at: Instant,
    dwell: Duration,
}

impl Cycle {
    async fn run(
        self,
        open_ack: oneshot::Receiver<Written>,
        opened: watch::Sender<Option<Ack>>,
        mut cancel: watch::Receiver<bool>,
    ) -> CycleOutcome {
        let id = self.id;
        let written = open_ack.await.unwrap_or(Written {
            dispatched_at: self.issued_at,
            result: Err(StoreError::WriterClosed),
        });
        opened.send_replace(Some(written.result.clone()));
        let close_at = written.dispatched_at + self.dwell;

        let open_error = match written.result {
            Ok(()) => {
                tracing::info!(cycle = id, waste_type = %self.label, "bin lid opened");
                None
            }
            Err(err) if err.may_have_applied() => {
                tracing::error!(
                    cycle = id,
                    waste_type = %self.label,
                    error = %err,
                    close_pending = true,
                    "failed to open bin lid"
                );
                Some(err)
            }
            Err(err) => {
                tracing::error!(
                    cycle = id,
                    waste_type = %self.label,
                    error = %err,
                    close_pending = false,
                    "failed to open bin lid"
                );
                return CycleOutcome::OpenFailed(err);
            }
        };

        tokio::select! {
            biased;
            () = close_cancelled(&mut cancel) => {
                tracing::info!(cycle = id, "pending bin close cancelled");
                return CycleOutcome::CloseCancelled;
            }
            () = tokio::time::sleep_until(close_at) => {}
        }

        match self.writer.write(BinUpdate::close()).await {
            Ok(()) => {
                tracing::info!(cycle = id, "bin lid closed");
                open_error.map_or(CycleOutcome::Closed, CycleOutcome::OpenUnconfirmed)
            }
            Err(err) => {
                tracing::error!(cycle = id, error = %err, "failed to close bin lid");
                CycleOutcome::CloseFailed(err)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
