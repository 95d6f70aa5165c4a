//! Pause/resume discipline between local operations and replication.
//!
//! The local database and its replication share one storage engine. Running
//! a live pull/push while the application issues a burst of reads and writes
//! against the same records produces revision races and conflict churn, so
//! every store operation runs inside [`SyncScheduler::around`]:
//!
//! 1. any pending resume is cancelled and replication is paused;
//! 2. the operation runs and its wall-clock duration is recorded;
//! 3. once no operation is in flight, a resume is scheduled after
//!    `last duration + grace`, or immediately if the database was already
//!    fully synced once.
//!
//! A new operation arriving before the resume fires replaces it, so a burst
//! of operations pauses replication once and resumes it once, after the
//! caller has gone idle. An operation whose future is dropped half-way still
//! counts as finished. Once the scheduler is closed it never resumes again.
//!
//! The exclusion is best-effort: a remote batch that the engine accepted
//! before the pause took effect can still interleave.

use crate::config::StoreConfig;
use crate::engine::{ReplicationSession, SyncState};
use crate::markers::LocalMarkers;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

pub struct SyncScheduler {
    database: String,
    session: Option<Arc<dyn ReplicationSession>>,
    using_local: bool,
    markers: Arc<LocalMarkers>,
    grace: Duration,
    last_duration: Mutex<Duration>,
    in_flight: AtomicUsize,
    pending_resume: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Accounts for one operation inside [`SyncScheduler::around`], including
/// one that is dropped before it completes.
struct InFlight<'a> {
    scheduler: &'a SyncScheduler,
    started: Instant,
}

impl<'a> InFlight<'a> {
    fn enter(scheduler: &'a SyncScheduler) -> Self {
        scheduler.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            scheduler,
            started: Instant::now(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        *self.scheduler.last_duration.lock() = elapsed;
        trace!(database = %self.scheduler.database, ?elapsed, "operation finished");
        if self.scheduler.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.scheduler.schedule_resume();
        }
    }
}

impl SyncScheduler {
    pub fn new(
        database: impl Into<String>,
        session: Option<Arc<dyn ReplicationSession>>,
        using_local: bool,
        markers: Arc<LocalMarkers>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            database: database.into(),
            session,
            using_local,
            markers,
            grace: config.resume_grace,
            last_duration: Mutex::new(config.initial_operation_estimate),
            in_flight: AtomicUsize::new(0),
            pending_resume: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> Option<&Arc<dyn ReplicationSession>> {
        self.session.as_ref()
    }

    pub fn sync_state(&self) -> SyncState {
        self.session
            .as_ref()
            .map_or(SyncState::LocalOnly, |s| s.state())
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.is_enabled())
    }

    /// Duration of the most recently completed operation.
    pub fn last_operation_duration(&self) -> Duration {
        *self.last_duration.lock()
    }

    /// Operations currently inside [`SyncScheduler::around`].
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_pending_resume(&self) -> bool {
        self.pending_resume
            .lock()
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    /// Delay the next scheduled resume would use.
    pub fn resume_delay(&self) -> Duration {
        if self.markers.is_synced(&self.database) {
            Duration::ZERO
        } else {
            self.last_operation_duration() + self.grace
        }
    }

    /// Stop replication now and drop any scheduled resume. Idempotent.
    pub async fn cancel_sync(&self) {
        if self.is_closed() {
            return;
        }
        self.abort_pending();
        self.pause().await;
    }

    async fn pause(&self) {
        let Some(session) = &self.session else {
            return;
        };
        if !self.using_local || session.state() == SyncState::Syncing {
            trace!(database = %self.database, "pausing replication");
            session.cancel().await;
        }
    }

    /// Re-enable replication immediately.
    pub async fn resume_sync(&self) {
        if self.is_closed() {
            return;
        }
        self.abort_pending();
        if let Some(session) = &self.session {
            session.resume().await;
        }
    }

    /// Run `op` with replication paused, then schedule the resume.
    pub async fn around<Fut, T>(&self, op: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let mut guard = InFlight::enter(self);
        self.cancel_sync().await;
        guard.started = Instant::now();
        op.await
    }

    /// Replace any pending resume with a fresh one.
    pub fn schedule_resume(&self) {
        if self.is_closed() {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        if !session.is_enabled() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            trace!(database = %self.database, "no runtime, resume not scheduled");
            return;
        };
        let delay = self.resume_delay();
        trace!(database = %self.database, ?delay, "scheduling replication resume");
        let handle = runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            session.resume().await;
        });
        if let Some(previous) = self.pending_resume.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Pause replication for good. Operations still in flight finish
    /// normally but no longer schedule a resume. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.abort_pending();
        self.pause().await;
    }

    fn abort_pending(&self) {
        if let Some(handle) = self.pending_resume.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.abort_pending();
    }
}
