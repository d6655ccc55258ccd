//! Client sessions: the read-optimized, self-healing view of one tenant.
//!
//! A session owns a [`ClientCache`] and keeps it converged from three
//! sources, in order of authority:
//! 1. Snapshots, on connect and whenever the session falls back to polling.
//! 2. The durable change feed, tailed from the snapshot's position.
//! 3. Best-effort broadcast signals from other sessions, for low latency.
//!
//! Writes go straight to the store, then the returned rows are applied to
//! the cache so the writer reads its own writes immediately. All background
//! work runs on one pump task per session; shutting the session down stops
//! it and the feed worker.

use crate::cache::ClientCache;
use crate::config::Config;
use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::feed::{FeedHandle, FeedStatus, start_feed};
use crate::notify::{self, NotificationDispatcher};
use crate::relay::{Relay, Signal, SignalEnvelope, channel_name};
use crate::types::{
    Assignment, ChangeRecord, Department, Priority, Task, ToggleOutcome, WorkStatus,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

fn lock_cache(cache: &Mutex<ClientCache>) -> MutexGuard<'_, ClientCache> {
    // The cache is plain map data; a poisoned lock is still usable and the
    // feed overwrites anything half-applied.
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Refetch a full snapshot and replace the cache with it.
///
/// The lock is held across the snapshot read so no feed record can land
/// between the read and the prime; records still queued behind it re-apply
/// idempotently afterwards.
fn resync_now(
    db: &Database,
    company_id: &str,
    cache: &Mutex<ClientCache>,
    applied_tx: &watch::Sender<i64>,
) -> anyhow::Result<i64> {
    let mut guard = lock_cache(cache);
    let snapshot = db.snapshot(company_id)?;
    let seq = snapshot.seq;
    guard.prime(snapshot);
    drop(guard);

    applied_tx.send_if_modified(|cur| {
        if seq > *cur {
            *cur = seq;
            true
        } else {
            false
        }
    });
    Ok(seq)
}

async fn recv_signal(
    rx: &mut Option<broadcast::Receiver<SignalEnvelope>>,
) -> Result<SignalEnvelope, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Background task merging feed records and broadcast signals into the
/// cache, with a periodic refetch covering for whichever source is down.
struct Pump {
    db: Database,
    company_id: String,
    origin: String,
    cache: Arc<Mutex<ClientCache>>,
    applied_tx: Arc<watch::Sender<i64>>,
    feed_rx: mpsc::Receiver<ChangeRecord>,
    relay_rx: Option<broadcast::Receiver<SignalEnvelope>>,
    feed_status_rx: watch::Receiver<FeedStatus>,
    refetch_interval: Duration,
    shutdown_rx: oneshot::Receiver<()>,
}

impl Pump {
    async fn run(self) {
        let Pump {
            db,
            company_id,
            origin,
            cache,
            applied_tx,
            mut feed_rx,
            mut relay_rx,
            feed_status_rx,
            refetch_interval,
            mut shutdown_rx,
        } = self;

        let mut refetch = tokio::time::interval_at(
            tokio::time::Instant::now() + refetch_interval,
            refetch_interval,
        );
        refetch.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut feed_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,

                record = feed_rx.recv(), if feed_open => match record {
                    Some(record) => {
                        let seq = record.seq;
                        lock_cache(&cache).apply_change(&record);
                        applied_tx.send_if_modified(|cur| {
                            if seq > *cur {
                                *cur = seq;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    None => {
                        feed_open = false;
                        debug!(company_id = %company_id, "feed stream ended");
                    }
                },

                envelope = recv_signal(&mut relay_rx) => match envelope {
                    Ok(envelope) => {
                        // Sessions skip their own signals; the write path
                        // already applied the authoritative rows.
                        if envelope.origin != origin {
                            lock_cache(&cache).apply_signal(&envelope.signal);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(company_id = %company_id, missed, "signal channel lagged, refetching");
                        if let Err(e) = resync_now(&db, &company_id, &cache, &applied_tx) {
                            warn!("refetch after lag failed: {e}");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(company_id = %company_id, "signal channel closed, falling back to polling");
                        relay_rx = None;
                    }
                },

                _ = refetch.tick() => {
                    let streaming = feed_open && *feed_status_rx.borrow() == FeedStatus::Streaming;
                    if relay_rx.is_none() || !streaming {
                        debug!(company_id = %company_id, "fallback refetch");
                        if let Err(e) = resync_now(&db, &company_id, &cache, &applied_tx) {
                            warn!("fallback refetch failed: {e}");
                        }
                    }
                }
            }
        }

        debug!(company_id = %company_id, "session pump stopped");
    }
}

/// One connected client for one tenant.
pub struct ClientSession {
    db: Database,
    company_id: String,
    origin: String,
    relay: Option<Arc<Relay>>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    cache: Arc<Mutex<ClientCache>>,
    applied_tx: Arc<watch::Sender<i64>>,
    applied_rx: watch::Receiver<i64>,
    feed: FeedHandle,
    pump_shutdown: oneshot::Sender<()>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("company_id", &self.company_id)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// Connect to a tenant: snapshot, prime the cache, start tailing the
    /// feed from the snapshot's position, and subscribe to the relay.
    ///
    /// A missing relay is not an error. The session logs the degradation
    /// and leans on the periodic refetch instead.
    pub async fn connect(
        db: Database,
        company_id: &str,
        relay: Option<Arc<Relay>>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: &Config,
    ) -> CoreResult<ClientSession> {
        db.get_company(company_id)
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::CompanyNotFound(company_id.to_string()))?;

        let origin = Uuid::now_v7().to_string();
        let snapshot = db.snapshot(company_id).map_err(CoreError::from)?;
        let start_seq = snapshot.seq;

        let mut cache = ClientCache::new();
        cache.prime(snapshot);
        let cache = Arc::new(Mutex::new(cache));

        let (applied_tx, applied_rx) = watch::channel(start_seq);
        let applied_tx = Arc::new(applied_tx);

        let (feed, feed_rx) = start_feed(
            db.clone(),
            company_id.to_string(),
            start_seq,
            config.feed.clone(),
        );

        let relay_rx = match &relay {
            Some(relay) => Some(relay.subscribe(company_id)),
            None => {
                let reason =
                    CoreError::channel_unavailable(&channel_name(company_id), "no relay configured");
                warn!("{reason}; session will refetch every {}ms", config.sync.refetch_interval_ms);
                None
            }
        };

        let (pump_shutdown, shutdown_rx) = oneshot::channel();
        let pump = Pump {
            db: db.clone(),
            company_id: company_id.to_string(),
            origin: origin.clone(),
            cache: Arc::clone(&cache),
            applied_tx: Arc::clone(&applied_tx),
            feed_rx,
            relay_rx,
            feed_status_rx: feed.status_watch(),
            refetch_interval: Duration::from_millis(config.sync.refetch_interval_ms),
            shutdown_rx,
        };
        tokio::spawn(pump.run());

        info!(company_id = %company_id, origin = %origin, seq = start_seq, "session connected");

        Ok(ClientSession {
            db,
            company_id: company_id.to_string(),
            origin,
            relay,
            dispatcher,
            cache,
            applied_tx,
            applied_rx,
            feed,
            pump_shutdown,
        })
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    /// Identity attached to published signals; this session ignores its
    /// own envelopes.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Assign an employee to a department and mirror the result locally.
    pub fn assign(
        &self,
        department_id: &str,
        employee_id: &str,
        priority: Priority,
    ) -> CoreResult<Assignment> {
        let assignment = self
            .db
            .assign(department_id, employee_id, priority)
            .map_err(CoreError::from)?;

        {
            let mut cache = lock_cache(&self.cache);
            cache.upsert_department(assignment.department.clone());
            cache.upsert_task(assignment.task.clone());
        }

        self.publish(Signal::TaskStatusChanged {
            task_id: assignment.task.id.clone(),
            department_id: assignment.department.id.clone(),
            status: assignment.task.status,
            department_priority: Some(assignment.department.priority),
        });

        Ok(assignment)
    }

    /// Advance a task (and its department twin) to a new status.
    pub fn advance_status(&self, task_id: &str, new_status: WorkStatus) -> CoreResult<Assignment> {
        let assignment = self
            .db
            .advance_status(task_id, new_status)
            .map_err(CoreError::from)?;

        {
            let mut cache = lock_cache(&self.cache);
            cache.upsert_department(assignment.department.clone());
            cache.upsert_task(assignment.task.clone());
        }

        // Completion resets the department's priority; carry the reset so
        // receivers do not keep a stale high flag.
        let department_priority = if new_status == WorkStatus::Completed {
            Some(assignment.department.priority)
        } else {
            None
        };
        self.publish(Signal::TaskStatusChanged {
            task_id: assignment.task.id.clone(),
            department_id: assignment.department.id.clone(),
            status: assignment.task.status,
            department_priority,
        });

        Ok(assignment)
    }

    /// Flip a department's priority, using this session's last observed
    /// value as the base so concurrent stale toggles converge.
    ///
    /// If anyone is assigned, a notice is dispatched fire-and-forget; a
    /// delivery failure is logged and dropped.
    pub fn toggle_priority(&self, department_id: &str) -> CoreResult<ToggleOutcome> {
        let observed = {
            let cache = lock_cache(&self.cache);
            cache.department(department_id).map(|d| d.priority)
        };
        let observed = match observed {
            Some(priority) => priority,
            None => self
                .db
                .get_department(department_id)
                .map_err(CoreError::from)?
                .ok_or_else(|| CoreError::DepartmentNotFound(department_id.to_string()))?
                .priority,
        };

        let outcome = self
            .db
            .toggle_priority(department_id, observed)
            .map_err(CoreError::from)?;

        {
            let mut cache = lock_cache(&self.cache);
            cache.upsert_department(outcome.department.clone());
            if let Some(task) = &outcome.task {
                cache.upsert_task(task.clone());
            }
        }

        self.publish(Signal::PriorityChanged {
            department_id: outcome.department.id.clone(),
            priority: outcome.department.priority,
        });

        if let Some(notice) = notify::priority_notice(&outcome.department) {
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                if let Err(e) = dispatcher.dispatch(notice).await {
                    warn!("priority notification dropped: {e}");
                }
            });
        }

        Ok(outcome)
    }

    fn publish(&self, signal: Signal) {
        if let Some(relay) = &self.relay {
            relay.publish(&self.company_id, &self.origin, signal);
        }
    }

    pub fn department(&self, id: &str) -> Option<Department> {
        lock_cache(&self.cache).department(id)
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        lock_cache(&self.cache).task(id)
    }

    pub fn departments(&self) -> Vec<Department> {
        lock_cache(&self.cache).departments()
    }

    pub fn tasks_for_employee(&self, employee_id: &str) -> Vec<Task> {
        lock_cache(&self.cache).tasks_for_employee(employee_id)
    }

    pub fn active_task_for_department(&self, department_id: &str) -> Option<Task> {
        lock_cache(&self.cache).active_task_for_department(department_id)
    }

    /// Highest journal position the cache is known to include.
    pub fn applied_seq(&self) -> i64 {
        *self.applied_rx.borrow()
    }

    /// Wait until the cache has absorbed the journal up to `seq`.
    pub async fn wait_for_seq(&self, seq: i64) -> CoreResult<()> {
        let mut rx = self.applied_rx.clone();
        while *rx.borrow_and_update() < seq {
            rx.changed()
                .await
                .map_err(|_| CoreError::Internal("session pump stopped".to_string()))?;
        }
        Ok(())
    }

    /// Force a snapshot refetch now instead of waiting for the fallback
    /// interval. Returns the journal position the cache was reset to.
    pub fn resync(&self) -> CoreResult<i64> {
        resync_now(&self.db, &self.company_id, &self.cache, &self.applied_tx)
            .map_err(CoreError::from)
    }

    pub fn feed_status(&self) -> FeedStatus {
        self.feed.status()
    }

    /// Last feed position delivered to this session; persist it to resume
    /// a future connection without a full replay.
    pub fn feed_cursor(&self) -> i64 {
        self.feed.cursor()
    }

    /// Stop the pump and the feed worker.
    pub fn shutdown(self) {
        let _ = self.pump_shutdown.send(());
        self.feed.shutdown();
    }
}
