//! Durable change-feed worker.
//!
//! Tails the change journal for one tenant from a cursor, delivering each
//! record in order over an mpsc channel. Delivery is at-least-once: the
//! cursor advances only after a record has been handed to the receiver, so
//! a restarted worker replays anything unacknowledged. Wakes on the store's
//! commit signal, with a periodic poll as a safety net.

use crate::config::FeedConfig;
use crate::db::Database;
use crate::types::ChangeRecord;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Status of a feed worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Tailing the journal and delivering records.
    Streaming,
    /// Journal reads are failing; delivery paused while retrying.
    Degraded,
    /// Worker has shut down.
    Stopped,
}

/// Handle for one tenant-scoped feed subscription.
pub struct FeedHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    status_rx: watch::Receiver<FeedStatus>,
    cursor_rx: watch::Receiver<i64>,
}

impl FeedHandle {
    pub fn status(&self) -> FeedStatus {
        *self.status_rx.borrow()
    }

    /// Watch the worker's health; used by sessions to decide when the
    /// polling fallback must cover for the feed.
    pub fn status_watch(&self) -> watch::Receiver<FeedStatus> {
        self.status_rx.clone()
    }

    /// Last delivered journal position. Persist it to resume after restart.
    pub fn cursor(&self) -> i64 {
        *self.cursor_rx.borrow()
    }

    /// Trigger shutdown of the feed worker.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Compute jittered delay for retry.
/// Uses system time nanoseconds for simple jitter without requiring rand crate.
fn compute_jittered_delay(base_ms: u64, jitter_ms: u64) -> Duration {
    use std::time::SystemTime;

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    // Map nanos to range [-jitter_ms, +jitter_ms]
    let jitter_range = (jitter_ms * 2) as i64;
    let jitter = if jitter_range > 0 {
        (nanos as i64 % jitter_range) - (jitter_ms as i64)
    } else {
        0
    };

    let delay_ms = (base_ms as i64 + jitter).max(100) as u64;
    Duration::from_millis(delay_ms)
}

/// Start tailing a tenant's journal from `from_seq` (exclusive).
///
/// Returns the control handle and the record stream. Dropping either side
/// stops the worker.
pub fn start_feed(
    db: Database,
    company_id: String,
    from_seq: i64,
    config: FeedConfig,
) -> (FeedHandle, mpsc::Receiver<ChangeRecord>) {
    let (event_tx, event_rx) = mpsc::channel(config.batch_size.max(1) as usize);
    let (status_tx, status_rx) = watch::channel(FeedStatus::Streaming);
    let (cursor_tx, cursor_rx) = watch::channel(from_seq);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let mut wake_rx = db.changes_watch();

    tokio::spawn(async move {
        let mut cursor = from_seq;
        let mut retry_delay_ms = config.retry_initial_ms;

        info!(company_id = %company_id, from_seq, "feed worker started");

        loop {
            match db.changes_since(&company_id, cursor, config.batch_size) {
                Ok(batch) => {
                    if *status_tx.borrow() != FeedStatus::Streaming {
                        let _ = status_tx.send(FeedStatus::Streaming);
                    }
                    retry_delay_ms = config.retry_initial_ms;

                    if batch.is_empty() {
                        tokio::select! {
                            _ = &mut shutdown_rx => break,
                            changed = wake_rx.changed() => {
                                // A closed store still gets the poll arm below.
                                if changed.is_err() {
                                    tokio::time::sleep(Duration::from_millis(
                                        config.poll_interval_ms,
                                    ))
                                    .await;
                                }
                            }
                            _ = tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)) => {}
                        }
                        continue;
                    }

                    for record in batch {
                        let seq = record.seq;
                        if event_tx.send(record).await.is_err() {
                            debug!(company_id = %company_id, "feed receiver dropped");
                            let _ = status_tx.send(FeedStatus::Stopped);
                            return;
                        }
                        cursor = seq;
                        let _ = cursor_tx.send(cursor);
                    }
                }
                Err(e) => {
                    warn!(company_id = %company_id, "feed read failed: {e}");
                    let _ = status_tx.send(FeedStatus::Degraded);

                    let delay = compute_jittered_delay(retry_delay_ms, config.retry_jitter_ms);
                    tokio::select! {
                        _ = &mut shutdown_rx => break,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    retry_delay_ms = ((retry_delay_ms as f64 * config.retry_multiplier) as u64)
                        .min(config.retry_max_ms);
                }
            }
        }

        info!(company_id = %company_id, cursor, "feed worker stopped");
        let _ = status_tx.send(FeedStatus::Stopped);
    });

    (
        FeedHandle {
            shutdown_tx: Some(shutdown_tx),
            status_rx,
            cursor_rx,
        },
        event_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_delay_stays_in_range() {
        for _ in 0..50 {
            let d = compute_jittered_delay(1_000, 250);
            assert!(d >= Duration::from_millis(750));
            assert!(d <= Duration::from_millis(1_250));
        }
    }

    #[test]
    fn jittered_delay_has_floor() {
        let d = compute_jittered_delay(0, 0);
        assert!(d >= Duration::from_millis(100));
    }
}
