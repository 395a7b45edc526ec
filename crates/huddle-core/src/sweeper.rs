//! Retention sweeper.
//!
//! Hard-deletes soft-deleted messages once their `deleted_at` is at least the
//! retention period old. Each room's batch is purged under that room's lock,
//! and the store re-checks the expiry condition, so a sweep never races a
//! concurrent soft delete.

use crate::error::ChatResult;
use crate::locks::RoomLocks;
use crate::model::now_millis;
use crate::store::Store;
use huddle_protocol::{MessageId, RoomId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default age after which soft-deleted messages are purged.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Messages that looked expired when the sweep started.
    pub candidates: usize,
    /// Messages actually removed.
    pub purged: usize,
    /// Rooms touched.
    pub rooms: usize,
}

pub struct RetentionSweeper {
    store: Arc<dyn Store>,
    locks: Arc<RoomLocks>,
    interval: Duration,
    retention: Duration,
}

impl RetentionSweeper {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<RoomLocks>,
        interval: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            interval,
            retention,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Sweep as of now.
    pub async fn sweep(&self) -> ChatResult<SweepReport> {
        self.sweep_at(now_millis()).await
    }

    /// Sweep as of `now` (milliseconds since the epoch).
    pub async fn sweep_at(&self, now: u64) -> ChatResult<SweepReport> {
        let cutoff = now.saturating_sub(self.retention.as_millis() as u64);
        let candidates = self.store.expired_messages(cutoff).await?;

        let mut by_room: BTreeMap<RoomId, Vec<MessageId>> = BTreeMap::new();
        for (message_id, room_id) in &candidates {
            by_room
                .entry(room_id.clone())
                .or_default()
                .push(message_id.clone());
        }

        let mut report = SweepReport {
            candidates: candidates.len(),
            purged: 0,
            rooms: by_room.len(),
        };
        for (room_id, ids) in by_room {
            let _guard = self.locks.lock(&room_id).await;
            let purged = self.store.purge_messages(&ids, cutoff).await?;
            debug!(room = %room_id, purged, "Purged expired messages");
            report.purged += purged;
        }
        Ok(report)
    }

    /// Run forever on the configured interval, first sweeping one interval
    /// from now. `on_report` sees every successful sweep.
    ///
    /// A failed sweep is logged and the schedule carries on.
    pub fn spawn<F>(self: Arc<Self>, on_report: F) -> JoinHandle<()>
    where
        F: Fn(&SweepReport) + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_secs = self.interval.as_secs(),
                retention_secs = self.retention.as_secs(),
                "Retention sweeper started"
            );

            loop {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(report) => {
                        if report.purged > 0 {
                            info!(purged = report.purged, rooms = report.rooms, "Retention sweep finished");
                        } else {
                            debug!("Retention sweep found nothing to purge");
                        }
                        on_report(&report);
                    }
                    Err(e) => error!(error = %e, "Retention sweep failed"),
                }
            }
        })
    }
}
