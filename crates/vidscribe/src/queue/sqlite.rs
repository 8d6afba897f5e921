use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{Delivery, WorkQueue};
use crate::db::Database;
use crate::error::QueueError;
use crate::job::WorkItem;

/// [`WorkQueue`] stored in the `work_queue` table.
///
/// Several worker processes can share one database file; claiming an item
/// happens inside an immediate transaction so two workers never lease the
/// same row.
#[derive(Clone)]
pub struct SqliteWorkQueue {
    db: Database,
    poll_interval: Duration,
}

enum Claim {
    Leased(Delivery),
    /// The row could not be decoded and was dropped from the queue.
    Poisoned {
        job_id: String,
        source: serde_json::Error,
    },
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl SqliteWorkQueue {
    pub fn new(db: Database, poll_interval: Duration) -> Self {
        Self { db, poll_interval }
    }

    fn try_claim(&self) -> Result<Option<Claim>, QueueError> {
        let claim = self.db.transaction(|tx| {
            let now = now_millis();
            let row = tx
                .query_row(
                    "SELECT id, job_id, payload, attempts FROM work_queue
                     WHERE visible_at <= ?1
                     ORDER BY id
                     LIMIT 1",
                    [now],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, u32>(3)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, job_id, payload, attempts)) = row else {
                return Ok(None);
            };

            let item: WorkItem = match serde_json::from_str(&payload) {
                Ok(item) => item,
                Err(source) => {
                    tx.execute("DELETE FROM work_queue WHERE id = ?1", [id])?;
                    return Ok(Some(Claim::Poisoned { job_id, source }));
                }
            };

            let lease_id = uuid::Uuid::new_v4().to_string();
            let attempts = attempts + 1;
            tx.execute(
                "UPDATE work_queue SET visible_at = ?1, attempts = ?2, lease_id = ?3 WHERE id = ?4",
                params![now.saturating_add(millis(item.timeout)), attempts, lease_id, id],
            )?;

            Ok(Some(Claim::Leased(Delivery {
                delivery_id: id as u64,
                lease_id,
                attempts,
                item,
            })))
        })?;
        Ok(claim)
    }
}

impl WorkQueue for SqliteWorkQueue {
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        let payload = serde_json::to_string(item).map_err(|source| QueueError::Payload {
            job_id: item.job_id.clone(),
            source,
        })?;

        self.db.with_conn(|conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO work_queue (job_id, payload, enqueued_at, visible_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![item.job_id, payload, now],
            )?;
            Ok(())
        })?;

        log::debug!("Enqueued job {}", item.job_id);
        Ok(())
    }

    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            match self.try_claim()? {
                Some(Claim::Leased(delivery)) => {
                    log::debug!(
                        "Leased job {} (attempt {})",
                        delivery.item.job_id,
                        delivery.attempts
                    );
                    return Ok(Some(delivery));
                }
                Some(Claim::Poisoned { job_id, source }) => {
                    log::error!("Dropped undecodable queue entry for job {}: {}", job_id, source);
                    return Err(QueueError::Payload { job_id, source });
                }
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let removed = self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM work_queue WHERE id = ?1 AND lease_id = ?2",
                params![delivery.delivery_id as i64, delivery.lease_id],
            )?;
            Ok(n == 1)
        })?;
        if !removed {
            log::warn!(
                "Ack for job {} ignored: lease {} no longer held",
                delivery.item.job_id,
                delivery.lease_id
            );
        }
        Ok(removed)
    }

    fn release(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE work_queue
                 SET visible_at = ?1, lease_id = NULL, attempts = MAX(attempts - 1, 0)
                 WHERE id = ?2 AND lease_id = ?3",
                params![now_millis(), delivery.delivery_id as i64, delivery.lease_id],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn pending(&self) -> Result<usize, QueueError> {
        let count = self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM work_queue WHERE visible_at <= ?1",
                [now_millis()],
                |r| r.get(0),
            )?;
            Ok(n)
        })?;
        Ok(count as usize)
    }
}
