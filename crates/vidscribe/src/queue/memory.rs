use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{Delivery, WorkQueue};
use crate::error::QueueError;
use crate::job::WorkItem;

struct Entry {
    item: WorkItem,
    attempts: u32,
}

struct Lease {
    entry: Entry,
    lease_id: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    next_id: u64,
    /// Visible items keyed by id, so iteration order is enqueue order.
    ready: BTreeMap<u64, Entry>,
    leased: HashMap<u64, Lease>,
}

impl State {
    /// Moves expired leases back into `ready`. Returns the next expiry
    /// among the remaining leases.
    fn reclaim_expired(&mut self, now: Instant) -> Option<Instant> {
        let expired: Vec<u64> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                self.ready.insert(id, lease.entry);
            }
        }
        self.leased.values().map(|lease| lease.expires_at).min()
    }
}

/// In-process [`WorkQueue`] with the same lease semantics as
/// [`super::SqliteWorkQueue`].
#[derive(Default)]
pub struct MemoryWorkQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl MemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, QueueError> {
        self.state.lock().map_err(|_| QueueError::LockPoisoned)
    }
}

impl WorkQueue for MemoryWorkQueue {
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;
        state.ready.insert(
            id,
            Entry {
                item: item.clone(),
                attempts: 0,
            },
        );
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        let mut state = self.lock()?;
        loop {
            let now = Instant::now();
            let next_expiry = state.reclaim_expired(now);

            if let Some((id, mut entry)) = state.ready.pop_first() {
                entry.attempts += 1;
                let delivery = Delivery {
                    delivery_id: id,
                    lease_id: uuid::Uuid::new_v4().to_string(),
                    attempts: entry.attempts,
                    item: entry.item.clone(),
                };
                state.leased.insert(
                    id,
                    Lease {
                        entry,
                        lease_id: delivery.lease_id.clone(),
                        expires_at: now + delivery.item.timeout,
                    },
                );
                return Ok(Some(delivery));
            }

            if now >= deadline {
                return Ok(None);
            }
            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.min(deadline));
            let (guard, _) = self
                .available
                .wait_timeout(state, wake_at.saturating_duration_since(now))
                .map_err(|_| QueueError::LockPoisoned)?;
            state = guard;
        }
    }

    fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let mut state = self.lock()?;
        let held = state
            .leased
            .get(&delivery.delivery_id)
            .is_some_and(|lease| lease.lease_id == delivery.lease_id);
        if held {
            state.leased.remove(&delivery.delivery_id);
        }
        Ok(held)
    }

    fn release(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let held = state
            .leased
            .get(&delivery.delivery_id)
            .is_some_and(|lease| lease.lease_id == delivery.lease_id);
        if held {
            if let Some(mut lease) = state.leased.remove(&delivery.delivery_id) {
                lease.entry.attempts = lease.entry.attempts.saturating_sub(1);
                state.ready.insert(delivery.delivery_id, lease.entry);
            }
        }
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn pending(&self) -> Result<usize, QueueError> {
        let mut state = self.lock()?;
        state.reclaim_expired(Instant::now());
        Ok(state.ready.len())
    }
}
