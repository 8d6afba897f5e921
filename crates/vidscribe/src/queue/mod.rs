//! Durable work queue between the submit path and the workers.
//!
//! Delivery is at-least-once: a dequeued item is leased for its job's
//! timeout and becomes visible again if the lease runs out before it is
//! acknowledged.

use std::time::Duration;

use crate::error::QueueError;
use crate::job::WorkItem;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryWorkQueue;
pub use sqlite::SqliteWorkQueue;

/// A leased work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_id: u64,
    /// Identifies this particular lease; acks and releases from an expired
    /// lease are ignored.
    pub lease_id: String,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempts: u32,
    pub item: WorkItem,
}

pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError>;

    /// Leases the oldest visible item, waiting up to `wait` for one to
    /// appear.
    fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Removes the item for good. Returns `false` if the lease was no longer
    /// held.
    fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError>;

    /// Gives the item back for immediate redelivery without counting the
    /// attempt.
    fn release(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Items currently visible to `dequeue`.
    fn pending(&self) -> Result<usize, QueueError>;
}
