//! Per-item write lanes with last-intent-wins supersession.
//!
//! Every staged change bumps the generation of its key. A lane lets one
//! write per key reach the remote at a time. When a queued write finally gets
//! the lane but a newer intent has been staged meanwhile, it is dropped
//! without being sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::catalog::{ItemKey, TaskId};

/// What a remote write targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteKey {
    Level { item: ItemKey },
    Note { task: TaskId },
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    lane: Arc<AsyncMutex<()>>,
}

/// Handle for one staged intent.
#[derive(Debug, Clone)]
pub struct WriteTicket {
    key: WriteKey,
    generation: u64,
    lane: Arc<AsyncMutex<()>>,
}

impl WriteTicket {
    pub fn key(&self) -> &WriteKey {
        &self.key
    }
}

/// Held while a write is on the wire.
#[derive(Debug)]
pub struct InFlight {
    _lane: OwnedMutexGuard<()>,
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct WriteQueue {
    slots: Mutex<HashMap<WriteKey, Slot>>,
    /// Generations are unique across keys and never reused, so a stale
    /// ticket cannot match a slot created after its own was settled.
    next_generation: AtomicU64,
    in_flight: Arc<AtomicUsize>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<WriteKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stage a new intent for `key`, superseding any older one.
    pub fn stage(&self, key: WriteKey) -> WriteTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
            generation,
            lane: Arc::new(AsyncMutex::new(())),
        });
        slot.generation = generation;
        WriteTicket {
            key,
            generation: slot.generation,
            lane: Arc::clone(&slot.lane),
        }
    }

    /// Whether `ticket` is still the newest intent for its key.
    pub fn is_current(&self, ticket: &WriteTicket) -> bool {
        self.slots()
            .get(&ticket.key)
            .is_some_and(|slot| slot.generation == ticket.generation)
    }

    /// Wait for the key's lane. Returns `None` when a newer intent was staged
    /// while waiting; such a write must not be sent.
    pub async fn acquire(&self, ticket: &WriteTicket) -> Option<InFlight> {
        let guard = Arc::clone(&ticket.lane).lock_owned().await;
        if !self.is_current(ticket) {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(InFlight {
            _lane: guard,
            counter: Arc::clone(&self.in_flight),
        })
    }

    /// Whether any intent for `key` has been staged and not yet settled.
    pub fn has_pending(&self, key: &WriteKey) -> bool {
        self.slots().contains_key(key)
    }

    /// Forget `key` once its newest intent has settled.
    pub fn settle(&self, ticket: &WriteTicket) {
        let mut slots = self.slots();
        if slots
            .get(&ticket.key)
            .is_some_and(|slot| slot.generation == ticket.generation)
        {
            slots.remove(&ticket.key);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Drop every pending intent, e.g. when the day rolls over.
    pub fn clear(&self) {
        self.slots().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(task: &str) -> WriteKey {
        WriteKey::Level {
            item: ItemKey::flat(task),
        }
    }

    #[test]
    fn newer_stage_supersedes_older() {
        let queue = WriteQueue::new();
        let first = queue.stage(key("reading"));
        let second = queue.stage(key("reading"));
        let other = queue.stage(key("exercise"));

        assert!(!queue.is_current(&first));
        assert!(queue.is_current(&second));
        assert!(queue.is_current(&other));
    }

    #[tokio::test]
    async fn one_write_per_key_on_the_wire() {
        let queue = WriteQueue::new();
        let first = queue.stage(key("reading"));
        let held = queue.acquire(&first).await.unwrap();
        assert_eq!(queue.in_flight(), 1);

        let second = queue.stage(key("reading"));
        let third = queue.stage(key("reading"));

        // The lane is busy, so nobody else gets it yet.
        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            queue.acquire(&third),
        )
        .await;
        assert!(waiting.is_err());

        drop(held);
        assert_eq!(queue.in_flight(), 0);
        assert!(queue.acquire(&second).await.is_none());
        let sent = queue.acquire(&third).await;
        assert!(sent.is_some());
    }

    #[tokio::test]
    async fn other_keys_are_independent() {
        let queue = WriteQueue::new();
        let a = queue.stage(key("reading"));
        let b = queue.stage(key("exercise"));
        let _a = queue.acquire(&a).await.unwrap();
        let _b = queue.acquire(&b).await.unwrap();
        assert_eq!(queue.in_flight(), 2);
    }

    #[test]
    fn stale_ticket_never_matches_a_fresh_slot() {
        let queue = WriteQueue::new();
        let stale = queue.stage(key("reading"));
        let newest = queue.stage(key("reading"));
        queue.settle(&newest);

        let _fresh = queue.stage(key("reading"));
        assert!(!queue.is_current(&stale));
    }

    #[test]
    fn settle_only_forgets_newest() {
        let queue = WriteQueue::new();
        let old = queue.stage(key("reading"));
        let new = queue.stage(key("reading"));

        queue.settle(&old);
        assert!(queue.has_pending(&key("reading")));
        queue.settle(&new);
        assert!(!queue.has_pending(&key("reading")));
    }
}
