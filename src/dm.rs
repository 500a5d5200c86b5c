//! Direct messaging (spec §4.5, C5): delivers to an online recipient
//! immediately, otherwise queues (bounded, TTL-evicted) for delivery on
//! reconnect. The bounded-deque-with-TTL shape generalizes the teacher's
//! `PresenceTracker`-style `Mutex`-guarded map to a per-recipient queue.

use crate::models::{DirectMessage, DmDeliveryState};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

struct QueuedMessage {
    message: DirectMessage,
    queued_at: Instant,
}

#[derive(Clone)]
pub struct DmQueue {
    inner: Arc<Mutex<HashMap<String, VecDeque<QueuedMessage>>>>,
    max_per_recipient: usize,
    ttl_secs: u64,
}

impl DmQueue {
    pub fn new(max_per_recipient: usize, ttl_secs: u64) -> Self {
        DmQueue {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_per_recipient,
            ttl_secs,
        }
    }

    /// Enqueues `message` for `recipient` (keyed `fleet:agent`), evicting
    /// the oldest entry if the bound is exceeded. Returns the delivery state
    /// to stamp onto the new message, plus any message dropped to make room
    /// or for having already sat past its TTL — the caller notifies each
    /// dropped message's original sender (spec §4.5/§9: "on overflow or TTL,
    /// produce a dropped-notification exactly once").
    pub fn enqueue(&self, recipient_key: &str, mut message: DirectMessage) -> (DmDeliveryState, Vec<DirectMessage>) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let queue = map.entry(recipient_key.to_string()).or_default();
        let mut dropped = evict_expired(queue, self.ttl_secs);

        if queue.len() >= self.max_per_recipient {
            if let Some(evicted) = queue.pop_front() {
                let mut m = evicted.message;
                m.state = DmDeliveryState::Dropped;
                dropped.push(m);
            }
        }
        message.state = DmDeliveryState::Queued;
        queue.push_back(QueuedMessage {
            message,
            queued_at: Instant::now(),
        });
        (DmDeliveryState::Queued, dropped)
    }

    /// Drains all messages queued for `recipient_key`, in FIFO order. Any
    /// that have exceeded the TTL are returned separately, stamped `Dropped`,
    /// so the caller can notify their original senders.
    pub fn drain(&self, recipient_key: &str) -> (Vec<DirectMessage>, Vec<DirectMessage>) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut queue) = map.remove(recipient_key) else {
            return (vec![], vec![]);
        };
        let dropped = evict_expired(&mut queue, self.ttl_secs);
        let delivered = queue
            .into_iter()
            .map(|q| {
                let mut m = q.message;
                m.state = DmDeliveryState::Delivered;
                m
            })
            .collect();
        (delivered, dropped)
    }

    pub fn queued_count(&self, recipient_key: &str) -> usize {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(recipient_key).map(|q| q.len()).unwrap_or(0)
    }

    /// Sweeps every recipient's queue for TTL-expired messages. Returns each
    /// dropped message alongside the fleet half of its recipient key, since
    /// the periodic sweeper has no live connection to read the fleet from.
    pub fn gc(&self) -> Vec<(String, DirectMessage)> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut dropped = vec![];
        map.retain(|key, queue| {
            let fleet = key.split_once(':').map(|(f, _)| f.to_string()).unwrap_or_default();
            for m in evict_expired(queue, self.ttl_secs) {
                dropped.push((fleet.clone(), m));
            }
            !queue.is_empty()
        });
        dropped
    }
}

fn evict_expired(queue: &mut VecDeque<QueuedMessage>, ttl_secs: u64) -> Vec<DirectMessage> {
    let ttl = std::time::Duration::from_secs(ttl_secs);
    let now = Instant::now();
    let mut dropped = vec![];
    while let Some(front) = queue.front() {
        if now.duration_since(front.queued_at) > ttl {
            let mut m = queue.pop_front().unwrap().message;
            m.state = DmDeliveryState::Dropped;
            dropped.push(m);
        } else {
            break;
        }
    }
    dropped
}

#[cfg(test)]
#[path = "dm_tests.rs"]
mod tests;
