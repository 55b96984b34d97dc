//! In-memory push fan-out.
//!
//! Maps each UID to its current subscribers. Delivery never blocks the
//! storage path: `notify` try-sends into each subscriber's bounded queue,
//! and a subscriber whose queue is full is dropped on the spot. Dropping
//! the sender closes the channel, which the consumer observes as "you
//! overflowed; fall back to polling the mailbox".

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use murmur_proto::Uid;
use tokio::sync::mpsc;

/// Queue depth per subscriber. Small on purpose: a consumer that cannot
/// keep up with a short burst is better served by the polling fallback
/// than by an ever-growing queue.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 8;

struct Waiter {
    id: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

/// Publish/subscribe map for push delivery.
#[derive(Default)]
pub struct Notifier {
    waiters: Mutex<HashMap<Uid, Vec<Waiter>>>,
    next_id: AtomicU64,
}

impl Notifier {
    /// Empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uid, Vec<Waiter>>> {
        match self.waiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a subscriber for `uid`. Returns its id (for
    /// [`unsubscribe`](Self::unsubscribe)) and the envelope stream.
    pub fn subscribe(&self, uid: Uid) -> (u64, mpsc::Receiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        self.lock().entry(uid).or_default().push(Waiter { id, tx });
        (id, rx)
    }

    /// Remove a subscriber. The entry is taken out of the map before the
    /// sender drops, so no delivery can race into a closing channel.
    pub fn unsubscribe(&self, uid: &Uid, id: u64) {
        let removed = {
            let mut waiters = self.lock();
            let Some(list) = waiters.get_mut(uid) else { return };
            let removed = list
                .iter()
                .position(|w| w.id == id)
                .map(|idx| list.remove(idx));
            if list.is_empty() {
                waiters.remove(uid);
            }
            removed
        };
        drop(removed);
    }

    /// Deliver `envelope` to every current subscriber of `uid`.
    ///
    /// Non-blocking: a full or closed subscriber queue removes that
    /// subscriber; the storage path has already committed and is never
    /// held up.
    pub fn notify(&self, uid: &Uid, envelope: &[u8]) {
        let mut waiters = self.lock();
        let Some(list) = waiters.get_mut(uid) else { return };
        list.retain(|waiter| match waiter.tx.try_send(envelope.to_vec()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(id = waiter.id, "subscriber overflowed, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if list.is_empty() {
            waiters.remove(uid);
        }
    }
}
