// ── Typed publish/subscribe ──
//
// Thin wrapper over `tokio::sync::broadcast`. Emitting never blocks and
// never fails when nobody is listening; slow subscribers observe
// `Lagged` and skip ahead.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::warn;

/// Default channel depth for component buses.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// A typed event bus. Cloning yields another handle to the same channel.
#[derive(Debug)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    pub fn emit(&self, event: E) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Register a new subscriber. Only events emitted after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receive from `rx` until `pick` returns `Some`, skipping lag gaps.
///
/// Returns `None` once the bus is dropped.
pub async fn next_matching<E, T, F>(rx: &mut broadcast::Receiver<E>, mut pick: F) -> Option<T>
where
    E: Clone,
    F: FnMut(&E) -> Option<T>,
{
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(found) = pick(&event) {
                    return Some(found);
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "event bus subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// [`next_matching`] bounded by `timeout`. `None` on timeout or bus closure.
pub async fn next_matching_within<E, T, F>(
    rx: &mut broadcast::Receiver<E>,
    timeout: Duration,
    pick: F,
) -> Option<T>
where
    E: Clone,
    F: FnMut(&E) -> Option<T>,
{
    tokio::time::timeout(timeout, next_matching(rx, pick))
        .await
        .ok()
        .flatten()
}
