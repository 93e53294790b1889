// ── Reactive project streams ──
//
// Subscription types for consuming project changes without holding a
// broadcast receiver by hand.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::warn;

use crate::model::ProjectData;

/// A subscription to one project's own fields.
///
/// Gives point-in-time access plus change notification through
/// [`changed`](Self::changed) or by converting into a `Stream`.
pub struct ProjectStream {
    current: ProjectData,
    receiver: watch::Receiver<ProjectData>,
}

impl ProjectStream {
    pub(crate) fn new(receiver: watch::Receiver<ProjectData>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at creation (or the last `changed`).
    pub fn current(&self) -> &ProjectData {
        &self.current
    }

    pub fn latest(&self) -> ProjectData {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the project is gone.
    pub async fn changed(&mut self) -> Option<ProjectData> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    /// Yields the current snapshot first, then one per change.
    pub fn into_stream(self) -> ProjectWatchStream {
        ProjectWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct ProjectWatchStream {
    inner: WatchStream<ProjectData>,
}

impl Stream for ProjectWatchStream {
    type Item = ProjectData;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Turn a broadcast receiver into a `Stream`, logging and skipping lag gaps.
pub fn lossy_stream<E>(rx: broadcast::Receiver<E>) -> impl Stream<Item = E> + Send + Unpin
where
    E: Clone + Send + 'static,
{
    BroadcastStream::new(rx).filter_map(|item| {
        std::future::ready(match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!(skipped = n, "event stream lagged");
                None
            }
        })
    })
}
