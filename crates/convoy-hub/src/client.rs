//! Per-client outbound queue and identity tag.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use convoy_core::{PrincipalId, RawFrame, SessionId};

/// How a client is addressed by fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTag {
    /// A customer tab attached to one session.
    CustomerOf(SessionId),
    /// An operator console; may co-view many sessions.
    Operator(PrincipalId),
}

/// One item on a client's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A JSON frame for the wire.
    Frame(RawFrame),
    /// Transport-level heartbeat (the gateway maps this to a ping).
    Heartbeat,
    /// Ask the writer to close the socket after flushing, with a
    /// human-readable reason already delivered as a `system` frame.
    Close,
}

/// Outcome of a queue push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePush {
    /// Enqueued without loss.
    Queued,
    /// Enqueued, but the oldest frame was dropped to make room.
    DroppedOldest,
    /// Queue already closed; item discarded.
    Closed,
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Outbound>,
    closed: bool,
}

/// Bounded drop-oldest outbound queue.
///
/// The hub pushes; the transport's writer task pops. Closing wakes the
/// writer so it can flush and exit.
#[derive(Debug)]
pub struct ClientQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl ClientQueue {
    /// Create a queue holding at most `capacity` items.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(64)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push an item, dropping the oldest on overflow.
    pub fn push(&self, item: Outbound) -> QueuePush {
        let result = {
            let mut inner = self.lock();
            if inner.closed {
                return QueuePush::Closed;
            }
            let overflowed = inner.items.len() >= self.capacity;
            if overflowed {
                inner.items.pop_front();
            }
            inner.items.push_back(item);
            if overflowed {
                QueuePush::DroppedOldest
            } else {
                QueuePush::Queued
            }
        };
        self.notify.notify_one();
        result
    }

    /// Pop the next item, waiting for one. Returns `None` once the
    /// queue is closed and empty.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take whatever is queued right now without waiting (drain path).
    #[must_use]
    pub fn drain_now(&self) -> Vec<Outbound> {
        let mut inner = self.lock();
        inner.items.drain(..).collect()
    }

    /// Close the queue; pending items remain poppable.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            inner.closed = true;
        }
        self.notify.notify_waiters();
        // Wake a waiter that registered between the flag set and
        // notify_waiters, and hand a permit to the next pop.
        self.notify.notify_one();
    }

    /// Whether [`ClientQueue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::Frame;
    use std::sync::Arc;

    fn frame(n: u64) -> Outbound {
        Outbound::Frame(RawFrame::from(Frame::system(format!("f{n}"))))
    }

    #[tokio::test]
    async fn push_pop_preserves_order() {
        let queue = ClientQueue::new(8);
        assert_eq!(queue.push(frame(1)), QueuePush::Queued);
        assert_eq!(queue.push(frame(2)), QueuePush::Queued);

        assert_eq!(queue.pop().await, Some(frame(1)));
        assert_eq!(queue.pop().await, Some(frame(2)));
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queue = ClientQueue::new(2);
        queue.push(frame(1));
        queue.push(frame(2));
        assert_eq!(queue.push(frame(3)), QueuePush::DroppedOldest);

        assert_eq!(queue.pop().await, Some(frame(2)));
        assert_eq!(queue.pop().await, Some(frame(3)));
    }

    #[tokio::test]
    async fn close_flushes_then_ends() {
        let queue = Arc::new(ClientQueue::new(8));
        queue.push(frame(1));
        queue.close();
        assert_eq!(queue.push(frame(2)), QueuePush::Closed);

        assert_eq!(queue.pop().await, Some(frame(1)));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = Arc::new(ClientQueue::new(8));
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        // Give the popper a chance to park.
        tokio::task::yield_now().await;
        queue.push(frame(7));
        assert_eq!(popper.await.unwrap(), Some(frame(7)));
    }

    #[tokio::test]
    async fn pop_wakes_on_close() {
        let queue = Arc::new(ClientQueue::new(8));
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert_eq!(popper.await.unwrap(), None);
    }
}
