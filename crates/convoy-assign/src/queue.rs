//! The in-memory waiting queue.
//!
//! Ordering: priority rank (urgent first), then queued-at (oldest
//! first). The queue is the live ordering structure only; the durable
//! [`WaitingRecord`]s live in the queue store and are maintained by the
//! engine around queue mutations.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use convoy_core::{Priority, SessionId};

/// One queued session with its matching constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitingEntry {
    /// The waiting session.
    pub session: SessionId,
    /// Priority driving the queue order.
    pub priority: Priority,
    /// When the session was queued.
    pub queued_at: DateTime<Utc>,
    /// Skills an operator must cover.
    pub skills: BTreeSet<String>,
    /// Escalation reason, carried into the transfer record on
    /// assignment.
    pub reason: String,
}

/// Priority queue of sessions waiting for a human.
#[derive(Default)]
pub struct WaitingQueue {
    // Small queues, locked briefly: a sorted VecDeque keeps pop,
    // put-back-at-head, and position queries all trivial.
    inner: Mutex<VecDeque<WaitingEntry>>,
}

impl WaitingQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in queue order. Returns the 1-based position.
    pub fn push(&self, entry: WaitingEntry) -> usize {
        let mut queue = self.lock();
        let at = queue
            .iter()
            .position(|e| Self::ranks_after(e, &entry))
            .unwrap_or(queue.len());
        queue.insert(at, entry);
        at + 1
    }

    /// Whether `existing` should sit behind `candidate`.
    fn ranks_after(existing: &WaitingEntry, candidate: &WaitingEntry) -> bool {
        (
            std::cmp::Reverse(existing.priority.rank()),
            existing.queued_at,
        ) > (
            std::cmp::Reverse(candidate.priority.rank()),
            candidate.queued_at,
        )
    }

    /// Take the highest-ranked entry.
    pub fn pop(&self) -> Option<WaitingEntry> {
        self.lock().pop_front()
    }

    /// Put an entry back at the head (drain found no operator).
    pub fn put_back(&self, entry: WaitingEntry) {
        self.lock().push_front(entry);
    }

    /// Remove a session's entry (cancelled or ended).
    pub fn cancel(&self, session: &SessionId) -> Option<WaitingEntry> {
        let mut queue = self.lock();
        let at = queue.iter().position(|e| &e.session == session)?;
        queue.remove(at)
    }

    /// 1-based position of a session, if queued.
    #[must_use]
    pub fn position(&self, session: &SessionId) -> Option<usize> {
        self.lock()
            .iter()
            .position(|e| &e.session == session)
            .map(|i| i + 1)
    }

    /// Queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<WaitingEntry>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(priority: Priority, age_secs: i64) -> WaitingEntry {
        WaitingEntry {
            session: SessionId::new(),
            priority,
            queued_at: Utc::now() - Duration::seconds(age_secs),
            skills: BTreeSet::new(),
            reason: "test".into(),
        }
    }

    #[test]
    fn orders_by_priority_then_age() {
        let queue = WaitingQueue::new();
        let old_normal = entry(Priority::Normal, 120);
        let young_normal = entry(Priority::Normal, 10);
        let urgent = entry(Priority::Urgent, 5);

        assert_eq!(queue.push(old_normal.clone()), 1);
        assert_eq!(queue.push(young_normal.clone()), 2);
        // Urgent jumps the whole line.
        assert_eq!(queue.push(urgent.clone()), 1);

        assert_eq!(queue.pop().unwrap().session, urgent.session);
        assert_eq!(queue.pop().unwrap().session, old_normal.session);
        assert_eq!(queue.pop().unwrap().session, young_normal.session);
    }

    #[test]
    fn put_back_restores_the_head() {
        let queue = WaitingQueue::new();
        let first = entry(Priority::High, 60);
        queue.push(first.clone());
        queue.push(entry(Priority::Normal, 60));

        let popped = queue.pop().unwrap();
        assert_eq!(popped.session, first.session);
        queue.put_back(popped);
        assert_eq!(queue.position(&first.session), Some(1));
    }

    #[test]
    fn cancel_removes_by_session() {
        let queue = WaitingQueue::new();
        let victim = entry(Priority::Normal, 0);
        queue.push(victim.clone());
        queue.push(entry(Priority::Normal, 0));

        assert!(queue.cancel(&victim.session).is_some());
        assert!(queue.cancel(&victim.session).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.position(&victim.session), None);
    }
}
