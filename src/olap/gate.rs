//! Priority-ordered admission of OLAP statements.
//!
//! At most `capacity` statements hold a permit at once. Waiters are served
//! highest priority first and in arrival order within a priority. A waiter
//! that is dropped (cancelled or timed out) never keeps a slot, and a
//! [`GatePermit`] hands its slot back when dropped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

#[derive(Debug)]
struct Waiter {
    priority: i32,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence number.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct GateState {
    capacity: usize,
    in_use: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

impl GateState {
    /// Hands a freed slot to the best live waiter, or returns it to the pool.
    fn release(&mut self) {
        while let Some(waiter) = self.waiters.pop() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        self.in_use = self.in_use.saturating_sub(1);
    }
}

/// Priority queue limiting concurrent statements.
#[derive(Debug, Clone)]
pub struct PriorityGate {
    state: Arc<Mutex<GateState>>,
}

impl PriorityGate {
    /// Creates a gate admitting `capacity` concurrent holders (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                capacity: capacity.max(1),
                in_use: 0,
                next_seq: 0,
                waiters: BinaryHeap::new(),
            })),
        }
    }

    /// Waits for a slot.
    pub async fn acquire(&self, priority: i32) -> GatePermit {
        loop {
            let rx = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.in_use < state.capacity && state.waiters.is_empty() {
                    state.in_use += 1;
                    return GatePermit {
                        state: Arc::clone(&self.state),
                    };
                }
                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiters.push(Waiter { priority, seq, tx });
                rx
            };

            let mut pending = PendingAcquire {
                state: Arc::clone(&self.state),
                rx: Some(rx),
            };
            let granted = match pending.rx.as_mut() {
                Some(rx) => rx.await.is_ok(),
                None => false,
            };
            pending.rx = None;

            if granted {
                return GatePermit {
                    state: Arc::clone(&self.state),
                };
            }
        }
    }

    /// Returns the number of slots currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).in_use
    }

    /// Returns the number of queued waiters, including abandoned ones not yet skipped.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .len()
    }
}

/// A waiter still queued; returns a slot granted after it was abandoned.
struct PendingAcquire {
    state: Arc<Mutex<GateState>>,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .release();
            }
        }
    }
}

/// A held slot, released on drop.
#[derive(Debug)]
pub struct GatePermit {
    state: Arc<Mutex<GateState>>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_capacity_and_release() {
        let gate = PriorityGate::new(2);
        let a = gate.acquire(0).await;
        let _b = gate.acquire(0).await;
        assert_eq!(gate.in_use(), 2);

        drop(a);
        assert_eq!(gate.in_use(), 1);
    }

    #[tokio::test]
    async fn test_priority_order() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(0).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (priority, label) in [(0, "low"), (100, "high"), (50, "mid"), (100, "high2")] {
            let task_gate = gate.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = task_gate.acquire(priority).await;
                order.lock().expect("lock").push(label);
            }));
            // Ensure arrival order is deterministic.
            while gate.queued() < handles.len() {
                tokio::task::yield_now().await;
            }
        }

        drop(held);
        for handle in handles {
            handle.await.expect("task panicked");
        }

        assert_eq!(*order.lock().expect("lock"), vec!["high", "high2", "mid", "low"]);
        assert_eq!(gate.in_use(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(0).await;

        let waiting = tokio::time::timeout(Duration::from_millis(20), gate.acquire(10)).await;
        assert!(waiting.is_err());

        drop(held);
        assert_eq!(gate.in_use(), 0);

        let _again = tokio::time::timeout(Duration::from_millis(100), gate.acquire(0))
            .await
            .expect("slot should be free");
        assert_eq!(gate.in_use(), 1);
    }
}
