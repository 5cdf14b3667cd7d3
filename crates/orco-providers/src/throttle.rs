//! Priority-aware throttle for provider calls.
//!
//! A single-owner scheduler task: the only place scheduling state is
//! touched is the task spawned by [`Throttle::spawn`], so no locks are
//! needed around the waiter queue. Mirrors the LLM-call throttler's
//! design (a second, independent instance — tool calls and LLM calls are
//! throttled separately, not through a shared budget).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep_until;

/// Relative priority of a throttled call. `High` (Verifier evidence
/// gathering) preempts `Normal` (ordinary tool execution) once the
/// minimum inter-call spacing has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Ordinary tool execution.
    Normal,
    /// Verifier evidence gathering / replan-adjacent calls.
    High,
}

struct Waiter {
    priority: Priority,
    enqueued_at: Instant,
    permit: oneshot::Sender<()>,
}

impl Waiter {
    fn rank(&self) -> (u8, std::cmp::Reverse<Instant>) {
        let p = match self.priority {
            Priority::High => 1,
            Priority::Normal => 0,
        };
        (p, std::cmp::Reverse(self.enqueued_at))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
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
        self.rank().cmp(&other.rank())
    }
}

enum Event {
    Enqueue(Waiter),
    Release,
}

/// Handle to a running scheduler task.
#[derive(Clone)]
pub struct Throttle {
    tx: mpsc::Sender<Event>,
}

impl Throttle {
    /// Spawn a scheduler enforcing `min_spacing` between dispatches and
    /// at most `max_in_flight` concurrently outstanding calls.
    #[must_use]
    pub fn spawn(min_spacing: Duration, max_in_flight: usize) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(scheduler_loop(rx, min_spacing, max_in_flight.max(1)));
        Self { tx }
    }

    /// Wait for a slot at the given priority. The returned permit
    /// releases the slot when dropped.
    pub async fn acquire(&self, priority: Priority) -> ThrottlePermit {
        let (permit_tx, permit_rx) = oneshot::channel();
        let waiter = Waiter {
            priority,
            enqueued_at: Instant::now(),
            permit: permit_tx,
        };
        // Scheduler task outlives callers for the throttle's lifetime.
        let _ = self.tx.send(Event::Enqueue(waiter)).await;
        let _ = permit_rx.await;
        ThrottlePermit {
            release: Some(self.tx.clone()),
        }
    }
}

/// An acquired throttle slot. Dropping it frees the slot for the next waiter.
pub struct ThrottlePermit {
    release: Option<mpsc::Sender<Event>>,
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.try_send(Event::Release);
        }
    }
}

async fn scheduler_loop(mut rx: mpsc::Receiver<Event>, min_spacing: Duration, max_in_flight: usize) {
    let mut queue: BinaryHeap<Waiter> = BinaryHeap::new();
    let mut in_flight: usize = 0;
    let mut last_dispatch: Option<Instant> = None;

    loop {
        let ready_at = last_dispatch.map(|t| t + min_spacing);
        let can_dispatch = in_flight < max_in_flight && !queue.is_empty();

        if can_dispatch {
            let wait_until = ready_at.unwrap_or_else(Instant::now);
            if Instant::now() >= wait_until {
                if let Some(waiter) = queue.pop() {
                    let _ = waiter.permit.send(());
                    in_flight += 1;
                    last_dispatch = Some(Instant::now());
                }
                continue;
            }
            tokio::select! {
                () = sleep_until(wait_until.into()) => continue,
                event = rx.recv() => match event {
                    Some(Event::Enqueue(w)) => queue.push(w),
                    Some(Event::Release) => in_flight = in_flight.saturating_sub(1),
                    None => return,
                }
            }
        } else {
            match rx.recv().await {
                Some(Event::Enqueue(w)) => queue.push(w),
                Some(Event::Release) => in_flight = in_flight.saturating_sub(1),
                None => return,
            }
        }
    }
}
