//! Priority-aware LLM call throttler.
//!
//! A single-owner scheduler: one background task owns a `BinaryHeap` of
//! waiters and is the only thing that ever decides "go now". Callers send a
//! request through a channel and await a oneshot permit; no mutex guards the
//! scheduling state because only the scheduler task ever touches it.
//!
//! Two priority levels: [`Priority::High`] (verification, replanning)
//! preempts [`Priority::Normal`] (planning, provider selection, tool
//! planning) once the minimum inter-call spacing has elapsed.

use std::cmp::Ordering;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::trace;

/// Relative priority of a throttled call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Planner, ProviderSelector, ToolPlanner calls.
    Normal,
    /// Verifier decisions and Replanner calls; preempt `Normal` waiters.
    High,
}

struct Waiter {
    priority: Priority,
    enqueued_at: Instant,
    permit: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueued_at == other.enqueued_at
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
        // Higher priority first; within the same priority, earlier enqueue first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

enum Event {
    Enqueue(Waiter),
    Release,
}

/// A handle to the throttler. Cheap to clone; all clones share the same
/// scheduler task.
#[derive(Clone)]
pub struct Throttle {
    tx: mpsc::Sender<Event>,
}

impl Throttle {
    /// Spawn the scheduler task and return a handle to it.
    ///
    /// `min_spacing` is the minimum time between two calls being released,
    /// regardless of priority. `max_in_flight` bounds how many released
    /// permits may be outstanding (not yet dropped) at once.
    #[must_use]
    pub fn spawn(min_spacing: Duration, max_in_flight: usize) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(scheduler_loop(rx, min_spacing, max_in_flight));
        Self { tx }
    }

    /// Request a permit at the given priority. Resolves once the scheduler
    /// releases this waiter; drop the returned guard to free an in-flight slot.
    pub async fn acquire(&self, priority: Priority) -> ThrottlePermit {
        let (permit_tx, permit_rx) = oneshot::channel();
        let waiter = Waiter {
            priority,
            enqueued_at: Instant::now(),
            permit: permit_tx,
        };
        // If the scheduler task died, fail open rather than hang forever;
        // callers still go through LlmClient's own retry/backoff.
        if self.tx.send(Event::Enqueue(waiter)).await.is_err() {
            return ThrottlePermit { release: None };
        }
        let _ = permit_rx.await;
        ThrottlePermit {
            release: Some(self.tx.clone()),
        }
    }
}

/// Held while an LLM call is in flight. Dropping it frees one in-flight slot.
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
    let mut heap: std::collections::BinaryHeap<Waiter> = std::collections::BinaryHeap::new();
    let mut in_flight: usize = 0;
    let mut last_release: Option<Instant> = None;

    loop {
        if heap.is_empty() {
            match rx.recv().await {
                Some(Event::Enqueue(w)) => heap.push(w),
                Some(Event::Release) => in_flight = in_flight.saturating_sub(1),
                None => return,
            }
            continue;
        }

        let ready_at = match last_release {
            Some(t) => t + min_spacing,
            None => Instant::now(),
        };
        let now = Instant::now();

        if in_flight >= max_in_flight || now < ready_at {
            let sleep_for = ready_at.saturating_duration_since(now).max(Duration::from_millis(1));
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                maybe = rx.recv() => match maybe {
                    Some(Event::Enqueue(w)) => heap.push(w),
                    Some(Event::Release) => in_flight = in_flight.saturating_sub(1),
                    None => {}
                },
            }
            continue;
        }

        if let Some(waiter) = heap.pop() {
            trace!(priority = ?waiter.priority, queued = heap.len(), "releasing throttled call");
            let _ = waiter.permit.send(());
            in_flight += 1;
            last_release = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn high_priority_preempts_normal() {
        let throttle = Throttle::spawn(Duration::from_millis(20), 4);
        // Consume the immediate slot so subsequent waiters actually queue
        // behind the min-spacing wait.
        let _first = throttle.acquire(Priority::Normal).await;

        let order = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let t1 = throttle.clone();
        let o1 = order.clone();
        let low = tokio::spawn(async move {
            let _p = t1.acquire(Priority::Normal).await;
            o1.lock().await.push("normal");
        });
        tokio::time::sleep(Duration::from_millis(2)).await;
        let t2 = throttle.clone();
        let o2 = order.clone();
        let high = tokio::spawn(async move {
            let _p = t2.acquire(Priority::High).await;
            o2.lock().await.push("high");
        });

        let _ = tokio::join!(low, high);
        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec!["high", "normal"]);
    }

    #[tokio::test]
    async fn respects_min_spacing() {
        let throttle = Throttle::spawn(Duration::from_millis(30), 8);
        let start = Instant::now();
        let _p1 = throttle.acquire(Priority::Normal).await;
        let _p2 = throttle.acquire(Priority::Normal).await;
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
