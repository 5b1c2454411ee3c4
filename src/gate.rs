use crate::CaptureError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Process-wide admission control for capture jobs.
///
/// Backed by a tokio [`Semaphore`], which hands out permits in the order
/// `acquire` was called. A waiting caller holds no rendering resources.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    active: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<GatePermit, CaptureError> {
        let queued = WaitingGuard::enter(&self.waiting);
        let result = self.semaphore.clone().acquire_owned().await;
        drop(queued);

        let permit = result?;
        let active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Gate slot acquired ({}/{})", active, self.capacity);

        Ok(GatePermit {
            _permit: permit,
            active: self.active.clone(),
        })
    }

    /// Rejects every pending and future `acquire`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Counts a caller as waiting until dropped, including when the `acquire`
/// future is cancelled while queued.
struct WaitingGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> WaitingGuard<'a> {
    fn enter(waiting: &'a AtomicUsize) -> Self {
        waiting.fetch_add(1, Ordering::Relaxed);
        Self { waiting }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A held gate slot.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_burst_never_exceeds_capacity() {
        let gate = ConcurrencyGate::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let gate = gate.clone();
                let current = current.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _permit = gate.acquire().await.unwrap();
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.active_count(), 0);
        assert_eq!(gate.available(), 3);
    }

    #[tokio::test]
    async fn test_release_frees_exactly_one_slot() {
        let gate = ConcurrencyGate::new(2);
        let first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
        assert_eq!(gate.active_count(), 2);

        drop(first);
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.active_count(), 1);

        let _third = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);
    }

    #[tokio::test]
    async fn test_waiters_admitted_in_arrival_order() {
        let gate = ConcurrencyGate::new(1);
        let holder = gate.acquire().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..5 {
            let waiter = gate.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = waiter.acquire().await.unwrap();
                order.lock().await.push(i);
            }));
            // Let each waiter queue before spawning the next.
            while gate.waiting_count() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(holder);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let gate = ConcurrencyGate::new(1);
        let holder = gate.acquire().await.unwrap();

        let waiter = gate.clone();
        let task = tokio::spawn(async move {
            let _permit = waiter.acquire().await;
        });
        while gate.waiting_count() < 1 {
            tokio::task::yield_now().await;
        }

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(gate.waiting_count(), 0);

        drop(holder);
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.active_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_gate_rejects() {
        let gate = ConcurrencyGate::new(1);
        gate.close();
        assert!(gate.is_closed());
        assert!(matches!(
            gate.acquire().await,
            Err(CaptureError::GateClosed(_))
        ));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ConcurrencyGate::new(0).capacity(), 1);
    }
}
