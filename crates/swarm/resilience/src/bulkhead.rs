//! Concurrency isolation.
//!
//! A bulkhead caps in-flight operations on a resource and queues a bounded
//! number of extra callers. Queued callers are admitted in arrival order.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::BulkheadConfig;
use crate::error::{ResilienceError, ResilienceResult};

/// Point-in-time bulkhead counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkheadStats {
    pub name: String,
    pub max_concurrent_calls: usize,
    pub max_queue_size: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub completed: u64,
    pub rejected: u64,
    pub queue_timeouts: u64,
}

/// Bulkhead guarding one resource.
pub struct Bulkhead {
    name: String,
    config: RwLock<BulkheadConfig>,
    permits: Arc<Semaphore>,
    /// Permits currently owned by the semaphore, tracked so a config change
    /// can grow or shrink it.
    capacity: AtomicUsize,
    in_flight: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
    queue_timeouts: AtomicU64,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        let capacity = config.max_concurrent_calls.max(1);
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity: AtomicUsize::new(capacity),
            config: RwLock::new(config),
            in_flight: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            queue_timeouts: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BulkheadConfig {
        self.config.read().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `op` once a slot is free, waiting at most the configured queue
    /// timeout.
    pub async fn execute<F, Fut, T>(&self, op: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let timeout = self.config.read().queue_timeout;
        self.execute_with_timeout(timeout, op).await
    }

    /// Run `op` once a slot is free, waiting at most `queue_timeout`.
    ///
    /// Fails with [`ResilienceError::BulkheadFull`] when both the slots and
    /// the queue are taken, without invoking `op`.
    pub async fn execute_with_timeout<F, Fut, T>(
        &self,
        queue_timeout: Duration,
        op: F,
    ) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let max_queue = self.config.read().max_queue_size;
                let (waiting, position) = Gauge::enter(&self.queued);
                if position >= max_queue {
                    drop(waiting);
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(bulkhead = %self.name, "Bulkhead full, rejecting call");
                    return Err(ResilienceError::BulkheadFull {
                        name: self.name.clone(),
                    });
                }

                debug!(bulkhead = %self.name, position = position, "Queueing call");
                let started = Instant::now();
                let acquired = tokio::time::timeout(
                    queue_timeout,
                    Arc::clone(&self.permits).acquire_owned(),
                )
                .await;
                drop(waiting);

                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(ResilienceError::BulkheadFull {
                            name: self.name.clone(),
                        })
                    }
                    Err(_) => {
                        self.queue_timeouts.fetch_add(1, Ordering::Relaxed);
                        return Err(ResilienceError::QueueTimeout {
                            name: self.name.clone(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
        };

        let (running, _) = Gauge::enter(&self.in_flight);
        let value = op().await;
        drop(running);
        self.completed.fetch_add(1, Ordering::Relaxed);
        drop(permit);

        Ok(value)
    }

    /// Apply a new configuration. Growing adds permits immediately;
    /// shrinking takes effect as in-flight calls finish.
    pub fn update_config(&self, config: BulkheadConfig) {
        let target = config.max_concurrent_calls.max(1);
        let current = self.capacity.swap(target, Ordering::SeqCst);
        if target > current {
            self.permits.add_permits(target - current);
        } else if target < current {
            let permits = Arc::clone(&self.permits);
            let excess = (current - target) as u32;
            tokio::spawn(async move {
                if let Ok(permit) = permits.acquire_many_owned(excess).await {
                    permit.forget();
                }
            });
        }
        *self.config.write() = config;
    }

    pub fn stats(&self) -> BulkheadStats {
        let config = self.config.read();
        BulkheadStats {
            name: self.name.clone(),
            max_concurrent_calls: config.max_concurrent_calls,
            max_queue_size: config.max_queue_size,
            in_flight: self.in_flight(),
            queued: self.queued(),
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            queue_timeouts: self.queue_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Counts a caller for as long as it is held, including when the caller's
/// future is dropped mid-await.
struct Gauge<'a>(&'a AtomicUsize);

impl<'a> Gauge<'a> {
    /// Returns the guard and the count before entering.
    fn enter(counter: &'a AtomicUsize) -> (Self, usize) {
        let before = counter.fetch_add(1, Ordering::SeqCst);
        (Self(counter), before)
    }
}

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn single_slot() -> Arc<Bulkhead> {
        Arc::new(Bulkhead::new(
            "db",
            BulkheadConfig {
                max_concurrent_calls: 1,
                max_queue_size: 1,
                queue_timeout: Duration::from_secs(5),
            },
        ))
    }

    async fn wait_until(check: impl Fn() -> bool) {
        while !check() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_third_call_rejected_when_slot_and_queue_taken() {
        let bulkhead = single_slot();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute(|| async move {
                        let _ = release_rx.await;
                        "first"
                    })
                    .await
            })
        };
        wait_until(|| bulkhead.in_flight() == 1).await;

        let second = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.execute(|| async { "second" }).await })
        };
        wait_until(|| bulkhead.queued() == 1).await;

        let third = bulkhead.execute(|| async { "third" }).await;
        match third {
            Err(e) => assert_eq!(e.to_string(), "bulkhead full: db"),
            Ok(_) => panic!("third call should be rejected"),
        }

        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "first");
        assert_eq!(second.await.unwrap().unwrap(), "second");

        let stats = bulkhead.stats();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_call_times_out() {
        let bulkhead = single_slot();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move {
                bulkhead
                    .execute(|| async move {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        wait_until(|| bulkhead.in_flight() == 1).await;

        let result = bulkhead
            .execute_with_timeout(Duration::from_millis(100), || async {})
            .await;
        assert!(matches!(result, Err(ResilienceError::QueueTimeout { .. })));
        assert_eq!(bulkhead.stats().queue_timeouts, 1);

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_callers_free_queue_and_slot() {
        let bulkhead = single_slot();

        let holder = tokio::time::timeout(
            Duration::from_millis(50),
            bulkhead.execute(|| tokio::time::sleep(Duration::from_secs(60))),
        );
        let waiter = tokio::time::timeout(
            Duration::from_millis(10),
            bulkhead.execute(|| async {}),
        );
        let (held, waited) = tokio::join!(holder, waiter);
        assert!(held.is_err());
        assert!(waited.is_err());

        assert_eq!(bulkhead.queued(), 0);
        assert_eq!(bulkhead.in_flight(), 0);
        assert_eq!(bulkhead.execute(|| async { "free" }).await.unwrap(), "free");
    }

    #[tokio::test]
    async fn test_grow_capacity() {
        let bulkhead = single_slot();
        bulkhead.update_config(BulkheadConfig {
            max_concurrent_calls: 3,
            ..bulkhead.config()
        });

        let (a, b, c) = tokio::join!(
            bulkhead.execute(|| async { 1 }),
            bulkhead.execute(|| async { 2 }),
            bulkhead.execute(|| async { 3 }),
        );
        assert_eq!(a.unwrap() + b.unwrap() + c.unwrap(), 6);
    }
}
