//! Simulated pools and the worker loops that churn them.

use poolshare::{AsyncRegistry, PoolResource, Registry, RegistrySnapshot};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shape of one run.
#[derive(Debug, Clone)]
pub struct Workload {
    pub workers: usize,
    pub iterations: usize,
    pub keys: usize,
    pub create_delay: Duration,
    /// Fail every n-th factory call; 0 disables failures.
    pub fail_every: u64,
}

impl Workload {
    fn key_for(&self, worker: usize, iteration: usize) -> String {
        format!("sim://pool-{}", (worker + iteration) % self.keys.max(1))
    }
}

/// Creation/close totals observed by the simulated pools themselves.
#[derive(Debug, Default)]
pub struct Tally {
    factory_calls: AtomicU64,
    created: AtomicUsize,
    closed: AtomicUsize,
}

/// In-memory stand-in for a connection pool.
pub struct SimulatedPool {
    tally: Arc<Tally>,
}

impl PoolResource for SimulatedPool {
    type CloseError = std::convert::Infallible;

    fn close(&self) -> Result<(), Self::CloseError> {
        self.tally.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Tally {
    fn build(self: &Arc<Self>, fail_every: u64) -> Result<SimulatedPool, String> {
        let call = self.factory_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if fail_every > 0 && call % fail_every == 0 {
            return Err(format!("simulated failure on call {}", call));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(SimulatedPool {
            tally: Arc::clone(self),
        })
    }
}

/// Result of a run, printed as JSON.
#[derive(Debug, Serialize)]
pub struct Report {
    pub mode: &'static str,
    pub workers: usize,
    pub iterations: usize,
    pub failed_acquires: usize,
    pub created: usize,
    pub closed: usize,
    pub leftover_keys: Vec<String>,
    pub registry: RegistrySnapshot,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.leftover_keys.is_empty() && self.created == self.closed
    }
}

/// Drive a blocking registry from OS threads.
pub fn run_threads(workload: &Workload) -> Report {
    let registry: Registry<SimulatedPool> = Registry::new();
    let tally = Arc::new(Tally::default());
    let failed = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|scope| {
        for worker in 0..workload.workers {
            let registry = registry.clone();
            let tally = Arc::clone(&tally);
            let failed = Arc::clone(&failed);
            scope.spawn(move || {
                for iteration in 0..workload.iterations {
                    let key = workload.key_for(worker, iteration);
                    let tally = Arc::clone(&tally);
                    let acquired = registry.get_or_create(&key, move || {
                        std::thread::sleep(workload.create_delay);
                        tally.build(workload.fail_every)
                    });
                    match acquired {
                        Ok(_) => {
                            registry.release(&key);
                        }
                        Err(e) => {
                            debug!("Worker {} failed to acquire: {}", worker, e);
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            });
        }
    });

    report("threads", workload, &tally, &failed, registry.keys(), registry.stats())
}

/// Drive an async registry from Tokio tasks.
pub async fn run_tasks(workload: &Workload) -> Report {
    let registry: AsyncRegistry<SimulatedPool> = AsyncRegistry::new();
    let tally = Arc::new(Tally::default());
    let failed = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..workload.workers)
        .map(|worker| {
            let registry = registry.clone();
            let tally = Arc::clone(&tally);
            let failed = Arc::clone(&failed);
            let workload = workload.clone();
            tokio::spawn(async move {
                for iteration in 0..workload.iterations {
                    let key = workload.key_for(worker, iteration);
                    let tally = Arc::clone(&tally);
                    let delay = workload.create_delay;
                    let fail_every = workload.fail_every;
                    let acquired = registry
                        .get_or_create(&key, move || async move {
                            tokio::time::sleep(delay).await;
                            tally.build(fail_every)
                        })
                        .await;
                    match acquired {
                        Ok(_) => {
                            registry.release(&key).await;
                        }
                        Err(e) => {
                            debug!("Task {} failed to acquire: {}", worker, e);
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            tracing::error!("Worker task panicked: {}", e);
        }
    }

    report("tasks", workload, &tally, &failed, registry.keys(), registry.stats())
}

fn report(
    mode: &'static str,
    workload: &Workload,
    tally: &Tally,
    failed: &AtomicUsize,
    leftover_keys: Vec<String>,
    registry: RegistrySnapshot,
) -> Report {
    Report {
        mode,
        workers: workload.workers,
        iterations: workload.iterations,
        failed_acquires: failed.load(Ordering::SeqCst),
        created: tally.created.load(Ordering::SeqCst),
        closed: tally.closed.load(Ordering::SeqCst),
        leftover_keys,
        registry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(keys: usize, fail_every: u64) -> Workload {
        Workload {
            workers: 10,
            iterations: 100,
            keys,
            create_delay: Duration::ZERO,
            fail_every,
        }
    }

    #[test]
    fn test_threads_single_key_is_clean() {
        let report = run_threads(&workload(1, 0));
        assert!(report.is_clean());
        assert_eq!(report.failed_acquires, 0);
        assert_eq!(report.registry.releases, 1000);
    }

    #[test]
    fn test_threads_with_failures_is_clean() {
        // A single worker creates on every iteration, so failures are certain.
        let report = run_threads(&Workload {
            workers: 1,
            ..workload(3, 7)
        });
        assert!(report.is_clean());
        assert_eq!(report.failed_acquires, 14);
        assert_eq!(
            report.registry.creation_failures as usize,
            report.failed_acquires
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tasks_are_clean() {
        let report = run_tasks(&workload(4, 0)).await;
        assert!(report.is_clean());
        assert_eq!(report.registry.active_keys, 0);
    }

    #[test]
    fn test_keys_spread_across_pool() {
        let w = workload(3, 0);
        assert_eq!(w.key_for(0, 0), "sim://pool-0");
        assert_eq!(w.key_for(1, 1), "sim://pool-2");
        assert_eq!(w.key_for(2, 1), "sim://pool-0");
    }
}
