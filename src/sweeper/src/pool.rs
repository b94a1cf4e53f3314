//! Bounded worker pool shared by the repository and blob deletion phases.

use crate::cancel::Cancellation;
use common::config::FailurePolicy;
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// What happened to one work item.
#[derive(Debug)]
pub enum TaskResult<O, E> {
    Done(O),
    Failed(E),
    /// Skipped because the run was cancelled or halted by an earlier failure.
    NotStarted,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    policy: FailurePolicy,
    cancellation: Cancellation,
}

impl WorkerPool {
    pub fn new(concurrency: usize, policy: FailurePolicy, cancellation: Cancellation) -> Self {
        Self {
            concurrency: concurrency.max(1),
            policy,
            cancellation,
        }
    }

    /// Run `task` over `items` with at most `concurrency` tasks in flight.
    ///
    /// Under [`FailurePolicy::FailFast`] no item is started after the first
    /// failure; items already in flight run to completion. Results are
    /// returned in completion order.
    pub async fn run<I, F, Fut, O, E>(&self, items: Vec<I>, task: F) -> Vec<(I, TaskResult<O, E>)>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        let halted = AtomicBool::new(false);
        let halted = &halted;
        let task = &task;

        futures::stream::iter(items)
            .map(|item| async move {
                if halted.load(Ordering::Acquire) || self.cancellation.is_cancelled() {
                    return (item, TaskResult::NotStarted);
                }

                match task(item.clone()).await {
                    Ok(output) => (item, TaskResult::Done(output)),
                    Err(err) => {
                        if self.policy == FailurePolicy::FailFast {
                            halted.store(true, Ordering::Release);
                        }
                        (item, TaskResult::Failed(err))
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancellation;
    use std::sync::atomic::AtomicUsize;

    fn count<O, E>(results: &[(u32, TaskResult<O, E>)]) -> (usize, usize, usize) {
        results.iter().fold((0, 0, 0), |(d, f, n), (_, r)| match r {
            TaskResult::Done(_) => (d + 1, f, n),
            TaskResult::Failed(_) => (d, f + 1, n),
            TaskResult::NotStarted => (d, f, n + 1),
        })
    }

    #[tokio::test]
    async fn test_collect_runs_everything() {
        let pool = WorkerPool::new(2, FailurePolicy::Collect, Cancellation::never());
        let results = pool
            .run((1..=6).collect(), |n: u32| async move {
                if n % 3 == 0 { Err("boom") } else { Ok(n) }
            })
            .await;

        assert_eq!(count(&results), (4, 2, 0));
    }

    #[tokio::test]
    async fn test_fail_fast_starts_nothing_after_failure() {
        let started = AtomicUsize::new(0);
        let pool = WorkerPool::new(1, FailurePolicy::FailFast, Cancellation::never());
        let results = pool
            .run((1..=5).collect(), |n: u32| {
                started.fetch_add(1, Ordering::SeqCst);
                async move { if n == 2 { Err("boom") } else { Ok(n) } }
            })
            .await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(count(&results), (1, 1, 3));
    }

    #[tokio::test]
    async fn test_cancelled_pool_starts_nothing() {
        let (trigger, cancellation) = cancellation();
        trigger.cancel();

        let pool = WorkerPool::new(4, FailurePolicy::Collect, cancellation);
        let results = pool
            .run((1..=3).collect(), |n: u32| async move { Ok::<_, ()>(n) })
            .await;

        assert_eq!(count(&results), (0, 0, 3));
    }
}
