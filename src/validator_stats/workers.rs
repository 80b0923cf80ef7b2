//! Bounded fan-out for the batches of a stage, under one deadline counted from the moment the
//! group is created. The first failing batch cancels the group: batches that have not started
//! yet are skipped, batches already in flight run to completion.

use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use futures::{stream, StreamExt};
use tracing::{debug, error};

use super::StatsError;

#[derive(Clone, Copy, Debug)]
pub struct WorkerGroup {
    stage: &'static str,
    concurrency: usize,
    deadline: Duration,
    deadline_at: tokio::time::Instant,
}

impl WorkerGroup {
    pub fn new(stage: &'static str, concurrency: usize, deadline: Duration) -> Self {
        Self {
            stage,
            concurrency: concurrency.max(1),
            deadline,
            deadline_at: tokio::time::Instant::now() + deadline,
        }
    }

    /// Runs `work` for every input, at most `concurrency` at a time. Results come back in
    /// completion order. Returns the first error any worker hit.
    pub async fn run<I, F, Fut, R>(&self, inputs: I, work: F) -> Result<Vec<R>, StatsError>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = Result<R, StatsError>>,
    {
        let start = Instant::now();
        let cancelled = AtomicBool::new(false);

        let all_work = stream::iter(inputs)
            .map(|input| {
                let work = &work;
                let cancelled = &cancelled;
                async move {
                    if cancelled.load(Ordering::Relaxed) {
                        return None;
                    }

                    let result = work(input).await;
                    if result.is_err() {
                        cancelled.store(true, Ordering::Relaxed);
                    }
                    Some(result)
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|result| async move { result })
            .collect::<Vec<_>>();

        let results = tokio::time::timeout_at(self.deadline_at, all_work)
            .await
            .map_err(|_| {
                error!(stage = self.stage, deadline = ?self.deadline, "stage hit its deadline");
                StatsError::DeadlineExceeded {
                    stage: self.stage,
                    deadline: self.deadline,
                }
            })?;

        debug!(
            stage = self.stage,
            batches = results.len(),
            took = ?start.elapsed(),
            "worker group done"
        );

        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use anyhow::anyhow;

    use super::*;

    #[tokio::test]
    async fn run_all_test() {
        let group = WorkerGroup::new("test", 4, Duration::from_secs(1));
        let mut results = group
            .run(0..10, |n| async move { Ok::<_, StatsError>(n * 2) })
            .await
            .unwrap();
        results.sort();

        assert_eq!(results, (0..10).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn first_error_cancels_remaining_test() {
        let group = WorkerGroup::new("test", 1, Duration::from_secs(1));
        let started = AtomicUsize::new(0);

        let result = group
            .run(0..5, |n| {
                let started = &started;
                async move {
                    started.fetch_add(1, Ordering::Relaxed);
                    if n == 1 {
                        Err(StatsError::Aggregation(anyhow!("indexer down")))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert!(matches!(result, Err(StatsError::Aggregation(_))));
        assert_eq!(started.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn deadline_test() {
        let group = WorkerGroup::new("slow", 2, Duration::from_millis(10));

        let result = group
            .run(0..2, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, StatsError>(())
            })
            .await;

        assert!(matches!(
            result,
            Err(StatsError::DeadlineExceeded { stage: "slow", .. })
        ));
    }

    #[tokio::test]
    async fn deadline_shared_between_runs_test() {
        let group = WorkerGroup::new("slow", 2, Duration::from_millis(200));

        group
            .run(0..1, |_| async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Ok::<_, StatsError>(())
            })
            .await
            .unwrap();

        let result = group
            .run(0..1, |_| async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Ok::<_, StatsError>(())
            })
            .await;

        assert!(matches!(result, Err(StatsError::DeadlineExceeded { .. })));
    }
}
