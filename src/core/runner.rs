//! Bounded task runner.
//!
//! Runs a batch of independent futures with at most `concurrency` of them
//! in flight. Queued tasks are admitted in submission order as slots free
//! up, and results come back in submission order regardless of which task
//! finished first. The runner never retries; that is each task's concern.
//!
//! Progress edits are issued as tasks finish but are not part of any task,
//! so the next queued task starts as soon as a slot frees up.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, FuturesOrdered, StreamExt};
use tracing::debug;

use crate::adapters::Transport;
use crate::domain::MessageHandle;

/// Shared completion counter bound to one status message
pub struct ProgressHandle {
    transport: Arc<dyn Transport>,
    message: MessageHandle,
    text: String,
    total: usize,
    completed: AtomicUsize,
}

impl ProgressHandle {
    pub fn new(
        transport: Arc<dyn Transport>,
        message: MessageHandle,
        text: impl Into<String>,
        total: usize,
    ) -> Self {
        Self {
            transport,
            message,
            text: text.into(),
            total,
            completed: AtomicUsize::new(0),
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Status text for `completed` finished tasks
    pub fn render(&self, completed: usize) -> String {
        format!("{}\nProgress: {}%", self.text, percent(completed, self.total))
    }

    /// Count one finished task and return the status text for it
    fn advance(&self) -> String {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.render(done)
    }

    /// Refresh the status message. Edit failures are dropped: progress is
    /// best-effort.
    async fn publish(&self, text: String) {
        if let Err(e) = self.transport.edit(self.message, &text, None, false).await {
            debug!(error = %e, total = self.total, "Progress update skipped");
        }
    }
}

/// `floor(completed / total * 100)`; an empty batch counts as done
pub fn percent(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    (completed.min(total) * 100 / total) as u32
}

/// Fan-out executor with a fixed concurrency ceiling
#[derive(Debug, Clone, Copy)]
pub struct TaskRunner {
    concurrency: usize,
}

impl TaskRunner {
    /// A ceiling of 0 is treated as 1
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every task and return their results in submission order
    pub async fn run_all<F, T, E>(
        &self,
        tasks: Vec<F>,
        progress: Option<&ProgressHandle>,
    ) -> Vec<Result<T, E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let total = tasks.len();
        let mut slots: Vec<Option<Result<T, E>>> = (0..total).map(|_| None).collect();

        let mut completions = stream::iter(
            tasks
                .into_iter()
                .enumerate()
                .map(|(index, task)| async move { (index, task.await) }),
        )
        .buffer_unordered(self.concurrency);

        // Status edits run beside the batch so a slow edit never holds a slot
        let mut edits = FuturesOrdered::new();
        loop {
            tokio::select! {
                next = completions.next() => match next {
                    Some((index, result)) => {
                        slots[index] = Some(result);
                        if let Some(progress) = progress {
                            edits.push_back(progress.publish(progress.advance()));
                        }
                    }
                    None => break,
                },
                Some(()) = edits.next(), if !edits.is_empty() => {}
            }
        }
        while edits.next().await.is_some() {}

        debug!(total, concurrency = self.concurrency, "Task batch finished");
        slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_floors() {
        assert_eq!(percent(0, 3), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(TaskRunner::new(0).concurrency(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let tasks: Vec<std::future::Ready<Result<(), ()>>> = Vec::new();
        let results = TaskRunner::new(4).run_all(tasks, None).await;
        assert!(results.is_empty());
    }
}
