//! Bounded worker pool over a batch of files.
//!
//! Each file runs in its own tokio task, so a failing or panicking record is
//! recorded against its path while its siblings carry on. Cancelling the
//! token stops new files from being started; running ones finish.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::{StreamExt, future, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::RecordError;

#[derive(Debug)]
pub struct BatchReport<T> {
    pub results: Vec<(PathBuf, Result<T, RecordError>)>,
    /// Files never started because the batch was cancelled.
    pub not_started: usize,
}

impl<T> BatchReport<T> {
    pub fn succeeded(&self) -> impl Iterator<Item = (&PathBuf, &T)> {
        self.results
            .iter()
            .filter_map(|(path, r)| r.as_ref().ok().map(|v| (path, v)))
    }

    pub fn failed(&self) -> impl Iterator<Item = (&PathBuf, &RecordError)> {
        self.results
            .iter()
            .filter_map(|(path, r)| r.as_ref().err().map(|e| (path, e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }
}

pub async fn run_batch<T, F, Fut>(
    paths: Vec<PathBuf>,
    workers: usize,
    cancel: &CancellationToken,
    on_done: &(dyn Fn() + Sync),
    job: F,
) -> BatchReport<T>
where
    T: Send + 'static,
    F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RecordError>> + Send + 'static,
{
    let total = paths.len();
    let workers = workers.max(1);
    let job = Arc::new(job);
    debug!("Processing {total} files with {workers} workers");

    let mut results: Vec<(PathBuf, Result<T, RecordError>)> = stream::iter(paths)
        .take_while(|_| future::ready(!cancel.is_cancelled()))
        .map(|path| {
            let job = Arc::clone(&job);
            async move {
                let result = match tokio::spawn(job(path.clone())).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Worker task failed");
                        Err(RecordError::Worker {
                            path: path.display().to_string(),
                            message: e.to_string(),
                        })
                    }
                };
                (path, result)
            }
        })
        .buffer_unordered(workers)
        .inspect(|_| on_done())
        .collect()
        .await;

    results.sort_by(|a, b| a.0.cmp(&b.0));
    let not_started = total - results.len();
    if not_started > 0 {
        warn!("Batch cancelled, {not_started} files not started");
    }
    BatchReport {
        results,
        not_started,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn paths(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("f{i:02}.json"))).collect()
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let cancel = CancellationToken::new();
        let done = AtomicUsize::new(0);
        let report = run_batch(
            paths(6),
            3,
            &cancel,
            &|| {
                done.fetch_add(1, Ordering::SeqCst);
            },
            |path: PathBuf| async move {
                let name = path.display().to_string();
                match name.as_str() {
                    "f01.json" => panic!("boom"),
                    "f02.json" => Err(RecordError::Parse {
                        path: path.display().to_string(),
                        message: "bad".to_string(),
                    }),
                    _ => Ok(path.display().to_string()),
                }
            },
        )
        .await;

        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert_eq!(report.results.len(), 6);
        assert_eq!(report.succeeded().count(), 4);
        let kinds: Vec<&str> = report.failed().map(|(_, e)| e.kind()).collect();
        assert_eq!(kinds, vec!["worker", "parse"]);
        assert_eq!(report.not_started, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        let report = run_batch(paths(10), 2, &cancel, &|| {}, move |_path| {
            let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, RecordError>(())
            }
        })
        .await;

        assert_eq!(report.succeeded().count(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancelled_batch_starts_nothing_new() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run_batch(paths(5), 3, &cancel, &|| {}, |_path| async {
            Ok::<_, RecordError>(())
        })
        .await;
        assert!(report.results.is_empty());
        assert_eq!(report.not_started, 5);
    }
}
