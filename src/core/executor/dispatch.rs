use crate::command::{AsyncBody, SyncBody};
use crate::logging;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::oneshot;

/// Run an async command body on the runtime. Spawning isolates the caller
/// from a panicking body: the sender is dropped and the race sees it.
pub(crate) fn run_async<T: Send + 'static>(body: AsyncBody<T>) -> oneshot::Receiver<crate::Result<T>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = body().await;
        let _ = tx.send(result);
    });
    rx
}

/// Run a sync command body on the shared blocking pool.
pub(crate) fn run_blocking<T: Send + 'static>(body: SyncBody<T>) -> oneshot::Receiver<crate::Result<T>> {
    let (tx, rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let _ = tx.send(body());
    });
    rx
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A dedicated worker thread for one key's sync commands. Jobs run
/// strictly in submission order, and however long they sleep they compete
/// with nobody outside their key.
pub(crate) struct PinnedWorker {
    jobs: std::sync::mpsc::Sender<Job>,
}

impl PinnedWorker {
    pub(crate) fn start(name: &str) -> io::Result<Self> {
        let (jobs, job_rx) = std::sync::mpsc::channel::<Job>();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    // a panicking job must not take the worker down with it
                    let _ = catch_unwind(AssertUnwindSafe(job));
                }
            })?;
        Ok(PinnedWorker { jobs })
    }

    pub(crate) fn run<T: Send + 'static>(&self, body: SyncBody<T>) -> oneshot::Receiver<crate::Result<T>> {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = tx.send(body());
        });
        if self.jobs.send(job).is_err() {
            logging::error!("pinned worker is gone, dropping its job");
        }
        rx
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn async_body_delivers() {
        let rx = run_async::<u32>(Box::new(|| Box::pin(async { Ok(11) })));
        assert_eq!(rx.await.unwrap().unwrap(), 11);
    }

    #[tokio::test]
    async fn panicking_async_body_drops_the_sender() {
        let rx = run_async::<u32>(Box::new(|| panic!("before the future")));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn blocking_body_delivers() {
        let rx = run_blocking::<u32>(Box::new(|| Ok(22)));
        assert_eq!(rx.await.unwrap().unwrap(), 22);
    }

    #[tokio::test]
    async fn pinned_worker_runs_in_order() {
        let worker = PinnedWorker::start("defender-test-worker").unwrap();
        let first = worker.run::<u32>(Box::new(|| {
            std::thread::sleep(std::time::Duration::from_millis(30));
            Ok(1)
        }));
        let second = worker.run::<u32>(Box::new(|| Ok(2)));
        // the second job cannot overtake the first on a single worker
        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert_eq!(second.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn pinned_worker_survives_a_panicking_job() {
        let worker = PinnedWorker::start("defender-test-worker-panic").unwrap();
        let poisoned = worker.run::<u32>(Box::new(|| panic!("user bug")));
        assert!(poisoned.await.is_err());
        let healthy = worker.run::<u32>(Box::new(|| Ok(3)));
        assert_eq!(healthy.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn sync_error_is_a_value() {
        let rx = run_blocking::<u32>(Box::new(|| Err(Error::msg("boom"))));
        assert!(rx.await.unwrap().is_err());
    }
}
