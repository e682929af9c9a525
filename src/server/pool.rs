//! The pool of threads doing the actual issuance work.
//!
//! Key generation is slow and CPU-bound, so it must never happen on the
//! I/O thread. We run it on the blocking pool of a dedicated Tokio runtime
//! which is capped at the configured number of threads. When all threads
//! are busy, further jobs wait in the runtime’s queue.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use log::debug;
use tokio::runtime;

use crate::commons::Error;


/// How long an idle worker thread is kept around.
const THREAD_KEEP_ALIVE: Duration = Duration::from_secs(60 * 60);


//------------ WorkerPool ----------------------------------------------------

pub struct WorkerPool {
    /// The runtime. Only `None` while dropping.
    runtime: Option<runtime::Runtime>,

    /// The maximum number of jobs running at the same time.
    threads: usize,
}

impl WorkerPool {
    /// Creates a pool running at most `threads` jobs in parallel.
    ///
    /// A value of zero is treated as one.
    pub fn new(threads: usize) -> Result<Self, io::Error> {
        let threads = threads.max(1);
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_keep_alive(THREAD_KEEP_ALIVE)
            .thread_name("keyserver-worker")
            .build()?;
        debug!("Started worker pool with {} threads", threads);
        Ok(WorkerPool { runtime: Some(runtime), threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `job` on a worker thread and hands its result to `done`.
    ///
    /// Both closures run on the same worker thread. If `job` panics, `done`
    /// receives an error instead, so it is called exactly once either way.
    pub fn execute<T, J, D>(&self, job: J, done: D)
    where
        J: FnOnce() -> Result<T, Error> + Send + 'static,
        D: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let Some(runtime) = self.runtime.as_ref() else {
            done(Err(Error::WorkerPanic("worker pool stopped".into())));
            return
        };
        let _ = runtime.spawn_blocking(move || {
            let res = match panic::catch_unwind(AssertUnwindSafe(job)) {
                Ok(res) => res,
                Err(payload) => Err(Error::WorkerPanic(panic_message(payload))),
            };
            done(res)
        });
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    }
    else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    }
    else {
        "unknown panic".to_string()
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;

    use super::*;

    #[test]
    fn should_run_jobs_and_report_results() {
        let pool = WorkerPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..4u32 {
            let tx = tx.clone();
            pool.execute(move || Ok(i * 2), move |res| {
                tx.send(res.unwrap()).unwrap();
            });
        }
        let mut results: Vec<u32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(10)).unwrap())
            .collect();
        results.sort();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }

    #[test]
    fn should_not_exceed_thread_count() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.threads(), 2);

        let active = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..8 {
            let active = active.clone();
            let max = max.clone();
            let tx = tx.clone();
            pool.execute(
                move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                },
                move |_| tx.send(()).unwrap(),
            );
        }
        for _ in 0..8 {
            rx.recv_timeout(Duration::from_secs(10)).unwrap();
        }
        assert!(max.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn panic_is_reported_as_error() {
        let pool = WorkerPool::new(1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(
            || -> Result<(), Error> { panic!("boom") },
            move |res| tx.send(res).unwrap(),
        );
        match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
            Err(Error::WorkerPanic(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {:?}", other),
        }

        // The pool keeps working after a panic.
        let (tx, rx) = mpsc::channel();
        pool.execute(|| Ok(1), move |res| tx.send(res.unwrap()).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), 1);
    }

    #[test]
    fn zero_threads_means_one() {
        assert_eq!(WorkerPool::new(0).unwrap().threads(), 1);
    }
}
