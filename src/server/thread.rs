use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        mpsc::{self, TrySendError},
    },
    thread,
    time::Duration,
};

use log::{debug, error, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where a submitted job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    /// The pool was saturated (or shut down) and the submitting thread ran the job.
    CallerRuns,
}

/// Fixed-size worker pool over a bounded queue.
///
/// When every worker is busy and the queue is full, [`ThreadPool::execute`] runs
/// the job on the calling thread, which slows the caller down instead of dropping
/// or buffering work.
pub struct ThreadPool {
    name: String,
    workers: Mutex<Vec<Worker>>,
    sender: Mutex<Option<mpsc::SyncSender<Job>>>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    live: Arc<Liveness>,
}

impl ThreadPool {
    pub fn new(name: &str, size: usize, queue_size: usize) -> io::Result<Self> {
        assert!(size > 0);

        let mut workers = Vec::with_capacity(size);
        let (sender, receiver) = mpsc::sync_channel(queue_size);

        let receiver = Arc::new(Mutex::new(receiver));
        let live = Arc::new(Liveness {
            count: Mutex::new(size),
            all_done: Condvar::new(),
        });

        for i in 0..size {
            workers.push(Worker::new(
                name,
                i,
                Arc::clone(&receiver),
                Arc::clone(&live),
            )?);
        }

        Ok(Self {
            name: name.to_string(),
            workers: Mutex::new(workers),
            sender: Mutex::new(Some(sender)),
            receiver,
            live,
        })
    }

    pub fn execute<F>(&self, f: F) -> Dispatch
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(f);
        let rejected = {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(sender) => match sender.try_send(job) {
                    Ok(()) => return Dispatch::Queued,
                    Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => job,
                },
                None => job,
            }
        };

        debug!("{}: saturated, running job on the calling thread", self.name);
        rejected();
        Dispatch::CallerRuns
    }

    /// Stops accepting jobs and returns the ones that were queued but never started.
    /// Jobs already running are left to finish.
    pub fn shutdown_now(&self) -> Vec<Job> {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        receiver.try_iter().collect()
    }

    /// Waits up to `timeout` for every worker to exit. Returns `false` on timeout;
    /// the remaining workers are left detached.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let count = self.live.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (count, _) = self
            .live
            .all_done
            .wait_timeout_while(count, timeout, |live| *live > 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *count > 0 {
            warn!("{}: {} workers still running", self.name, *count);
            return false;
        }
        drop(count);

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for worker in workers.drain(..) {
            debug!("{}: joining worker {}", self.name, worker.id);
            if worker.thread.join().is_err() {
                error!("{}: worker {} panicked", self.name, worker.id);
            }
        }
        true
    }

    pub fn live_workers(&self) -> usize {
        *self.live.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Idle workers exit once the sender is gone; busy ones finish their job first.
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }
}

struct Liveness {
    count: Mutex<usize>,
    all_done: Condvar,
}

/// Decrements the live worker count when a worker thread exits, however it exits.
struct LiveGuard(Arc<Liveness>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        if *count == 0 {
            self.0.all_done.notify_all();
        }
    }
}

struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(
        pool: &str,
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
        live: Arc<Liveness>,
    ) -> io::Result<Self> {
        let name = format!("{pool}-{id}");
        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            let _guard = LiveGuard(live);
            loop {
                let msg = receiver
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .recv();
                match msg {
                    Ok(job) => {
                        debug!("{name} running a job");
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("{name}: job panicked");
                        }
                    }
                    Err(_) => {
                        debug!("{name} disconnected");
                        break;
                    }
                }
            }
        })?;

        Ok(Self { id, thread })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread::ThreadId,
    };

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    /// Submits a job that reports when it starts and then blocks until released.
    fn blocking_job(pool: &ThreadPool) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        assert_eq!(
            pool.execute(move || {
                started_tx.send(()).unwrap();
                let _ = release_rx.recv();
            }),
            Dispatch::Queued
        );
        (started_rx, release_tx)
    }

    #[test]
    fn runs_submitted_jobs() {
        let pool = ThreadPool::new("test", 2, 4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            let done_tx = done_tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                done_tx.send(()).unwrap();
            });
        }
        for _ in 0..4 {
            done_rx.recv_timeout(WAIT).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn caller_runs_when_saturated() {
        let pool = ThreadPool::new("test", 1, 1).unwrap();
        let (started, release) = blocking_job(&pool);
        started.recv_timeout(WAIT).unwrap();

        // Fills the single queue slot.
        assert_eq!(pool.execute(|| {}), Dispatch::Queued);

        let (ran_on_tx, ran_on_rx) = mpsc::channel::<ThreadId>();
        let dispatch = pool.execute(move || ran_on_tx.send(thread::current().id()).unwrap());
        assert_eq!(dispatch, Dispatch::CallerRuns);
        assert_eq!(ran_on_rx.recv().unwrap(), thread::current().id());

        release.send(()).unwrap();
    }

    #[test]
    fn shutdown_returns_jobs_that_never_started() {
        let pool = ThreadPool::new("test", 1, 2).unwrap();
        let (started, release) = blocking_job(&pool);
        started.recv_timeout(WAIT).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let ran = Arc::clone(&ran);
            pool.execute(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        let pending = pool.shutdown_now();
        assert_eq!(pending.len(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        release.send(()).unwrap();
        assert!(pool.await_termination(WAIT));
        assert_eq!(pool.live_workers(), 0);

        for job in pending {
            job();
        }
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn execute_after_shutdown_runs_on_caller() {
        let pool = ThreadPool::new("test", 1, 1).unwrap();
        assert!(pool.shutdown_now().is_empty());

        let (tx, rx) = mpsc::channel();
        assert_eq!(
            pool.execute(move || tx.send(()).unwrap()),
            Dispatch::CallerRuns
        );
        rx.try_recv().unwrap();
    }

    #[test]
    fn await_termination_times_out_on_busy_worker() {
        let pool = ThreadPool::new("test", 1, 1).unwrap();
        let (started, release) = blocking_job(&pool);
        started.recv_timeout(WAIT).unwrap();

        pool.shutdown_now();
        assert!(!pool.await_termination(Duration::from_millis(50)));
        assert_eq!(pool.live_workers(), 1);

        release.send(()).unwrap();
        assert!(pool.await_termination(WAIT));
    }

    #[test]
    fn worker_survives_panicking_job() {
        let pool = ThreadPool::new("test", 1, 2).unwrap();
        pool.execute(|| panic!("boom"));

        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(()).unwrap());
        rx.recv_timeout(WAIT).unwrap();
        assert_eq!(pool.live_workers(), 1);
    }
}
