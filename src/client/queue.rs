//! Channel that counts how many messages are waiting in it.
//!
//! The client actors talk over these so the handshake between input capture and
//! the session can be observed: [`QueueStats::peak`] is the deepest the queue ever
//! got.
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, RecvError, RecvTimeoutError, SendError},
    },
    time::Duration,
};

#[derive(Debug, Default)]
pub struct QueueStats {
    depth: AtomicUsize,
    peak: AtomicUsize,
}

impl QueueStats {
    /// Messages sent but not received yet.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub fn queue<T>() -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::channel();
    let stats = Arc::new(QueueStats::default());
    (
        Producer {
            inner: tx,
            stats: Arc::clone(&stats),
        },
        Consumer { inner: rx, stats },
    )
}

#[derive(Debug)]
pub struct Producer<T> {
    inner: mpsc::Sender<T>,
    stats: Arc<QueueStats>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> Producer<T> {
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        // Counted before the send so the receiver can never take the depth below zero.
        let depth = self.stats.depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(depth, Ordering::SeqCst);

        self.inner.send(value).inspect_err(|_| {
            self.stats.depth.fetch_sub(1, Ordering::SeqCst);
        })
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

#[derive(Debug)]
pub struct Consumer<T> {
    inner: mpsc::Receiver<T>,
    stats: Arc<QueueStats>,
}

impl<T> Consumer<T> {
    pub fn recv(&self) -> Result<T, RecvError> {
        let value = self.inner.recv()?;
        self.stats.depth.fetch_sub(1, Ordering::SeqCst);
        Ok(value)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        let value = self.inner.recv_timeout(timeout)?;
        self.stats.depth.fetch_sub(1, Ordering::SeqCst);
        Ok(value)
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}
