//! Chat server.
//!
//! [`ChatServer`] owns every moving part of the server and is the only place that
//! starts or stops them:
//!
//! - an acceptor thread blocking on the listening socket,
//! - a bounded client [`ThreadPool`] running one handler per connection, with the
//!   acceptor running the handler itself when the pool is saturated,
//! - the shared, append-only [`MessageLog`],
//! - a service pool running the two persistence writers (`chat.log` and
//!   `requests.log`, both truncated on start).
//!
//! # Shutdown
//!
//! [`ChatServer::close`] stops things in a fixed order: the acceptor (after closing
//! every open socket, since a handler blocked in a read can't be interrupted any
//! other way), then the client pool, running the connections that were queued but
//! never started so they close their sockets too, then the service pool, and
//! finally the persistence queues are cleared. Each pool wait is bounded; a
//! timeout is logged, never waited out. A second call is a no-op.
mod handler;
mod log;
mod persist;
mod registry;
mod thread;

use std::{
    fs::File,
    io::{self, BufWriter},
    mem,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread::JoinHandle,
    time::Duration,
};

use ::log::{debug, error, info, warn};
use thiserror::Error;

use crate::{config::ServerConfig, message::ChatMessage};

use handler::{Context, handle_connection};
use persist::{CHAT_LOG, Queue, REQUEST_LOG, discard, format_audit_line, format_chat_line};
use registry::ConnectionRegistry;

pub use handler::DispatchError;
pub use self::log::MessageLog;
pub use persist::AuditRecord;
pub use thread::{Dispatch, Job, ThreadPool};

const ACCEPTOR_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause after a failed `accept`, so a persistent error (out of descriptors)
/// doesn't turn the acceptor into a busy loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);
const SERVICE_WORKERS: usize = 2;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server has already been started")]
    AlreadyStarted,
    #[error("server has been closed")]
    Closed,
    #[error("server hasn't been started")]
    NotStarted,
    #[error("server IO error: {0}")]
    Io(#[from] io::Error),
}

enum State {
    Idle,
    Running(Box<Running>),
    Stopping,
    Closed,
}

pub struct ChatServer {
    config: ServerConfig,
    log: Arc<MessageLog>,
    state: Mutex<State>,
    stopped: Condvar,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            log: Arc::new(MessageLog::new()),
            state: Mutex::new(State::Idle),
            stopped: Condvar::new(),
        }
    }

    /// Binds the listening socket, truncates the log files and starts every
    /// background thread. Returns the bound address.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut state = self.lock_state();
        match *state {
            State::Idle => {}
            State::Running(_) | State::Stopping => return Err(ServerError::AlreadyStarted),
            State::Closed => return Err(ServerError::Closed),
        }

        let running = Running::start(&self.config, Arc::clone(&self.log))?;
        let address = running.address;
        *state = State::Running(Box::new(running));

        info!("listening at {address}");
        Ok(address)
    }

    /// Address the server is listening on while it runs.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lock_state() {
            State::Running(running) => Some(running.address),
            _ => None,
        }
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Blocks until [`ChatServer::close`] has finished.
    pub fn wait_until_stopped(&self) -> Result<(), ServerError> {
        let state = self.lock_state();
        if matches!(*state, State::Idle) {
            return Err(ServerError::NotStarted);
        }

        let _state = self
            .stopped
            .wait_while(state, |s| matches!(s, State::Running(_) | State::Stopping))
            .unwrap_or_else(PoisonError::into_inner);
        Ok(())
    }

    /// Shuts the server down. Calling it again, or on a server that never started,
    /// does nothing.
    pub fn close(&self) {
        let running = {
            let mut state = self.lock_state();
            match mem::replace(&mut *state, State::Stopping) {
                State::Running(running) => running,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        info!("shutting down server at {}", running.address);
        running.shutdown(&self.config);

        *self.lock_state() = State::Closed;
        self.stopped.notify_all();
        info!("server stopped");
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.close();
    }
}

struct Running {
    address: SocketAddr,
    interrupt: Arc<AtomicBool>,
    acceptor: JoinHandle<()>,
    /// Disconnects when the acceptor thread exits.
    acceptor_exited: Receiver<()>,
    registry: Arc<ConnectionRegistry>,
    client_pool: Arc<ThreadPool>,
    service_pool: ThreadPool,
    chat_queue: Queue<ChatMessage>,
    audit_queue: Queue<AuditRecord>,
}

impl Running {
    fn start(config: &ServerConfig, log: Arc<MessageLog>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.address)?;
        let address = listener.local_addr()?;

        let chat_file = File::create(config.log_dir.join(CHAT_LOG))?;
        let audit_file = File::create(config.log_dir.join(REQUEST_LOG))?;

        let interrupt = Arc::new(AtomicBool::new(false));
        let (chat_tx, chat_rx) = mpsc::channel();
        let (audit_tx, audit_rx) = mpsc::channel();
        let chat_queue: Queue<ChatMessage> = Arc::new(Mutex::new(chat_rx));
        let audit_queue: Queue<AuditRecord> = Arc::new(Mutex::new(audit_rx));

        let service_pool = ThreadPool::new("service", SERVICE_WORKERS, SERVICE_WORKERS)?;
        {
            let (queue, interrupt) = (Arc::clone(&chat_queue), Arc::clone(&interrupt));
            service_pool.execute(move || {
                let out = BufWriter::new(chat_file);
                persist::consume("chat-log", &queue, out, &interrupt, format_chat_line)
            });
        }
        {
            let (queue, interrupt) = (Arc::clone(&audit_queue), Arc::clone(&interrupt));
            service_pool.execute(move || {
                let out = BufWriter::new(audit_file);
                persist::consume("request-log", &queue, out, &interrupt, format_audit_line)
            });
        }

        let client_pool = Arc::new(ThreadPool::new(
            "client",
            config.client_pool_size,
            config.client_queue_size,
        )?);
        let registry = Arc::new(ConnectionRegistry::default());
        let ctx = Context {
            log,
            chat: chat_tx,
            audit: audit_tx,
            interrupt: Arc::clone(&interrupt),
            registry: Arc::clone(&registry),
            idle_timeout: config.idle_timeout,
        };

        let pool = Arc::clone(&client_pool);
        let (exited, acceptor_exited) = mpsc::channel();
        let acceptor = std::thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || {
                let _exited: Sender<()> = exited;
                accept_loop(listener.incoming(), &pool, ctx)
            })?;

        Ok(Self {
            address,
            interrupt,
            acceptor,
            acceptor_exited,
            registry,
            client_pool,
            service_pool,
            chat_queue,
            audit_queue,
        })
    }

    fn shutdown(self, config: &ServerConfig) {
        // Stop the acceptor. Closing the open sockets also releases the acceptor
        // if it is busy running a handler itself.
        self.interrupt.store(true, Ordering::SeqCst);
        let closed = self.registry.close_all();
        info!("closed {closed} open connections");
        wake(self.address);
        join_acceptor(self.acceptor, &self.acceptor_exited);

        let pending = self.client_pool.shutdown_now();
        info!("closing {} connections that were never handled", pending.len());
        for job in pending {
            job();
        }
        if !self.client_pool.await_termination(config.client_shutdown_timeout) {
            warn!("couldn't shut down the client pool: timeout");
        }

        // Writers that never got a worker see the interrupt and return at once.
        for job in self.service_pool.shutdown_now() {
            job();
        }
        if !self.service_pool.await_termination(config.service_shutdown_timeout) {
            warn!("couldn't shut down the service pool: timeout");
        }

        let discarded = discard(&self.chat_queue) + discard(&self.audit_queue);
        info!("cleared persistence queues, {discarded} records discarded");
    }
}

fn accept_loop<I>(incoming: I, pool: &ThreadPool, ctx: Context)
where
    I: Iterator<Item = io::Result<TcpStream>>,
{
    for stream in incoming {
        if ctx.interrupt.load(Ordering::SeqCst) {
            info!("acceptor interrupted");
            break;
        }

        match stream {
            Ok(stream) => {
                let registration = match ctx.registry.register(&stream) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("couldn't track connection, dropping it: {e}");
                        continue;
                    }
                };

                let ctx = ctx.clone();
                let dispatch = pool.execute(move || handle_connection(stream, ctx, registration));
                if dispatch == Dispatch::CallerRuns {
                    debug!(
                        "client pool saturated, connection {registration} handled by the acceptor"
                    );
                }
            }
            Err(e) => {
                warn!("couldn't accept a connection: {e}");
                std::thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }
}

/// Connects to the listener so a blocked `accept` returns and sees the interrupt.
fn wake(address: SocketAddr) {
    let mut target = address;
    if target.ip().is_unspecified() {
        target.set_ip(match target.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        });
    }

    if let Err(e) = TcpStream::connect_timeout(&target, WAKE_TIMEOUT) {
        warn!("couldn't wake the acceptor: {e}");
    }
}

fn join_acceptor(acceptor: JoinHandle<()>, exited: &Receiver<()>) {
    if let Err(RecvTimeoutError::Timeout) = exited.recv_timeout(ACCEPTOR_JOIN_TIMEOUT) {
        warn!("acceptor didn't stop in {ACCEPTOR_JOIN_TIMEOUT:?}, leaving it behind");
        return;
    }
    if acceptor.join().is_err() {
        error!("acceptor panicked");
    }
    info!("acceptor stopped");
}
