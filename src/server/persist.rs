//! Background writers for the chat history and the request audit trail.
//!
//! Each writer is a single consumer draining its own queue into an append-only
//! text file, flushing after every line. An I/O failure stops that writer only.
use std::{
    io::Write,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, RecvTimeoutError},
    },
    time::Duration,
};

use log::{debug, error, info};

use crate::{message::ChatMessage, protocol::Request};

pub(crate) const CHAT_LOG: &str = "chat.log";
pub(crate) const REQUEST_LOG: &str = "requests.log";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receiving end of a persistence queue, shared with the server so shutdown can
/// discard whatever was never written.
pub(crate) type Queue<T> = Arc<Mutex<Receiver<T>>>;

/// A parsed request and the connection it arrived on.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub connection: String,
    pub request: Request,
}

/// Drains `queue` into `out` until interrupted, disconnected, or a write fails.
pub(crate) fn consume<T, W: Write>(
    name: &str,
    queue: &Queue<T>,
    mut out: W,
    interrupt: &AtomicBool,
    format: fn(&T) -> String,
) {
    debug!("{name}: started");
    loop {
        if interrupt.load(Ordering::SeqCst) {
            info!("{name}: interrupted");
            return;
        }

        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv_timeout(POLL_INTERVAL);
        let record = match next {
            Ok(record) => record,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("{name}: queue disconnected");
                return;
            }
        };

        let line = format(&record);
        if let Err(e) = out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
            error!("{name}: failed to persist record, stopping: {e}");
            return;
        }
    }
}

/// Drops every record still waiting in `queue`, returning how many there were.
pub(crate) fn discard<T>(queue: &Queue<T>) -> usize {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .try_iter()
        .count()
}

/// `author | timestamp:> first line`, with continuation lines indented under the
/// first one.
pub(crate) fn format_chat_line(message: &ChatMessage) -> String {
    let header = format!(
        "{} | {}:> ",
        message.author().username(),
        message.created_at().format("%m/%d/%y, %H:%M")
    );
    let indent = " ".repeat(header.chars().count());
    let data = message.content().replace('\n', &format!("\n{indent}"));

    format!("{header}{data}\n")
}

pub(crate) fn format_audit_line(record: &AuditRecord) -> String {
    let request = &record.request;
    let headers = request
        .headers()
        .map(|h| format!("{h:?}"))
        .unwrap_or_else(|| "[]".to_string());
    let body = request
        .body()
        .map(|b| format!("{b:?}"))
        .unwrap_or_else(|| "[]".to_string());

    format!(
        "[{}] | {:.5} | {} | {}\n",
        record.connection,
        request.method().as_str(),
        headers,
        body
    )
}
