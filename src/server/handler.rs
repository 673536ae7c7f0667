use std::{
    net::TcpStream,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
    },
    time::Duration,
};

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::{
    message::{ChatMessage, User},
    protocol::{
        Frame, Method, ProtocolTransport, Request, RequestError, Response, Target,
        TransportError,
    },
};

use super::{log::MessageLog, persist::AuditRecord, registry::ConnectionRegistry};

/// Largest accepted `lastId`, and the only one allowed a fourth digit.
const MAX_LAST_ID: &str = "1000";
const MAX_LAST_ID_DIGITS: usize = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Malformed(#[from] RequestError),

    #[error("POST request to '{0}' should have a body")]
    MissingBody(Target),
}

/// Everything a connection handler shares with the rest of the server.
#[derive(Clone)]
pub(crate) struct Context {
    pub log: Arc<MessageLog>,
    pub chat: Sender<ChatMessage>,
    pub audit: Sender<AuditRecord>,
    pub interrupt: Arc<AtomicBool>,
    pub registry: Arc<ConnectionRegistry>,
    pub idle_timeout: Duration,
}

/// Serves sequential requests on one connection until the peer leaves, the
/// connection idles out, or the server is interrupted. The socket is always shut
/// down on the way out.
pub(crate) fn handle_connection(stream: TcpStream, ctx: Context, registration: u64) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| format!("connection-{registration}"));

    let result = serve(stream, &ctx, &peer);
    ctx.registry.release(registration);

    match result {
        Ok(()) => info!("[{peer}] disconnected"),
        Err(e) if e.is_timeout() => warn!("[{peer}] idle timeout, disconnected"),
        Err(e) => warn!("[{peer}] connection dropped: {e}"),
    }
}

fn serve(stream: TcpStream, ctx: &Context, peer: &str) -> Result<(), TransportError> {
    if ctx.interrupt.load(Ordering::SeqCst) {
        info!("[{peer}] server is shutting down, closing");
        return Ok(());
    }

    let mut transport = ProtocolTransport::new(stream);
    transport.set_idle_timeout(Some(ctx.idle_timeout))?;
    info!("[{peer}] connected");

    while !ctx.interrupt.load(Ordering::SeqCst) {
        let Some(frame) = transport.read_frame()? else {
            return Ok(());
        };
        trace!("[{peer}] received frame {frame}");

        let response = match handle_frame(&frame, peer, ctx) {
            Ok(response) => response,
            Err(e) => {
                warn!("[{peer}] rejected request {frame}: {e}");
                Response::bad(e.to_string())
            }
        };

        info!("[{peer}] sending response: {response}");
        match transport.write_response(&response) {
            Err(TransportError::ResponseTooLarge { size, limit }) => {
                warn!("[{peer}] response of {size} bytes is over the {limit} byte limit");
                let reason = format!(
                    "response too large ({size} bytes, limit {limit}), fetch with a higher lastId"
                );
                transport.write_response(&Response::bad(reason))?;
            }
            result => result?,
        }
    }

    info!("[{peer}] interrupted, closing");
    Ok(())
}

fn handle_frame(frame: &Frame, peer: &str, ctx: &Context) -> Result<Response, DispatchError> {
    let request = frame.parse()?;
    info!("[{peer}] parsed request: {request}");
    dispatch(&request, peer, ctx)
}

pub(crate) fn dispatch(
    request: &Request,
    peer: &str,
    ctx: &Context,
) -> Result<Response, DispatchError> {
    let record = AuditRecord {
        connection: peer.to_string(),
        request: request.clone(),
    };
    if ctx.audit.send(record).is_err() {
        debug!("request audit is not running");
    }

    match (request.method(), request.target()) {
        (Method::Post, target @ Target::Messages) => {
            let body = request.body().ok_or(DispatchError::MissingBody(target))?;
            let message = ctx.log.append(body.to_string(), User::new(peer, ""));
            if ctx.chat.send(message).is_err() {
                debug!("chat persistence is not running");
            }
            Ok(Response::ok("Success"))
        }
        (Method::Get, Target::Messages) => {
            let messages = ctx.log.after(last_id(request));
            Ok(Response::messages(messages))
        }
    }
}

/// Reads the `lastId` parameter: one to three digits, or exactly `1000`. Anything
/// else is ignored as if the parameter were absent.
fn last_id(request: &Request) -> Option<u64> {
    let raw = request.parameter("lastId")?;

    let short = (1..=MAX_LAST_ID_DIGITS).contains(&raw.len())
        && raw.bytes().all(|b| b.is_ascii_digit());
    let id = (short || raw == MAX_LAST_ID)
        .then(|| raw.parse::<u64>().ok())
        .flatten();

    if id.is_none() {
        warn!("ignoring lastId '{raw}', expected up to 3 digits or {MAX_LAST_ID}");
    }
    id
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Receiver};

    use crate::protocol::ResponseBody;

    use super::*;

    struct Harness {
        ctx: Context,
        chat: Receiver<ChatMessage>,
        audit: Receiver<AuditRecord>,
    }

    fn harness() -> Harness {
        let (chat_tx, chat) = mpsc::channel();
        let (audit_tx, audit) = mpsc::channel();
        Harness {
            ctx: Context {
                log: Arc::new(MessageLog::new()),
                chat: chat_tx,
                audit: audit_tx,
                interrupt: Arc::new(AtomicBool::new(false)),
                registry: Arc::new(ConnectionRegistry::default()),
                idle_timeout: Duration::from_secs(5),
            },
            chat,
            audit,
        }
    }

    fn post(body: &str) -> Request {
        Request::new(Method::Post, Target::Messages).with_body(body)
    }

    fn get(last_id: Option<&str>) -> Request {
        let request = Request::new(Method::Get, Target::Messages);
        match last_id {
            Some(id) => request.with_parameter("lastId", id).unwrap(),
            None => request,
        }
    }

    fn ids(response: Response) -> Vec<u64> {
        assert!(response.is_ok());
        match response.body {
            ResponseBody::Messages(messages) => messages.iter().map(ChatMessage::id).collect(),
            other => panic!("expected messages, got {other:?}"),
        }
    }

    #[test]
    fn post_appends_and_persists() {
        let h = harness();
        let response = dispatch(&post("hello"), "peer", &h.ctx).unwrap();

        assert_eq!(response, Response::ok("Success"));
        let message = h.chat.try_recv().unwrap();
        assert_eq!(message.content(), "hello");
        assert_eq!(message.author().username(), "peer");
        assert_eq!(h.ctx.log.len(), 1);

        let record = h.audit.try_recv().unwrap();
        assert_eq!(record.connection, "peer");
        assert_eq!(record.request, post("hello"));
    }

    #[test]
    fn post_without_body_is_rejected() {
        let h = harness();
        let err = dispatch(&post(""), "peer", &h.ctx).unwrap_err();

        assert_eq!(err, DispatchError::MissingBody(Target::Messages));
        assert!(h.ctx.log.is_empty());
        assert!(h.chat.try_recv().is_err());
        // Rejected requests are still audited.
        assert!(h.audit.try_recv().is_ok());
    }

    #[test]
    fn get_filters_by_last_id() {
        let h = harness();
        for i in 0..6 {
            dispatch(&post(&format!("m{i}")), "peer", &h.ctx).unwrap();
        }

        let get_ids = |last_id| ids(dispatch(&get(last_id), "peer", &h.ctx).unwrap());
        assert_eq!(get_ids(Some("2")), vec![3, 4, 5]);
        assert_eq!(get_ids(None), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(get_ids(Some("005")), Vec::<u64>::new());
        assert_eq!(get_ids(Some("1000")), Vec::<u64>::new());
        // Four digits other than 1000, or out of range: treated as absent.
        assert_eq!(get_ids(Some("0005")).len(), 6);
        assert_eq!(get_ids(Some("0999")).len(), 6);
        assert_eq!(get_ids(Some("1001")).len(), 6);
        assert_eq!(get_ids(Some("1234")).len(), 6);
        assert_eq!(get_ids(Some("12345")).len(), 6);
        assert_eq!(get_ids(Some("abc")).len(), 6);
    }

    #[test]
    fn last_id_bounds() {
        assert_eq!(last_id(&get(Some("0"))), Some(0));
        assert_eq!(last_id(&get(Some("999"))), Some(999));
        assert_eq!(last_id(&get(Some("1000"))), Some(1000));
        assert_eq!(last_id(&get(Some("1001"))), None);
        assert_eq!(last_id(&get(Some("0999"))), None);
        assert_eq!(last_id(&get(Some("0005"))), None);
        assert_eq!(last_id(&get(Some("01000"))), None);
        assert_eq!(last_id(&get(None)), None);
        assert_eq!(last_id(&get(Some("x1"))), None);
    }

    #[test]
    fn oversized_frame_is_rejected_unparsed() {
        let h = harness();
        let frame = Frame {
            start_line: b"POST /messages".to_vec(),
            rest: b"\r\n\r\ntruncated".to_vec(),
            oversized: true,
        };

        let err = handle_frame(&frame, "peer", &h.ctx).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Malformed(RequestError::TooLarge(crate::protocol::MAX_REQUEST_SIZE))
        );
        assert!(h.ctx.log.is_empty());
    }

    #[test]
    fn malformed_frame_becomes_dispatch_error() {
        let h = harness();
        let frame = Frame {
            start_line: b"DELETE /messages".to_vec(),
            rest: Vec::new(),
            oversized: false,
        };

        let err = handle_frame(&frame, "peer", &h.ctx).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Malformed(RequestError::UnknownMethod("DELETE".into()))
        );
        assert!(h.audit.try_recv().is_err());
    }
}
