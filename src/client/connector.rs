use std::{
    io,
    net::TcpStream,
    sync::mpsc::{Receiver, Sender},
};

use log::{debug, info, warn};

use crate::{
    config::ClientConfig,
    protocol::{ProtocolTransport, Request, Response, TransportError},
};

use super::message::{ServerMessage, UIMessage};

/// Owns the connection to the server and answers every [`ServerMessage`] with a
/// [`UIMessage`].
///
/// The connection is opened lazily and reused across cycles. Any failure drops
/// it and is reported as a BAD response; the next message reconnects.
pub struct Connector {
    config: ClientConfig,
    connection: Option<ProtocolTransport<TcpStream>>,
    inbox: Receiver<ServerMessage>,
    outbox: Sender<UIMessage>,
}

/// How far a failed round trip got. Only a request the server never started
/// answering may be sent again.
#[derive(Debug)]
enum Failure {
    Unanswered(TransportError),
    Answered(TransportError),
}

impl Failure {
    fn into_inner(self) -> TransportError {
        match self {
            Failure::Unanswered(e) | Failure::Answered(e) => e,
        }
    }
}

impl Connector {
    pub fn new(
        config: ClientConfig,
        inbox: Receiver<ServerMessage>,
        outbox: Sender<UIMessage>,
    ) -> Self {
        Self {
            config,
            connection: None,
            inbox,
            outbox,
        }
    }

    /// Runs until the session goes away.
    pub fn run(mut self) {
        while let Ok(ServerMessage { cycle, request }) = self.inbox.recv() {
            let response = self.send(&request).unwrap_or_else(|e| {
                warn!("cycle {cycle}: request failed: {e}");
                Response::bad(format!("request failed: {e}"))
            });

            debug!("cycle {cycle}: {response}");
            if self.outbox.send(UIMessage { cycle, response }).is_err() {
                break;
            }
        }
        debug!("session stopped, closing connection");
    }

    /// Sends `request` and waits for its response.
    ///
    /// A reused connection the server has closed in the meantime is replaced
    /// once, but only when the write failed or the connection ended before any
    /// response byte arrived. Once the server started answering, the request
    /// may have been applied and is never sent twice.
    fn send(&mut self, request: &Request) -> Result<Response, TransportError> {
        let reused = self.connection.is_some();
        match self.round_trip(request) {
            Err(Failure::Unanswered(e)) if reused && !e.is_timeout() => {
                info!("connection lost ({e}), reconnecting");
                self.round_trip(request).map_err(Failure::into_inner)
            }
            result => result.map_err(Failure::into_inner),
        }
    }

    fn round_trip(&mut self, request: &Request) -> Result<Response, Failure> {
        let result = self.exchange(request);
        if result.is_err() {
            self.connection = None;
        }
        result
    }

    fn exchange(&mut self, request: &Request) -> Result<Response, Failure> {
        let transport = match &mut self.connection {
            Some(transport) => transport,
            connection @ None => {
                connection.insert(connect(&self.config).map_err(Failure::Unanswered)?)
            }
        };

        transport
            .write_request(request)
            .map_err(Failure::Unanswered)?;
        if !transport.response_pending().map_err(Failure::Answered)? {
            return Err(Failure::Unanswered(
                io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection")
                    .into(),
            ));
        }
        transport.read_response().map_err(Failure::Answered)
    }
}

fn connect(config: &ClientConfig) -> Result<ProtocolTransport<TcpStream>, TransportError> {
    let stream = TcpStream::connect_timeout(&config.address, config.connect_timeout)?;
    stream.set_write_timeout(Some(config.read_timeout))?;
    let mut transport = ProtocolTransport::new(stream);
    transport.set_idle_timeout(Some(config.read_timeout))?;

    info!("connected to {}", config.address);
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        net::{SocketAddr, TcpListener},
        sync::mpsc,
        thread,
        time::Duration,
    };

    use tempdir::TempDir;

    use crate::{
        config::ServerConfig,
        protocol::{Method, ResponseBody, Target},
        server::ChatServer,
    };

    use super::*;

    fn config(address: SocketAddr) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(300),
            ..ClientConfig::new(address)
        }
    }

    fn connector(address: SocketAddr) -> Connector {
        let (_, inbox) = mpsc::channel();
        let (outbox, _) = mpsc::channel();
        Connector::new(config(address), inbox, outbox)
    }

    fn post(body: &str) -> Request {
        Request::new(Method::Post, Target::Messages).with_body(body)
    }

    #[test]
    fn reuses_the_connection() {
        let dir = TempDir::new("connector").unwrap();
        let server = ChatServer::new(ServerConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            dir.path().to_path_buf(),
        ));
        let address = server.start().unwrap();

        let mut connector = connector(address);
        assert_eq!(connector.send(&post("hi")).unwrap(), Response::ok("Success"));
        let local = connector.connection.as_ref().unwrap().get_ref().local_addr().unwrap();

        let response = connector
            .send(&Request::new(Method::Get, Target::Messages))
            .unwrap();
        assert!(matches!(response.body, ResponseBody::Messages(ref m) if m.len() == 1));
        let again = connector.connection.as_ref().unwrap().get_ref().local_addr().unwrap();
        assert_eq!(local, again);
    }

    #[test]
    fn reconnects_after_the_server_drops_the_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let reply = |stream: TcpStream| {
                let mut transport = ProtocolTransport::new(stream);
                transport.read_frame().unwrap().unwrap();
                transport.write_response(&Response::ok("Success")).unwrap();
            };
            // Answers once, then hangs up.
            reply(listener.accept().unwrap().0);
            reply(listener.accept().unwrap().0);
        });

        let mut connector = connector(address);
        assert!(connector.send(&post("one")).unwrap().is_ok());
        thread::sleep(Duration::from_millis(100));
        assert!(connector.send(&post("two")).unwrap().is_ok());
        server.join().unwrap();
    }

    #[test]
    fn failures_become_bad_replies() {
        // Accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let silent = listener.local_addr().unwrap();
        // Nothing listens here any more.
        let closed = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

        for address in [silent, closed] {
            let (to_connector, inbox) = mpsc::channel();
            let (outbox, from_connector) = mpsc::channel();
            let handle =
                thread::spawn(move || Connector::new(config(address), inbox, outbox).run());

            to_connector
                .send(ServerMessage {
                    cycle: 7,
                    request: post("hello"),
                })
                .unwrap();
            let reply = from_connector.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(reply.cycle, 7);
            assert!(!reply.response.is_ok());
            assert!(matches!(
                reply.response.body,
                ResponseBody::Message(ref m) if m.starts_with("request failed")
            ));

            drop(to_connector);
            handle.join().unwrap();
        }
        drop(listener);
    }

    #[test]
    fn partial_response_is_not_resent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut transport = ProtocolTransport::new(stream);
            transport.read_frame().unwrap().unwrap();
            transport.write_response(&Response::ok("Success")).unwrap();

            // Starts answering the second request, then hangs up mid-frame.
            transport.read_frame().unwrap().unwrap();
            let mut stream = transport.get_ref();
            stream.write_all(&[0, 0]).unwrap();
            drop(transport);
            listener
        });

        let mut connector = connector(address);
        assert!(connector.send(&post("one")).unwrap().is_ok());
        assert!(connector.send(&post("two")).is_err());
        assert!(connector.connection.is_none());

        // No second connection was attempted.
        let listener = server.join().unwrap();
        listener.set_nonblocking(true).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
