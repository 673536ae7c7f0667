use std::{
    collections::HashMap,
    io,
    net::{Shutdown, TcpStream},
    sync::{Mutex, PoisonError},
};

use log::{debug, warn};

/// Handles to every open client connection, so shutdown can close sockets whose
/// handler threads are blocked in a read.
#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    inner: Mutex<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    open: HashMap<u64, TcpStream>,
    closed: bool,
}

impl ConnectionRegistry {
    /// Tracks `stream` and returns its registration id. Once the registry has been
    /// closed, the stream is shut down straight away.
    pub fn register(&self, stream: &TcpStream) -> io::Result<u64> {
        let handle = stream.try_clone()?;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let id = inner.next_id;
        inner.next_id += 1;
        if inner.closed {
            close(id, &handle);
        } else {
            inner.open.insert(id, handle);
        }
        Ok(id)
    }

    /// Stops tracking a connection and shuts its socket down.
    pub fn release(&self, id: u64) {
        let handle = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .remove(&id);
        if let Some(handle) = handle {
            close(id, &handle);
        }
    }

    /// Shuts down every tracked socket and refuses to track new ones. Returns the
    /// number of sockets closed.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.closed = true;

        let open = inner.open.drain().collect::<Vec<_>>();
        for (id, handle) in &open {
            close(*id, handle);
        }
        open.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
            .len()
    }
}

fn close(id: u64, stream: &TcpStream) {
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => debug!("closed connection {id}"),
        // The peer may already be gone.
        Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
        Err(e) => warn!("failed to close connection {id}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read, net::TcpListener};

    use super::*;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn close_all_unblocks_peers() {
        let registry = ConnectionRegistry::default();
        let (mut client, server) = pair();

        registry.register(&server).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.close_all(), 1);
        assert_eq!(registry.len(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn release_closes_socket() {
        let registry = ConnectionRegistry::default();
        let (mut client, server) = pair();

        let id = registry.register(&server).unwrap();
        drop(server);
        registry.release(id);

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn register_after_close_shuts_down() {
        let registry = ConnectionRegistry::default();
        registry.close_all();

        let (mut client, server) = pair();
        registry.register(&server).unwrap();
        assert_eq!(registry.len(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
