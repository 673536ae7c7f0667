use std::{
    fmt,
    io::{self, BufRead, BufReader, Cursor, Read, Write},
    net::TcpStream,
    time::Duration,
};

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

use super::{
    MAX_REQUEST_SIZE, Request, RequestError, Response, decode_response, encode_response,
};

/// How long the frame reader waits for more bytes once a start line has arrived.
const FRAME_GRACE: Duration = Duration::from_millis(50);
const DRAIN_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] EncodeError),
    #[error("failed to decode message: {0}")]
    Deserialize(#[from] DecodeError),
    #[error("unknown response status code {0}")]
    UnknownStatus(u32),
    #[error("response of {size} bytes is over the {limit} byte limit")]
    ResponseTooLarge { size: usize, limit: usize },
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the error was caused by a read or write timing out.
    pub fn is_timeout(&self) -> bool {
        let err = match self {
            TransportError::Io(e) => e,
            TransportError::Deserialize(DecodeError::Io { inner, .. }) => inner,
            _ => return false,
        };
        matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    }
}

/// A bidirectional byte stream whose reads can be bounded in time.
pub trait Stream: Read + Write {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Stream for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

impl Stream for Cursor<Vec<u8>> {
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// Raw request frame: the start line without its terminator, and every byte that
/// was already available after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub start_line: Vec<u8>,
    pub rest: Vec<u8>,
    /// The frame went past [`MAX_REQUEST_SIZE`]; the excess was dropped.
    pub oversized: bool,
}

impl Frame {
    pub fn parse(&self) -> Result<Request, RequestError> {
        if self.oversized {
            return Err(RequestError::TooLarge(MAX_REQUEST_SIZE));
        }
        let start_line =
            std::str::from_utf8(&self.start_line).map_err(|_| RequestError::InvalidEncoding)?;
        let rest = std::str::from_utf8(&self.rest).map_err(|_| RequestError::InvalidEncoding)?;
        Request::parse(start_line, rest)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} + {:?}",
            String::from_utf8_lossy(&self.start_line),
            String::from_utf8_lossy(&self.rest)
        )
    }
}

pub struct ProtocolTransport<T: Stream> {
    reader: BufReader<T>,
    idle_timeout: Option<Duration>,
}

impl<T: Stream> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            reader: BufReader::new(stream),
            idle_timeout: None,
        }
    }

    /// Bounds every blocking read on the underlying stream.
    pub fn set_idle_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.idle_timeout = timeout;
        self.reader.get_ref().set_read_timeout(timeout)
    }

    pub fn get_ref(&self) -> &T {
        self.reader.get_ref()
    }

    pub fn write_request(&mut self, request: &Request) -> Result<(), TransportError> {
        let stream = self.reader.get_mut();
        stream.write_all(request.encode().as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    /// Reads the next request frame, `None` once the peer has closed the stream.
    ///
    /// Everything immediately available after the start line belongs to the frame,
    /// so a malformed frame never leaks bytes into the next one. At most
    /// [`MAX_REQUEST_SIZE`] bytes are kept; a longer frame is still read to its end
    /// and comes back marked as oversized.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        let mut start_line = Vec::new();
        let read = self
            .reader
            .by_ref()
            .take(MAX_REQUEST_SIZE as u64)
            .read_until(b'\n', &mut start_line)?;
        if read == 0 {
            return Ok(None);
        }

        let terminated = start_line.last() == Some(&b'\n');
        let line_too_long = !terminated && read == MAX_REQUEST_SIZE;
        if terminated {
            start_line.pop();
            if start_line.last() == Some(&b'\r') {
                start_line.pop();
            }
        }

        let (rest, overflow) = self.drain_available(MAX_REQUEST_SIZE.saturating_sub(read))?;
        Ok(Some(Frame {
            start_line,
            rest,
            oversized: line_too_long || overflow,
        }))
    }

    /// Reads whatever is immediately available, keeping at most `budget` bytes.
    /// The flag tells whether anything was dropped.
    fn drain_available(&mut self, budget: usize) -> Result<(Vec<u8>, bool), TransportError> {
        let mut rest = Vec::new();
        let buffered = self.reader.buffer();
        let consumed = buffered.len();
        let mut overflow = append_capped(&mut rest, buffered, budget);
        self.reader.consume(consumed);

        self.reader.get_ref().set_read_timeout(Some(FRAME_GRACE))?;
        let mut chunk = [0u8; DRAIN_CHUNK];
        let drained = loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(n) => overflow |= append_capped(&mut rest, &chunk[..n], budget),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };
        self.reader.get_ref().set_read_timeout(self.idle_timeout)?;
        drained?;

        Ok((rest, overflow))
    }

    /// Blocks until the peer starts answering. `false` when it hung up first,
    /// without sending a single byte.
    pub fn response_pending(&mut self) -> Result<bool, TransportError> {
        match self.reader.fill_buf() {
            Ok(buf) => Ok(!buf.is_empty()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_response(&mut self, response: &Response) -> Result<(), TransportError> {
        let stream = self.reader.get_mut();
        encode_response(response, stream)?;
        stream.flush()?;
        Ok(())
    }

    pub fn read_response(&mut self) -> Result<Response, TransportError> {
        decode_response(&mut self.reader)
    }
}

/// Appends `bytes` to `buf` without letting it grow past `budget`. Returns whether
/// anything was left out.
fn append_capped(buf: &mut Vec<u8>, bytes: &[u8], budget: usize) -> bool {
    let room = budget.saturating_sub(buf.len());
    buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
    bytes.len() > room
}
