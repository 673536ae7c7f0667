//! Client-server communication protocol.
//!
//! This module defines the wire format spoken between Parley clients and the chat
//! server: a small text request framing loosely modelled on HTTP/1.x, and a compact
//! binary response frame.
//!
//! # Request Format
//!
//! ```text
//! METHOD TARGET[?key=value&key=value...]\r\n
//! [headerName:headerValue\r\n]*
//! \r\n
//! [body]
//! ```
//!
//! - `METHOD` is one of [`Method`] and `TARGET` must be a known [`Target`].
//! - Header names and values match `[A-Za-z][A-Za-z_-]*`.
//! - Parameter keys are letters only, parameter values letters or digits.
//! - The header block ends at the first `CRLFCRLF` of the stream that follows the
//!   start line (the start line's own `CRLF` included). Everything after it is the
//!   body, an opaque character sequence.
//!
//! Requests carry no length prefix; a frame is the start line plus whatever the peer
//! has already written when the start line arrives. See [`ProtocolTransport`].
//!
//! # Response Format
//!
//! Responses are encoded with `bincode` (big-endian, fixed-width integers) as a
//! status code followed by a tagged [`ResponseBody`].
//!
//! # Key Components
//!
//! - [`Request`]: a parsed request and its text encoder.
//! - [`Response`]: status plus body, with [`encode_response`] / [`decode_response`].
//! - [`ProtocolTransport`]: frame reader and writer over a bidirectional stream.
mod headers;
mod params;
mod request;
mod response;
mod transport;

use bincode::config::{BigEndian, Configuration, Fixint, Limit};

pub use headers::{parse_headers, split_headers_and_body};
pub use params::parse_parameters;
pub use request::{Method, Request, RequestError, Target, parse_start_line};
pub use response::{Response, ResponseBody, Status, decode_response, encode_response};
pub use transport::{Frame, ProtocolTransport, Stream, TransportError};

/// Upper bound on a single response frame, in bytes.
pub const MAX_RESPONSE_SIZE: usize = 1 << 20;
/// Upper bound on a request frame, start line included. Anything past it is read
/// and dropped, and the request is rejected.
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

pub(crate) type WireConfig = Configuration<BigEndian, Fixint, Limit<MAX_RESPONSE_SIZE>>;

pub(crate) fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<MAX_RESPONSE_SIZE>()
}
