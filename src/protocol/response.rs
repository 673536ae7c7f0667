use std::{
    fmt,
    io::{Read, Write},
};

use bincode::{Decode, Encode, decode_from_std_read, encode_to_vec};

use crate::message::ChatMessage;

use super::{MAX_RESPONSE_SIZE, TransportError, wire_config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Bad,
}

impl Status {
    pub fn code(&self) -> u32 {
        match self {
            Status::Ok => 100,
            Status::Bad => 500,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        [Status::Ok, Status::Bad].into_iter().find(|s| s.code() == code)
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub enum ResponseBody {
    Message(String),
    Messages(Vec<ChatMessage>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: ResponseBody,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            body: ResponseBody::Message(message.into()),
        }
    }

    pub fn messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            status: Status::Ok,
            body: ResponseBody::Messages(messages),
        }
    }

    pub fn bad(reason: impl Into<String>) -> Self {
        Self {
            status: Status::Bad,
            body: ResponseBody::Message(reason.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            ResponseBody::Message(m) => {
                write!(f, "{:?} ({}) {m:?}", self.status, self.status.code())
            }
            ResponseBody::Messages(m) => write!(
                f,
                "{:?} ({}) [{} messages]",
                self.status,
                self.status.code(),
                m.len()
            ),
        }
    }
}

/// On-wire layout of a response.
#[derive(Encode, Decode)]
struct Envelope {
    code: u32,
    body: ResponseBody,
}

/// Encodes one response. A frame over [`MAX_RESPONSE_SIZE`] is refused before
/// anything is written, since no peer would decode it.
pub fn encode_response<W: Write>(
    response: &Response,
    writer: &mut W,
) -> Result<(), TransportError> {
    let envelope = Envelope {
        code: response.status.code(),
        body: response.body.clone(),
    };
    let bytes = encode_to_vec(envelope, wire_config())?;
    if bytes.len() > MAX_RESPONSE_SIZE {
        return Err(TransportError::ResponseTooLarge {
            size: bytes.len(),
            limit: MAX_RESPONSE_SIZE,
        });
    }

    writer.write_all(&bytes)?;
    Ok(())
}

/// Decodes one response. Truncated input, an unknown body tag or an unknown status
/// code are reported as errors.
pub fn decode_response<R: Read>(reader: &mut R) -> Result<Response, TransportError> {
    let envelope: Envelope = decode_from_std_read(reader, wire_config())?;
    let status =
        Status::from_code(envelope.code).ok_or(TransportError::UnknownStatus(envelope.code))?;

    Ok(Response {
        status,
        body: envelope.body,
    })
}
