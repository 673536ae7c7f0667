//! Messages passed between the client actors.
use std::fmt;

use crate::protocol::{Method, Request, RequestError, Response, Target};

/// Ends the client.
pub const QUIT: &str = ":quit";
/// `:fetch [lastId]` reads messages instead of posting one.
pub const FETCH: &str = ":fetch";

/// A block of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMessage {
    pub block: String,
}

/// Lets input capture read the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputResponse;

/// A request for the connector, tagged with the cycle that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    pub cycle: u64,
    pub request: Request,
}

/// Outcome of one round trip. Failures are carried as BAD responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UIMessage {
    pub cycle: u64,
    pub response: Response,
}

/// What the user asked for with an input block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Fetch(Option<String>),
    Post(String),
}

impl Command {
    /// Reads a command out of `block`, `None` when there is nothing but whitespace.
    pub fn parse(block: &str) -> Option<Self> {
        let trimmed = block.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed == QUIT {
            return Some(Command::Quit);
        }
        if let Some(arg) = trimmed.strip_prefix(FETCH) {
            if arg.is_empty() || arg.starts_with(char::is_whitespace) {
                let arg = arg.trim();
                return Some(Command::Fetch((!arg.is_empty()).then(|| arg.to_string())));
            }
        }

        let body = block.trim_end_matches(['\r', '\n']);
        Some(Command::Post(body.to_string()))
    }

    /// Request carrying this command. Not defined for [`Command::Quit`].
    pub fn to_request(&self) -> Result<Request, RequestError> {
        match self {
            Command::Quit => unreachable!("quit never reaches the network"),
            Command::Fetch(None) => Ok(Request::new(Method::Get, Target::Messages)),
            Command::Fetch(Some(last_id)) => {
                Request::new(Method::Get, Target::Messages).with_parameter("lastId", last_id)
            }
            Command::Post(body) => Ok(Request::new(Method::Post, Target::Messages).with_body(body)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Quit => f.write_str(QUIT),
            Command::Fetch(None) => f.write_str(FETCH),
            Command::Fetch(Some(id)) => write!(f, "{FETCH} {id}"),
            Command::Post(body) => write!(f, "post {body:?}"),
        }
    }
}
