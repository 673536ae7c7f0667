use std::{collections::BTreeMap, fmt};

use thiserror::Error;

use super::{
    headers::{parse_headers, split_headers_and_body, validate_header},
    params::{parse_parameters, validate_parameter},
};

/// Reasons a request frame is rejected. All of them are recoverable: the server
/// answers with a BAD response and keeps the connection open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("didn't find two space separated parameters (method and target) in '{0}'")]
    MalformedStartLine(String),

    #[error("unsupported request method '{0}'")]
    UnknownMethod(String),

    #[error("the request target doesn't exist: '{0}'")]
    UnknownTarget(String),

    #[error("length of parameters should be more than 2, got '{0}'")]
    ParametersTooShort(String),

    #[error("parameter key contains a non-letter character '{0}'")]
    InvalidParameterKey(char),

    #[error("parameter value contains a character that is neither letter nor digit '{0}'")]
    InvalidParameterValue(char),

    #[error("parameter key starts with '='")]
    EmptyParameterKey,

    #[error("parameter value starts with '&'")]
    EmptyParameterValue,

    #[error("couldn't finish a parameter in '{0}'")]
    UnfinishedParameter(String),

    #[error("there are less than 3 characters for a header")]
    HeadersTooShort,

    #[error("incorrect character '{0}' in a header name, allowed 'a-zA-Z-_'")]
    InvalidHeaderName(char),

    #[error("incorrect character '{0}' in a header value, allowed 'a-zA-Z-_'")]
    InvalidHeaderValue(char),

    #[error("incorrect character '{0}' after a header, expected CRLF")]
    InvalidHeaderTerminator(char),

    #[error("reached the end of the header data but couldn't finish the header")]
    UnfinishedHeader,

    #[error("there is a trailing CRLF after the last header")]
    TrailingCrlf,

    #[error("header '{0}' is already present")]
    DuplicateHeader(String),

    #[error("request is larger than {0} bytes")]
    TooLarge(usize),

    #[error("request is not valid UTF-8")]
    InvalidEncoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl TryFrom<&str> for Method {
    type Error = RequestError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            _ => Err(RequestError::UnknownMethod(value.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whitelisted request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Messages,
}

impl Target {
    const ALL: [Target; 1] = [Target::Messages];

    pub fn path(&self) -> &'static str {
        match self {
            Target::Messages => "/messages",
        }
    }
}

impl TryFrom<&str> for Target {
    type Error = RequestError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Target::ALL
            .into_iter()
            .find(|t| t.path() == value)
            .ok_or_else(|| RequestError::UnknownTarget(value.to_string()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A single parsed request.
///
/// Parameters and headers are keyed case-sensitively. An empty map is the same as
/// an absent one, and a body is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    target: Target,
    parameters: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    body: Option<String>,
}

impl Request {
    pub fn new(method: Method, target: Target) -> Self {
        Self {
            method,
            target,
            parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Adds a query parameter. A key that is already present keeps its first value.
    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let (key, value) = (key.into(), value.into());
        validate_parameter(&key, &value)?;
        self.parameters.entry(key).or_insert(value);
        Ok(self)
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let (name, value) = (name.into(), value.into());
        validate_header(&name, &value)?;
        if self.headers.contains_key(&name) {
            return Err(RequestError::DuplicateHeader(name));
        }
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets the body. An empty string clears it.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body = (!body.is_empty()).then_some(body);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn parameters(&self) -> Option<&BTreeMap<String, String>> {
        (!self.parameters.is_empty()).then_some(&self.parameters)
    }

    pub fn headers(&self) -> Option<&BTreeMap<String, String>> {
        (!self.headers.is_empty()).then_some(&self.headers)
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Parses a request from its start line (without the line terminator) and the
    /// characters that followed it on the stream.
    pub fn parse(start_line: &str, rest: &str) -> Result<Self, RequestError> {
        let (method, target, parameters) = parse_start_line(start_line)?;
        let (header_segment, body) = split_headers_and_body(rest);

        let headers = match header_segment {
            Some(segment) => parse_headers(segment)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            method,
            target,
            parameters,
            headers,
            body: body.map(str::to_string),
        })
    }

    /// Parses a complete frame as produced by [`Request::encode`].
    pub fn decode(frame: &str) -> Result<Self, RequestError> {
        let (line, rest) = frame.split_once('\n').unwrap_or((frame, ""));
        Self::parse(line.strip_suffix('\r').unwrap_or(line), rest)
    }

    pub fn encode(&self) -> String {
        let mut out = format!("{} {}", self.method, self.target);

        if !self.parameters.is_empty() {
            let query = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            out.push('?');
            out.push_str(&query);
        }
        out.push_str("\r\n");

        for (name, value) in &self.headers {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");

        if let Some(body) = &self.body {
            out.push_str(body);
        }
        out
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} params={:?} headers={:?} body={:?}",
            self.method, self.target, self.parameters, self.headers, self.body
        )
    }
}

/// Splits a start line into method and target on the first space, then splits the
/// query string off the target.
pub fn parse_start_line(
    line: &str,
) -> Result<(Method, Target, BTreeMap<String, String>), RequestError> {
    let (method, target) = line
        .split_once(' ')
        .ok_or_else(|| RequestError::MalformedStartLine(line.to_string()))?;

    let method = Method::try_from(method)?;
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };
    let target = Target::try_from(path)?;
    let parameters = match query {
        Some(query) => parse_parameters(query)?,
        None => BTreeMap::new(),
    };

    Ok((method, target, parameters))
}
