//! Header block scanning and parsing.
//!
//! The header block and the body are separated by the first `CRLFCRLF` of the
//! stream that follows the start line. The start line's own `CRLF` takes part in
//! the match, which is how a request without headers (`START CRLF CRLF body`) is
//! recognised. The scan is a single pass over the bytes through the four states of
//! [`Boundary`].
use std::collections::BTreeMap;

use super::RequestError;

/// Terminator of the start line, re-inserted in front of the remaining stream.
const START_LINE_END: &[u8] = b"\r\n";
const CRLF_CRLF_LEN: usize = 4;

/// Progress through a `CR LF CR LF` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Scan,
    Cr1,
    Lf1,
    Cr2,
}

impl Boundary {
    /// Advances on `byte`; `None` means the final `LF` was just consumed.
    fn next(self, byte: u8) -> Option<Self> {
        match (self, byte) {
            (Boundary::Cr2, b'\n') => None,
            (Boundary::Lf1, b'\r') => Some(Boundary::Cr2),
            (Boundary::Cr1, b'\n') => Some(Boundary::Lf1),
            (_, b'\r') => Some(Boundary::Cr1),
            _ => Some(Boundary::Scan),
        }
    }
}

/// Index one past the first `CRLFCRLF` in `START_LINE_END + rest`.
fn find_boundary(rest: &[u8]) -> Option<usize> {
    let mut state = Boundary::Scan;
    for (i, &byte) in START_LINE_END.iter().chain(rest).enumerate() {
        match state.next(byte) {
            Some(next) => state = next,
            None => return Some(i + 1),
        }
    }
    None
}

/// Splits what follows the start line into `(header segment, body)`.
///
/// Both halves are `None` rather than empty. Without a `CRLFCRLF`, any remaining
/// characters are treated as a header segment with no body.
pub fn split_headers_and_body(rest: &str) -> (Option<&str>, Option<&str>) {
    let Some(end) = find_boundary(rest.as_bytes()) else {
        return ((!rest.is_empty()).then_some(rest), None);
    };

    let start = end - CRLF_CRLF_LEN;
    // The boundary either reuses the start line's CRLF or lies past at least one
    // header character; it can never straddle the prefix.
    assert!(
        start == 0 || start > START_LINE_END.len(),
        "header boundary at {start} overlaps the start line terminator"
    );

    let headers = start
        .checked_sub(START_LINE_END.len())
        .map(|len| &rest[..len]);
    let body = &rest[end - START_LINE_END.len()..];

    (headers, (!body.is_empty()).then_some(body))
}

/// Parses a header segment: `name:value` pairs separated by `CRLF`, the last one
/// ending at the end of the segment.
pub fn parse_headers(segment: &str) -> Result<BTreeMap<String, String>, RequestError> {
    let data = segment.as_bytes();
    let mut headers = BTreeMap::new();
    let mut i = 0;

    loop {
        if data.len() - i < 3 {
            return Err(RequestError::HeadersTooShort);
        }

        i = parse_header(data, i, &mut headers)?;
        if i == data.len() {
            return Ok(headers);
        }

        debug_assert_eq!(data[i], b'\r');
        match data.get(i + 1) {
            Some(b'\n') => {}
            Some(&other) => return Err(RequestError::InvalidHeaderTerminator(char::from(other))),
            None => return Err(RequestError::UnfinishedHeader),
        }

        i += 2;
        if i == data.len() {
            return Err(RequestError::TrailingCrlf);
        }
    }
}

/// Parses one header starting at `start` and returns the index of the `CR` that
/// ends it, or `data.len()`.
fn parse_header(
    data: &[u8],
    start: usize,
    headers: &mut BTreeMap<String, String>,
) -> Result<usize, RequestError> {
    let name_end = scan_token(data, start, b':', RequestError::InvalidHeaderName)?
        .ok_or(RequestError::UnfinishedHeader)?;

    let value_start = name_end + 1;
    if value_start == data.len() {
        return Err(RequestError::UnfinishedHeader);
    }
    let value_end = scan_token(data, value_start, b'\r', RequestError::InvalidHeaderValue)?
        .unwrap_or(data.len());

    // Token bytes are ASCII, so both ranges fall on character boundaries.
    let name = String::from_utf8_lossy(&data[start..name_end]).into_owned();
    let value = String::from_utf8_lossy(&data[value_start..value_end]).into_owned();

    if headers.contains_key(&name) {
        return Err(RequestError::DuplicateHeader(name));
    }
    headers.insert(name, value);

    Ok(value_end)
}

/// Scans a `[A-Za-z][A-Za-z_-]*` token starting at `start` until `stop`. Returns the
/// index of `stop`, or `None` when the data ran out first.
fn scan_token(
    data: &[u8],
    start: usize,
    stop: u8,
    invalid: fn(char) -> RequestError,
) -> Result<Option<usize>, RequestError> {
    for (i, &byte) in data.iter().enumerate().skip(start) {
        if i == start {
            if !byte.is_ascii_alphabetic() {
                return Err(invalid(char::from(byte)));
            }
            continue;
        }
        if byte == stop {
            return Ok(Some(i));
        }
        if !is_token_byte(byte) {
            return Err(invalid(char::from(byte)));
        }
    }
    Ok(None)
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'-' || byte == b'_'
}

/// Checks a header name and value against the header grammar.
pub(crate) fn validate_header(name: &str, value: &str) -> Result<(), RequestError> {
    validate_token(name, RequestError::InvalidHeaderName)?;
    validate_token(value, RequestError::InvalidHeaderValue)
}

fn validate_token(token: &str, invalid: fn(char) -> RequestError) -> Result<(), RequestError> {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        Some(c) => return Err(invalid(c)),
        None => return Err(RequestError::UnfinishedHeader),
    }
    match chars.find(|&c| !c.is_ascii() || !is_token_byte(c as u8)) {
        Some(c) => Err(invalid(c)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_on_start_line_terminator() {
        assert_eq!(split_headers_and_body("\r\nbody"), (None, Some("body")));
        assert_eq!(split_headers_and_body("\r\n"), (None, None));
    }

    #[test]
    fn boundary_after_headers() {
        assert_eq!(
            split_headers_and_body("A:b\r\nC:d\r\n\r\nthe body"),
            (Some("A:b\r\nC:d"), Some("the body"))
        );
        assert_eq!(split_headers_and_body("A:b\r\n\r\n"), (Some("A:b"), None));
    }

    #[test]
    fn only_first_boundary_counts() {
        assert_eq!(
            split_headers_and_body("A:b\r\n\r\nx\r\n\r\ny"),
            (Some("A:b"), Some("x\r\n\r\ny"))
        );
    }

    #[test]
    fn no_boundary_means_headers_only_or_nothing() {
        assert_eq!(split_headers_and_body("A:b"), (Some("A:b"), None));
        assert_eq!(split_headers_and_body(""), (None, None));
    }

    #[test]
    fn boundary_after_stray_carriage_return() {
        assert_eq!(
            split_headers_and_body("A:b\r\r\n\r\nbody"),
            (Some("A:b\r"), Some("body"))
        );
    }

    #[test]
    fn parses_multiple_headers() {
        let headers = parse_headers("Host:local\r\nX-Trace_Id:abc").unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["Host"], "local");
        assert_eq!(headers["X-Trace_Id"], "abc");
    }

    #[test]
    fn header_names_are_case_sensitive() {
        let headers = parse_headers("Host:a\r\nhost:b").unwrap();
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn rejects_digit_in_value() {
        assert_eq!(
            parse_headers("Count:a1"),
            Err(RequestError::InvalidHeaderValue('1'))
        );
    }

    #[test]
    fn rejects_duplicate_header() {
        assert_eq!(
            parse_headers("Host:a\r\nHost:b"),
            Err(RequestError::DuplicateHeader("Host".to_string()))
        );
    }

    #[test]
    fn rejects_short_segment() {
        assert_eq!(parse_headers("A:"), Err(RequestError::HeadersTooShort));
        assert_eq!(
            parse_headers("Host:a\r\nB:"),
            Err(RequestError::HeadersTooShort)
        );
    }

    #[test]
    fn rejects_trailing_crlf() {
        assert_eq!(parse_headers("Host:a\r\n"), Err(RequestError::TrailingCrlf));

        let (segment, body) = split_headers_and_body("Host:a\r\n");
        assert_eq!(body, None);
        assert_eq!(
            parse_headers(segment.unwrap()),
            Err(RequestError::TrailingCrlf)
        );
    }

    #[test]
    fn rejects_bad_terminator_and_unfinished_header() {
        assert_eq!(
            parse_headers("Host:a\rXY:z"),
            Err(RequestError::InvalidHeaderTerminator('X'))
        );
        assert_eq!(parse_headers("Host"), Err(RequestError::UnfinishedHeader));
        assert_eq!(parse_headers("Host:"), Err(RequestError::UnfinishedHeader));
    }

    #[test]
    fn rejects_bad_name_characters() {
        assert_eq!(
            parse_headers("1ost:a"),
            Err(RequestError::InvalidHeaderName('1'))
        );
        assert_eq!(
            parse_headers("Ho st:a"),
            Err(RequestError::InvalidHeaderName(' '))
        );
        assert_eq!(
            parse_headers("Host:-a"),
            Err(RequestError::InvalidHeaderValue('-'))
        );
    }
}
