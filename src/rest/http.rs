//! Minimal HTTP/1.1 request assembly and response parsing.
//!
//! The reference producer drives `llhttp` for response parsing
//! (`src/source/http_helper.c`) and hand-`sprintf`s the request line and
//! headers. No `llhttp`-equivalent crate is part of this codebase's stack,
//! so parsing here is a small hand-rolled status-line/headers/body scan —
//! the producer only ever needs `Content-Length` or a single `100 Continue`
//! interim response, not the full HTTP grammar.

use std::collections::BTreeMap;

use crate::error::{KvsError, Result};

/// Ordered header list: order matters for wire output, not for lookup.
pub struct RequestHeaders {
    pub entries: Vec<(String, String)>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }
}

impl Default for RequestHeaders {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble a full HTTP/1.1 request (request line + headers + CRLFCRLF +
/// body) ready to write to the socket.
pub fn build_request(method: &str, uri: &str, headers: &RequestHeaders, body: &[u8]) -> Vec<u8> {
    let mut out = format!("{method} {uri} HTTP/1.1\r\n").into_bytes();
    for (name, value) in &headers.entries {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

pub struct HttpResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Find the end of the header block (`\r\n\r\n`) in a growing receive
/// buffer, or `None` if it hasn't arrived yet.
fn header_block_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn parse_status_and_headers(buf: &[u8]) -> Result<(u16, BTreeMap<String, String>)> {
    let text = std::str::from_utf8(buf)
        .map_err(|_| KvsError::MalformedHttp("non-UTF8 response head".into()))?;
    let mut lines = text.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| KvsError::MalformedHttp("empty response".into()))?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next();
    let status_code: u16 = parts
        .next()
        .ok_or_else(|| KvsError::MalformedHttp("missing status code".into()))?
        .parse()
        .map_err(|_| KvsError::MalformedHttp("non-numeric status code".into()))?;

    let mut headers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Ok((status_code, headers))
}

/// Attempt to parse one complete HTTP message out of the front of `buf`.
/// Returns `Ok(Some((response, consumed)))` once the full body (per
/// `Content-Length`, or zero for a bodyless `100 Continue`) has arrived,
/// `Ok(None)` if more bytes are needed.
pub fn try_parse_response(buf: &[u8]) -> Result<Option<(HttpResponse, usize)>> {
    let head_end = match header_block_end(buf) {
        Some(end) => end,
        None => return Ok(None),
    };
    let (status_code, headers) = parse_status_and_headers(&buf[..head_end])?;

    if status_code == 100 {
        // Interim response, no body; caller loops to read the real one.
        return Ok(Some((
            HttpResponse {
                status_code,
                headers,
                body: Vec::new(),
            },
            head_end,
        )));
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse().unwrap_or(0))
        .unwrap_or(0);

    if buf.len() < head_end + content_length {
        return Ok(None);
    }

    let body = buf[head_end..head_end + content_length].to_vec();
    Ok(Some((
        HttpResponse {
            status_code,
            headers,
            body,
        },
        head_end + content_length,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_line_and_headers() {
        let mut headers = RequestHeaders::new();
        headers.push("host", "example.com");
        headers.push("content-length", "2");
        let req = build_request("POST", "/describeStream", &headers, b"{}");
        let text = String::from_utf8(req).unwrap();
        assert!(text.starts_with("POST /describeStream HTTP/1.1\r\n"));
        assert!(text.contains("host: example.com\r\n"));
        assert!(text.ends_with("{}"));
    }

    #[test]
    fn parses_response_with_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let (resp, consumed) = try_parse_response(raw).unwrap().unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body, b"hello");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn returns_none_when_body_incomplete() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhel";
        assert!(try_parse_response(raw).unwrap().is_none());
    }

    #[test]
    fn recognizes_100_continue_with_no_body() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\n";
        let (resp, consumed) = try_parse_response(raw).unwrap().unwrap();
        assert_eq!(resp.status_code, 100);
        assert_eq!(consumed, raw.len());
    }
}
