//! The long-lived `PutMedia` chunked-transfer session.
//!
//! Grounded on `Kvs_putMediaStart`/`Kvs_putMediaUpdate{,Raw}`/
//! `Kvs_putMediaDoWork`/`Kvs_putMediaReadFragmentAck` in
//! `src/source/restful/kvs/restapi_kvs.c`: the chunk framing, the
//! non-blocking drain loop, and the fragment-ACK JSON shape are all ported
//! as-is; `parson`'s streaming JSON object access is replaced with
//! `serde_json`.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{KvsError, Result};
use crate::rest::http::{try_parse_response, RequestHeaders};
use crate::rest::transport::TlsTransport;
use crate::sigv4::SigV4Request;

const DEFAULT_RECV_BUFSIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentAckEventType {
    Buffering,
    Received,
    Persisted,
    Error,
    Idle,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentAck {
    pub event_type: FragmentAckEventType,
    pub fragment_timecode: u64,
    pub error_id: u32,
}

#[derive(Deserialize)]
struct RawFragmentAck {
    #[serde(rename = "EventType")]
    event_type: String,
    #[serde(rename = "FragmentTimecode", default)]
    fragment_timecode: u64,
    #[serde(rename = "ErrorId", default)]
    error_id: u32,
}

fn event_type_from_str(s: &str) -> FragmentAckEventType {
    match s {
        "BUFFERING" => FragmentAckEventType::Buffering,
        "RECEIVED" => FragmentAckEventType::Received,
        "PERSISTED" => FragmentAckEventType::Persisted,
        "ERROR" => FragmentAckEventType::Error,
        "IDLE" => FragmentAckEventType::Idle,
        _ => FragmentAckEventType::Unknown,
    }
}

fn parse_fragment_msg(json: &str) -> Result<FragmentAck> {
    let raw: RawFragmentAck = serde_json::from_str(json)?;
    Ok(FragmentAck {
        event_type: event_type_from_str(&raw.event_type),
        fragment_timecode: raw.fragment_timecode,
        error_id: raw.error_id,
    })
}

/// One ACK record is itself a chunk: `<hex-len>\r\n<json>\r\n`. Returns the
/// parsed ACK and the number of bytes the whole record consumed, or `None`
/// if `buf` doesn't yet hold a complete record.
fn parse_one_fragment_ack(buf: &[u8]) -> Result<Option<(FragmentAck, usize)>> {
    let crlf_pos = match buf.windows(2).position(|w| w == b"\r\n") {
        Some(p) => p,
        None => return Ok(None),
    };
    let len_str = std::str::from_utf8(&buf[..crlf_pos])
        .map_err(|_| KvsError::MalformedHttp("non-UTF8 chunk length".into()))?;
    let msg_len = match usize::from_str_radix(len_str.trim(), 16) {
        Ok(n) => n,
        Err(_) => return Err(KvsError::MalformedHttp("bad chunk length".into())),
    };
    let msg_start = crlf_pos + 2;
    let msg_end = msg_start + msg_len;
    if buf.len() < msg_end + 2 {
        return Ok(None);
    }
    let json = std::str::from_utf8(&buf[msg_start..msg_end])
        .map_err(|_| KvsError::MalformedHttp("non-UTF8 fragment ack".into()))?;
    let ack = parse_fragment_msg(json)?;
    Ok(Some((ack, msg_end + 2)))
}

pub struct PutMediaSession {
    transport: TlsTransport,
    pending_acks: VecDeque<FragmentAck>,
    recv_scratch: Vec<u8>,
}

pub struct PutMediaStartParams<'a> {
    pub endpoint_host: &'a str,
    pub stream_name: &'a str,
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub session_token: Option<&'a str>,
    pub amz_date: &'a str,
    pub producer_start_timestamp_ms: u64,
    pub timecode_type_absolute: bool,
    pub connect_timeout: Duration,
}

impl PutMediaSession {
    /// `Kvs_putMediaStart`: sign and send the `POST /putMedia` request,
    /// wait for `100 Continue` then `200 OK`, and hold the socket open.
    pub fn start(params: &PutMediaStartParams) -> Result<Self> {
        let mut transport = TlsTransport::connect(params.endpoint_host, 443, params.connect_timeout)?;

        let timecode_type = if params.timecode_type_absolute { "ABSOLUTE" } else { "RELATIVE" };
        let producer_start = format!(
            "{}.{:03}",
            params.producer_start_timestamp_ms / 1000,
            params.producer_start_timestamp_ms % 1000
        );

        let mut headers = RequestHeaders::new();
        headers.push("host", params.endpoint_host);
        headers.push("accept", "*/*");
        headers.push("connection", "keep-alive");
        headers.push("content-type", "application/json");
        headers.push("transfer-encoding", "chunked");
        headers.push("user-agent", crate::USER_AGENT);
        headers.push("x-amz-date", params.amz_date);
        if let Some(token) = params.session_token {
            headers.push("x-amz-security-token", token);
        }
        headers.push("x-amzn-fragment-acknowledgment-required", "1");
        headers.push("x-amzn-fragment-timecode-type", timecode_type);
        headers.push("x-amzn-producer-start-timestamp", &producer_start);
        headers.push("x-amzn-stream-name", params.stream_name);
        headers.push("expect", "100-continue");

        let mut sig = SigV4Request::new("POST", "/putMedia", "");
        sig.add_canonical_header("connection", "keep-alive")?;
        sig.add_canonical_header("host", params.endpoint_host)?;
        sig.add_canonical_header("transfer-encoding", "chunked")?;
        sig.add_canonical_header("user-agent", crate::USER_AGENT)?;
        sig.add_canonical_header("x-amz-date", params.amz_date)?;
        if let Some(token) = params.session_token {
            sig.add_canonical_header("x-amz-security-token", token)?;
        }
        sig.add_canonical_header("x-amzn-fragment-acknowledgment-required", "1")?;
        sig.add_canonical_header("x-amzn-fragment-timecode-type", timecode_type)?;
        sig.add_canonical_header("x-amzn-producer-start-timestamp", &producer_start)?;
        sig.add_canonical_header("x-amzn-stream-name", params.stream_name)?;

        let auth = sig.sign(
            b"",
            params.access_key,
            params.secret_key,
            params.region,
            "kinesisvideo",
            params.amz_date,
        )?;
        headers.push("authorization", &auth);

        let request = crate::rest::http::build_request("POST", "/putMedia", &headers, b"");
        transport.send_all(&request)?;

        let mut recv_buf = vec![0u8; DEFAULT_RECV_BUFSIZE];
        let mut total = 0usize;
        let status = loop {
            let n = transport.recv(&mut recv_buf[total..])?;
            if n == 0 {
                return Err(KvsError::MalformedHttp("connection closed before status line".into()));
            }
            total += n;
            if total == recv_buf.len() {
                recv_buf.resize(recv_buf.len() * 2, 0);
            }
            if let Some((resp, _consumed)) = try_parse_response(&recv_buf[..total])? {
                if resp.status_code == 100 {
                    total = 0;
                    continue;
                }
                break resp.status_code;
            }
        };

        if status != 200 {
            return Err(KvsError::RestfulError(status));
        }

        Ok(Self {
            transport,
            pending_acks: VecDeque::new(),
            recv_scratch: Vec::new(),
        })
    }

    pub fn set_streaming_timeouts(&mut self, recv: Duration, send: Duration) -> Result<()> {
        self.transport.set_recv_timeout(recv)?;
        self.transport.set_send_timeout(send)?;
        Ok(())
    }

    /// `Kvs_putMediaUpdate`: one chunk holding the frame's MKV header
    /// immediately followed by its payload.
    pub fn update(&mut self, mkv_header: &[u8], payload: &[u8]) -> Result<()> {
        let total_len = mkv_header.len() + payload.len();
        self.write_chunk_parts(&[mkv_header, payload], total_len)
    }

    /// `Kvs_putMediaUpdateRaw`: one chunk holding a single pre-built buffer
    /// (used for the initial EBML+Segment+Info+Tracks header).
    pub fn update_raw(&mut self, buf: &[u8]) -> Result<()> {
        self.write_chunk_parts(&[buf], buf.len())
    }

    fn write_chunk_parts(&mut self, parts: &[&[u8]], total_len: usize) -> Result<()> {
        if total_len == 0 {
            return Err(KvsError::InvalidArgument("empty PutMedia chunk".into()));
        }
        self.transport.send_all(format!("{total_len:x}\r\n").as_bytes())?;
        for part in parts {
            if !part.is_empty() {
                self.transport.send_all(part)?;
            }
        }
        self.transport.send_all(b"\r\n")?;
        Ok(())
    }

    /// `Kvs_putMediaDoWork`: drain whatever is available without blocking,
    /// parse complete fragment-ACK records out of it, and queue them. If any
    /// queued ACK is an `ERROR` event, returns `PutMediaError(id)` after
    /// queuing every ACK up to and including it (mirrors the C loop, which
    /// breaks on the first error but has already pushed it).
    pub fn do_work(&mut self) -> Result<()> {
        if !self.transport.is_data_available() {
            return Ok(());
        }

        let mut buf = vec![0u8; DEFAULT_RECV_BUFSIZE];
        let mut total = 0usize;
        loop {
            if total == buf.len() {
                buf.resize(buf.len() * 2, 0);
            }
            match self.transport.recv(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(KvsError::RecvTimeout) => break,
                Err(e) => return Err(e),
            }
            if !self.transport.is_data_available() {
                break;
            }
        }

        self.recv_scratch.extend_from_slice(&buf[..total]);

        let mut error_id = None;
        loop {
            match parse_one_fragment_ack(&self.recv_scratch)? {
                Some((ack, consumed)) => {
                    self.recv_scratch.drain(..consumed);
                    if ack.event_type == FragmentAckEventType::Error {
                        error_id = Some(ack.error_id);
                    }
                    self.pending_acks.push_back(ack);
                    if error_id.is_some() {
                        break;
                    }
                }
                None => break,
            }
        }

        if let Some(id) = error_id {
            return Err(KvsError::PutMediaError(id));
        }
        Ok(())
    }

    /// `Kvs_putMediaReadFragmentAck`: pop one queued ACK, oldest first.
    pub fn read_fragment_ack(&mut self) -> Option<FragmentAck> {
        self.pending_acks.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s7_fragment_ack_parse() {
        let raw = b"2e\r\n{\"EventType\":\"PERSISTED\",\"FragmentTimecode\":1000}\r\n";
        let (ack, consumed) = parse_one_fragment_ack(raw).unwrap().unwrap();
        assert_eq!(consumed, raw.len());
        assert_eq!(ack.event_type, FragmentAckEventType::Persisted);
        assert_eq!(ack.fragment_timecode, 1000);
        assert_eq!(ack.error_id, 0);
    }

    #[test]
    fn parses_error_ack_with_error_id() {
        let raw = b"3a\r\n{\"EventType\":\"ERROR\",\"FragmentTimecode\":5,\"ErrorId\":4004}\r\n";
        let (ack, _) = parse_one_fragment_ack(raw).unwrap().unwrap();
        assert_eq!(ack.event_type, FragmentAckEventType::Error);
        assert_eq!(ack.error_id, 4004);
    }

    #[test]
    fn incomplete_record_returns_none() {
        let raw = b"2e\r\n{\"EventType\":\"PERSIST";
        assert!(parse_one_fragment_ack(raw).unwrap().is_none());
    }

    #[test]
    fn unknown_event_type_maps_to_unknown_variant() {
        let raw = b"17\r\n{\"EventType\":\"WAT\"}\r\n";
        let (ack, _) = parse_one_fragment_ack(raw).unwrap().unwrap();
        assert_eq!(ack.event_type, FragmentAckEventType::Unknown);
    }
}
