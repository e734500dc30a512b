//! REST client: `DescribeStream`, `CreateStream`, `GetDataEndpoint`, and the
//! `PutMedia` session (split out into [`putmedia`]).
//!
//! Grounded on `Kvs_describeStream`/`Kvs_createStream`/`Kvs_getDataEndpoint`
//! in `src/source/restful/kvs/restapi_kvs.c`: same JSON body templates, same
//! fixed header-signing order, same "read until `Content-Length`, then
//! close" transport discipline for these three short-lived calls.

pub mod http;
pub mod putmedia;
pub mod transport;

use std::time::Duration;

use serde::Deserialize;

use crate::error::{KvsError, Result};
use crate::sigv4::SigV4Request;
use http::{build_request, try_parse_response, RequestHeaders};
use transport::TlsTransport;

pub use putmedia::{FragmentAck, FragmentAckEventType, PutMediaSession, PutMediaStartParams};

/// Credentials and endpoint parameters shared by every REST call, mirroring
/// `KvsServiceParameter_t`.
pub struct ServiceParameter<'a> {
    pub host: &'a str,
    pub region: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub session_token: Option<&'a str>,
    pub connect_timeout: Duration,
    pub recv_timeout: Duration,
    pub send_timeout: Duration,
}

fn amz_date_now() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Connect, send a signed `POST <uri>` JSON request with the fixed
/// `host/accept/content-length/content-type/user-agent/x-amz-date
/// [/x-amz-security-token]` header set, and read the full response.
fn execute_json_request(service: &ServiceParameter, uri: &str, body: &str) -> Result<(u16, Vec<u8>)> {
    let amz_date = amz_date_now();
    let content_length = body.len().to_string();

    let mut headers = RequestHeaders::new();
    headers.push("host", service.host);
    headers.push("accept", "*/*");
    headers.push("content-length", &content_length);
    headers.push("content-type", "application/json");
    headers.push("user-agent", crate::USER_AGENT);
    headers.push("x-amz-date", &amz_date);
    if let Some(token) = service.session_token {
        headers.push("x-amz-security-token", token);
    }

    let mut sig = SigV4Request::new("POST", uri, "");
    sig.add_canonical_header("host", service.host)?;
    sig.add_canonical_header("user-agent", crate::USER_AGENT)?;
    sig.add_canonical_header("x-amz-date", &amz_date)?;
    if let Some(token) = service.session_token {
        sig.add_canonical_header("x-amz-security-token", token)?;
    }
    let auth = sig.sign(
        body.as_bytes(),
        service.access_key,
        service.secret_key,
        service.region,
        "kinesisvideo",
        &amz_date,
    )?;
    headers.push("authorization", &auth);

    let mut transport = TlsTransport::connect(service.host, 443, service.connect_timeout)?;
    transport.set_recv_timeout(service.recv_timeout)?;
    transport.set_send_timeout(service.send_timeout)?;

    let request = build_request("POST", uri, &headers, body.as_bytes());
    transport.send_all(&request)?;

    let mut buf = vec![0u8; 1024];
    let mut total = 0usize;
    loop {
        if total == buf.len() {
            buf.resize(buf.len() * 2, 0);
        }
        let n = transport.recv(&mut buf[total..])?;
        if n == 0 {
            return Err(KvsError::MalformedHttp("connection closed mid-response".into()));
        }
        total += n;
        if let Some((resp, _consumed)) = try_parse_response(&buf[..total])? {
            return Ok((resp.status_code, resp.body));
        }
    }
}

/// `Kvs_describeStream`. Returns the HTTP status; a non-200 response
/// (stream does not exist) is the caller's cue to call `create_stream`.
pub fn describe_stream(service: &ServiceParameter, stream_name: &str) -> Result<u16> {
    let body = format!(r#"{{"StreamName": "{stream_name}"}}"#);
    let (status, _body) = execute_json_request(service, "/describeStream", &body)?;
    Ok(status)
}

/// `Kvs_createStream`.
pub fn create_stream(service: &ServiceParameter, stream_name: &str, data_retention_hours: u32) -> Result<u16> {
    let body = format!(r#"{{"StreamName": "{stream_name}","DataRetentionInHours": {data_retention_hours}}}"#);
    let (status, _body) = execute_json_request(service, "/createStream", &body)?;
    Ok(status)
}

#[derive(Deserialize)]
struct DataEndpointResponse {
    #[serde(rename = "DataEndpoint")]
    data_endpoint: String,
}

/// `Kvs_getDataEndpoint`. Strips the leading `https://` the API returns.
pub fn get_data_endpoint(service: &ServiceParameter, stream_name: &str) -> Result<String> {
    let body = format!(r#"{{"StreamName": "{stream_name}","APIName":"PUT_MEDIA"}}"#);
    let (status, resp_body) = execute_json_request(service, "/getDataEndpoint", &body)?;
    if status != 200 {
        return Err(KvsError::RestfulError(status));
    }
    let parsed: DataEndpointResponse = serde_json::from_slice(&resp_body)?;
    Ok(parsed
        .data_endpoint
        .strip_prefix("https://")
        .unwrap_or(&parsed.data_endpoint)
        .to_string())
}
