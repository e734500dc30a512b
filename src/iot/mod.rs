//! IoT credential exchange: mutual-TLS `GET` against the IoT credentials
//! endpoint, grounded on `Iot_getCredential` in
//! `src/source/iot_credential_provider.c`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{KvsError, Result};
use crate::rest::http::{build_request, try_parse_response, RequestHeaders};
use crate::rest::transport::TlsTransport;

pub struct IotCredentialRequest<'a> {
    pub credential_host: &'a str,
    pub role_alias: &'a str,
    pub thing_name: &'a str,
    pub root_ca_pem: &'a [u8],
    pub certificate_pem: &'a [u8],
    pub private_key_pem: &'a [u8],
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct IotCredentialToken {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

#[derive(Deserialize)]
struct CredentialsEnvelope {
    credentials: CredentialsBody,
}

#[derive(Deserialize)]
struct CredentialsBody {
    #[serde(rename = "accessKeyId")]
    access_key_id: String,
    #[serde(rename = "secretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "sessionToken")]
    session_token: String,
}

/// `Iot_getCredential`: `GET /role-aliases/<alias>/credentials` over a
/// client-certificate-authenticated TLS connection.
pub fn get_credential(req: &IotCredentialRequest) -> Result<IotCredentialToken> {
    let uri = format!("/role-aliases/{}/credentials", req.role_alias);

    let mut headers = RequestHeaders::new();
    headers.push("host", req.credential_host);
    headers.push("accept", "*/*");
    headers.push("x-amzn-iot-thingname", req.thing_name);

    let mut transport = TlsTransport::connect_with_client_cert(
        req.credential_host,
        443,
        req.connect_timeout,
        req.root_ca_pem,
        req.certificate_pem,
        req.private_key_pem,
    )?;

    let request = build_request("GET", &uri, &headers, b"");
    transport.send_all(&request)?;

    let mut buf = vec![0u8; 1024];
    let mut total = 0usize;
    let (status, body) = loop {
        if total == buf.len() {
            buf.resize(buf.len() * 2, 0);
        }
        let n = transport.recv(&mut buf[total..])?;
        if n == 0 {
            return Err(KvsError::MalformedHttp("connection closed mid-response".into()));
        }
        total += n;
        if let Some((resp, _consumed)) = try_parse_response(&buf[..total])? {
            break (resp.status_code, resp.body);
        }
    };

    if status != 200 {
        return Err(KvsError::RestfulError(status));
    }

    let envelope: CredentialsEnvelope = serde_json::from_slice(&body)?;
    Ok(IotCredentialToken {
        access_key_id: envelope.credentials.access_key_id,
        secret_access_key: envelope.credentials.secret_access_key,
        session_token: envelope.credentials.session_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_credentials_envelope() {
        let json = br#"{"credentials":{"accessKeyId":"AKIA","secretAccessKey":"secret","sessionToken":"tok","expiration":"2024-01-01T00:00:00Z"}}"#;
        let envelope: CredentialsEnvelope = serde_json::from_slice(json).unwrap();
        assert_eq!(envelope.credentials.access_key_id, "AKIA");
        assert_eq!(envelope.credentials.session_token, "tok");
    }
}
