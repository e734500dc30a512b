//! Layered runtime configuration.
//!
//! Field names are grounded on `kvs/kvsapp_options.h` of the reference
//! producer (`OPTION_AWS_ACCESS_KEY_ID`, `OPTION_IOT_CREDENTIAL_HOST`,
//! `OPTION_STREAM_POLICY_RING_BUFFER_MEM_LIMIT`, `OPTION_NETIO_*`, etc);
//! this port exposes them as a `serde`-derived struct instead of an options
//! string table, and layers it the way the pack's embedded-device examples
//! layer theirs: built-in defaults, then an optional TOML file, then
//! `KVS_`-prefixed environment variables, then explicit programmatic
//! overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KvsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPolicy {
    None,
    RingBuffer,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        StreamPolicy::RingBuffer
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsCredentialsConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IotCredentialConfig {
    pub credential_host: Option<String>,
    pub role_alias: Option<String>,
    pub thing_name: Option<String>,
    pub x509_root_ca_path: Option<String>,
    pub x509_certificate_path: Option<String>,
    pub x509_private_key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetIoConfig {
    pub connection_timeout_ms: u64,
    pub streaming_recv_timeout_ms: u64,
    pub streaming_send_timeout_ms: u64,
}

impl Default for NetIoConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 10_000,
            streaming_recv_timeout_ms: 1_000,
            streaming_send_timeout_ms: 1_000,
        }
    }
}

impl NetIoConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn streaming_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.streaming_recv_timeout_ms)
    }

    pub fn streaming_send_timeout(&self) -> Duration {
        Duration::from_millis(self.streaming_send_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KvsConfig {
    pub region: String,
    pub stream_name: String,
    pub data_retention_in_hours: u32,
    pub aws_credentials: AwsCredentialsConfig,
    pub iot: IotCredentialConfig,
    pub stream_policy: StreamPolicy,
    pub ring_buffer_mem_limit: usize,
    pub net_io: NetIoConfig,
}

impl Default for KvsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
            stream_name: String::new(),
            data_retention_in_hours: 2,
            aws_credentials: AwsCredentialsConfig::default(),
            iot: IotCredentialConfig::default(),
            stream_policy: StreamPolicy::default(),
            ring_buffer_mem_limit: 1024 * 1024,
            net_io: NetIoConfig::default(),
        }
    }
}

impl KvsConfig {
    /// Load defaults, then overlay a TOML file if present, then overlay
    /// `KVS_`-prefixed environment variables.
    pub fn load(toml_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            let text = std::fs::read_to_string(path).map_err(KvsError::Io)?;
            config = toml::from_str(&text)
                .map_err(|e| KvsError::Config(format!("invalid config file {path:?}: {e}")))?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KVS_REGION") {
            self.region = v;
        }
        if let Ok(v) = std::env::var("KVS_STREAM_NAME") {
            self.stream_name = v;
        }
        if let Ok(v) = std::env::var("KVS_DATA_RETENTION_IN_HOURS") {
            if let Ok(hours) = v.parse() {
                self.data_retention_in_hours = hours;
            }
        }
        if let Ok(v) = std::env::var("KVS_AWS_ACCESS_KEY_ID") {
            self.aws_credentials.access_key_id = Some(v);
        }
        if let Ok(v) = std::env::var("KVS_AWS_SECRET_ACCESS_KEY") {
            self.aws_credentials.secret_access_key = Some(v);
        }
        if let Ok(v) = std::env::var("KVS_AWS_SESSION_TOKEN") {
            self.aws_credentials.session_token = Some(v);
        }
        if let Ok(v) = std::env::var("KVS_IOT_CREDENTIAL_HOST") {
            self.iot.credential_host = Some(v);
        }
        if let Ok(v) = std::env::var("KVS_IOT_ROLE_ALIAS") {
            self.iot.role_alias = Some(v);
        }
        if let Ok(v) = std::env::var("KVS_IOT_THING_NAME") {
            self.iot.thing_name = Some(v);
        }
    }

    /// Explicit override, mirroring the reference producer's
    /// string-keyed `KvsApp_setoption` surface but type-checked.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "region" => self.region = value.to_string(),
            "stream_name" => self.stream_name = value.to_string(),
            "aws_access_key_id" => self.aws_credentials.access_key_id = Some(value.to_string()),
            "aws_secret_access_key" => {
                self.aws_credentials.secret_access_key = Some(value.to_string())
            }
            "aws_session_token" => self.aws_credentials.session_token = Some(value.to_string()),
            "iot_credential_host" => self.iot.credential_host = Some(value.to_string()),
            "iot_role_alias" => self.iot.role_alias = Some(value.to_string()),
            "iot_thing_name" => self.iot.thing_name = Some(value.to_string()),
            other => return Err(KvsError::Config(format!("unknown config option {other:?}"))),
        }
        Ok(())
    }

    /// True once the config carries either static AWS keys or a full IoT
    /// X.509 credential-exchange triple.
    pub fn has_credential_source(&self) -> bool {
        let has_static = self.aws_credentials.access_key_id.is_some()
            && self.aws_credentials.secret_access_key.is_some();
        let has_iot = self.iot.credential_host.is_some()
            && self.iot.role_alias.is_some()
            && self.iot.thing_name.is_some()
            && self.iot.x509_certificate_path.is_some()
            && self.iot.x509_private_key_path.is_some();
        has_static || has_iot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_credential_source() {
        let config = KvsConfig::default();
        assert!(!config.has_credential_source());
        assert_eq!(config.stream_policy, StreamPolicy::RingBuffer);
    }

    #[test]
    fn static_keys_satisfy_credential_source() {
        let mut config = KvsConfig::default();
        config.set_option("aws_access_key_id", "AKIA...").unwrap();
        config.set_option("aws_secret_access_key", "secret").unwrap();
        assert!(config.has_credential_source());
    }

    #[test]
    fn unknown_option_errors() {
        let mut config = KvsConfig::default();
        assert!(config.set_option("not_a_real_option", "x").is_err());
    }

    #[test]
    fn toml_round_trip_via_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvs.toml");
        std::fs::write(
            &path,
            r#"
            region = "eu-west-1"
            stream_name = "my-stream"
            "#,
        )
        .unwrap();
        let config = KvsConfig::load(Some(&path)).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.stream_name, "my-stream");
    }
}
