use thiserror::Error;

/// Library-wide error type for the KVS producer core.
///
/// Leaf components return their kind verbatim; the coordinator never remaps
/// an error, so callers always observe the precise cause.
#[derive(Error, Debug)]
pub enum KvsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("not an Annex-B buffer")]
    NoStartCode,

    #[error("adjacent zero bytes (00 00 00 00) inside a NAL unit body")]
    AdjacentZeroBytesInvalid,

    #[error("AVCC length prefix runs past the end of the buffer")]
    AvccCorrupt,

    #[error("buffer too small to hold the converted AVCC frame (need {needed}, have {have})")]
    BufferTooSmall { needed: usize, have: usize },

    #[error("more NAL units in frame than the {0}-slot scratch table")]
    TooManyNalus(usize),

    #[error("NAL unit type {0} not found in frame")]
    NaluNotFound(u8),

    #[error("SPS does not start with nal_unit_type 7")]
    InvalidSps,

    #[error("unknown MKV cluster type")]
    UnknownClusterType,

    #[error("malformed MKV element header")]
    MalformedElementHeader,

    #[error("audio sampling frequency {0} Hz is not in the AAC index table")]
    InvalidAudioFrequency(u32),

    #[error("PCM sampling rate {0} Hz is outside the supported range")]
    InvalidPcmSamplingRate(u32),

    #[error("PCM channel count {0} must be 1 or 2")]
    InvalidPcmChannels(u16),

    #[error("stream buffer is not ready: no video track info")]
    StreamNotReady,

    #[error("frame timestamp {ts} regressed behind earliest held timestamp {earliest}")]
    TimestampRegressed { ts: u64, earliest: u64 },

    #[error("add_frame called before open()")]
    NotOpen,

    #[error("unknown do_work variant")]
    UnknownDoWorkVariant,

    #[error("SigV4 canonical header assembly failed: {0}")]
    SigV4Canonicalization(String),

    #[error("SigV4 HMAC computation failed")]
    SigV4Hmac,

    #[error("no AWS credentials available (set static keys or IoT X.509 options)")]
    NoCredentials,

    #[error("TLS connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("send timed out")]
    SendTimeout,

    #[error("recv timed out")]
    RecvTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed HTTP response: {0}")]
    MalformedHttp(String),

    #[error("REST call failed with HTTP status {0}")]
    RestfulError(u16),

    #[error("PutMedia fragment ACK reported error {0}")]
    PutMediaError(u32),

    #[error("malformed fragment ACK JSON: {0}")]
    InvalidFragmentAck(#[from] serde_json::Error),

    #[error("user callback returned non-zero status {0}")]
    CallbackError(i32),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KvsError>;
