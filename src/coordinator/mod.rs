//! Top-level handle tying the NAL parser, MKV generator, stream buffer and
//! REST/PutMedia layers together with a session lifecycle state machine.
//!
//! Grounded on `KvsApp_open`/`KvsApp_addFrame`/`KvsApp_doWork`/
//! `KvsApp_close` (the `kvsapp.c` sample-app coordinator layer the reference
//! producer ships on top of its core), with the "coroutine-like control
//! flow" of the original's `doWork` reformulated per the redesign note in
//! §9 as an explicit step sequence.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::KvsConfig;
use crate::error::{KvsError, Result};
use crate::iot::{self, IotCredentialRequest};
use crate::mkv::{AudioTrackInfo, TrackType, VideoTrackInfo};
use crate::nalu::{self, NALU_TYPE_IFRAME, NALU_TYPE_PPS, NALU_TYPE_SPS};
use crate::rest::{self, PutMediaSession, PutMediaStartParams, ServiceParameter};
use crate::stream::{ClusterKind, DataFrameIn, StreamBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    CredentialsReady,
    EndpointKnown,
    Connected,
    HeaderEmitted,
    Streaming,
    Closing,
}

/// Variant selector for [`Coordinator::do_work_ex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoWorkOption {
    /// Keep sending until the video track is fully drained.
    SendEndOfFrames,
}

struct ResolvedCredentials {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

/// Per-frame veto/notification hook, run before a frame is written.
/// Returning `false` drops the frame without sending it (it is still
/// removed from the buffer).
pub type OnToBeSent = Box<dyn FnMut(TrackType, u64) -> bool + Send>;
/// Per-frame teardown hook, run when a frame leaves the buffer (sent,
/// evicted, or dropped by `on_to_be_sent`).
pub type OnTerminate = Box<dyn FnMut(TrackType, u64) + Send>;
/// Session-scope hook invoked after every successful PutMedia write.
pub type OnMkvSent = Box<dyn FnMut(&[u8]) + Send>;

#[derive(Default)]
struct Callbacks {
    on_to_be_sent: Option<OnToBeSent>,
    on_terminate: Option<OnTerminate>,
    on_mkv_sent: Option<OnMkvSent>,
}

/// Ties C2-C7 together behind the open/add_frame/do_work/close lifecycle.
/// Not `Sync`; callers serialize `add_frame` and `do_work` themselves (see
/// the concurrency model: one producer thread, one consumer thread, neither
/// function is re-entrant on the same handle).
pub struct Coordinator {
    config: KvsConfig,
    state: SessionState,
    credentials: Option<ResolvedCredentials>,
    put_media_endpoint: Option<String>,
    session: Option<PutMediaSession>,
    stream: Option<StreamBuffer>,
    video_info: Option<VideoTrackInfo>,
    audio_info: Option<AudioTrackInfo>,
    pending_sps: Option<Vec<u8>>,
    pending_pps: Option<Vec<u8>>,
    earliest_timestamp_ms: u64,
    ebml_header_sent: bool,
    callbacks: Callbacks,
}

impl Coordinator {
    pub fn new(config: KvsConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            credentials: None,
            put_media_endpoint: None,
            session: None,
            stream: None,
            video_info: None,
            audio_info: None,
            pending_sps: None,
            pending_pps: None,
            earliest_timestamp_ms: 0,
            ebml_header_sent: false,
            callbacks: Callbacks::default(),
        }
    }

    pub fn set_on_to_be_sent(&mut self, cb: OnToBeSent) {
        self.callbacks.on_to_be_sent = Some(cb);
    }

    pub fn set_on_terminate(&mut self, cb: OnTerminate) {
        self.callbacks.on_terminate = Some(cb);
    }

    pub fn set_on_mkv_sent(&mut self, cb: OnMkvSent) {
        self.callbacks.on_mkv_sent = Some(cb);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Supply track info up front (skips the SPS/PPS auto-detect path).
    pub fn set_track_info(&mut self, video: VideoTrackInfo, audio: Option<AudioTrackInfo>) {
        self.stream = Some(StreamBuffer::new(&video, audio.as_ref()));
        self.video_info = Some(video);
        self.audio_info = audio;
    }

    fn resolve_credentials(&mut self) -> Result<()> {
        if self.config.iot.credential_host.is_some() {
            let iot = &self.config.iot;
            let (host, alias, thing, root_ca, cert, key) = (
                iot.credential_host.as_deref(),
                iot.role_alias.as_deref(),
                iot.thing_name.as_deref(),
                iot.x509_root_ca_path.as_deref(),
                iot.x509_certificate_path.as_deref(),
                iot.x509_private_key_path.as_deref(),
            );
            if let (Some(host), Some(alias), Some(thing), Some(root_ca), Some(cert), Some(key)) =
                (host, alias, thing, root_ca, cert, key)
            {
                let root_ca_pem = std::fs::read(root_ca)?;
                let cert_pem = std::fs::read(cert)?;
                let key_pem = std::fs::read(key)?;
                let token = iot::get_credential(&IotCredentialRequest {
                    credential_host: host,
                    role_alias: alias,
                    thing_name: thing,
                    root_ca_pem: &root_ca_pem,
                    certificate_pem: &cert_pem,
                    private_key_pem: &key_pem,
                    connect_timeout: self.config.net_io.connection_timeout(),
                })?;
                info!("refreshed IoT-exchanged credentials");
                self.credentials = Some(ResolvedCredentials {
                    access_key: token.access_key_id,
                    secret_key: token.secret_access_key,
                    session_token: Some(token.session_token),
                });
                return Ok(());
            }
        }

        let access_key = self
            .config
            .aws_credentials
            .access_key_id
            .clone()
            .ok_or(KvsError::NoCredentials)?;
        let secret_key = self
            .config
            .aws_credentials
            .secret_access_key
            .clone()
            .ok_or(KvsError::NoCredentials)?;
        self.credentials = Some(ResolvedCredentials {
            access_key,
            secret_key,
            session_token: self.config.aws_credentials.session_token.clone(),
        });
        Ok(())
    }

    fn service_parameter<'a>(&'a self, host: &'a str) -> Result<ServiceParameter<'a>> {
        let creds = self.credentials.as_ref().ok_or(KvsError::NoCredentials)?;
        Ok(ServiceParameter {
            host,
            region: &self.config.region,
            access_key: &creds.access_key,
            secret_key: &creds.secret_key,
            session_token: creds.session_token.as_deref(),
            connect_timeout: self.config.net_io.connection_timeout(),
            recv_timeout: self.config.net_io.streaming_recv_timeout(),
            send_timeout: self.config.net_io.streaming_send_timeout(),
        })
    }

    /// Establish credentials, resolve the data endpoint (describing,
    /// creating, and endpoint-lookup as needed), and start the PutMedia
    /// session.
    pub fn open(&mut self) -> Result<()> {
        self.resolve_credentials()?;
        self.state = SessionState::CredentialsReady;

        if self.put_media_endpoint.is_none() {
            let control_host = format!("kinesisvideo.{}.amazonaws.com", self.config.region);
            let service = self.service_parameter(&control_host)?;
            let status = rest::describe_stream(&service, &self.config.stream_name)?;
            if status != 200 {
                debug!(status, "describeStream non-200, attempting createStream");
                rest::create_stream(
                    &service,
                    &self.config.stream_name,
                    self.config.data_retention_in_hours,
                )?;
            }
            let endpoint = rest::get_data_endpoint(&service, &self.config.stream_name)?;
            info!(endpoint = %endpoint, "resolved PutMedia data endpoint");
            self.put_media_endpoint = Some(endpoint);
        }
        self.state = SessionState::EndpointKnown;

        let endpoint = self.put_media_endpoint.clone().unwrap();
        let service = self.service_parameter(&endpoint)?;
        let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let mut session = PutMediaSession::start(&PutMediaStartParams {
            endpoint_host: &endpoint,
            stream_name: &self.config.stream_name,
            region: &self.config.region,
            access_key: service.access_key,
            secret_key: service.secret_key,
            session_token: service.session_token,
            amz_date: &amz_date,
            producer_start_timestamp_ms: 0,
            timecode_type_absolute: true,
            connect_timeout: self.config.net_io.connection_timeout(),
        })?;
        session.set_streaming_timeouts(
            self.config.net_io.streaming_recv_timeout(),
            self.config.net_io.streaming_send_timeout(),
        )?;
        self.session = Some(session);
        self.state = SessionState::Connected;
        self.ebml_header_sent = false;
        Ok(())
    }

    fn capture_track_info_from_video(&mut self, avcc: &[u8]) -> Result<()> {
        if self.video_info.is_some() {
            return Ok(());
        }
        if let Ok(sps) = nalu::find_nalu_in_avcc(avcc, NALU_TYPE_SPS) {
            self.pending_sps = Some(sps.to_vec());
        }
        if let Ok(pps) = nalu::find_nalu_in_avcc(avcc, NALU_TYPE_PPS) {
            self.pending_pps = Some(pps.to_vec());
        }
        if let (Some(sps), Some(pps)) = (&self.pending_sps, &self.pending_pps) {
            let (width, height) = nalu::h264_resolution_from_sps(sps)?;
            let codec_private = crate::mkv::h264_codec_private_from_sps_pps(sps, pps)?;
            let video = VideoTrackInfo {
                track_name: "video".into(),
                codec_name: "V_MPEG4/ISO/AVC".into(),
                width,
                height,
                codec_private,
            };
            info!(width, height, "video track info captured from SPS/PPS");
            self.stream = Some(StreamBuffer::new(&video, self.audio_info.as_ref()));
            self.video_info = Some(video);
        }
        Ok(())
    }

    /// Add one frame (video or audio) to the pending stream buffer.
    pub fn add_frame(&mut self, mut data: Vec<u8>, cap: usize, absolute_timestamp_ms: u64, track: TrackType) -> Result<()> {
        if absolute_timestamp_ms < self.earliest_timestamp_ms && self.ebml_header_sent {
            return Err(KvsError::TimestampRegressed {
                ts: absolute_timestamp_ms,
                earliest: self.earliest_timestamp_ms,
            });
        }

        if track == TrackType::Video && nalu::is_annex_b(&data) {
            let annex_b_len = data.len();
            data.resize(cap.max(annex_b_len + 32), 0);
            let avcc_len = nalu::convert_annex_b_to_avcc_in_place(&mut data, annex_b_len)?;
            data.truncate(avcc_len);
        }

        if track == TrackType::Video {
            self.capture_track_info_from_video(&data)?;
        }

        let stream = self.stream.as_ref().ok_or(KvsError::StreamNotReady)?;

        let is_key_frame = track == TrackType::Video && nalu::find_nalu_in_avcc(&data, NALU_TYPE_IFRAME).is_ok();
        let cluster_kind = if is_key_frame { ClusterKind::Cluster } else { ClusterKind::SimpleBlock };

        if self.config.stream_policy == crate::config::StreamPolicy::RingBuffer {
            while stream.mem_stat_total() > self.config.ring_buffer_mem_limit && !stream.is_empty() {
                if let Some(evicted) = stream.pop() {
                    warn!(track = ?evicted.track, ts = evicted.absolute_timestamp_ms, "ring buffer evicted frame");
                    if let Some(cb) = &mut self.callbacks.on_terminate {
                        cb(evicted.track, evicted.absolute_timestamp_ms);
                    }
                }
            }
        }

        trace!(?track, absolute_timestamp_ms, is_key_frame, "add_frame");
        stream.add_frame(DataFrameIn {
            cluster_kind,
            track,
            is_key_frame,
            absolute_timestamp_ms,
            payload: data,
        })
    }

    /// One `do_work` pass: emit the EBML header once, drain ACKs, send at
    /// most one frame. Returns `true` if a frame (or the header) was sent.
    pub fn do_work(&mut self) -> Result<bool> {
        let stream = match &self.stream {
            Some(s) => s,
            None => return Ok(false),
        };
        let session = self.session.as_mut().ok_or(KvsError::NotOpen)?;
        let mut did_work = false;

        if !self.ebml_header_sent {
            while let Some(front) = stream.peek() {
                if front.cluster_kind == ClusterKind::Cluster {
                    break;
                }
                stream.pop();
                warn!(track = ?front.track, ts = front.absolute_timestamp_ms, "dropped frame preceding first cluster head");
                if let Some(cb) = &mut self.callbacks.on_terminate {
                    cb(front.track, front.absolute_timestamp_ms);
                }
            }
            if stream.peek().is_some() {
                session.update_raw(stream.mkv_ebml_segment_header())?;
                if let Some(cb) = &mut self.callbacks.on_mkv_sent {
                    cb(stream.mkv_ebml_segment_header());
                }
                self.ebml_header_sent = true;
                self.state = SessionState::HeaderEmitted;
                did_work = true;
            }
        }

        session.do_work()?;
        while let Some(ack) = session.read_fragment_ack() {
            debug!(?ack.event_type, ack.fragment_timecode, ack.error_id, "fragment ack");
        }

        if self.ebml_header_sent {
            if let Some(front) = stream.peek() {
                let ready = front.track == TrackType::Video
                    && (!stream.has_audio_track() || stream.avail_on_track(TrackType::Audio) || front.cluster_kind == ClusterKind::Cluster);
                if ready {
                    let veto = self
                        .callbacks
                        .on_to_be_sent
                        .as_mut()
                        .map(|cb| !cb(front.track, front.absolute_timestamp_ms))
                        .unwrap_or(false);
                    if let Some(frame) = stream.pop() {
                        if !veto {
                            session.update(&frame.mkv_header, &frame.payload)?;
                            if let Some(cb) = &mut self.callbacks.on_mkv_sent {
                                cb(&frame.mkv_header);
                            }
                            self.earliest_timestamp_ms = frame.absolute_timestamp_ms;
                            self.state = SessionState::Streaming;
                            did_work = true;
                        }
                        if let Some(cb) = &mut self.callbacks.on_terminate {
                            cb(frame.track, frame.absolute_timestamp_ms);
                        }
                    }
                }
            }
        }

        if !did_work {
            thread::sleep(Duration::from_millis(50));
        }
        Ok(did_work)
    }

    /// Variant of `do_work` that loops the send step until nothing remains
    /// on the video track, used during graceful `close`.
    pub fn do_work_ex(&mut self, option: DoWorkOption) -> Result<()> {
        match option {
            DoWorkOption::SendEndOfFrames => {}
        }
        while self
            .stream
            .as_ref()
            .map(|s| s.avail_on_track(TrackType::Video))
            .unwrap_or(false)
        {
            self.do_work()?;
        }
        Ok(())
    }

    /// Tear down the PutMedia session. The next `open` re-emits the EBML
    /// header as a fresh session.
    pub fn close(&mut self) {
        self.state = SessionState::Closing;
        if self.session.is_some() {
            if let Err(err) = self.do_work_ex(DoWorkOption::SendEndOfFrames) {
                warn!(%err, "error draining video track during close");
            }
        }
        self.session = None;
        self.ebml_header_sent = false;
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_coordinator_starts_idle() {
        let coord = Coordinator::new(KvsConfig::default());
        assert_eq!(coord.state(), SessionState::Idle);
    }

    #[test]
    fn add_frame_before_track_info_is_not_ready() {
        let mut coord = Coordinator::new(KvsConfig::default());
        let err = coord
            .add_frame(vec![0u8; 8], 64, 0, TrackType::Audio)
            .unwrap_err();
        assert!(matches!(err, KvsError::StreamNotReady));
    }

    #[test]
    fn explicit_track_info_unblocks_add_frame() {
        let mut coord = Coordinator::new(KvsConfig::default());
        coord.set_track_info(
            VideoTrackInfo {
                track_name: "video".into(),
                codec_name: "V_MPEG4/ISO/AVC".into(),
                width: 640,
                height: 480,
                codec_private: vec![0x01, 0x42, 0x80, 0x1e, 0xFF],
            },
            None,
        );
        let mut frame = Vec::new();
        frame.extend_from_slice(&2u32.to_be_bytes());
        frame.extend_from_slice(&[0x65, 0xAA]);
        coord.add_frame(frame, 64, 0, TrackType::Video).unwrap();
    }
}
