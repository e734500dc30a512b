//! In-order, lock-protected buffer of pending MKV frames.
//!
//! Grounded on `src/source/stream/stream.c` of the reference producer: same
//! insertion-order invariant (timestamp-monotone, video-before-audio on
//! ties), same "recompute delta timestamps when a new cluster head is
//! inserted ahead of existing frames" correction, same memory accounting.
//! The reference uses an intrusive doubly-linked list under a raw lock; this
//! port uses a `Vec` under a `parking_lot::Mutex`, since the producer never
//! holds more than a few hundred frames at once and a `Vec` shift is cheap
//! at that scale.

use parking_lot::Mutex;
use rand::RngCore;

use crate::error::{KvsError, Result};
use crate::mkv::{self, AudioTrackInfo, TrackType, VideoTrackInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Cluster,
    SimpleBlock,
}

/// Frame handed to [`StreamBuffer::add_frame`] by the coordinator.
#[derive(Debug, Clone)]
pub struct DataFrameIn {
    pub cluster_kind: ClusterKind,
    pub track: TrackType,
    pub is_key_frame: bool,
    pub absolute_timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// Frame stored in the buffer: the input plus its precomputed MKV header.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub cluster_kind: ClusterKind,
    pub track: TrackType,
    pub is_key_frame: bool,
    pub absolute_timestamp_ms: u64,
    pub payload: Vec<u8>,
    pub mkv_header: Vec<u8>,
}

impl DataFrame {
    /// `sizeof(DataFrame_t)` analogue: header bytes are heap-allocated once
    /// per frame in the reference implementation too.
    pub fn mem_footprint(&self) -> usize {
        std::mem::size_of::<DataFrame>() + self.payload.len() + self.mkv_header.len()
    }
}

struct Inner {
    earliest_cluster_timestamp_ms: u64,
    frames: Vec<DataFrame>,
}

pub struct StreamBuffer {
    mkv_header: Vec<u8>,
    has_video_track: bool,
    has_audio_track: bool,
    inner: Mutex<Inner>,
}

fn build_mkv_header(video: &VideoTrackInfo, audio: Option<&AudioTrackInfo>) -> Vec<u8> {
    let mut segment_uid = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut segment_uid);
    mkv::build_header(video, audio, segment_uid)
}

fn frame_header(frame: &DataFrameIn, delta_timestamp_ms: i16) -> Vec<u8> {
    match frame.cluster_kind {
        ClusterKind::Cluster => {
            let mut out = mkv::cluster_header(frame.absolute_timestamp_ms).to_vec();
            out.extend_from_slice(&mkv::simple_block_header(
                frame.track,
                0,
                frame.is_key_frame,
                frame.payload.len(),
            ));
            out
        }
        ClusterKind::SimpleBlock => mkv::simple_block_header(
            frame.track,
            delta_timestamp_ms,
            frame.is_key_frame,
            frame.payload.len(),
        )
        .to_vec(),
    }
}

impl StreamBuffer {
    /// Precomputes the EBML+Segment+Info+Tracks header once; it is
    /// immutable thereafter.
    pub fn new(video: &VideoTrackInfo, audio: Option<&AudioTrackInfo>) -> Self {
        Self {
            mkv_header: build_mkv_header(video, audio),
            has_video_track: true,
            has_audio_track: audio.is_some(),
            inner: Mutex::new(Inner {
                earliest_cluster_timestamp_ms: 0,
                frames: Vec::new(),
            }),
        }
    }

    pub fn mkv_ebml_segment_header(&self) -> &[u8] {
        &self.mkv_header
    }

    pub fn has_video_track(&self) -> bool {
        self.has_video_track
    }

    pub fn has_audio_track(&self) -> bool {
        self.has_audio_track
    }

    /// Insert one frame in timestamp order (video breaks ties ahead of
    /// audio). If the insertion introduces a new cluster head ahead of
    /// frames already in the buffer, every following frame's delta timestamp
    /// is recomputed against the new cluster boundary.
    pub fn add_frame(&self, frame_in: DataFrameIn) -> Result<()> {
        if frame_in.cluster_kind == ClusterKind::Cluster && frame_in.track != TrackType::Video {
            return Err(KvsError::InvalidArgument(
                "only the video track may start a cluster".into(),
            ));
        }

        let mut inner = self.inner.lock();
        let mut cluster_ts = inner.earliest_cluster_timestamp_ms;
        let mut insert_at = inner.frames.len();
        let mut needs_correction = false;
        let mut delta_ms: i64 = frame_in.absolute_timestamp_ms as i64 - cluster_ts as i64;

        for (i, existing) in inner.frames.iter().enumerate() {
            let goes_before = frame_in.absolute_timestamp_ms < existing.absolute_timestamp_ms
                || (frame_in.absolute_timestamp_ms == existing.absolute_timestamp_ms
                    && frame_in.track == TrackType::Video);
            if goes_before {
                insert_at = i;
                if frame_in.cluster_kind == ClusterKind::Cluster {
                    delta_ms = 0;
                    needs_correction = true;
                } else {
                    delta_ms = frame_in.absolute_timestamp_ms as i64 - cluster_ts as i64;
                }
                break;
            }
            if existing.cluster_kind == ClusterKind::Cluster {
                cluster_ts = existing.absolute_timestamp_ms;
            }
        }
        if insert_at == inner.frames.len() {
            delta_ms = frame_in.absolute_timestamp_ms as i64 - cluster_ts as i64;
        }

        let mkv_header = frame_header(&frame_in, delta_ms as i16);
        let frame = DataFrame {
            cluster_kind: frame_in.cluster_kind,
            track: frame_in.track,
            is_key_frame: frame_in.is_key_frame,
            absolute_timestamp_ms: frame_in.absolute_timestamp_ms,
            payload: frame_in.payload,
            mkv_header,
        };
        inner.frames.insert(insert_at, frame);

        if needs_correction {
            let mut cluster_ts = 0u64;
            let mut started = false;
            let len = inner.frames.len();
            for i in insert_at..len {
                let is_cluster = inner.frames[i].cluster_kind == ClusterKind::Cluster;
                if is_cluster {
                    cluster_ts = inner.frames[i].absolute_timestamp_ms;
                    started = true;
                }
                if started {
                    let delta = (inner.frames[i].absolute_timestamp_ms as i64 - cluster_ts as i64) as i16;
                    let payload_len = inner.frames[i].payload.len();
                    let track = inner.frames[i].track;
                    let is_key_frame = inner.frames[i].is_key_frame;
                    let cluster_kind = inner.frames[i].cluster_kind;
                    let absolute_timestamp_ms = inner.frames[i].absolute_timestamp_ms;
                    let header = match cluster_kind {
                        ClusterKind::Cluster => {
                            let mut h = mkv::cluster_header(absolute_timestamp_ms).to_vec();
                            h.extend_from_slice(&mkv::simple_block_header(
                                track,
                                0,
                                is_key_frame,
                                payload_len,
                            ));
                            h
                        }
                        ClusterKind::SimpleBlock => {
                            mkv::simple_block_header(track, delta, is_key_frame, payload_len).to_vec()
                        }
                    };
                    inner.frames[i].mkv_header = header;
                }
            }
        }

        Ok(())
    }

    /// Remove and return the head frame, updating the earliest-cluster
    /// bookkeeping if it was a cluster head.
    pub fn pop(&self) -> Option<DataFrame> {
        let mut inner = self.inner.lock();
        if inner.frames.is_empty() {
            return None;
        }
        let frame = inner.frames.remove(0);
        if frame.cluster_kind == ClusterKind::Cluster {
            inner.earliest_cluster_timestamp_ms = frame.absolute_timestamp_ms;
        }
        Some(frame)
    }

    pub fn peek(&self) -> Option<DataFrame> {
        let inner = self.inner.lock();
        inner.frames.first().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    pub fn avail_on_track(&self, track: TrackType) -> bool {
        self.inner.lock().frames.iter().any(|f| f.track == track)
    }

    /// `sizeof(Stream) + header + Σ per-frame footprint`, computed in O(n).
    pub fn mem_stat_total(&self) -> usize {
        let inner = self.inner.lock();
        let base = std::mem::size_of::<Self>() + self.mkv_header.len();
        inner.frames.iter().fold(base, |acc, f| acc + f.mem_footprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_track() -> VideoTrackInfo {
        VideoTrackInfo {
            track_name: "video".into(),
            codec_name: "V_MPEG4/ISO/AVC".into(),
            width: 640,
            height: 480,
            codec_private: vec![0x01, 0x42, 0x80, 0x1e, 0xFF],
        }
    }

    fn frame(kind: ClusterKind, track: TrackType, ts: u64, key: bool) -> DataFrameIn {
        DataFrameIn {
            cluster_kind: kind,
            track,
            is_key_frame: key,
            absolute_timestamp_ms: ts,
            payload: vec![0xAB; 10],
        }
    }

    #[test]
    fn pop_order_is_timestamp_monotone() {
        let buf = StreamBuffer::new(&video_track(), None);
        buf.add_frame(frame(ClusterKind::Cluster, TrackType::Video, 0, true))
            .unwrap();
        buf.add_frame(frame(ClusterKind::SimpleBlock, TrackType::Video, 40, false))
            .unwrap();
        buf.add_frame(frame(ClusterKind::SimpleBlock, TrackType::Video, 20, false))
            .unwrap();

        let first = buf.pop().unwrap();
        assert_eq!(first.absolute_timestamp_ms, 0);
        let second = buf.pop().unwrap();
        assert_eq!(second.absolute_timestamp_ms, 20);
        let third = buf.pop().unwrap();
        assert_eq!(third.absolute_timestamp_ms, 40);
    }

    #[test]
    fn out_of_order_cluster_insert_recomputes_deltas() {
        let buf = StreamBuffer::new(&video_track(), None);
        buf.add_frame(frame(ClusterKind::Cluster, TrackType::Video, 0, true))
            .unwrap();
        buf.add_frame(frame(ClusterKind::SimpleBlock, TrackType::Video, 100, false))
            .unwrap();
        // A new cluster head lands between them; the 100ms frame's delta
        // must be recomputed against the new cluster's timestamp (50).
        buf.add_frame(frame(ClusterKind::Cluster, TrackType::Video, 50, true))
            .unwrap();

        let _ = buf.pop().unwrap(); // ts=0 cluster
        let second = buf.pop().unwrap();
        assert_eq!(second.absolute_timestamp_ms, 50);
        assert_eq!(second.cluster_kind, ClusterKind::Cluster);
        let third = buf.pop().unwrap();
        assert_eq!(third.absolute_timestamp_ms, 100);
        // delta timestamp field sits at bytes [10..12] of a SimpleBlock-only header.
        let delta = i16::from_be_bytes([third.mkv_header[10], third.mkv_header[11]]);
        assert_eq!(delta, 50);
    }

    #[test]
    fn mem_stat_grows_with_frames() {
        let buf = StreamBuffer::new(&video_track(), None);
        let empty = buf.mem_stat_total();
        buf.add_frame(frame(ClusterKind::Cluster, TrackType::Video, 0, true))
            .unwrap();
        assert!(buf.mem_stat_total() > empty);
    }
}
