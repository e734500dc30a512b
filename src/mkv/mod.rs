//! Matroska (MKV) generation: the EBML+Segment+Info+Tracks header, per-frame
//! Cluster/SimpleBlock headers, codec-private blob synthesis, and the minimal
//! element parser used by the offline retimestamp tool.
//!
//! Byte layouts are grounded directly on `src/source/mkv/mkv_generator.c` and
//! `src/source/mkv_parser.c` of the reference KVS producer; field offsets
//! below mirror its static header templates rather than reinventing the EBML
//! encoding from scratch.

mod codec_private;
mod header;
mod parser;

pub use codec_private::{
    h264_codec_private_from_sps_pps, pcm_codec_private, PcmFormatCode,
};
pub use parser::{
    element_id_len, element_size_len, read_element_id, read_element_size, ELEMENT_SIZE_UNKNOWN,
};

use crate::endian::put_u64_be;
use crate::error::{KvsError, Result};

pub const TRACK_NUMBER_VIDEO: u8 = 1;
pub const TRACK_NUMBER_AUDIO: u8 = 2;

/// Matches `TRACK_VIDEO`/`TRACK_AUDIO` in the reference producer: track
/// number, UID, and the TrackType enum value all share this discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Video = 1,
    Audio = 2,
}

impl TrackType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Track name field is transmitted as a fixed 16-byte, NUL-padded slot.
pub const TRACK_NAME_MAX_LEN: usize = 16;

/// Fixed AAC sampling frequency table; position is the `sampling_freq_index`
/// packed into the 2-byte AAC `AudioSpecificConfig`.
pub const AAC_SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

pub fn aac_sampling_freq_index(frequency_hz: u32) -> Result<u8> {
    AAC_SAMPLING_FREQUENCIES
        .iter()
        .position(|&f| f == frequency_hz)
        .map(|i| i as u8)
        .ok_or(KvsError::InvalidAudioFrequency(frequency_hz))
}

#[derive(Debug, Clone)]
pub struct VideoTrackInfo {
    pub track_name: String,
    pub codec_name: String,
    pub width: u16,
    pub height: u16,
    pub codec_private: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AudioTrackInfo {
    pub track_name: String,
    pub codec_name: String,
    pub frequency_hz: u32,
    pub channels: u16,
    /// 0 means the BitDepth element is omitted, matching the reference
    /// producer's optional `gSegmentTrackEntryAudioHeaderBitsPerSample` block.
    pub bits_per_sample: u16,
    pub codec_private: Vec<u8>,
}

/// Build the 2-byte AAC `AudioSpecificConfig` codec-private blob.
///
/// `object_type` is the MPEG-4 audio object type (2 = AAC-LC, the only value
/// the demo tooling emits); `sampling_freq_index` comes from
/// [`aac_sampling_freq_index`].
pub fn aac_codec_private(object_type: u8, sampling_freq_index: u8, channels: u16) -> [u8; 2] {
    let packed: u16 =
        ((object_type as u16) << 11) | ((sampling_freq_index as u16) << 7) | (channels << 3);
    packed.to_be_bytes()
}

/// Build the EBML header, Segment header, Info block, and Tracks block for a
/// session. This byte block is immutable for the lifetime of the session and
/// is sent exactly once, as the first chunk of the PutMedia body.
pub fn build_header(
    video: &VideoTrackInfo,
    audio: Option<&AudioTrackInfo>,
    segment_uid: [u8; 16],
) -> Vec<u8> {
    let mut out = header::ebml_header().to_vec();
    out.extend_from_slice(&header::segment_header());
    out.extend_from_slice(&header::info_header(segment_uid));

    let mut tracks_body = header::track_entry(
        TrackType::Video,
        &video.track_name,
        &video.codec_name,
        header::TrackKind::Video {
            width: video.width,
            height: video.height,
        },
        &video.codec_private,
    );
    if let Some(audio) = audio {
        tracks_body.extend_from_slice(&header::track_entry(
            TrackType::Audio,
            &audio.track_name,
            &audio.codec_name,
            header::TrackKind::Audio {
                frequency_hz: audio.frequency_hz,
                channels: audio.channels,
                bits_per_sample: audio.bits_per_sample,
            },
            &audio.codec_private,
        ));
    }
    out.extend_from_slice(&header::tracks_header(&tracks_body));
    out
}

/// 15-byte Cluster header (ID + unknown-size marker + Timestamp element)
/// carrying an absolute timestamp in milliseconds.
pub fn cluster_header(absolute_timestamp_ms: u64) -> [u8; 15] {
    let mut out = [0u8; 15];
    out[0..4].copy_from_slice(&[0x1F, 0x43, 0xB6, 0x75]);
    out[4] = 0xFF;
    out[5] = 0xE7;
    out[6] = 0x88;
    put_u64_be(&mut out[7..15], absolute_timestamp_ms);
    out
}

/// 13-byte SimpleBlock header for a frame of `payload_len` bytes on `track`,
/// `delta_timestamp_ms` relative to the enclosing cluster's timestamp.
pub fn simple_block_header(
    track: TrackType,
    delta_timestamp_ms: i16,
    is_key_frame: bool,
    payload_len: usize,
) -> [u8; 13] {
    let mut out = [0u8; 13];
    out[0] = 0xA3;
    put_u64_be(&mut out[1..9], (4 + payload_len) as u64);
    out[9] = 0x80 | track.as_u8();
    out[10..12].copy_from_slice(&delta_timestamp_ms.to_be_bytes());
    out[12] = if is_key_frame { 0x80 } else { 0x00 };
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_cluster_and_simple_block_bytes() {
        let cluster = cluster_header(0x1234);
        assert_eq!(
            cluster,
            [0x1F, 0x43, 0xB6, 0x75, 0xFF, 0xE7, 0x88, 0, 0, 0, 0, 0, 0, 0x12, 0x34]
        );

        let block = simple_block_header(TrackType::Video, 0, true, 100);
        assert_eq!(
            block,
            [0xA3, 0, 0, 0, 0, 0, 0, 0, 0x68, 0x81, 0x00, 0x00, 0x80]
        );

        assert_eq!(cluster.len() + block.len(), 28);
    }

    #[test]
    fn aac_codec_private_packs_fields() {
        let idx = aac_sampling_freq_index(48000).unwrap();
        assert_eq!(idx, 3);
        let cpd = aac_codec_private(2, idx, 2);
        // (2 << 11) | (3 << 7) | (2 << 3) = 0x1190
        assert_eq!(cpd, [0x11, 0x90]);
    }

    #[test]
    fn rejects_unknown_aac_frequency() {
        assert!(aac_sampling_freq_index(45000).is_err());
    }
}
