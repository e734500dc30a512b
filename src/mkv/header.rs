//! Static EBML/Segment/Info header templates and the TrackEntry builder.
//!
//! Field offsets mirror `gEbmlHeader`/`gSegmentInfoHeader`/
//! `gSegmentTrackEntryHeader` and friends in the reference producer's
//! `mkv_generator.c`; this port builds them with `Vec<u8>` instead of
//! `memcpy`-into-offsets, but the byte-for-byte content is unchanged.

use crate::endian::{put_u16_be, put_u32_be, put_u64_be};

use super::{TrackType, TRACK_NAME_MAX_LEN};

/// VINT length-indicator marker bits, used to encode a known element size in
/// a fixed-width field (so later "fix up the length" patches don't need to
/// reallocate).
const MKV_LENGTH_INDICATOR_2_BYTE: u16 = 0x4000;
const MKV_LENGTH_INDICATOR_4_BYTE: u32 = 0x1000_0000;

pub fn ebml_header() -> [u8; 40] {
    [
        0x1A, 0x45, 0xDF, 0xA3, // EBML (L0)
        0xA3, // len = 35
        0x42, 0x86, 0x81, 0x01, // EBMLVersion = 1
        0x42, 0xF7, 0x81, 0x01, // EBMLReadVersion = 1
        0x42, 0xF2, 0x81, 0x04, // EBMLMaxIDLength = 4
        0x42, 0xF3, 0x81, 0x08, // EBMLMaxSizeLength = 8
        0x42, 0x82, 0x88, 0x6D, 0x61, 0x74, 0x72, 0x6F, 0x73, 0x6B, 0x61, // DocType = "matroska"
        0x42, 0x87, 0x81, 0x02, // DocTypeVersion = 2
        0x42, 0x85, 0x81, 0x02, // DocTypeReadVersion = 2
    ]
}

pub fn segment_header() -> [u8; 5] {
    [0x18, 0x53, 0x80, 0x67, 0xFF]
}

pub fn info_header(segment_uid: [u8; 16]) -> [u8; 94] {
    let mut out = [0u8; 94];
    out[0..4].copy_from_slice(&[0x15, 0x49, 0xA9, 0x66]);
    put_u16_be(&mut out[4..6], MKV_LENGTH_INDICATOR_2_BYTE | 88);

    out[6..8].copy_from_slice(&[0x73, 0xA4]);
    out[8] = 0x90;
    out[9..25].copy_from_slice(&segment_uid);

    out[25..28].copy_from_slice(&[0x2A, 0xD7, 0xB1]);
    out[28] = 0x88;
    put_u64_be(&mut out[29..37], 1_000_000);

    out[37..39].copy_from_slice(&[0x7B, 0xA9]);
    out[39] = 0x90;
    // Title placeholder stays zeroed.

    out[56..58].copy_from_slice(&[0x4D, 0x80]);
    out[58] = 0x90;
    // MuxingApp placeholder stays zeroed.

    out[75..77].copy_from_slice(&[0x57, 0x41]);
    out[77] = 0x90;
    // WritingApp placeholder stays zeroed.

    out
}

pub enum TrackKind {
    Video { width: u16, height: u16 },
    Audio {
        frequency_hz: u32,
        channels: u16,
        bits_per_sample: u16,
    },
}

/// Build one `TrackEntry` element (header + codec ID + Video/Audio sub-block
/// + CodecPrivate), with its own length already fixed up.
pub fn track_entry(
    track_type: TrackType,
    track_name: &str,
    codec_name: &str,
    kind: TrackKind,
    codec_private: &[u8],
) -> Vec<u8> {
    let mut body = Vec::new();

    // TrackNumber / TrackUID / TrackType / Name.
    body.extend_from_slice(&[0xD7, 0x81, track_type.as_u8()]);
    body.extend_from_slice(&[0x73, 0xC5, 0x88]);
    let mut uid = [0u8; 8];
    put_u64_be(&mut uid, track_type.as_u8() as u64);
    body.extend_from_slice(&uid);
    body.extend_from_slice(&[0x83, 0x81, track_type.as_u8()]);
    body.extend_from_slice(&[0x53, 0x6E, 0x90]);
    let mut name_field = [0u8; TRACK_NAME_MAX_LEN];
    let name_bytes = track_name.as_bytes();
    let copy_len = name_bytes.len().min(TRACK_NAME_MAX_LEN);
    name_field[..copy_len].copy_from_slice(&name_bytes[..copy_len]);
    body.extend_from_slice(&name_field);

    // CodecID.
    body.extend_from_slice(&[0x86]);
    let mut codec_len_field = [0u8; 2];
    put_u16_be(&mut codec_len_field, MKV_LENGTH_INDICATOR_2_BYTE | codec_name.len() as u16);
    body.extend_from_slice(&codec_len_field);
    body.extend_from_slice(codec_name.as_bytes());

    match kind {
        TrackKind::Video { width, height } => {
            body.extend_from_slice(&[0xE0, 0x10, 0x00, 0x00, 0x08]);
            body.extend_from_slice(&[0xB0, 0x82]);
            let mut w = [0u8; 2];
            put_u16_be(&mut w, width);
            body.extend_from_slice(&w);
            body.extend_from_slice(&[0xBA, 0x82]);
            let mut h = [0u8; 2];
            put_u16_be(&mut h, height);
            body.extend_from_slice(&h);
        }
        TrackKind::Audio {
            frequency_hz,
            channels,
            bits_per_sample,
        } => {
            body.extend_from_slice(&[0xE1, 0x10, 0x00, 0x00, 0x0D]);
            body.extend_from_slice(&[0xB5, 0x88]);
            let mut freq = [0u8; 8];
            put_u64_be(&mut freq, (frequency_hz as f64).to_bits());
            body.extend_from_slice(&freq);
            body.extend_from_slice(&[0x9F, 0x81, channels as u8]);
            if bits_per_sample != 0 {
                body.extend_from_slice(&[0x62, 0x64, 0x81, bits_per_sample as u8]);
            }
        }
    }

    if !codec_private.is_empty() {
        body.extend_from_slice(&[0x63, 0xA2]);
        let mut len_field = [0u8; 4];
        put_u32_be(&mut len_field, MKV_LENGTH_INDICATOR_4_BYTE | codec_private.len() as u32);
        body.extend_from_slice(&len_field);
        body.extend_from_slice(codec_private);
    }

    let mut entry = Vec::with_capacity(body.len() + 5);
    entry.push(0xAE);
    let mut len_field = [0u8; 4];
    put_u32_be(&mut len_field, MKV_LENGTH_INDICATOR_4_BYTE | body.len() as u32);
    entry.extend_from_slice(&len_field);
    entry.extend_from_slice(&body);
    entry
}

/// Wrap the concatenated `TrackEntry` bytes in the outer `Tracks` element,
/// whose size is only known once every entry has been built.
pub fn tracks_header(entries: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len());
    out.extend_from_slice(&[0x16, 0x54, 0xAE, 0x6B]);
    let mut len_field = [0u8; 4];
    put_u32_be(&mut len_field, MKV_LENGTH_INDICATOR_4_BYTE | entries.len() as u32);
    out.extend_from_slice(&len_field);
    out.extend_from_slice(entries);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkv::{AAC_SAMPLING_FREQUENCIES, TRACK_NUMBER_VIDEO};

    #[test]
    fn ebml_header_is_35_bytes_of_payload() {
        let h = ebml_header();
        assert_eq!(h.len(), 40);
        assert_eq!(h[4], 0xA3 - 0x80); // length VINT low bits -> 35
        assert_eq!(&h[24..32], b"matroska");
    }

    #[test]
    fn segment_header_marks_unknown_size() {
        assert_eq!(segment_header(), [0x18, 0x53, 0x80, 0x67, 0xFF]);
    }

    #[test]
    fn info_header_embeds_segment_uid_and_timescale() {
        let uid = [0x42u8; 16];
        let info = info_header(uid);
        assert_eq!(&info[9..25], &uid);
        assert_eq!(&info[29..37], &1_000_000u64.to_be_bytes());
    }

    #[test]
    fn video_track_entry_embeds_resolution() {
        let entry = track_entry(
            TrackType::Video,
            "video",
            "V_MPEG4/ISO/AVC",
            TrackKind::Video {
                width: 640,
                height: 480,
            },
            &[0x01, 0x02],
        );
        assert_eq!(entry[0], 0xAE);
        assert_eq!(entry[6], TRACK_NUMBER_VIDEO);
        assert!(entry.windows(2).any(|w| w == [0x02, 0x80])); // 640 BE
    }

    #[test]
    fn audio_sampling_freq_table_has_canonical_order() {
        assert_eq!(AAC_SAMPLING_FREQUENCIES[0], 96000);
        assert_eq!(AAC_SAMPLING_FREQUENCIES[12], 7350);
    }
}
