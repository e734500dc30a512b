//! Codec-private blob synthesis: the H.264 AVCC configuration record and the
//! PCM `WAVEFORMATEX`-style private data.
//!
//! Grounded on `Mkv_generateH264CodecPrivateDataFromSpsPps` and
//! `Mkv_generatePcmCodecPrivateData` in the reference producer's
//! `mkv_generator.c`. AAC's codec-private (2-byte `AudioSpecificConfig`) is
//! built by [`super::aac_codec_private`] instead, since it has no header
//! structure of its own beyond the two packed bytes.

use crate::endian::{put_u16_be, put_u16_le, put_u32_le};
use crate::error::{KvsError, Result};

pub const MIN_PCM_SAMPLING_RATE: u32 = 8_000;
pub const MAX_PCM_SAMPLING_RATE: u32 = 192_000;

/// WAVE format tags used by the PCM codec-private block; matches
/// `PcmFormatCode_t` in the reference producer's public header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmFormatCode {
    ALaw = 0x0006,
    MuLaw = 0x0007,
}

/// Build the H.264 AVCC configuration record: version byte, profile/
/// compat/level copied from the SPS, a fixed `lengthSizeMinusOne = 3`
/// (AVCC length prefixes are always 4 bytes), one SPS, and one PPS.
pub fn h264_codec_private_from_sps_pps(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>> {
    if sps.len() < 4 || pps.is_empty() {
        return Err(KvsError::InvalidArgument(
            "SPS/PPS too short for AVCC codec-private record".into(),
        ));
    }

    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(0x01); // configurationVersion
    out.push(sps[1]); // AVCProfileIndication
    out.push(sps[2]); // profile_compatibility
    out.push(sps[3]); // AVCLevelIndication
    out.push(0xFF); // reserved(6) + lengthSizeMinusOne(2) = 3

    out.push(0xE1); // reserved(3) + numOfSequenceParameterSets(5) = 1
    let mut sps_len = [0u8; 2];
    put_u16_be(&mut sps_len, sps.len() as u16);
    out.extend_from_slice(&sps_len);
    out.extend_from_slice(sps);

    out.push(0x01); // numOfPictureParameterSets = 1
    let mut pps_len = [0u8; 2];
    put_u16_be(&mut pps_len, pps.len() as u16);
    out.extend_from_slice(&pps_len);
    out.extend_from_slice(pps);

    Ok(out)
}

/// Build the 18-byte PCM codec-private block: a minimal `WAVEFORMATEX`
/// (format tag, channels, sample rate, average bytes/sec, block align,
/// bits/sample, extra-size) encoded little-endian.
pub fn pcm_codec_private(
    format: PcmFormatCode,
    sampling_rate: u32,
    channels: u16,
) -> Result<Vec<u8>> {
    if !(MIN_PCM_SAMPLING_RATE..=MAX_PCM_SAMPLING_RATE).contains(&sampling_rate) {
        return Err(KvsError::InvalidPcmSamplingRate(sampling_rate));
    }
    if channels != 1 && channels != 2 {
        return Err(KvsError::InvalidPcmChannels(channels));
    }

    let avg_bytes_per_second = channels as u32 * sampling_rate;
    let bits_per_sample = channels * 8;

    let mut out = vec![0u8; 18];
    put_u16_le(&mut out[0..2], format as u16);
    put_u16_le(&mut out[2..4], channels);
    put_u32_le(&mut out[4..8], sampling_rate);
    put_u32_le(&mut out[8..12], avg_bytes_per_second);
    put_u16_le(&mut out[12..14], 0); // block align, unused by this producer
    put_u16_le(&mut out[14..16], bits_per_sample);
    put_u16_le(&mut out[16..18], 0); // extra size

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_codec_private_layout() {
        let sps = [0x67, 0x42, 0x80, 0x1e, 0xAA, 0xBB];
        let pps = [0x68, 0xCE];
        let cpd = h264_codec_private_from_sps_pps(&sps, &pps).unwrap();
        assert_eq!(cpd[0], 0x01);
        assert_eq!(&cpd[1..4], &sps[1..4]);
        assert_eq!(cpd[4], 0xFF);
        assert_eq!(cpd[5], 0xE1);
        assert_eq!(&cpd[6..8], &(sps.len() as u16).to_be_bytes());
        assert_eq!(&cpd[8..8 + sps.len()], &sps);
        let pps_off = 8 + sps.len();
        assert_eq!(cpd[pps_off], 0x01);
        assert_eq!(&cpd[pps_off + 1..pps_off + 3], &(pps.len() as u16).to_be_bytes());
        assert_eq!(&cpd[pps_off + 3..], &pps);
    }

    #[test]
    fn pcm_codec_private_layout() {
        let cpd = pcm_codec_private(PcmFormatCode::ALaw, 8000, 1).unwrap();
        assert_eq!(cpd.len(), 18);
        assert_eq!(&cpd[0..2], &0x0006u16.to_le_bytes());
        assert_eq!(&cpd[2..4], &1u16.to_le_bytes());
        assert_eq!(&cpd[4..8], &8000u32.to_le_bytes());
        assert_eq!(&cpd[8..12], &8000u32.to_le_bytes());
        assert_eq!(&cpd[14..16], &8u16.to_le_bytes());
    }

    #[test]
    fn pcm_rejects_out_of_range_rate() {
        assert!(pcm_codec_private(PcmFormatCode::MuLaw, 500, 1).is_err());
    }

    #[test]
    fn pcm_rejects_bad_channel_count() {
        assert!(pcm_codec_private(PcmFormatCode::MuLaw, 8000, 3).is_err());
    }
}
