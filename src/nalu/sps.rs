//! H.264 SPS decode, far enough to reach `frame_crop_*_offset` (H.264 §7.4.2.1.1).
//!
//! The reference producer's `sps_decode.c` was not retained in the source
//! pack handed to this port; the bitstream walk below follows the standard
//! Exp-Golomb field layout of `seq_parameter_set_rbsp()` up to the cropping
//! rectangle, which is all the resolution computation needs.

use crate::error::{KvsError, Result};

/// Bitstream reader over an RBSP (emulation-prevention bytes already
/// tolerated: we don't special-case `00 00 03`, as SPS payloads this shallow
/// essentially never trigger the escape sequence before frame cropping).
struct BitReader<'a> {
    buf: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, bit_pos: 0 }
    }

    fn read_bit(&mut self) -> Result<u32> {
        let byte_idx = self.bit_pos / 8;
        let bit_idx = 7 - (self.bit_pos % 8);
        let byte = *self
            .buf
            .get(byte_idx)
            .ok_or_else(|| KvsError::InvalidArgument("SPS buffer exhausted".into()))?;
        self.bit_pos += 1;
        Ok(((byte >> bit_idx) & 1) as u32)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32> {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()?;
        }
        Ok(v)
    }

    /// Unsigned Exp-Golomb code (`ue(v)`).
    fn read_ue(&mut self) -> Result<u32> {
        let mut zeros = 0u32;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 32 {
                return Err(KvsError::InvalidSps);
            }
        }
        if zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(zeros)?;
        Ok((1u32 << zeros) - 1 + suffix)
    }

    /// Signed Exp-Golomb code (`se(v)`) — unused by the resolution decode but
    /// kept for completeness of the bitstream walk (profile/level fields use
    /// plain `u(n)`, not `se(v)`, so this is only here for documentation).
    #[allow(dead_code)]
    fn read_se(&mut self) -> Result<i32> {
        let k = self.read_ue()?;
        let v = (k as i32 + 1) / 2;
        Ok(if k % 2 == 0 { -v } else { v })
    }
}

/// Decode `(width, height)` in pixels from a raw SPS NAL unit (the NAL header
/// byte included). Precondition: `sps[0] & 0x1F == 7`.
pub fn h264_resolution_from_sps(sps: &[u8]) -> Result<(u16, u16)> {
    if sps.is_empty() || (sps[0] & 0x1F) != 7 {
        return Err(KvsError::InvalidSps);
    }

    // Skip the 1-byte NAL header, then profile_idc(8)/constraint_flags+reserved(8)/level_idc(8).
    let rbsp = &sps[1..];
    let mut r = BitReader::new(rbsp);
    let profile_idc = r.read_bits(8)?;
    let _constraint_flags_and_reserved = r.read_bits(8)?;
    let _level_idc = r.read_bits(8)?;
    let _seq_parameter_set_id = r.read_ue()?;

    let mut chroma_format_idc = 1u32; // default 4:2:0 when not present
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            let _separate_colour_plane_flag = r.read_bit()?;
        }
        let _bit_depth_luma_minus8 = r.read_ue()?;
        let _bit_depth_chroma_minus8 = r.read_ue()?;
        let _qpprime_y_zero_transform_bypass_flag = r.read_bit()?;
        let seq_scaling_matrix_present_flag = r.read_bit()?;
        if seq_scaling_matrix_present_flag != 0 {
            let count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..count {
                let seq_scaling_list_present_flag = r.read_bit()?;
                if seq_scaling_list_present_flag != 0 {
                    let size = if i < 6 { 16 } else { 64 };
                    skip_scaling_list(&mut r, size)?;
                }
            }
        }
    }

    let _log2_max_frame_num_minus4 = r.read_ue()?;
    let pic_order_cnt_type = r.read_ue()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_pic_order_cnt_lsb_minus4 = r.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_pic_order_always_zero_flag = r.read_bit()?;
        let _offset_for_non_ref_pic = r.read_se()?;
        let _offset_for_top_to_bottom_field = r.read_se()?;
        let num_ref_frames_in_pic_order_cnt_cycle = r.read_ue()?;
        for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
            let _offset_for_ref_frame = r.read_se()?;
        }
    }

    let _max_num_ref_frames = r.read_ue()?;
    let _gaps_in_frame_num_value_allowed_flag = r.read_bit()?;

    let pic_width_in_mbs_minus1 = r.read_ue()?;
    let pic_height_in_map_units_minus1 = r.read_ue()?;
    let frame_mbs_only_flag = r.read_bit()?;
    if frame_mbs_only_flag == 0 {
        let _mb_adaptive_frame_field_flag = r.read_bit()?;
    }
    let _direct_8x8_inference_flag = r.read_bit()?;

    let frame_cropping_flag = r.read_bit()?;
    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0u32, 0u32, 0u32, 0u32);
    if frame_cropping_flag != 0 {
        crop_left = r.read_ue()?;
        crop_right = r.read_ue()?;
        crop_top = r.read_ue()?;
        crop_bottom = r.read_ue()?;
    }

    let (sub_width_c, sub_height_c): (u32, u32) = match chroma_format_idc {
        1 => (2, 2),
        2 => (2, 1),
        3 => (1, 1),
        _ => (1, 1),
    };
    let crop_unit_x = if chroma_format_idc == 0 { 1 } else { sub_width_c };
    let crop_unit_y = if chroma_format_idc == 0 {
        2 - frame_mbs_only_flag
    } else {
        sub_height_c * (2 - frame_mbs_only_flag)
    };

    let width = (pic_width_in_mbs_minus1 + 1) * 16 - crop_unit_x * (crop_left + crop_right);
    let height_in_map_units = (pic_height_in_map_units_minus1 + 1) * 16;
    let height = (2 - frame_mbs_only_flag) * height_in_map_units
        - crop_unit_y * (crop_top + crop_bottom);

    Ok((width as u16, height as u16))
}

fn skip_scaling_list(r: &mut BitReader, size: u32) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = r.read_se()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        last_scale = if next_scale == 0 { last_scale } else { next_scale };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_sps_decode_640x480() {
        let sps = [
            0x67, 0x42, 0x80, 0x1e, 0xda, 0x02, 0x80, 0xf6, 0x94, 0x82, 0x83, 0x03, 0x03, 0x68,
            0x50, 0x9a, 0x80,
        ];
        let (w, h) = h264_resolution_from_sps(&sps).unwrap();
        assert_eq!((w, h), (640, 480));
    }

    #[test]
    fn rejects_non_sps_nal() {
        let not_sps = [0x65, 0, 0, 0];
        assert!(h264_resolution_from_sps(&not_sps).is_err());
    }
}
