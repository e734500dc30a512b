//! Unaligned big-endian / little-endian integer writes.
//!
//! The reference producer writes multi-byte MKV and codec-private fields
//! directly into a byte buffer at arbitrary offsets (`PUT_UNALIGNED_*_BE/LE`
//! macros); these helpers are the Rust equivalent, operating on a `&mut [u8]`
//! slice rather than a raw pointer.

/// Write a 2-byte big-endian integer at the start of `dst`.
pub fn put_u16_be(dst: &mut [u8], value: u16) {
    dst[0..2].copy_from_slice(&value.to_be_bytes());
}

/// Write a 4-byte big-endian integer at the start of `dst`.
pub fn put_u32_be(dst: &mut [u8], value: u32) {
    dst[0..4].copy_from_slice(&value.to_be_bytes());
}

/// Write an 8-byte big-endian integer at the start of `dst`.
pub fn put_u64_be(dst: &mut [u8], value: u64) {
    dst[0..8].copy_from_slice(&value.to_be_bytes());
}

/// Write a 2-byte little-endian integer at the start of `dst`.
pub fn put_u16_le(dst: &mut [u8], value: u16) {
    dst[0..2].copy_from_slice(&value.to_le_bytes());
}

/// Write a 4-byte little-endian integer at the start of `dst`.
pub fn put_u32_le(dst: &mut [u8], value: u32) {
    dst[0..4].copy_from_slice(&value.to_le_bytes());
}

/// Read a 4-byte big-endian integer from the start of `src`.
pub fn get_u32_be(src: &[u8]) -> u32 {
    u32::from_be_bytes([src[0], src[1], src[2], src[3]])
}

/// Read a 2-byte big-endian integer from the start of `src`.
pub fn get_u16_be(src: &[u8]) -> u16 {
    u16::from_be_bytes([src[0], src[1]])
}

/// Read an 8-byte big-endian integer from the start of `src`.
pub fn get_u64_be(src: &[u8]) -> u64 {
    u64::from_be_bytes([
        src[0], src[1], src[2], src[3], src[4], src[5], src[6], src[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_roundtrip() {
        let mut buf = [0u8; 8];
        put_u64_be(&mut buf, 0x1234_5678_9abc_def0);
        assert_eq!(get_u64_be(&buf), 0x1234_5678_9abc_def0);

        let mut buf = [0u8; 4];
        put_u32_be(&mut buf, 0xdead_beef);
        assert_eq!(get_u32_be(&buf), 0xdead_beef);

        let mut buf = [0u8; 2];
        put_u16_be(&mut buf, 0x1234);
        assert_eq!(get_u16_be(&buf), 0x1234);
    }

    #[test]
    fn le_writes() {
        let mut buf = [0u8; 4];
        put_u32_le(&mut buf, 0x0102_0304);
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);

        let mut buf = [0u8; 2];
        put_u16_le(&mut buf, 0x0102);
        assert_eq!(buf, [0x02, 0x01]);
    }
}
