//! LEB128 variable-length integer encoding and zigzag signed encoding.
//!
//! Unsigned values use continuation-bit LEB128, 1–5 bytes for the u32 range.
//! Signed values are zigzag-mapped to unsigned before encoding.

use crate::error::{Error, Result};

/// Encode an unsigned 32-bit integer as LEB128 into `buf` (1–5 bytes).
pub fn encode_varint(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a LEB128 unsigned 32-bit integer from `buf` starting at `*pos`.
/// Advances `*pos` past the consumed bytes.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let mut result: u32 = 0;
    let mut shift: u32 = 0;
    loop {
        if *pos >= buf.len() {
            return Err(Error::UnexpectedEof {
                offset: *pos,
                need: 1,
                context: "varint",
            });
        }
        let byte = buf[*pos];
        *pos += 1;

        let payload = (byte & 0x7F) as u32;
        // Fifth byte may only carry the top 4 bits of a u32.
        if shift >= 28 && payload > 0x0F {
            return Err(Error::Corruption("varint overflow".into()));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 28 {
            return Err(Error::Corruption("varint too long".into()));
        }
    }
}

/// Encode an unsigned 64-bit integer as LEB128 into `buf` (1–10 bytes).
/// Used for zigzag-mapped i64 property values.
pub fn encode_varint64(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a LEB128 unsigned 64-bit integer from `buf` starting at `*pos`.
pub fn decode_varint64(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        if *pos >= buf.len() {
            return Err(Error::UnexpectedEof {
                offset: *pos,
                need: 1,
                context: "varint64",
            });
        }
        let byte = buf[*pos];
        *pos += 1;

        let payload = (byte & 0x7F) as u64;
        if shift >= 63 && payload > 1 {
            return Err(Error::Corruption("varint64 overflow".into()));
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(Error::Corruption("varint64 too long".into()));
        }
    }
}

/// Zigzag-encode a signed i64 into an unsigned u64.
/// Maps: 0 -> 0, -1 -> 1, 1 -> 2, -2 -> 3, ...
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Zigzag-decode an unsigned u64 back to a signed i64.
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(val: u32) {
        let mut buf = Vec::new();
        encode_varint(val, &mut buf);
        let mut pos = 0;
        let decoded = decode_varint(&buf, &mut pos).unwrap();
        assert_eq!(decoded, val);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn test_varint_boundaries() {
        for val in [0, 1, 127, 128, 16383, 16384, 65535, u32::MAX] {
            round_trip(val);
        }
    }

    #[test]
    fn test_varint_byte_widths() {
        let mut buf = Vec::new();
        encode_varint(127, &mut buf);
        assert_eq!(buf.len(), 1);

        buf.clear();
        encode_varint(128, &mut buf);
        assert_eq!(buf.len(), 2);

        buf.clear();
        encode_varint(u32::MAX, &mut buf);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_varint_multiple_in_buffer() {
        let mut buf = Vec::new();
        encode_varint(100, &mut buf);
        encode_varint(200, &mut buf);
        encode_varint(300, &mut buf);

        let mut pos = 0;
        assert_eq!(decode_varint(&buf, &mut pos).unwrap(), 100);
        assert_eq!(decode_varint(&buf, &mut pos).unwrap(), 200);
        assert_eq!(decode_varint(&buf, &mut pos).unwrap(), 300);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn test_varint_unexpected_eof() {
        let mut pos = 0;
        assert!(decode_varint(&[], &mut pos).is_err());

        // Continuation bit set but no following byte.
        let mut pos = 0;
        assert!(decode_varint(&[0x80], &mut pos).is_err());
    }

    #[test]
    fn test_varint_overflow_rejected() {
        // Six bytes with continuation bits exceeds the u32 range.
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut pos = 0;
        assert!(decode_varint(&buf, &mut pos).is_err());
    }

    #[test]
    fn test_varint64_round_trip() {
        for val in [0u64, 1, 255, 65536, u32::MAX as u64 + 1, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint64(val, &mut buf);
            let mut pos = 0;
            assert_eq!(decode_varint64(&buf, &mut pos).unwrap(), val);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for val in [0, 1, -1, 100, -100, i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(val)), val);
        }
    }
}
