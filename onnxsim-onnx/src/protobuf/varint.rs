//! Read and write varints.
//!
//! Variable length integers (_varints_) are the default encoding of integers
//! in Protocol Buffers messages, including field tags and numbers.
//!
//! See <https://protobuf.dev/programming-guides/encoding/#varints>.

/// Maximum number of bytes for an encoded varint.
///
/// A decoded varint is a u64 value. Each byte contains 7 value bits and one
/// continuation bit. Hence we need 9 "full" bytes plus one bit from the 10th byte.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, PartialEq)]
pub enum VarintError {
    /// The input is empty.
    Eof,
    /// The varint length exceeds 64-bits, or the end of the input was reached
    /// before a full varint was read.
    InvalidVarint,
}

/// Read a varint value of up to 64-bits from the start of `buf`.
///
/// On success `buf` is advanced past the varint.
pub fn read_varint(buf: &mut &[u8]) -> Result<u64, VarintError> {
    if buf.is_empty() {
        return Err(VarintError::Eof);
    }

    let mut value = 0;
    for (index, byte) in buf.iter().copied().take(MAX_VARINT_LEN).enumerate() {
        // High bit is continuation bit. Low 7 bits are the payload.
        value |= ((byte & 0x7f) as u64) << (index * 7);
        if byte <= 0x7f {
            // Only one value bit from the last byte may be used.
            if index + 1 == MAX_VARINT_LEN && byte > 0x01 {
                break;
            }
            *buf = &buf[index + 1..];
            return Ok(value);
        }
    }

    Err(VarintError::InvalidVarint)
}

/// Append the varint encoding of `val` to `out`.
pub fn write_varint(out: &mut Vec<u8>, mut val: u64) {
    loop {
        let byte = (val & 0x7f) as u8;
        if val <= 0x7f {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
        val >>= 7;
    }
}

/// Return the number of bytes needed to encode `val` as a varint.
pub fn varint_len(val: u64) -> usize {
    let bits = 64 - (val | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{read_varint, varint_len, write_varint, VarintError};

    fn encode_varint(val: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, val);
        buf
    }

    #[test]
    fn test_read_varint_sequence() {
        // Example from https://protobuf.dev/programming-guides/encoding/#simple.
        let buf = [0x08, 0x96, 0x01];
        let mut cur = &buf[..];
        assert_eq!(read_varint(&mut cur), Ok(8));
        assert_eq!(read_varint(&mut cur), Ok(150));
        assert_eq!(read_varint(&mut cur), Err(VarintError::Eof));

        let values = [0, 1, 150, u64::MAX, 2];
        let buf: Vec<u8> = values.iter().copied().flat_map(encode_varint).collect();
        let mut cur = &buf[..];
        let mut decoded = Vec::new();
        while let Ok(val) = read_varint(&mut cur) {
            decoded.push(val);
        }
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_invalid_varint() {
        let mut buf = encode_varint(u64::MAX);
        assert_eq!(buf.len(), 10);
        buf[9] += 1;
        assert_eq!(read_varint(&mut &buf[..]), Err(VarintError::InvalidVarint));

        // Truncated varint.
        let buf = [0x96];
        assert_eq!(read_varint(&mut &buf[..]), Err(VarintError::InvalidVarint));
    }

    #[test]
    fn test_negative_int_uses_ten_bytes() {
        assert_eq!(encode_varint(-1i64 as u64).len(), 10);
    }

    proptest! {
        #[test]
        fn test_varint_len_matches_encoding(val in any::<u64>()) {
            let buf = encode_varint(val);
            prop_assert_eq!(buf.len(), varint_len(val));
            prop_assert_eq!(read_varint(&mut &buf[..]), Ok(val));
        }
    }
}
