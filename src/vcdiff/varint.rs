// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, big-endian: most-significant group first, bit 7 set on every
// byte except the last.

/// Longest encoding of a `u64` (ceil(64/7)).
pub const MAX_VARINT_LEN: usize = 10;

const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append the encoding of `num` to `out`.
pub fn push_u64(out: &mut Vec<u8>, mut num: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut i = MAX_VARINT_LEN;
    loop {
        i -= 1;
        buf[i] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
        if num == 0 {
            break;
        }
    }
    buf[MAX_VARINT_LEN - 1] &= 0x7F;
    out.extend_from_slice(&buf[i..]);
}

/// Encoded length of `num` in bytes.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    (bits.max(1).div_ceil(7) as usize).min(MAX_VARINT_LEN)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Outcome of decoding a varint from a possibly incomplete buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarInt {
    /// Value and number of bytes consumed.
    Value(u64, usize),
    /// The buffer ends before the final byte of the integer.
    Incomplete,
}

/// Errors for values that can never decode, regardless of further input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("varint overflows 64 bits")]
pub struct VarIntOverflow;

/// Decode a `u64` from the front of `data`.
pub fn read_u64(data: &[u8]) -> Result<VarInt, VarIntOverflow> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if val & U64_OVERFLOW_MASK != 0 {
            return Err(VarIntOverflow);
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(VarInt::Value(val, i + 1));
        }
    }
    Ok(VarInt::Incomplete)
}

/// Decode a `u32` from a complete section; an incomplete integer is `None`.
pub fn read_u32_complete(data: &[u8]) -> Option<(u32, usize)> {
    match read_u64(data) {
        Ok(VarInt::Value(v, n)) => u32::try_from(v).ok().map(|v| (v, n)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
