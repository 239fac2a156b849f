// VCDIFF (RFC 3284) streams driven by a caller-side negotiation loop.
//
// Both directions are resumable state machines. Each call to `step`
// returns a `Step` telling the caller what the machine needs next:
// more input, a particular source block, or attention to output that
// is ready. Source bytes are never owned by the machines; the caller
// keeps exactly one resident `SourceBlock` and passes it on every step.
//
// - `varint`        base-128 big-endian integers
// - `address_cache` NEAR/SAME caches for COPY addresses
// - `code_table`    the default 256-entry code table
// - `header`        file and window headers
// - `matcher`       block-aware match finder
// - `encoder`       `EncodeStream`
// - `decoder`       `DecodeStream`

pub mod address_cache;
pub mod code_table;
pub mod decoder;
pub mod encoder;
pub mod header;
pub mod matcher;
pub mod varint;

pub use decoder::{DecodeStream, decode_in_memory};
pub use encoder::{EncodeStream, encode_in_memory};
pub use header::{FileHeader, HARD_MAX_WINSIZE, VCDIFF_MAGIC, WindowHeader};

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// What a stream needs from its driver after a `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Supply more input. Once the stream is flushed this means "done".
    NeedInput,
    /// `output()` holds bytes that must be written before stepping again.
    Output,
    /// Make block `n` of the source resident and step again.
    NeedSourceBlock(u64),
    /// The file header has been read (decoder only).
    GotHeader,
    /// A window is about to be processed; its target length is known.
    WindowStart,
    /// The current window is complete.
    WindowFinish,
}

/// Geometry of the source a stream is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub len: u64,
    pub block_size: usize,
}

impl SourceInfo {
    pub fn block_count(&self) -> u64 {
        self.len.div_ceil(self.block_size as u64)
    }
}

/// One block of source bytes: `data` starts at `index * block_size`.
#[derive(Debug, Clone, Default)]
pub struct SourceBlock {
    pub index: u64,
    pub data: Vec<u8>,
}

/// `resident` if it is block `n`.
#[inline]
pub(crate) fn resident_is(resident: Option<&SourceBlock>, n: u64) -> Option<&SourceBlock> {
    resident.filter(|b| b.index == n)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A delta stream that cannot be decoded. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed VCDIFF stream: {0}")]
    Malformed(String),
    #[error("unsupported VCDIFF feature: {0}")]
    Unsupported(String),
    #[error("{0} section underflow")]
    SectionUnderflow(&'static str),
    #[error("invalid COPY address")]
    InvalidAddress,
    #[error("source underflow: {needed} bytes at offset {offset}, source holds {len}")]
    SourceUnderflow { offset: u64, needed: u64, len: u64 },
    #[error("target window length mismatch: header says {expected}, decoded {actual}")]
    TargetLength { expected: u64, actual: u64 },
    #[error("window checksum mismatch: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("delta stream truncated")]
    Truncated,
}

// ---------------------------------------------------------------------------
// Adler-32
// ---------------------------------------------------------------------------

pub(crate) fn adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const MOD_ADLER: u32 = 65521;
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for chunk in data.chunks(5552) {
            for &byte in chunk {
                a += u32::from(byte);
                b += a;
            }
            a %= MOD_ADLER;
            b %= MOD_ADLER;
        }
        (b << 16) | a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adler32_known_value() {
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn block_count_rounds_up() {
        let info = SourceInfo {
            len: 10,
            block_size: 4,
        };
        assert_eq!(info.block_count(), 3);
        let empty = SourceInfo {
            len: 0,
            block_size: 4,
        };
        assert_eq!(empty.block_count(), 0);
    }
}
