// Matcher tuning, taken from the xdelta3 "default" profile.

/// Bytes covered by one source checksum.
pub const LARGE_LOOK: usize = 9;

/// Distance between indexed source positions.
pub const LARGE_STEP: usize = 3;

/// Upper bound on source table entries; larger sources are indexed sparser.
pub const MAX_SOURCE_SLOTS: usize = 1 << 22;

/// Bytes covered by one target checksum.
pub const SMALL_LOOK: usize = 4;

/// Shortest source COPY worth emitting.
pub const MIN_SOURCE_MATCH: usize = LARGE_LOOK;

/// Shortest target self-COPY worth emitting.
pub const MIN_TARGET_MATCH: usize = 6;

/// Shortest run of one byte emitted as RUN.
pub const MIN_RUN: usize = 8;

/// Index stride for a source of `len` bytes.
pub fn source_step(len: u64) -> usize {
    let needed = len.div_ceil(MAX_SOURCE_SLOTS as u64);
    usize::try_from(needed).map_or(usize::MAX, |n| n.max(LARGE_STEP))
}
