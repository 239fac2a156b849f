// VCDIFF address cache (RFC 3284, Section 5.3).
//
// NEAR and SAME caches used to encode COPY addresses compactly. The
// default geometry (4 NEAR slots, 3 SAME groups) yields nine modes:
//   0      SELF  absolute
//   1      HERE  here - value
//   2..5   NEAR  near[mode-2] + value
//   6..8   SAME  same[(mode-6)*256 + byte]

use super::CodecError;
use super::varint::{self, VarInt};

pub const VCD_SELF: u8 = 0;
pub const VCD_HERE: u8 = 1;

const S_NEAR: usize = 4;
const S_SAME: usize = 3;
const SAME_START: usize = 2 + S_NEAR;

#[derive(Clone)]
pub struct AddressCache {
    near: [u64; S_NEAR],
    same: Vec<u64>,
    next_slot: usize,
}

impl AddressCache {
    pub fn new() -> Self {
        Self {
            near: [0; S_NEAR],
            same: vec![0; S_SAME * 256],
            next_slot: 0,
        }
    }

    /// Clear all slots. Called at the start of every window.
    pub fn reset(&mut self) {
        self.near = [0; S_NEAR];
        self.same.fill(0);
        self.next_slot = 0;
    }

    #[inline]
    fn update(&mut self, addr: u64) {
        self.near[self.next_slot] = addr;
        self.next_slot = (self.next_slot + 1) % S_NEAR;
        self.same[addr as usize % (S_SAME * 256)] = addr;
    }

    /// Pick the cheapest mode for `addr`, append its encoding to `out`
    /// and return the mode.
    ///
    /// `here` is the current position in the combined source+target
    /// address space and must be greater than `addr`.
    pub fn encode(&mut self, addr: u64, here: u64, out: &mut Vec<u8>) -> u8 {
        debug_assert!(addr < here);

        let same_idx = addr as usize % (S_SAME * 256);
        if self.same[same_idx] == addr && addr > 127 {
            self.update(addr);
            out.push((same_idx % 256) as u8);
            return (SAME_START + same_idx / 256) as u8;
        }

        let mut best_d = addr;
        let mut best_m = VCD_SELF;

        let d = here - addr;
        if d < best_d {
            best_d = d;
            best_m = VCD_HERE;
        }
        for (i, &near) in self.near.iter().enumerate() {
            if addr >= near && addr - near < best_d {
                best_d = addr - near;
                best_m = i as u8 + 2;
            }
        }

        self.update(addr);
        varint::push_u64(out, best_d);
        best_m
    }

    /// Decode one address in `mode` from the front of `addr_data`.
    ///
    /// Returns the address and the number of address-section bytes consumed.
    pub fn decode(
        &mut self,
        mode: u8,
        addr_data: &[u8],
        here: u64,
    ) -> Result<(u64, usize), CodecError> {
        let mode = mode as usize;

        let (addr, consumed) = if mode < SAME_START {
            let (raw, consumed) = match varint::read_u64(addr_data) {
                Ok(VarInt::Value(v, n)) => (v, n),
                Ok(VarInt::Incomplete) => return Err(CodecError::SectionUnderflow("address")),
                Err(_) => return Err(CodecError::InvalidAddress),
            };
            let addr = match mode {
                0 => raw,
                1 => here.checked_sub(raw).ok_or(CodecError::InvalidAddress)?,
                _ => self.near[mode - 2]
                    .checked_add(raw)
                    .ok_or(CodecError::InvalidAddress)?,
            };
            (addr, consumed)
        } else if mode < SAME_START + S_SAME {
            let byte = *addr_data
                .first()
                .ok_or(CodecError::SectionUnderflow("address"))?;
            ((self.same[(mode - SAME_START) * 256 + byte as usize]), 1)
        } else {
            return Err(CodecError::InvalidAddress);
        };

        if addr >= here {
            return Err(CodecError::InvalidAddress);
        }

        self.update(addr);
        Ok((addr, consumed))
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new()
    }
}
