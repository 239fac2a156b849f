// Checksum -> position tables.
//
// Buckets store `pos + 1` so that zero means empty. Neither table chains:
// a bucket remembers one position and lookups must verify the bytes.
//
// - `SourceTable`: source positions, first insert wins so earlier
//   offsets are preferred. Lives for a whole encode session.
// - `TargetTable`: positions inside the current target window, last
//   insert wins. Rebuilt for every window.

/// Bucket geometry for a table sized to hold roughly `slots` entries.
#[derive(Clone, Debug)]
pub struct HashCfg {
    pub size: usize,
    shift: u32,
    mask: u32,
}

const MIN_BITS: u32 = 3;
const MAX_BITS: u32 = 24;

impl HashCfg {
    /// One bit fewer than the smallest power of two above `slots`.
    pub fn new(slots: usize) -> Self {
        let bits = (MIN_BITS..=MAX_BITS)
            .find(|&i| slots < (1usize << i))
            .map_or(MAX_BITS, |i| i - 1)
            .max(MIN_BITS);
        Self {
            size: 1 << bits,
            shift: 32 - bits,
            mask: (1u32 << bits) - 1,
        }
    }

    /// Fold the high checksum bits into the bucket range.
    #[inline]
    pub fn bucket(&self, cksum: u32) -> usize {
        ((cksum >> self.shift) ^ (cksum & self.mask)) as usize
    }
}

// ---------------------------------------------------------------------------
// Source table
// ---------------------------------------------------------------------------

pub struct SourceTable {
    table: Vec<u64>,
    cfg: HashCfg,
}

impl SourceTable {
    pub fn new(slots: usize) -> Self {
        let cfg = HashCfg::new(slots);
        Self {
            table: vec![0; cfg.size],
            cfg,
        }
    }

    #[inline]
    pub fn lookup(&self, cksum: u32) -> Option<u64> {
        match self.table[self.cfg.bucket(cksum)] {
            0 => None,
            v => Some(v - 1),
        }
    }

    /// Record `pos` unless the bucket is already taken.
    #[inline]
    pub fn insert(&mut self, cksum: u32, pos: u64) {
        let slot = &mut self.table[self.cfg.bucket(cksum)];
        if *slot == 0 {
            *slot = pos + 1;
        }
    }

    pub fn size(&self) -> usize {
        self.cfg.size
    }
}

// ---------------------------------------------------------------------------
// Target table
// ---------------------------------------------------------------------------

pub struct TargetTable {
    table: Vec<u32>,
    cfg: HashCfg,
}

impl TargetTable {
    pub fn new(slots: usize) -> Self {
        let cfg = HashCfg::new(slots);
        Self {
            table: vec![0; cfg.size],
            cfg,
        }
    }

    #[inline]
    pub fn lookup(&self, cksum: u32) -> Option<usize> {
        match self.table[self.cfg.bucket(cksum)] {
            0 => None,
            v => Some(v as usize - 1),
        }
    }

    /// Record `pos`, replacing whatever the bucket held.
    #[inline]
    pub fn insert(&mut self, cksum: u32, pos: usize) {
        if let Ok(v) = u32::try_from(pos + 1) {
            self.table[self.cfg.bucket(cksum)] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cfg_sizes_are_compacted_powers_of_two() {
        assert_eq!(HashCfg::new(1000).size, 512);
        assert_eq!(HashCfg::new(1024).size, 1024);
        assert_eq!(HashCfg::new(0).size, 8);
        assert_eq!(HashCfg::new(usize::MAX).size, 1 << MAX_BITS);
    }

    #[test]
    fn buckets_stay_in_range() {
        let cfg = HashCfg::new(4096);
        for ck in [0u32, 1, 0xFFFF, 0xDEAD_BEEF, u32::MAX] {
            assert!(cfg.bucket(ck) < cfg.size);
        }
    }

    #[test]
    fn source_table_keeps_first_position() {
        let mut t = SourceTable::new(1024);
        assert_eq!(t.lookup(99), None);
        t.insert(99, 0);
        t.insert(99, 7000);
        assert_eq!(t.lookup(99), Some(0));
    }

    #[test]
    fn target_table_keeps_latest_position() {
        let mut t = TargetTable::new(1024);
        t.insert(42, 100);
        t.insert(42, 200);
        assert_eq!(t.lookup(42), Some(200));
    }
}
