// Block-aware match finding.
//
// The source is never held in memory as a whole. `SourceIndex` is built
// one resident block at a time, and `WindowMatcher` verifies and extends
// candidate matches against whichever block is resident, reporting the
// block it needs whenever the resident one does not cover a comparison.
// Both are resumable: a `NeedBlock` result leaves them ready to continue
// from the same point once the block has been loaded.

use crate::hash::config::{
    LARGE_LOOK, MIN_RUN, MIN_SOURCE_MATCH, MIN_TARGET_MATCH, SMALL_LOOK, source_step,
};
use crate::hash::rolling::{LargeHash, common_prefix, run_length, small_cksum};
use crate::hash::table::{SourceTable, TargetTable};

use super::encoder::WindowBuilder;
use super::{SourceBlock, SourceInfo, resident_is};

/// Result of advancing a resumable matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    NeedBlock(u64),
}

// ---------------------------------------------------------------------------
// Source index
// ---------------------------------------------------------------------------

pub struct SourceIndex {
    info: SourceInfo,
    hash: LargeHash,
    table: SourceTable,
    step: usize,
    next_block: u64,
}

impl SourceIndex {
    pub fn new(info: SourceInfo) -> Self {
        let step = source_step(info.len);
        let slots = usize::try_from(info.len / step as u64).unwrap_or(usize::MAX);
        Self {
            info,
            hash: LargeHash::new(LARGE_LOOK),
            table: SourceTable::new(slots),
            step,
            next_block: 0,
        }
    }

    pub fn info(&self) -> SourceInfo {
        self.info
    }

    /// Index every block not yet seen, asking for them in order.
    pub fn build(&mut self, resident: Option<&SourceBlock>) -> Progress {
        while self.next_block < self.info.block_count() {
            let Some(block) = resident_is(resident, self.next_block) else {
                return Progress::NeedBlock(self.next_block);
            };
            self.index_block(block);
            self.next_block += 1;
        }
        Progress::Done
    }

    /// Checksums never span two blocks.
    fn index_block(&mut self, block: &SourceBlock) {
        let base = block.index * self.info.block_size as u64;
        let look = self.hash.look;
        if block.data.len() < look {
            return;
        }
        let first = (self.step as u64 - base % self.step as u64) % self.step as u64;
        let mut off = first as usize;
        while off + look <= block.data.len() {
            let ck = self.hash.checksum(&block.data[off..]);
            self.table.insert(ck, base + off as u64);
            off += self.step;
        }
    }

    fn lookup(&self, cksum: u32) -> Option<u64> {
        self.table
            .lookup(cksum)
            .filter(|&pos| pos + self.hash.look as u64 <= self.info.len)
    }
}

// ---------------------------------------------------------------------------
// Window matcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Phase {
    Backward,
    Forward,
}

/// A source match being verified. `tgt`/`src` are its current start,
/// `len` the bytes confirmed from there.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    tgt: usize,
    src: u64,
    len: usize,
    phase: Phase,
}

pub struct WindowMatcher {
    pos: usize,
    lit_start: usize,
    rolling: Option<(usize, u32)>,
    candidate: Option<Candidate>,
    targets: TargetTable,
}

impl WindowMatcher {
    pub fn new(target_len: usize) -> Self {
        Self {
            pos: 0,
            lit_start: 0,
            rolling: None,
            candidate: None,
            targets: TargetTable::new(target_len),
        }
    }

    /// Emit instructions for `target` into `out`, consulting `index` for
    /// source matches. Returns `NeedBlock` to pause until a block is loaded.
    pub fn run(
        &mut self,
        target: &[u8],
        index: Option<&SourceIndex>,
        resident: Option<&SourceBlock>,
        out: &mut WindowBuilder,
    ) -> Progress {
        loop {
            if let Some(mut cand) = self.candidate {
                let Some(index) = index else {
                    self.candidate = None;
                    continue;
                };
                if let Progress::NeedBlock(n) = self.extend(&mut cand, target, index, resident) {
                    self.candidate = Some(cand);
                    return Progress::NeedBlock(n);
                }
                self.candidate = None;
                if cand.len >= MIN_SOURCE_MATCH {
                    out.add(&target[self.lit_start..cand.tgt]);
                    out.copy(cand.len, cand.src);
                    self.pos = cand.tgt + cand.len;
                    self.lit_start = self.pos;
                } else {
                    self.local_step(target, out);
                }
                continue;
            }

            if self.pos + LARGE_LOOK.max(SMALL_LOOK) > target.len() {
                break;
            }

            if let Some(index) = index {
                let ck = match self.rolling {
                    Some((p, ck)) if p + 1 == self.pos => index.hash.update(ck, &target[p..]),
                    _ => index.hash.checksum(&target[self.pos..]),
                };
                self.rolling = Some((self.pos, ck));
                if let Some(src) = index.lookup(ck) {
                    self.candidate = Some(Candidate {
                        tgt: self.pos,
                        src,
                        len: 0,
                        phase: Phase::Backward,
                    });
                    continue;
                }
            }

            self.local_step(target, out);
        }

        out.add(&target[self.lit_start..]);
        self.lit_start = target.len();
        self.pos = target.len();
        Progress::Done
    }

    /// Look for a RUN or a copy from earlier in the window at `pos`,
    /// otherwise leave the byte in the pending literal.
    fn local_step(&mut self, target: &[u8], out: &mut WindowBuilder) {
        let pos = self.pos;
        let byte = target[pos];
        let run = run_length(&target[pos..], byte);
        if run >= MIN_RUN {
            out.add(&target[self.lit_start..pos]);
            out.run(run, byte);
            self.pos = pos + run;
            self.lit_start = self.pos;
            return;
        }

        let ck = small_cksum(&target[pos..]);
        let earlier = self.targets.lookup(ck);
        self.targets.insert(ck, pos);
        if let Some(q) = earlier {
            let len = common_prefix(&target[q..], &target[pos..]);
            if len >= MIN_TARGET_MATCH {
                out.add(&target[self.lit_start..pos]);
                out.copy_from_target(len, q);
                self.pos = pos + len;
                self.lit_start = self.pos;
                return;
            }
        }

        self.pos += 1;
    }

    fn extend(
        &self,
        cand: &mut Candidate,
        target: &[u8],
        index: &SourceIndex,
        resident: Option<&SourceBlock>,
    ) -> Progress {
        let bs = index.info.block_size as u64;

        if let Phase::Backward = cand.phase {
            if cand.src > 0 && cand.tgt > self.lit_start {
                let n = cand.src / bs;
                let Some(block) = resident_is(resident, n) else {
                    return Progress::NeedBlock(n);
                };
                let mut in_block = (cand.src - n * bs) as usize;
                while in_block > 0
                    && cand.tgt > self.lit_start
                    && block.data.get(in_block - 1) == Some(&target[cand.tgt - 1])
                {
                    in_block -= 1;
                    cand.tgt -= 1;
                    cand.src -= 1;
                }
            }
            cand.phase = Phase::Forward;
        }

        loop {
            let src = cand.src + cand.len as u64;
            let tgt = cand.tgt + cand.len;
            if tgt >= target.len() || src >= index.info.len {
                return Progress::Done;
            }
            let n = src / bs;
            let Some(block) = resident_is(resident, n) else {
                return Progress::NeedBlock(n);
            };
            let avail = block.data.get((src - n * bs) as usize..).unwrap_or(&[]);
            let want = &target[tgt..];
            let same = common_prefix(avail, want);
            cand.len += same;
            if same == 0 || same < avail.len().min(want.len()) {
                return Progress::Done;
            }
        }
    }
}
