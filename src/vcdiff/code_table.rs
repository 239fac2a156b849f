// VCDIFF default code table (RFC 3284, Section 5.6).
//
// 256 opcodes, each describing one or two half-instructions. COPY
// half-instructions carry their address mode as `CPY + mode`.

use std::sync::LazyLock;

pub const NOOP: u8 = 0;
pub const ADD: u8 = 1;
pub const RUN: u8 = 2;
pub const CPY: u8 = 3;

/// Shortest COPY the table can express with an implicit size.
pub const MIN_MATCH: u8 = 4;

const ADD_SIZES: u8 = 17;
const CPY_SIZES: u8 = 15;
const NEAR_MODES: u8 = 4;
const CPY_MODES: u8 = 2 + NEAR_MODES + 3;

/// One opcode. A size of zero means the size follows in the instruction
/// section as a varint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Opcode {
    pub type1: u8,
    pub size1: u8,
    pub type2: u8,
    pub size2: u8,
}

impl Opcode {
    const fn single(t: u8, s: u8) -> Self {
        Self {
            type1: t,
            size1: s,
            type2: NOOP,
            size2: 0,
        }
    }
}

pub type CodeTable = [Opcode; 256];

fn build() -> CodeTable {
    let mut tbl = [Opcode::default(); 256];
    let mut entries = Vec::with_capacity(256);

    entries.push(Opcode::single(RUN, 0));
    entries.push(Opcode::single(ADD, 0));
    entries.extend((1..=ADD_SIZES).map(|s| Opcode::single(ADD, s)));

    for mode in 0..CPY_MODES {
        entries.push(Opcode::single(CPY + mode, 0));
        entries.extend((MIN_MATCH..MIN_MATCH + CPY_SIZES).map(|s| Opcode::single(CPY + mode, s)));
    }

    // ADD(1..4) + COPY(4..6 near, 4 same)
    for mode in 0..CPY_MODES {
        let cpy_max = if mode < 2 + NEAR_MODES { 6 } else { 4 };
        for add in 1..=4 {
            for cpy in MIN_MATCH..=cpy_max {
                entries.push(Opcode {
                    type1: ADD,
                    size1: add,
                    type2: CPY + mode,
                    size2: cpy,
                });
            }
        }
    }

    // COPY(4) + ADD(1)
    for mode in 0..CPY_MODES {
        entries.push(Opcode {
            type1: CPY + mode,
            size1: 4,
            type2: ADD,
            size2: 1,
        });
    }

    debug_assert_eq!(entries.len(), 256);
    for (slot, entry) in tbl.iter_mut().zip(entries) {
        *slot = entry;
    }
    tbl
}

pub fn default_code_table() -> &'static CodeTable {
    static TABLE: LazyLock<CodeTable> = LazyLock::new(build);
    &TABLE
}

// ---------------------------------------------------------------------------
// Encoder-side opcode selection
// ---------------------------------------------------------------------------

/// An instruction waiting for its opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfInst {
    pub itype: u8,
    pub size: u32,
}

/// Opcode choice for `inst`: the single opcode, plus a double opcode if
/// `inst` can be merged into the previous, still unwritten, instruction.
pub fn choose(prev: Option<&HalfInst>, inst: &HalfInst) -> (u8, Option<u8>) {
    match inst.itype {
        RUN => (0, None),
        ADD => {
            if inst.size == 0 || inst.size > ADD_SIZES as u32 {
                return (1, None);
            }
            let double = match prev {
                Some(p) if inst.size == 1 && p.size == 4 && p.itype >= CPY => {
                    Some(247 + (p.itype - CPY))
                }
                _ => None,
            };
            (1 + inst.size as u8, double)
        }
        _ => {
            let mode = inst.itype - CPY;
            let base = 19 + 16 * mode;
            if inst.size < MIN_MATCH as u32 || inst.size > (MIN_MATCH + CPY_SIZES - 1) as u32 {
                return (base, None);
            }
            let size = inst.size as u8;
            let double = match prev {
                Some(p) if p.itype == ADD && (1..=4).contains(&p.size) => {
                    let add = p.size as u8;
                    if size <= 6 && mode < 2 + NEAR_MODES {
                        Some(163 + mode * 12 + 3 * (add - 1) + (size - 4))
                    } else if size == 4 && mode >= 2 + NEAR_MODES {
                        Some(235 + (mode - 2 - NEAR_MODES) * 4 + (add - 1))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            (base + size - 3, double)
        }
    }
}
