// VCDIFF decoding: the resumable decode stream.
//
// Input arrives in arbitrary chunks. The stream parses the file header,
// then for every window: the window header (reporting `WindowStart` so
// the driver can inspect the target length and choose to skip), the
// three sections, and instruction execution. Source COPYs are served
// from the resident block; when a COPY needs a block that is not
// resident the stream reports `NeedSourceBlock` and resumes mid-COPY.

use log::debug;

use super::address_cache::AddressCache;
use super::code_table::{self, ADD, CPY, NOOP, RUN};
use super::header::{FileHeader, WindowHeader};
use super::{CodecError, SourceBlock, SourceInfo, Step, adler32, resident_is, varint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FileHeader,
    WindowHeader,
    /// `WindowStart` reported; the skip flag is consulted next.
    Started,
    /// Discarding a skipped window's sections.
    Skipping { remaining: u64 },
    Sections,
    Executing,
    /// `WindowFinish` is the next step.
    Finishing,
}

/// A source COPY that has not been fully served yet.
#[derive(Debug, Clone, Copy)]
struct PendingCopy {
    offset: u64,
    remaining: usize,
}

/// Sections and cursors of the window being executed.
struct WindowExec {
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    data_pos: usize,
    inst_pos: usize,
    addr_pos: usize,
    second: Option<(u8, u8)>,
    copy: Option<PendingCopy>,
}

/// Per-call decode session.
pub struct DecodeStream {
    source: SourceInfo,
    input: Vec<u8>,
    input_pos: usize,
    flush: bool,
    state: State,
    header: Option<WindowHeader>,
    skip: bool,
    exec: Option<WindowExec>,
    acache: AddressCache,
    output: Vec<u8>,
    verify_checksum: bool,
    windows: u64,
}

impl DecodeStream {
    pub fn new(source: SourceInfo) -> Self {
        Self {
            source,
            input: Vec::new(),
            input_pos: 0,
            flush: false,
            state: State::FileHeader,
            header: None,
            skip: false,
            exec: None,
            acache: AddressCache::new(),
            output: Vec::new(),
            verify_checksum: true,
            windows: 0,
        }
    }

    /// Accept windows whose Adler-32 does not match.
    pub fn without_checksum(mut self) -> Self {
        self.verify_checksum = false;
        self
    }

    /// Append delta bytes.
    pub fn avail_input(&mut self, chunk: &[u8]) {
        if self.input_pos > 0 {
            self.input.drain(..self.input_pos);
            self.input_pos = 0;
        }
        self.input.extend_from_slice(chunk);
    }

    /// No more input will follow.
    pub fn set_flush(&mut self) {
        self.flush = true;
    }

    /// Skip (or stop skipping) the window just reported by `WindowStart`.
    /// A skipped window produces no `Output` and requests no source blocks.
    pub fn set_skip_window(&mut self, skip: bool) {
        self.skip = skip;
    }

    /// Target length of the current window.
    pub fn window_target_len(&self) -> u64 {
        self.header.as_ref().map_or(0, |h| h.target_window_len)
    }

    /// Target bytes of the last `Step::Output`: one whole window.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn windows(&self) -> u64 {
        self.windows
    }

    fn pending(&self) -> &[u8] {
        &self.input[self.input_pos..]
    }

    fn starve(&self) -> Result<Step, CodecError> {
        if self.flush {
            Err(CodecError::Truncated)
        } else {
            Ok(Step::NeedInput)
        }
    }

    pub fn step(&mut self, resident: Option<&SourceBlock>) -> Result<Step, CodecError> {
        loop {
            match self.state {
                State::FileHeader => {
                    let Some((_, used)) = FileHeader::parse(self.pending())? else {
                        return self.starve();
                    };
                    self.input_pos += used;
                    self.state = State::WindowHeader;
                    return Ok(Step::GotHeader);
                }
                State::WindowHeader => {
                    if self.pending().is_empty() {
                        return Ok(Step::NeedInput);
                    }
                    let Some((hdr, used)) = WindowHeader::parse(self.pending())? else {
                        return self.starve();
                    };
                    self.input_pos += used;
                    self.check_copy_window(&hdr)?;
                    self.header = Some(hdr);
                    self.skip = false;
                    self.state = State::Started;
                    return Ok(Step::WindowStart);
                }
                State::Started => {
                    let sections = self.header.as_ref().map_or(0, WindowHeader::sections_len);
                    self.state = if self.skip {
                        State::Skipping {
                            remaining: sections,
                        }
                    } else {
                        State::Sections
                    };
                }
                State::Skipping { remaining } => {
                    let n = remaining.min(self.pending().len() as u64);
                    self.input_pos += n as usize;
                    if n < remaining {
                        self.state = State::Skipping {
                            remaining: remaining - n,
                        };
                        return self.starve();
                    }
                    debug!("skipped window {}", self.windows);
                    self.state = State::Finishing;
                }
                State::Sections => {
                    let Some(hdr) = self.header.as_ref() else {
                        return Err(CodecError::Malformed("window without header".into()));
                    };
                    if (self.pending().len() as u64) < hdr.sections_len() {
                        return self.starve();
                    }
                    let (d, i, a) = (
                        hdr.data_len as usize,
                        hdr.inst_len as usize,
                        hdr.addr_len as usize,
                    );
                    let s = &self.input[self.input_pos..];
                    self.exec = Some(WindowExec {
                        data: s[..d].to_vec(),
                        inst: s[d..d + i].to_vec(),
                        addr: s[d + i..d + i + a].to_vec(),
                        data_pos: 0,
                        inst_pos: 0,
                        addr_pos: 0,
                        second: None,
                        copy: None,
                    });
                    self.input_pos += d + i + a;
                    self.output.clear();
                    self.acache.reset();
                    self.state = State::Executing;
                }
                State::Executing => {
                    let (Some(hdr), Some(exec)) = (self.header.as_ref(), self.exec.as_mut()) else {
                        return Err(CodecError::Malformed("window without sections".into()));
                    };
                    if let Some(n) = exec.run(
                        hdr,
                        self.source,
                        resident,
                        &mut self.acache,
                        &mut self.output,
                    )? {
                        return Ok(Step::NeedSourceBlock(n));
                    }
                    self.exec = None;
                    self.finish_window()?;
                    self.state = State::Finishing;
                    return Ok(Step::Output);
                }
                State::Finishing => {
                    self.windows += 1;
                    self.state = State::WindowHeader;
                    return Ok(Step::WindowFinish);
                }
            }
        }
    }

    fn check_copy_window(&self, hdr: &WindowHeader) -> Result<(), CodecError> {
        if !hdr.has_source() {
            return Ok(());
        }
        let end = hdr.copy_window_offset.checked_add(hdr.copy_window_len);
        match end {
            Some(end) if end <= self.source.len => Ok(()),
            _ => Err(CodecError::SourceUnderflow {
                offset: hdr.copy_window_offset,
                needed: hdr.copy_window_len,
                len: self.source.len,
            }),
        }
    }

    fn finish_window(&self) -> Result<(), CodecError> {
        let Some(hdr) = self.header.as_ref() else {
            return Ok(());
        };
        let actual = self.output.len() as u64;
        if actual != hdr.target_window_len {
            return Err(CodecError::TargetLength {
                expected: hdr.target_window_len,
                actual,
            });
        }
        if self.verify_checksum
            && let Some(expected) = hdr.adler32
        {
            let actual = adler32(&self.output);
            if actual != expected {
                return Err(CodecError::ChecksumMismatch { expected, actual });
            }
        }
        debug!("decoded window {}: {} bytes", self.windows, actual);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Instruction execution
// ---------------------------------------------------------------------------

impl WindowExec {
    /// Execute until the window is complete (`None`) or a source block
    /// that is not resident is needed (`Some(block)`).
    fn run(
        &mut self,
        hdr: &WindowHeader,
        source: SourceInfo,
        resident: Option<&SourceBlock>,
        acache: &mut AddressCache,
        out: &mut Vec<u8>,
    ) -> Result<Option<u64>, CodecError> {
        let table = code_table::default_code_table();
        loop {
            if let Some(mut copy) = self.copy {
                let bs = source.block_size as u64;
                while copy.remaining > 0 {
                    let n = copy.offset / bs;
                    let Some(block) = resident_is(resident, n) else {
                        self.copy = Some(copy);
                        return Ok(Some(n));
                    };
                    let avail = block
                        .data
                        .get((copy.offset - n * bs) as usize..)
                        .unwrap_or(&[]);
                    if avail.is_empty() {
                        return Err(CodecError::SourceUnderflow {
                            offset: copy.offset,
                            needed: copy.remaining as u64,
                            len: source.len,
                        });
                    }
                    let take = avail.len().min(copy.remaining);
                    out.extend_from_slice(&avail[..take]);
                    copy.offset += take as u64;
                    copy.remaining -= take;
                }
                self.copy = None;
            }

            if let Some((itype, size)) = self.second.take() {
                self.half(itype, size, hdr, acache, out)?;
                continue;
            }

            let Some(&opcode) = self.inst.get(self.inst_pos) else {
                return Ok(None);
            };
            self.inst_pos += 1;
            let entry = table[opcode as usize];
            if entry.type2 != NOOP {
                self.second = Some((entry.type2, entry.size2));
            }
            if entry.type1 != NOOP {
                self.half(entry.type1, entry.size1, hdr, acache, out)?;
            }
        }
    }

    fn half(
        &mut self,
        itype: u8,
        table_size: u8,
        hdr: &WindowHeader,
        acache: &mut AddressCache,
        out: &mut Vec<u8>,
    ) -> Result<(), CodecError> {
        let size = if table_size == 0 {
            let (v, used) = varint::read_u32_complete(&self.inst[self.inst_pos..])
                .ok_or(CodecError::SectionUnderflow("instruction"))?;
            self.inst_pos += used;
            v as usize
        } else {
            table_size as usize
        };

        if (out.len() + size) as u64 > hdr.target_window_len {
            return Err(CodecError::Malformed(
                "instructions overrun the target window".into(),
            ));
        }

        match itype {
            RUN => {
                let &byte = self
                    .data
                    .get(self.data_pos)
                    .ok_or(CodecError::SectionUnderflow("data"))?;
                self.data_pos += 1;
                out.resize(out.len() + size, byte);
            }
            ADD => {
                let bytes = self
                    .data
                    .get(self.data_pos..self.data_pos + size)
                    .ok_or(CodecError::SectionUnderflow("data"))?;
                out.extend_from_slice(bytes);
                self.data_pos += size;
            }
            _ => {
                let cwl = hdr.copy_window_len;
                let here = cwl + out.len() as u64;
                let (addr, used) = acache.decode(itype - CPY, &self.addr[self.addr_pos..], here)?;
                self.addr_pos += used;

                if addr < cwl {
                    if addr + size as u64 > cwl {
                        return Err(CodecError::Malformed(
                            "COPY spans source and target".into(),
                        ));
                    }
                    self.copy = Some(PendingCopy {
                        offset: hdr.copy_window_offset + addr,
                        remaining: size,
                    });
                } else {
                    let from = (addr - cwl) as usize;
                    if from + size <= out.len() {
                        out.extend_from_within(from..from + size);
                    } else {
                        // Overlapping: later bytes read what this COPY wrote.
                        for i in 0..size {
                            let b = out[from + i];
                            out.push(b);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory driver
// ---------------------------------------------------------------------------

/// Decode `delta` against an in-memory `source`.
pub fn decode_in_memory(delta: &[u8], source: &[u8]) -> Result<Vec<u8>, CodecError> {
    const BLOCK: usize = 1 << 16;
    let info = SourceInfo {
        len: source.len() as u64,
        block_size: BLOCK,
    };
    let mut dec = DecodeStream::new(info);
    dec.avail_input(delta);
    dec.set_flush();

    let mut resident: Option<SourceBlock> = None;
    let mut out = Vec::new();
    loop {
        match dec.step(resident.as_ref())? {
            Step::NeedInput => return Ok(out),
            Step::Output => out.extend_from_slice(dec.output()),
            Step::NeedSourceBlock(n) => {
                let start = usize::try_from(n)
                    .ok()
                    .and_then(|n| n.checked_mul(BLOCK))
                    .filter(|&s| s < source.len())
                    .ok_or(CodecError::InvalidAddress)?;
                let end = (start + BLOCK).min(source.len());
                resident = Some(SourceBlock {
                    index: n,
                    data: source[start..end].to_vec(),
                });
            }
            Step::GotHeader | Step::WindowStart | Step::WindowFinish => {}
        }
    }
}
