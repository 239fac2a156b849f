// VCDIFF encoding: window assembly and the resumable encode stream.
//
// `WindowBuilder` turns ADD/COPY/RUN instructions into the three window
// sections, packing adjacent instructions into double opcodes.
// `EncodeStream` turns each input chunk into one window, negotiating
// source blocks with its driver through `Step`.

use log::debug;

use super::address_cache::AddressCache;
use super::code_table::{self, ADD, CPY, HalfInst, RUN};
use super::header::{FileHeader, WinIndicator, WindowHeader};
use super::matcher::{Progress, SourceIndex, WindowMatcher};
use super::{SourceBlock, SourceInfo, Step, adler32, varint};

// ---------------------------------------------------------------------------
// Window builder
// ---------------------------------------------------------------------------

pub struct WindowBuilder {
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    acache: AddressCache,
    /// Last instruction and its single opcode, held back in case the next
    /// one can share a double opcode with it.
    pending: Option<(HalfInst, u8)>,
    target_len: u64,
    copy_window_len: u64,
}

impl WindowBuilder {
    /// `copy_window_len` is the number of source bytes addressable by COPY;
    /// zero means the window has no source.
    pub fn new(copy_window_len: u64) -> Self {
        Self {
            data: Vec::new(),
            inst: Vec::new(),
            addr: Vec::new(),
            acache: AddressCache::new(),
            pending: None,
            target_len: 0,
            copy_window_len,
        }
    }

    pub fn add(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.data.extend_from_slice(bytes);
        self.push(HalfInst {
            itype: ADD,
            size: bytes.len() as u32,
        });
    }

    pub fn run(&mut self, len: usize, byte: u8) {
        if len == 0 {
            return;
        }
        self.data.push(byte);
        self.push(HalfInst {
            itype: RUN,
            size: len as u32,
        });
    }

    /// COPY `len` bytes from `addr` in the combined address space:
    /// `0..copy_window_len` is the source, everything above is this window.
    pub fn copy(&mut self, len: usize, addr: u64) {
        if len == 0 {
            return;
        }
        let here = self.copy_window_len + self.target_len;
        let mode = self.acache.encode(addr, here, &mut self.addr);
        self.push(HalfInst {
            itype: CPY + mode,
            size: len as u32,
        });
    }

    /// COPY from offset `pos` of the window being built.
    pub fn copy_from_target(&mut self, len: usize, pos: usize) {
        self.copy(len, self.copy_window_len + pos as u64);
    }

    fn push(&mut self, inst: HalfInst) {
        let (code, double) = code_table::choose(self.pending.as_ref().map(|(p, _)| p), &inst);
        match double {
            Some(double) => {
                self.pending = None;
                self.inst.push(double);
            }
            None => {
                self.flush_pending();
                self.pending = Some((inst, code));
            }
        }
        self.target_len += inst.size as u64;
    }

    fn flush_pending(&mut self) {
        if let Some((inst, code)) = self.pending.take() {
            self.inst.push(code);
            if code_table::default_code_table()[code as usize].size1 == 0 {
                varint::push_u64(&mut self.inst, inst.size as u64);
            }
        }
    }

    /// Append the finished window (header and sections) to `out`.
    /// `target` is the window's full content, used for the checksum.
    pub fn finish(mut self, target: &[u8], checksum: bool, out: &mut Vec<u8>) {
        self.flush_pending();
        debug_assert_eq!(self.target_len, target.len() as u64);

        let indicator = if self.copy_window_len > 0 {
            WinIndicator::SOURCE
        } else {
            WinIndicator::empty()
        };
        let header = WindowHeader {
            indicator,
            copy_window_len: self.copy_window_len,
            copy_window_offset: 0,
            target_window_len: self.target_len,
            data_len: self.data.len() as u64,
            inst_len: self.inst.len() as u64,
            addr_len: self.addr.len() as u64,
            adler32: checksum.then(|| adler32(target)),
        };
        header.write(out);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.inst);
        out.extend_from_slice(&self.addr);
    }
}

// ---------------------------------------------------------------------------
// Encode stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for a chunk.
    Idle,
    /// `WindowStart` reported; next step indexes the source.
    Started,
    Indexing,
    Matching,
    /// Window bytes are in `output`; next step reports `WindowFinish`.
    Emitted,
}

/// Per-call encode session. Owns every buffer it uses; the only shared
/// input is the resident block the driver passes to `step`.
pub struct EncodeStream {
    source: SourceInfo,
    index: Option<SourceIndex>,
    input: Vec<u8>,
    flush: bool,
    output: Vec<u8>,
    header_written: bool,
    checksum: bool,
    state: State,
    builder: Option<WindowBuilder>,
    matcher: Option<WindowMatcher>,
    windows: u64,
}

impl EncodeStream {
    pub fn new(source: SourceInfo) -> Self {
        Self {
            source,
            index: (source.len > 0).then(|| SourceIndex::new(source)),
            input: Vec::new(),
            flush: false,
            output: Vec::new(),
            header_written: false,
            checksum: true,
            state: State::Idle,
            builder: None,
            matcher: None,
            windows: 0,
        }
    }

    /// Omit per-window Adler-32 checksums.
    pub fn without_checksum(mut self) -> Self {
        self.checksum = false;
        self
    }

    /// Hand over the next chunk; it becomes exactly one window.
    /// Only valid after `step` returned `NeedInput`.
    pub fn avail_input(&mut self, chunk: &[u8]) {
        debug_assert_eq!(self.state, State::Idle);
        self.input.clear();
        self.input.extend_from_slice(chunk);
    }

    /// Mark the last chunk: once it is encoded the stream is complete.
    pub fn set_flush(&mut self) {
        self.flush = true;
    }

    /// Bytes produced by the last `Step::Output`.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn windows(&self) -> u64 {
        self.windows
    }

    pub fn step(&mut self, resident: Option<&SourceBlock>) -> Step {
        loop {
            match self.state {
                State::Idle => {
                    if !self.input.is_empty() {
                        self.state = State::Started;
                        return Step::WindowStart;
                    }
                    if self.flush && !self.header_written {
                        self.output.clear();
                        self.write_file_header();
                        return Step::Output;
                    }
                    return Step::NeedInput;
                }
                State::Started => {
                    self.builder = Some(WindowBuilder::new(self.source.len));
                    self.matcher = Some(WindowMatcher::new(self.input.len()));
                    self.state = State::Indexing;
                }
                State::Indexing => {
                    if let Some(index) = self.index.as_mut()
                        && let Progress::NeedBlock(n) = index.build(resident)
                    {
                        return Step::NeedSourceBlock(n);
                    }
                    self.state = State::Matching;
                }
                State::Matching => {
                    let (Some(builder), Some(matcher)) =
                        (self.builder.as_mut(), self.matcher.as_mut())
                    else {
                        self.state = State::Started;
                        continue;
                    };
                    if let Progress::NeedBlock(n) =
                        matcher.run(&self.input, self.index.as_ref(), resident, builder)
                    {
                        return Step::NeedSourceBlock(n);
                    }
                    self.emit_window();
                    self.state = State::Emitted;
                    return Step::Output;
                }
                State::Emitted => {
                    self.state = State::Idle;
                    return Step::WindowFinish;
                }
            }
        }
    }

    fn write_file_header(&mut self) {
        FileHeader::default().write(&mut self.output);
        self.header_written = true;
    }

    fn emit_window(&mut self) {
        self.output.clear();
        if !self.header_written {
            self.write_file_header();
        }
        self.matcher = None;
        if let Some(builder) = self.builder.take() {
            builder.finish(&self.input, self.checksum, &mut self.output);
        }
        debug!(
            "encoded window {}: {} target bytes into {} delta bytes",
            self.windows,
            self.input.len(),
            self.output.len()
        );
        self.windows += 1;
        self.input.clear();
    }
}

// ---------------------------------------------------------------------------
// In-memory driver
// ---------------------------------------------------------------------------

/// Encode `target` against an in-memory `source`, `chunk` bytes per window.
pub fn encode_in_memory(source: &[u8], target: &[u8], chunk: usize) -> Vec<u8> {
    let chunk = chunk.max(1);
    let info = SourceInfo {
        len: source.len() as u64,
        block_size: chunk,
    };
    let mut enc = EncodeStream::new(info);
    let mut resident: Option<SourceBlock> = None;
    let mut out = Vec::new();
    let mut chunks = target.chunks(chunk);
    loop {
        match enc.step(resident.as_ref()) {
            Step::NeedInput => match chunks.next() {
                Some(c) => {
                    enc.avail_input(c);
                    if c.len() < chunk {
                        enc.set_flush();
                    }
                }
                None if enc.flush => break,
                None => enc.set_flush(),
            },
            Step::Output => out.extend_from_slice(enc.output()),
            Step::NeedSourceBlock(n) => {
                let start = (n as usize * chunk).min(source.len());
                let end = (start + chunk).min(source.len());
                resident = Some(SourceBlock {
                    index: n,
                    data: source[start..end].to_vec(),
                });
            }
            Step::WindowStart | Step::WindowFinish | Step::GotHeader => {}
        }
    }
    out
}
