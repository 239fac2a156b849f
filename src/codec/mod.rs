// File-level delta codec.
//
// `encode` and `decode` drive the VCDIFF streams against a parent file
// opened as a `SourceHandle`. The handle keeps exactly one block of the
// parent in memory and refills it by seeking whenever a stream asks for a
// different block. Every call builds its own stream, so concurrent calls
// on different chains share nothing.

pub mod range;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::config::Options;
use crate::error::Result;
use crate::vcdiff::{CodecError, DecodeStream, EncodeStream, SourceBlock, SourceInfo, Step};

// ---------------------------------------------------------------------------
// Source handle
// ---------------------------------------------------------------------------

/// An open parent file plus its single resident block.
pub struct SourceHandle {
    file: File,
    len: u64,
    block_size: usize,
    resident: Option<SourceBlock>,
    loads: u64,
}

impl SourceHandle {
    /// Open `path` read-only. `block_size` should be the window size.
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file, block_size)
    }

    /// Open `path` with blocks sized by the configured window.
    pub fn for_options(path: &Path, options: &Options) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Self::from_file(file, options.window_size(len))
    }

    pub fn from_file(file: File, block_size: usize) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            block_size: block_size.max(1),
            resident: None,
            loads: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            len: self.len,
            block_size: self.block_size,
        }
    }

    pub fn resident(&self) -> Option<&SourceBlock> {
        self.resident.as_ref()
    }

    /// Number of block reads performed so far.
    pub fn loads(&self) -> u64 {
        self.loads
    }

    /// Replace the resident block with block `n`.
    pub fn load(&mut self, n: u64) -> Result<()> {
        let bs = self.block_size as u64;
        let start = n.checked_mul(bs).filter(|&s| s < self.len).ok_or(
            CodecError::SourceUnderflow {
                offset: n.saturating_mul(bs),
                needed: bs,
                len: self.len,
            },
        )?;
        let want = (self.len - start).min(bs) as usize;

        let mut block = self.resident.take().unwrap_or_default();
        block.index = n;
        block.data.resize(want, 0);
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut block.data)?;
        self.resident = Some(block);
        self.loads += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Negotiation loops
// ---------------------------------------------------------------------------

/// Encode `input` against `source` into `output`, one window per
/// `source.block_size()` bytes of input. Returns delta bytes written.
pub fn encode<W: Write, R: Read>(
    output: &mut W,
    input: &mut R,
    source: &mut SourceHandle,
) -> Result<u64> {
    let mut stream = EncodeStream::new(source.info());
    let mut chunk = vec![0u8; source.block_size()];
    let mut flushed = false;
    let mut written = 0u64;

    loop {
        match stream.step(source.resident()) {
            Step::NeedInput => {
                if flushed {
                    break;
                }
                let n = read_full(input, &mut chunk)?;
                if n > 0 {
                    stream.avail_input(&chunk[..n]);
                }
                if n < chunk.len() {
                    stream.set_flush();
                    flushed = true;
                }
            }
            Step::Output => {
                // A short write is fatal.
                output.write_all(stream.output())?;
                written += stream.output().len() as u64;
            }
            Step::NeedSourceBlock(n) => source.load(n)?,
            Step::GotHeader | Step::WindowStart | Step::WindowFinish => {}
        }
    }

    debug!(
        "encode: {} windows, {written} delta bytes, {} source reads",
        stream.windows(),
        source.loads()
    );
    Ok(written)
}

/// Decode the delta in `input` against `source` into `output`.
/// Returns target bytes written.
pub fn decode<W: Write, R: Read>(
    output: &mut W,
    input: &mut R,
    source: &mut SourceHandle,
) -> Result<u64> {
    let mut stream = DecodeStream::new(source.info());
    let mut chunk = vec![0u8; source.block_size()];
    let mut flushed = false;
    let mut written = 0u64;

    loop {
        match stream.step(source.resident())? {
            Step::NeedInput => {
                if flushed {
                    break;
                }
                match read_some(input, &mut chunk)? {
                    0 => {
                        stream.set_flush();
                        flushed = true;
                    }
                    n => stream.avail_input(&chunk[..n]),
                }
            }
            Step::Output => {
                output.write_all(stream.output())?;
                written += stream.output().len() as u64;
            }
            Step::NeedSourceBlock(n) => source.load(n)?,
            Step::GotHeader | Step::WindowStart | Step::WindowFinish => {}
        }
    }

    debug!(
        "decode: {} windows, {written} target bytes, {} source reads",
        stream.windows(),
        source.loads()
    );
    Ok(written)
}

/// Read until `buf` is full or the reader is exhausted.
pub(crate) fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

pub(crate) fn read_some<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match input.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}
