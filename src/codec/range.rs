// Partial reads of a delta file.
//
// Runs the decode loop, but windows that do not intersect the requested
// range are skipped at `WindowStart` so they are never materialized and
// never pull source blocks. Output of intersecting windows is clipped to
// the range.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;

use super::{SourceHandle, read_some};
use crate::config::Options;
use crate::error::Result;
use crate::vcdiff::{DecodeStream, Step};

/// Read up to `length` logical bytes at `offset` from the delta file
/// `child`, decoded against `parent`. Shorter only at end of file.
pub fn read_range(
    child: &Path,
    parent: &Path,
    length: usize,
    offset: u64,
    options: &Options,
) -> Result<Vec<u8>> {
    let mut source = SourceHandle::for_options(parent, options)?;
    let mut delta = BufReader::new(File::open(child)?);
    read_range_from(&mut delta, &mut source, length, offset)
}

/// `read_range` over an already-open delta stream and source.
pub fn read_range_from<R: Read>(
    delta: &mut R,
    source: &mut SourceHandle,
    length: usize,
    offset: u64,
) -> Result<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let end = offset.saturating_add(length as u64);
    let mut stream = DecodeStream::new(source.info());
    let mut chunk = vec![0u8; source.block_size()];
    let mut flushed = false;

    let mut result = Vec::new();
    // Logical offset of the current window's first byte.
    let mut target_offset = 0u64;
    let mut skipped = 0u64;

    loop {
        match stream.step(source.resident())? {
            Step::NeedInput => {
                if flushed {
                    break;
                }
                match read_some(delta, &mut chunk)? {
                    0 => {
                        stream.set_flush();
                        flushed = true;
                    }
                    n => stream.avail_input(&chunk[..n]),
                }
            }
            Step::WindowStart => {
                let window_len = stream.window_target_len();
                let hit = target_offset < end && target_offset + window_len > offset;
                stream.set_skip_window(!hit);
                if !hit {
                    skipped += 1;
                }
            }
            Step::Output => {
                let out = stream.output();
                let lo = offset.max(target_offset);
                let hi = end.min(target_offset + out.len() as u64);
                if lo < hi {
                    result.extend_from_slice(
                        &out[(lo - target_offset) as usize..(hi - target_offset) as usize],
                    );
                }
            }
            Step::WindowFinish => {
                target_offset += stream.window_target_len();
                if target_offset >= end {
                    break;
                }
            }
            Step::NeedSourceBlock(n) => source.load(n)?,
            Step::GotHeader => {}
        }
    }

    debug!(
        "range [{offset}, {end}): {} bytes, {skipped} windows skipped",
        result.len()
    );
    Ok(result)
}
