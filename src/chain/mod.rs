// Chain mutation: the only write strategy is decode, patch, re-encode.
//
// Paths handed to chain operations are directory keys, relative to the
// context root. Files are touched at `root.join(key)` and locks are keyed
// on that joined path. The root must be canonical for processes to agree
// on lock keys; `DeltaFs::new` canonicalizes it.
//
// - `mutator` writes into a child or into a parent and all its children.
// - `reorg`   promotes a child when its parent goes away, and truncates.

pub mod mutator;
pub mod reorg;

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::codec::{self, SourceHandle};
use crate::config::Options;
use crate::directory::ChainDirectory;
use crate::error::Result;
use crate::lock::LockManager;

pub use mutator::{write_child, write_parent};
pub use reorg::{promote, truncate};

/// Everything a chain operation needs besides its arguments.
#[derive(Clone, Copy)]
pub struct ChainContext<'a> {
    pub root: &'a Path,
    pub options: &'a Options,
    pub locks: &'a LockManager,
    pub directory: &'a dyn ChainDirectory,
}

impl ChainContext<'_> {
    pub fn resolve(&self, key: &Path) -> PathBuf {
        self.root.join(key)
    }

    fn resolve_all(&self, keys: &[PathBuf]) -> Vec<PathBuf> {
        keys.iter().map(|k| self.resolve(k)).collect()
    }
}

// ---------------------------------------------------------------------------
// Scratch helpers
// ---------------------------------------------------------------------------

/// Decode `child` against `parent` into an anonymous scratch file.
pub(crate) fn materialize(ctx: &ChainContext<'_>, child: &Path, parent: &Path) -> Result<File> {
    let mut source = SourceHandle::for_options(parent, ctx.options)?;
    let mut delta = BufReader::with_capacity(ctx.options.buffer_size, File::open(child)?);
    let mut scratch = tempfile::tempfile()?;
    {
        let mut out = BufWriter::with_capacity(ctx.options.buffer_size, &mut scratch);
        let n = codec::decode(&mut out, &mut delta, &mut source)?;
        out.flush()?;
        debug!("materialized {}: {n} bytes", child.display());
    }
    Ok(scratch)
}

/// Encode `input` against `parent` and atomically replace `output`.
///
/// The logical length is recorded for `key` before any delta byte is
/// written. The encode goes to a temporary file next to `output`, so a
/// failure leaves the previous content in place.
pub(crate) fn encode_into(
    ctx: &ChainContext<'_>,
    key: Option<&Path>,
    input: &mut File,
    parent: &Path,
    output: &Path,
) -> Result<u64> {
    let len = input.metadata()?.len();
    if let Some(key) = key {
        ctx.directory.update_size(key, len)?;
    }
    input.seek(SeekFrom::Start(0))?;

    let mut source = SourceHandle::for_options(parent, ctx.options)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent_dir(output))?;
    {
        let mut reader = BufReader::with_capacity(ctx.options.buffer_size, &mut *input);
        let mut out = BufWriter::with_capacity(ctx.options.buffer_size, tmp.as_file_mut());
        codec::encode(&mut out, &mut reader, &mut source)?;
        out.flush()?;
    }
    tmp.persist(output)?;
    Ok(len)
}

/// Write `data` at `offset`, zero-filling any gap past the end.
pub(crate) fn write_at(file: &mut File, offset: u64, data: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    Ok(())
}

pub(crate) fn open_rw(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().read(true).write(true).open(path)?)
}

pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::directory::MemoryDirectory;
    use std::fs;

    /// A rooted chain store in a temporary directory.
    pub struct Store {
        pub tmp: tempfile::TempDir,
        pub options: Options,
        pub locks: LockManager,
        pub directory: MemoryDirectory,
    }

    impl Store {
        pub fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let options = Options::default().with_lock_dir(tmp.path().join(".locks"));
            let locks = LockManager::new(&options.lock_dir).unwrap();
            Self {
                tmp,
                options,
                locks,
                directory: MemoryDirectory::new(),
            }
        }

        pub fn ctx(&self) -> ChainContext<'_> {
            ChainContext {
                root: self.tmp.path(),
                options: &self.options,
                locks: &self.locks,
                directory: &self.directory,
            }
        }

        pub fn plain(&self, name: &str, bytes: &[u8]) -> PathBuf {
            fs::write(self.tmp.path().join(name), bytes).unwrap();
            PathBuf::from(name)
        }

        /// Store `content` as a child of `parent`.
        pub fn child(&self, name: &str, parent: &Path, content: &[u8]) -> PathBuf {
            let ctx = self.ctx();
            let key = PathBuf::from(name);
            let mut input = tempfile::tempfile().unwrap();
            input.write_all(content).unwrap();
            self.directory.add(parent, &key, 0).unwrap();
            encode_into(
                &ctx,
                Some(key.as_path()),
                &mut input,
                &ctx.resolve(parent),
                &ctx.resolve(&key),
            )
            .unwrap();
            key
        }

        pub fn raw(&self, key: &Path) -> Vec<u8> {
            fs::read(self.tmp.path().join(key)).unwrap()
        }

        /// Logical content of `child` decoded against `parent`.
        pub fn logical(&self, child: &Path, parent: &Path) -> Vec<u8> {
            let ctx = self.ctx();
            let mut scratch =
                materialize(&ctx, &ctx.resolve(child), &ctx.resolve(parent)).unwrap();
            let mut out = Vec::new();
            scratch.seek(SeekFrom::Start(0)).unwrap();
            std::io::Read::read_to_end(&mut scratch, &mut out).unwrap();
            out
        }
    }
}
