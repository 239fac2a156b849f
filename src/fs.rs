// Filesystem-style front end over a root directory.
//
// Every path argument is taken relative to the root (leading `/` and `.`
// components are ignored, `..` is refused). The relative form is the
// directory key; joined onto the canonical root it is the file on disk
// and the lock key.
//
// Plain files pass straight through. Children are read through the range
// decoder and written through the chain mutator; parents route writes and
// truncation through their whole chain.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::chain::{self, ChainContext, encode_into, open_rw, write_at};
use crate::codec::range;
use crate::config::Options;
use crate::directory::ChainDirectory;
use crate::error::{Error, Result};
use crate::lock::LockManager;

/// Suffix of the backup `adopt` keeps while re-encoding a file in place.
pub const BACKUP_SUFFIX: &str = ".dlnbak";

/// Role of a path within its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Plain,
    Parent(Vec<PathBuf>),
    Child(PathBuf),
}

impl FileKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Parent(_) => "parent",
            Self::Child(_) => "child",
        }
    }
}

/// What `stat` reports about a path.
#[derive(Debug, Clone, Serialize)]
pub struct FileStat {
    pub path: PathBuf,
    pub kind: &'static str,
    pub parent: Option<PathBuf>,
    pub children: Vec<PathBuf>,
    /// Logical length.
    pub size: u64,
    /// Bytes on disk.
    pub stored: u64,
}

pub struct DeltaFs<D> {
    root: PathBuf,
    options: Options,
    locks: LockManager,
    directory: D,
}

impl<D: ChainDirectory> DeltaFs<D> {
    /// Open a store over the existing directory `root`.
    ///
    /// The root is canonicalized so that lock keys do not depend on how
    /// the caller spelled it.
    pub fn new(root: impl Into<PathBuf>, options: Options, directory: D) -> Result<Self> {
        let root = fs::canonicalize(root.into())?;
        let locks = LockManager::new(&options.lock_dir)?;
        directory.init_schema()?;
        Ok(Self {
            root,
            options,
            locks,
            directory,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    fn ctx(&self) -> ChainContext<'_> {
        ChainContext {
            root: &self.root,
            options: &self.options,
            locks: &self.locks,
            directory: &self.directory,
        }
    }

    /// Directory key for `path`.
    pub fn key(&self, path: &Path) -> Result<PathBuf> {
        let mut key = PathBuf::new();
        for part in path.components() {
            match part {
                Component::Normal(p) => key.push(p),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(invalid(path, "leaves the root"));
                }
            }
        }
        if key.as_os_str().is_empty() {
            return Err(invalid(path, "names the root"));
        }
        Ok(key)
    }

    pub fn classify(&self, path: &Path) -> Result<FileKind> {
        let key = self.key(path)?;
        self.classify_key(&key)
    }

    fn classify_key(&self, key: &Path) -> Result<FileKind> {
        if let Some(parent) = self.directory.parent(key)? {
            return Ok(FileKind::Child(parent));
        }
        let children = self.directory.children(key)?;
        if children.is_empty() {
            Ok(FileKind::Plain)
        } else {
            Ok(FileKind::Parent(children))
        }
    }

    /// Logical size: cached for children, on-disk length otherwise.
    pub fn size(&self, path: &Path) -> Result<u64> {
        let key = self.key(path)?;
        if let Some(size) = self.directory.size(&key)? {
            return Ok(size);
        }
        Ok(fs::metadata(self.root.join(&key))?.len())
    }

    pub fn stat(&self, path: &Path) -> Result<FileStat> {
        let key = self.key(path)?;
        let stored = fs::metadata(self.root.join(&key))?.len();
        let kind = self.classify_key(&key)?;
        let size = self.directory.size(&key)?.unwrap_or(stored);
        let (parent, children) = match &kind {
            FileKind::Plain => (None, Vec::new()),
            FileKind::Parent(c) => (None, c.clone()),
            FileKind::Child(p) => (Some(p.clone()), Vec::new()),
        };
        Ok(FileStat {
            path: key,
            kind: kind.name(),
            parent,
            children,
            size,
            stored,
        })
    }

    /// Up to `len` logical bytes at `offset`.
    pub fn read(&self, path: &Path, len: usize, offset: u64) -> Result<Vec<u8>> {
        let key = self.key(path)?;
        let file_path = self.root.join(&key);
        match self.classify_key(&key)? {
            FileKind::Child(parent) => {
                let _held = self.locks.acquire(&file_path)?;
                range::read_range(
                    &file_path,
                    &self.root.join(parent),
                    len,
                    offset,
                    &self.options,
                )
            }
            FileKind::Plain | FileKind::Parent(_) => {
                let mut file = File::open(&file_path)?;
                file.seek(SeekFrom::Start(offset))?;
                let mut out = Vec::new();
                file.take(len as u64).read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Write `data` at `offset`. Returns bytes written.
    pub fn write(&self, path: &Path, data: &[u8], offset: u64) -> Result<usize> {
        let key = self.key(path)?;
        match self.classify_key(&key)? {
            FileKind::Child(parent) => chain::write_child(&self.ctx(), &key, &parent, data, offset),
            FileKind::Parent(children) => {
                chain::write_parent(&self.ctx(), &key, &children, data, offset)
            }
            FileKind::Plain => {
                let mut file = open_rw(&self.root.join(&key))?;
                write_at(&mut file, offset, data)?;
                Ok(data.len())
            }
        }
    }

    pub fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        let key = self.key(path)?;
        match self.classify_key(&key)? {
            FileKind::Child(parent) => chain::truncate(&self.ctx(), &key, size, Some(&parent), &[]),
            FileKind::Parent(children) => chain::truncate(&self.ctx(), &key, size, None, &children),
            FileKind::Plain => chain::truncate(&self.ctx(), &key, size, None, &[]),
        }
    }

    /// Remove `path`. A parent hands its chain to its first child first.
    pub fn unlink(&self, path: &Path) -> Result<()> {
        let key = self.key(path)?;
        match self.classify_key(&key)? {
            FileKind::Child(_) => self.directory.remove(&key)?,
            FileKind::Parent(children) => {
                chain::promote(&self.ctx(), &key, &children)?;
                let heir = &children[0];
                for child in &children[1..] {
                    let size = self.directory.size(child)?.unwrap_or(0);
                    self.directory.add(heir, child, size)?;
                }
                self.directory.remove(heir)?;
                info!(
                    "{} removed, {} now heads its chain",
                    key.display(),
                    heir.display()
                );
            }
            FileKind::Plain => {}
        }
        fs::remove_file(self.root.join(&key))?;
        Ok(())
    }

    /// Rename without touching content.
    ///
    /// Replacing a file that has children is refused: they were encoded
    /// against its bytes.
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let (from, to) = (self.key(from)?, self.key(to)?);
        if from == to {
            return Ok(());
        }
        if !self.directory.children(&to)?.is_empty() {
            return Err(Error::Consistency(format!(
                "{} has children and cannot be replaced",
                to.display()
            )));
        }
        fs::rename(self.root.join(&from), self.root.join(&to))?;
        self.directory.rename_path(&from, &to)?;
        info!("renamed {} to {}", from.display(), to.display());
        Ok(())
    }

    /// Create `to` as a child of `from` with identical content.
    pub fn link(&self, from: &Path, to: &Path) -> Result<u64> {
        let (from, to) = (self.key(from)?, self.key(to)?);
        if self.directory.parent(&from)?.is_some() {
            return Err(Error::Consistency(format!(
                "{} is already a child; links of links are not allowed",
                from.display()
            )));
        }
        let (from_path, to_path) = (self.root.join(&from), self.root.join(&to));
        if to_path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            )
            .into());
        }

        let _held = self.locks.acquire(&to_path)?;
        let mut input = File::open(&from_path)?;
        let size = encode_into(&self.ctx(), None, &mut input, &from_path, &to_path)?;
        self.directory.add(&from, &to, size)?;
        info!("linked {} to {}", to.display(), from.display());
        Ok(size)
    }

    /// Store `file` as a child of `parent`.
    ///
    /// With `output`, the encoding goes there and `output` becomes the
    /// child. Otherwise `file` is replaced in place; its original content
    /// is kept as `<file>.dlnbak` until the encode succeeds, and kept
    /// afterwards too when `keep_backup` is set.
    pub fn adopt(
        &self,
        parent: &Path,
        file: &Path,
        output: Option<&Path>,
        keep_backup: bool,
    ) -> Result<u64> {
        let (parent, file) = (self.key(parent)?, self.key(file)?);
        if self.directory.parent(&parent)?.is_some() {
            return Err(Error::Consistency(format!(
                "{} is already a child; links of links are not allowed",
                parent.display()
            )));
        }
        if self.directory.parent(&file)?.is_some() {
            return Err(Error::Consistency(format!(
                "{} is already stored as a delta",
                file.display()
            )));
        }
        if !self.directory.children(&file)?.is_empty() {
            return Err(Error::Consistency(format!(
                "{} has children and cannot become one",
                file.display()
            )));
        }
        let parent_path = self.root.join(&parent);
        let file_path = self.root.join(&file);
        let ctx = self.ctx();

        if let Some(output) = output {
            let output = self.key(output)?;
            let out_path = self.root.join(&output);
            let _held = self.locks.acquire(&out_path)?;
            let mut input = File::open(&file_path)?;
            let size = encode_into(&ctx, None, &mut input, &parent_path, &out_path)?;
            self.directory.add(&parent, &output, size)?;
            info!("stored {} as {}", file.display(), output.display());
            return Ok(size);
        }

        let mut backup = file_path.clone().into_os_string();
        backup.push(BACKUP_SUFFIX);
        let backup = PathBuf::from(backup);

        let _held = self.locks.acquire(&file_path)?;
        fs::rename(&file_path, &backup)?;
        let encoded = File::open(&backup)
            .map_err(Error::from)
            .and_then(|mut input| encode_into(&ctx, None, &mut input, &parent_path, &file_path));
        let size = match encoded {
            Ok(size) => size,
            Err(e) => {
                fs::rename(&backup, &file_path)?;
                return Err(e);
            }
        };
        self.directory.add(&parent, &file, size)?;
        if !keep_backup {
            fs::remove_file(&backup)?;
        }
        info!("stored {} against {}", file.display(), parent.display());
        Ok(size)
    }
}

fn invalid(path: &Path, why: &str) -> Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{}: {why}", path.display()),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;

    fn store() -> (tempfile::TempDir, DeltaFs<MemoryDirectory>) {
        let tmp = tempfile::tempdir().unwrap();
        let options = Options::default().with_lock_dir(tmp.path().join(".locks"));
        let dfs = DeltaFs::new(tmp.path(), options, MemoryDirectory::new()).unwrap();
        (tmp, dfs)
    }

    fn put(tmp: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        fs::write(tmp.path().join(name), bytes).unwrap();
        PathBuf::from(name)
    }

    #[test]
    fn keys_are_root_relative() {
        let (_tmp, dfs) = store();
        assert_eq!(dfs.key(Path::new("/a/./b")).unwrap(), PathBuf::from("a/b"));
        assert!(dfs.key(Path::new("../etc/passwd")).is_err());
        assert!(dfs.key(Path::new("/")).is_err());
    }

    #[test]
    fn adopt_in_place_then_read_write() {
        let (tmp, dfs) = store();
        let base = put(&tmp, "base", b"ABCDEFGHIJ");
        let file = put(&tmp, "file", b"ABCDXEFGHIJ");

        assert_eq!(dfs.adopt(&base, &file, None, false).unwrap(), 11);
        assert!(!tmp.path().join("file.dlnbak").exists());
        assert_eq!(dfs.classify(&file).unwrap(), FileKind::Child(base.clone()));
        assert_eq!(dfs.size(&file).unwrap(), 11);
        assert_eq!(dfs.read(&file, 3, 3).unwrap(), b"DXE");

        dfs.write(&file, b"Z", 2).unwrap();
        assert_eq!(dfs.read(&file, 100, 0).unwrap(), b"ABZDXEFGHIJ");
    }

    #[test]
    fn adopt_keeps_backup_when_safe() {
        let (tmp, dfs) = store();
        let base = put(&tmp, "base", b"0123456789");
        let file = put(&tmp, "file", b"0123456789");
        dfs.adopt(&base, &file, None, true).unwrap();
        assert_eq!(fs::read(tmp.path().join("file.dlnbak")).unwrap(), b"0123456789");
    }

    #[test]
    fn adopt_restores_backup_on_failure() {
        let (tmp, dfs) = store();
        let file = put(&tmp, "file", b"original");
        assert!(dfs.adopt(Path::new("missing"), &file, None, false).is_err());
        assert_eq!(fs::read(tmp.path().join("file")).unwrap(), b"original");
        assert!(!tmp.path().join("file.dlnbak").exists());
        assert_eq!(dfs.classify(&file).unwrap(), FileKind::Plain);
    }

    #[test]
    fn adopt_into_output() {
        let (tmp, dfs) = store();
        let base = put(&tmp, "base", b"hello world");
        let file = put(&tmp, "file", b"hello there world");
        dfs.adopt(&base, &file, Some(Path::new("out")), false).unwrap();
        assert_eq!(fs::read(tmp.path().join("file")).unwrap(), b"hello there world");
        assert_eq!(dfs.read(Path::new("out"), 64, 0).unwrap(), b"hello there world");
    }

    #[test]
    fn link_of_link_is_refused() {
        let (tmp, dfs) = store();
        let base = put(&tmp, "base", b"ABCDEFGHIJ");
        let a = PathBuf::from("a");
        dfs.link(&base, &a).unwrap();
        let before = dfs.directory().snapshot();

        let err = dfs.link(&a, Path::new("b")).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        assert_eq!(dfs.directory().snapshot(), before);
        assert!(!tmp.path().join("b").exists());
    }

    #[test]
    fn unlink_parent_promotes_first_child() {
        let (tmp, dfs) = store();
        let base = put(&tmp, "base", b"common text, version zero");
        let one = put(&tmp, "one", b"common text, version one");
        let two = put(&tmp, "two", b"common text, version two!");
        dfs.adopt(&base, &one, None, false).unwrap();
        dfs.adopt(&base, &two, None, false).unwrap();

        dfs.unlink(&base).unwrap();

        assert!(!tmp.path().join("base").exists());
        assert_eq!(
            dfs.classify(&one).unwrap(),
            FileKind::Parent(vec![two.clone()])
        );
        assert_eq!(fs::read(tmp.path().join("one")).unwrap(), b"common text, version one");
        assert_eq!(dfs.size(&two).unwrap(), 25);
        assert_eq!(dfs.read(&two, 100, 0).unwrap(), b"common text, version two!");
    }

    #[test]
    fn truncate_and_rename_parent() {
        let (tmp, dfs) = store();
        let base = put(&tmp, "base", b"0123456789");
        let kid = put(&tmp, "kid", b"0123456789");
        dfs.adopt(&base, &kid, None, false).unwrap();

        dfs.truncate(&base, 3).unwrap();
        assert_eq!(dfs.size(&base).unwrap(), 3);
        assert_eq!(dfs.read(&kid, 10, 0).unwrap(), b"0123456789");

        dfs.rename(&base, Path::new("renamed")).unwrap();
        assert_eq!(
            dfs.classify(&kid).unwrap(),
            FileKind::Child(PathBuf::from("renamed"))
        );
        assert_eq!(dfs.read(&kid, 10, 0).unwrap(), b"0123456789");
    }

    #[test]
    fn rename_over_a_child_replaces_it() {
        let (tmp, dfs) = store();
        let p = put(&tmp, "p", b"the first parent, version one");
        let q = put(&tmp, "q", b"an unrelated second parent file");
        let x = put(&tmp, "x", b"the first parent, version two");
        let y = put(&tmp, "y", b"an unrelated second parent!!");
        dfs.adopt(&q, &y, None, false).unwrap();
        dfs.adopt(&p, &x, None, false).unwrap();

        dfs.rename(&x, &y).unwrap();
        assert_eq!(dfs.classify(&y).unwrap(), FileKind::Child(p.clone()));
        assert_eq!(dfs.read(&y, 64, 0).unwrap(), b"the first parent, version two");
        assert_eq!(dfs.classify(&q).unwrap(), FileKind::Plain);
        assert_eq!(dfs.directory().snapshot().entries.len(), 1);
    }

    #[test]
    fn rename_over_a_parent_is_refused() {
        let (tmp, dfs) = store();
        let base = put(&tmp, "base", b"0123456789");
        let other = put(&tmp, "other", b"abcdefghij");
        dfs.link(&base, Path::new("kid")).unwrap();

        let err = dfs.rename(&other, &base).unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        assert_eq!(fs::read(tmp.path().join("base")).unwrap(), b"0123456789");
        assert_eq!(fs::read(tmp.path().join("other")).unwrap(), b"abcdefghij");
        assert_eq!(dfs.read(Path::new("kid"), 10, 0).unwrap(), b"0123456789");
    }

    #[test]
    fn differently_spelled_roots_share_locks() {
        use crate::directory::JsonDirectory;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;
        use std::time::Duration;

        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        let lock_dir = tmp.path().join(".locks");
        let open = |root: PathBuf| {
            let options = Options::default().with_lock_dir(&lock_dir);
            let dir = JsonDirectory::open(tmp.path().join(".deltafs.json")).unwrap();
            DeltaFs::new(root, options, dir).unwrap()
        };
        let direct = open(tmp.path().to_path_buf());
        let winding = open(tmp.path().join("sub").join(".."));
        assert_eq!(direct.root(), winding.root());

        let base = put(&tmp, "base", b"ABCDEFGHIJ");
        direct.link(&base, Path::new("kid")).unwrap();

        let held = direct.locks.acquire(&direct.root().join("kid")).unwrap();
        let done = AtomicBool::new(false);
        let mut entered_early = true;
        thread::scope(|s| {
            s.spawn(|| {
                winding.write(Path::new("kid"), b"Z", 0).unwrap();
                done.store(true, Ordering::SeqCst);
            });
            thread::sleep(Duration::from_millis(150));
            entered_early = done.load(Ordering::SeqCst);
            held.release();
        });
        assert!(!entered_early, "second store wrote while the child was held");
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(direct.read(Path::new("kid"), 10, 0).unwrap(), b"ZBCDEFGHIJ");
    }

    #[test]
    fn plain_files_pass_through() {
        let (tmp, dfs) = store();
        let f = put(&tmp, "plain", b"abc");
        dfs.write(&f, b"Z", 5).unwrap();
        assert_eq!(dfs.read(&f, 10, 0).unwrap(), b"abc\0\0Z");
        let st = dfs.stat(&f).unwrap();
        assert_eq!((st.kind, st.size, st.stored), ("plain", 6, 6));
        dfs.unlink(&f).unwrap();
        assert!(!tmp.path().join("plain").exists());
    }
}
