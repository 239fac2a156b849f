// Parent/child table with cached logical sizes.
//
// Keys are the paths callers hand in; `DeltaFs` uses paths relative to its
// root. Two backends share the table logic:
//
// - `MemoryDirectory` keeps the table in process.
// - `JsonDirectory` keeps it in a JSON file, taking an exclusive lock on a
//   sibling `.lock` file around every read-modify-write so several
//   processes can share it. Updates are written to a temporary file and
//   persisted over the table.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Most children ever reported for one parent.
pub const MAX_CHILDREN: usize = 255;

pub trait ChainDirectory: Send + Sync {
    /// Create the backing store if it does not exist yet.
    fn init_schema(&self) -> Result<()>;
    /// Record `child` under `parent`, replacing any entry `child` had.
    fn add(&self, parent: &Path, child: &Path, size: u64) -> Result<()>;
    fn remove(&self, child: &Path) -> Result<()>;
    fn parent(&self, child: &Path) -> Result<Option<PathBuf>>;
    /// Children of `parent` in insertion order, at most `MAX_CHILDREN`.
    fn children(&self, parent: &Path) -> Result<Vec<PathBuf>>;
    /// Cached logical size of `child`, if it is one.
    fn size(&self, child: &Path) -> Result<Option<u64>>;
    fn update_size(&self, child: &Path, size: u64) -> Result<()>;
    /// Re-point every entry naming `from`, as child or parent, to `to`.
    fn rename_path(&self, from: &Path, to: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub parent: PathBuf,
    pub child: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub entries: Vec<Entry>,
}

impl Table {
    fn add(&mut self, parent: &Path, child: &Path, size: u64) {
        self.remove(child);
        self.entries.push(Entry {
            parent: parent.to_path_buf(),
            child: child.to_path_buf(),
            size,
        });
    }

    fn remove(&mut self, child: &Path) {
        self.entries.retain(|e| e.child != child);
    }

    fn entry(&self, child: &Path) -> Option<&Entry> {
        self.entries.iter().find(|e| e.child == child)
    }

    fn parent(&self, child: &Path) -> Option<PathBuf> {
        self.entry(child).map(|e| e.parent.clone())
    }

    fn children(&self, parent: &Path) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|e| e.parent == parent)
            .take(MAX_CHILDREN)
            .map(|e| e.child.clone())
            .collect()
    }

    fn size(&self, child: &Path) -> Option<u64> {
        self.entry(child).map(|e| e.size)
    }

    fn update_size(&mut self, child: &Path, size: u64) {
        for e in self.entries.iter_mut().filter(|e| e.child == child) {
            e.size = size;
        }
    }

    fn rename_path(&mut self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        // `to` is being replaced; its old row must not shadow the moved one.
        self.remove(to);
        for e in &mut self.entries {
            if e.child == from {
                e.child = to.to_path_buf();
            }
            if e.parent == from {
                e.parent = to.to_path_buf();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    table: Mutex<Table>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Table {
        self.table.lock().clone()
    }
}

impl ChainDirectory for MemoryDirectory {
    fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    fn add(&self, parent: &Path, child: &Path, size: u64) -> Result<()> {
        self.table.lock().add(parent, child, size);
        Ok(())
    }

    fn remove(&self, child: &Path) -> Result<()> {
        self.table.lock().remove(child);
        Ok(())
    }

    fn parent(&self, child: &Path) -> Result<Option<PathBuf>> {
        Ok(self.table.lock().parent(child))
    }

    fn children(&self, parent: &Path) -> Result<Vec<PathBuf>> {
        Ok(self.table.lock().children(parent))
    }

    fn size(&self, child: &Path) -> Result<Option<u64>> {
        Ok(self.table.lock().size(child))
    }

    fn update_size(&self, child: &Path, size: u64) -> Result<()> {
        self.table.lock().update_size(child, size);
        Ok(())
    }

    fn rename_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.table.lock().rename_path(from, to);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file backend
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct JsonDirectory {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonDirectory {
    /// Open (creating if needed) the table at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let dir = Self {
            lock_path: path.with_file_name(lock_name),
            path,
        };
        dir.init_schema()?;
        Ok(dir)
    }

    /// Every change is already on disk; closing only drops the handle.
    pub fn close(self) {}

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?)
    }

    fn load(&self) -> Result<Table> {
        match File::open(&self.path) {
            Ok(f) => serde_json::from_reader(BufReader::new(f)).map_err(|e| {
                Error::Directory(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Table::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, table: &Table) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut w, table)?;
            w.write_all(b"\n")?;
            w.flush()?;
        }
        tmp.persist(&self.path)?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Table) -> T) -> Result<T> {
        let lock = self.lock_file()?;
        lock.lock_shared()?;
        let table = self.load()?;
        Ok(f(&table))
    }

    fn modify(&self, f: impl FnOnce(&mut Table)) -> Result<()> {
        let lock = self.lock_file()?;
        lock.lock()?;
        let mut table = self.load()?;
        f(&mut table);
        self.store(&table)
    }
}

impl ChainDirectory for JsonDirectory {
    fn init_schema(&self) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let lock = self.lock_file()?;
        lock.lock()?;
        if !self.path.exists() {
            self.store(&Table::default())?;
        }
        Ok(())
    }

    fn add(&self, parent: &Path, child: &Path, size: u64) -> Result<()> {
        self.modify(|t| t.add(parent, child, size))
    }

    fn remove(&self, child: &Path) -> Result<()> {
        self.modify(|t| t.remove(child))
    }

    fn parent(&self, child: &Path) -> Result<Option<PathBuf>> {
        self.read(|t| t.parent(child))
    }

    fn children(&self, parent: &Path) -> Result<Vec<PathBuf>> {
        self.read(|t| t.children(parent))
    }

    fn size(&self, child: &Path) -> Result<Option<u64>> {
        self.read(|t| t.size(child))
    }

    fn update_size(&self, child: &Path, size: u64) -> Result<()> {
        self.modify(|t| t.update_size(child, size))
    }

    fn rename_path(&self, from: &Path, to: &Path) -> Result<()> {
        self.modify(|t| t.rename_path(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> &Path {
        Path::new(s)
    }

    fn exercise(dir: &dyn ChainDirectory) {
        dir.init_schema().unwrap();
        dir.add(p("base"), p("a"), 10).unwrap();
        dir.add(p("base"), p("b"), 20).unwrap();
        dir.add(p("other"), p("c"), 30).unwrap();

        assert_eq!(dir.parent(p("a")).unwrap(), Some(PathBuf::from("base")));
        assert_eq!(dir.parent(p("base")).unwrap(), None);
        assert_eq!(
            dir.children(p("base")).unwrap(),
            [PathBuf::from("a"), PathBuf::from("b")]
        );
        assert_eq!(dir.size(p("b")).unwrap(), Some(20));
        assert_eq!(dir.size(p("base")).unwrap(), None);

        dir.update_size(p("b"), 21).unwrap();
        assert_eq!(dir.size(p("b")).unwrap(), Some(21));

        // Re-adding moves the child.
        dir.add(p("other"), p("a"), 11).unwrap();
        assert_eq!(dir.children(p("base")).unwrap(), [PathBuf::from("b")]);
        assert_eq!(
            dir.children(p("other")).unwrap(),
            [PathBuf::from("c"), PathBuf::from("a")]
        );

        dir.rename_path(p("other"), p("renamed")).unwrap();
        dir.rename_path(p("c"), p("c2")).unwrap();
        assert_eq!(
            dir.children(p("renamed")).unwrap(),
            [PathBuf::from("c2"), PathBuf::from("a")]
        );
        assert_eq!(dir.size(p("c2")).unwrap(), Some(30));

        dir.remove(p("c2")).unwrap();
        assert_eq!(dir.parent(p("c2")).unwrap(), None);
        assert_eq!(dir.children(p("renamed")).unwrap(), [PathBuf::from("a")]);
    }

    #[test]
    fn memory_directory() {
        exercise(&MemoryDirectory::new());
    }

    #[test]
    fn json_directory_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db").join("chains.json");
        let dir = JsonDirectory::open(&path).unwrap();
        exercise(&dir);
        dir.close();

        let reopened = JsonDirectory::open(&path).unwrap();
        assert_eq!(reopened.size(p("a")).unwrap(), Some(11));
        let raw: Table = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.entries.len(), 2);
        assert!(tmp.path().join("db").join("chains.json.lock").exists());
    }

    #[test]
    fn rename_over_a_child_drops_its_row() {
        let dir = MemoryDirectory::new();
        dir.add(p("q"), p("y"), 22).unwrap();
        dir.add(p("p"), p("x"), 25).unwrap();
        dir.rename_path(p("x"), p("y")).unwrap();

        let rows = dir.snapshot().entries;
        assert_eq!(rows.len(), 1);
        assert_eq!(dir.parent(p("y")).unwrap(), Some(PathBuf::from("p")));
        assert_eq!(dir.size(p("y")).unwrap(), Some(25));
        assert!(dir.children(p("q")).unwrap().is_empty());

        dir.rename_path(p("y"), p("y")).unwrap();
        assert_eq!(dir.parent(p("y")).unwrap(), Some(PathBuf::from("p")));
    }

    #[test]
    fn children_are_capped() {
        let dir = MemoryDirectory::new();
        for i in 0..300 {
            dir.add(p("base"), &PathBuf::from(format!("c{i}")), 0).unwrap();
        }
        let kids = dir.children(p("base")).unwrap();
        assert_eq!(kids.len(), MAX_CHILDREN);
        assert_eq!(kids[0], PathBuf::from("c0"));
    }

    #[test]
    fn corrupt_table_is_a_directory_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chains.json");
        fs::write(&path, b"{not json").unwrap();
        let dir = JsonDirectory::open(&path).unwrap();
        assert!(matches!(dir.parent(p("x")), Err(Error::Directory(_))));
    }
}
