use std::fs;
use std::io::Cursor;
use std::path::Path;

use deltafs::codec::range::read_range_from;
use deltafs::codec::{self, SourceHandle};
use deltafs::config::Options;
use deltafs::directory::MemoryDirectory;
use deltafs::fs::DeltaFs;
use deltafs::vcdiff::{decode_in_memory, encode_in_memory};
use proptest::prelude::*;
use tempfile::tempdir;

fn source_handle(dir: &Path, bytes: &[u8], block: usize) -> SourceHandle {
    let p = dir.join("parent");
    fs::write(&p, bytes).unwrap();
    SourceHandle::open(&p, block).unwrap()
}

/// Target built from slices of the source plus noise, so matches exist.
fn related(source: &[u8], edits: &[(usize, u8)]) -> Vec<u8> {
    let mut out = source.to_vec();
    for &(pos, byte) in edits {
        if out.is_empty() {
            out.push(byte);
        } else {
            let at = pos % (out.len() + 1);
            out.insert(at, byte);
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_in_memory_roundtrip(
        source in proptest::collection::vec(any::<u8>(), 0..4096),
        target in proptest::collection::vec(any::<u8>(), 0..4096),
        chunk in 1usize..2048,
    ) {
        let delta = encode_in_memory(&source, &target, chunk);
        prop_assert_eq!(decode_in_memory(&delta, &source).unwrap(), target);
    }

    #[test]
    fn prop_related_roundtrip_with_small_blocks(
        source in proptest::collection::vec(any::<u8>(), 1..6000),
        edits in proptest::collection::vec((any::<usize>(), any::<u8>()), 0..16),
        block in 64usize..1024,
    ) {
        let target = related(&source, &edits);
        let dir = tempdir().unwrap();
        let mut src = source_handle(dir.path(), &source, block);
        let mut delta = Vec::new();
        codec::encode(&mut delta, &mut Cursor::new(&target), &mut src).unwrap();
        let mut out = Vec::new();
        codec::decode(&mut out, &mut Cursor::new(&delta), &mut src).unwrap();
        prop_assert_eq!(out, target);
    }

    #[test]
    fn prop_range_matches_slice(
        source in proptest::collection::vec(any::<u8>(), 1..5000),
        edits in proptest::collection::vec((any::<usize>(), any::<u8>()), 0..8),
        offset in 0u64..6000,
        len in 0usize..3000,
    ) {
        let target = related(&source, &edits);
        let dir = tempdir().unwrap();
        let mut src = source_handle(dir.path(), &source, 512);
        let mut delta = Vec::new();
        codec::encode(&mut delta, &mut Cursor::new(&target), &mut src).unwrap();

        let got = read_range_from(&mut Cursor::new(&delta), &mut src, len, offset).unwrap();
        let start = (offset as usize).min(target.len());
        let end = (offset as usize).saturating_add(len).min(target.len());
        prop_assert_eq!(got, &target[start..end]);
    }

    #[test]
    fn prop_reencode_is_stable(
        source in proptest::collection::vec(any::<u8>(), 0..3000),
        target in proptest::collection::vec(any::<u8>(), 0..3000),
    ) {
        let first = encode_in_memory(&source, &target, 1024);
        let decoded = decode_in_memory(&first, &source).unwrap();
        let second = encode_in_memory(&source, &decoded, 1024);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_promotion_preserves_content(
        base in proptest::collection::vec(any::<u8>(), 1..2000),
        patches in proptest::collection::vec(
            (0usize..3, 0u64..2000, proptest::collection::vec(any::<u8>(), 1..16)),
            0..8,
        ),
    ) {
        let root = tempdir().unwrap();
        let locks = tempdir().unwrap();
        fs::write(root.path().join("base"), &base).unwrap();
        let opts = Options::default().with_lock_dir(locks.path());
        let dfs = DeltaFs::new(root.path(), opts, MemoryDirectory::new()).unwrap();

        let names = ["c0", "c1", "c2"];
        let mut expected = vec![base.clone(); 3];
        for name in names {
            dfs.link(Path::new("base"), Path::new(name)).unwrap();
        }
        for (which, offset, data) in &patches {
            dfs.write(Path::new(names[*which]), data, *offset).unwrap();
            let buf = &mut expected[*which];
            let end = *offset as usize + data.len();
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[*offset as usize..end].copy_from_slice(data);
        }

        dfs.unlink(Path::new("base")).unwrap();
        for (name, want) in names.iter().zip(&expected) {
            let size = dfs.size(Path::new(name)).unwrap();
            prop_assert_eq!(size, want.len() as u64);
            let got = dfs.read(Path::new(name), size as usize, 0).unwrap();
            prop_assert_eq!(&got, want);
        }
    }

    #[test]
    fn prop_truncate_child(
        base in proptest::collection::vec(any::<u8>(), 0..2000),
        size in 0u64..3000,
    ) {
        let root = tempdir().unwrap();
        let locks = tempdir().unwrap();
        fs::write(root.path().join("base"), &base).unwrap();
        let opts = Options::default().with_lock_dir(locks.path());
        let dfs = DeltaFs::new(root.path(), opts, MemoryDirectory::new()).unwrap();
        dfs.link(Path::new("base"), Path::new("kid")).unwrap();

        dfs.truncate(Path::new("kid"), size).unwrap();
        let mut want = base.clone();
        want.resize(size as usize, 0);
        prop_assert_eq!(dfs.size(Path::new("kid")).unwrap(), size);
        prop_assert_eq!(dfs.read(Path::new("kid"), size as usize, 0).unwrap(), want);
    }
}
