// Chain reorganization: promotion and truncation.

use std::path::{Path, PathBuf};

use log::info;

use super::mutator::reencode_all;
use super::{ChainContext, encode_into, materialize, open_rw, parent_dir};
use crate::error::Result;

/// Turn `children[0]` into a plain file holding its logical content and
/// re-encode the other children against it. `parent` is left untouched;
/// retargeting the directory is up to the caller.
pub fn promote(ctx: &ChainContext<'_>, parent: &Path, children: &[PathBuf]) -> Result<()> {
    let Some((heir, rest)) = children.split_first() else {
        return Ok(());
    };
    let parent_path = ctx.resolve(parent);
    let child_paths = ctx.resolve_all(children);
    let heir_path = &child_paths[0];
    let _held = ctx.locks.acquire_chain(&parent_path, &child_paths)?;

    let mut plain = materialize(ctx, heir_path, &parent_path)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent_dir(heir_path))?;
    std::io::Seek::rewind(&mut plain)?;
    std::io::copy(&mut plain, tmp.as_file_mut())?;
    tmp.persist(heir_path)?;

    for (key, path) in rest.iter().zip(&child_paths[1..]) {
        let mut scratch = materialize(ctx, path, &parent_path)?;
        encode_into(ctx, Some(key.as_path()), &mut scratch, heir_path, path)?;
    }

    info!(
        "promoted {} to replace {} for {} children",
        heir.display(),
        parent.display(),
        rest.len()
    );
    Ok(())
}

/// Resize `path` to `size` logical bytes.
///
/// A child is decoded, resized and re-encoded. A parent with children is
/// resized in place after every child has been decoded against its old
/// bytes, then each child is re-encoded against the new bytes. Anything
/// else is resized directly.
pub fn truncate(
    ctx: &ChainContext<'_>,
    path: &Path,
    size: u64,
    parent: Option<&Path>,
    children: &[PathBuf],
) -> Result<()> {
    let file_path = ctx.resolve(path);

    if let Some(parent) = parent {
        let _held = ctx.locks.acquire(&file_path)?;
        let parent_path = ctx.resolve(parent);
        let mut scratch = materialize(ctx, &file_path, &parent_path)?;
        scratch.set_len(size)?;
        encode_into(ctx, Some(path), &mut scratch, &parent_path, &file_path)?;
        info!("truncated child {} to {size}", path.display());
        return Ok(());
    }

    if children.is_empty() {
        let _held = ctx.locks.acquire(&file_path)?;
        open_rw(&file_path)?.set_len(size)?;
        return Ok(());
    }

    let child_paths = ctx.resolve_all(children);
    let _held = ctx.locks.acquire_chain(&file_path, &child_paths)?;
    let mut scratches = child_paths
        .iter()
        .map(|c| materialize(ctx, c, &file_path))
        .collect::<Result<Vec<_>>>()?;

    let raw = open_rw(&file_path)?;
    raw.set_len(size)?;
    raw.sync_data()?;
    drop(raw);

    reencode_all(ctx, &file_path, children, &child_paths, &mut scratches)?;
    info!(
        "truncated parent {} to {size}, {} children re-encoded",
        path.display(),
        children.len()
    );
    Ok(())
}
