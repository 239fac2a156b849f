// Writes into delta files.
//
// A child write decodes the child, patches the decoded bytes and encodes
// them again against the unchanged parent. A parent write must first
// decode every child against the old parent bytes, then patch the parent
// in place, then re-encode every child against the new bytes.
//
// Cost is proportional to the full logical size of every file touched,
// whatever the size of the patch.

use std::path::{Path, PathBuf};

use log::{info, warn};

use super::{ChainContext, encode_into, materialize, open_rw, write_at};
use crate::error::Result;

/// Write `patch` at `offset` into the logical content of `child`.
/// Returns the number of bytes written.
pub fn write_child(
    ctx: &ChainContext<'_>,
    child: &Path,
    parent: &Path,
    patch: &[u8],
    offset: u64,
) -> Result<usize> {
    let child_path = ctx.resolve(child);
    let parent_path = ctx.resolve(parent);
    let _held = ctx.locks.acquire(&child_path)?;

    let mut scratch = materialize(ctx, &child_path, &parent_path)?;
    write_at(&mut scratch, offset, patch)?;
    let size = encode_into(ctx, Some(child), &mut scratch, &parent_path, &child_path)?;

    info!(
        "wrote {} bytes at {offset} into child {} (logical size {size})",
        patch.len(),
        child.display()
    );
    Ok(patch.len())
}

/// Write `patch` at `offset` into `parent`, keeping every child's
/// logical content unchanged.
///
/// The first child failure aborts the rest. Children re-encoded before it
/// stay re-encoded, and the parent stays patched.
pub fn write_parent(
    ctx: &ChainContext<'_>,
    parent: &Path,
    children: &[PathBuf],
    patch: &[u8],
    offset: u64,
) -> Result<usize> {
    let parent_path = ctx.resolve(parent);
    let child_paths = ctx.resolve_all(children);
    let _held = ctx.locks.acquire_chain(&parent_path, &child_paths)?;

    let mut scratches = child_paths
        .iter()
        .map(|c| materialize(ctx, c, &parent_path))
        .collect::<Result<Vec<_>>>()?;

    let mut raw = open_rw(&parent_path)?;
    write_at(&mut raw, offset, patch)?;
    raw.sync_data()?;
    drop(raw);

    reencode_all(ctx, &parent_path, children, &child_paths, &mut scratches)?;

    info!(
        "wrote {} bytes at {offset} into parent {} ({} children re-encoded)",
        patch.len(),
        parent.display(),
        children.len()
    );
    Ok(patch.len())
}

/// Re-encode materialized children against `parent_path`, which has
/// already changed.
pub(crate) fn reencode_all(
    ctx: &ChainContext<'_>,
    parent_path: &Path,
    children: &[PathBuf],
    child_paths: &[PathBuf],
    scratches: &mut [std::fs::File],
) -> Result<()> {
    for (i, ((key, path), scratch)) in children
        .iter()
        .zip(child_paths)
        .zip(scratches.iter_mut())
        .enumerate()
    {
        if let Err(e) = encode_into(ctx, Some(key.as_path()), scratch, parent_path, path) {
            warn!(
                "{} no longer matches parent {}: {} of {} children re-encoded: {e}",
                key.display(),
                parent_path.display(),
                i,
                children.len()
            );
            return Err(e);
        }
    }
    Ok(())
}
