// src/cache/artifact.rs

//! Cache artifact packing and unpacking.
//!
//! An artifact is a gzipped tar rooted at the repository: entry names are
//! anchored unix paths, so the same artifact restores on any platform and
//! any checkout location. Restoring is paranoid by construction:
//!
//! - an entry whose name escapes the anchor is a cache-integrity error, not
//!   a file;
//! - a symlink whose target resolves outside the anchor is rejected the
//!   same way;
//! - on any rejection, files already restored are rolled back so a
//!   poisoned artifact cannot leave a half-written tree behind.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType};
use tracing::{debug, warn};

use crate::errors::CacheError;
use crate::paths::{AbsPath, AnchoredPath};

/// Pack `files` (anchored under `anchor`) into a gzipped tar.
pub fn create(anchor: &AbsPath, files: &[AnchoredPath]) -> Result<Vec<u8>, CacheError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    // Symlinks are archived as symlinks; their targets are validated at
    // restore time.
    builder.follow_symlinks(false);

    for file in files {
        let source = anchor.resolve(file);
        builder
            .append_path_with_name(source.as_std_path(), file.as_str())
            .map_err(CacheError::Io)?;
    }

    let encoder = builder.into_inner().map_err(CacheError::Io)?;
    let body = encoder.finish().map_err(CacheError::Io)?;
    debug!(files = files.len(), bytes = body.len(), "packed artifact");
    Ok(body)
}

/// Unpack an artifact under `anchor`, returning the restored paths.
pub fn restore(anchor: &AbsPath, body: &[u8]) -> Result<Vec<AnchoredPath>, CacheError> {
    let mut archive = Archive::new(GzDecoder::new(Cursor::new(body)));
    let mut restored: Vec<AnchoredPath> = Vec::new();

    let result = (|| -> Result<(), CacheError> {
        for entry in archive.entries().map_err(CacheError::Io)? {
            let mut entry = entry.map_err(CacheError::Io)?;

            let raw_path = entry
                .path()
                .map_err(CacheError::Io)?
                .to_string_lossy()
                .into_owned();
            let anchored = AnchoredPath::new(raw_path.clone())
                .map_err(|_| CacheError::PathEscape(raw_path.clone()))?;

            if entry.header().entry_type() == EntryType::Symlink {
                validate_symlink_target(&anchored, &entry)?;
            }

            // `unpack_in` re-checks containment at the filesystem level;
            // both layers must agree before anything is written.
            let unpacked = entry
                .unpack_in(anchor.as_std_path())
                .map_err(CacheError::Io)?;
            if !unpacked {
                return Err(CacheError::PathEscape(raw_path));
            }

            if entry.header().entry_type() != EntryType::Directory {
                restored.push(anchored);
            }
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            debug!(files = restored.len(), "restored artifact");
            Ok(restored)
        }
        Err(e) => {
            rollback(anchor, &restored);
            Err(e)
        }
    }
}

/// A symlink target must stay inside the anchor once resolved relative to
/// the link's own directory.
fn validate_symlink_target<R: Read>(
    link_path: &AnchoredPath,
    entry: &tar::Entry<'_, R>,
) -> Result<(), CacheError> {
    let target = entry
        .link_name()
        .map_err(CacheError::Io)?
        .ok_or_else(|| CacheError::PathEscape(link_path.to_string()))?;
    let target = target.to_string_lossy();

    if target.starts_with('/') {
        return Err(CacheError::PathEscape(format!("{link_path} -> {target}")));
    }

    // Resolve `target` against the link's parent directory, component by
    // component, counting depth. Going below zero escapes the anchor.
    let mut depth = link_path.components().count() as i64 - 1;
    for component in target.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return Err(CacheError::PathEscape(format!(
                        "{link_path} -> {target}"
                    )));
                }
            }
            _ => depth += 1,
        }
    }
    Ok(())
}

/// Best-effort removal of partially restored files.
fn rollback(anchor: &AbsPath, restored: &[AnchoredPath]) {
    for file in restored {
        let path = anchor.resolve(file);
        if let Err(e) = std::fs::remove_file(path.as_std_path()) {
            warn!(file = %file, error = %e, "failed to roll back restored file");
        }
    }
}
