//! Atomic file placement.
//!
//! Every file the pipeline hands to a later stage (metadata documents, the
//! asset table, converted assets) is first written to a hidden temp file in
//! the destination directory and then renamed into place. Readers therefore
//! see either no file or a complete one; a crash leaves only `.*.part`
//! leftovers that no stage reads.
//!
//! [`Placement::NoClobber`] turns the rename into a create-exclusive
//! operation. It is the check-and-create primitive for idempotent writes:
//! when two workers race for the same target, exactly one wins and the
//! other learns the file already exists.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// How [`persist`] treats an existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Replace an existing file.
    Replace,
    /// Leave an existing file untouched.
    NoClobber,
}

/// What [`persist`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Written,
    AlreadyExists,
}

/// Create a temp file next to `target`, so the final rename stays on one
/// file system.
pub fn temp_for(target: &Path) -> io::Result<NamedTempFile> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tempfile::Builder::new()
        .prefix(".")
        .suffix(".part")
        .tempfile_in(dir)
}

/// Move a finished temp file to `target`.
///
/// The temp file is flushed and synced first. With
/// [`Placement::NoClobber`] an existing target yields
/// `Ok(Persisted::AlreadyExists)` and the temp file is removed.
pub fn persist(tmp: NamedTempFile, target: &Path, placement: Placement) -> io::Result<Persisted> {
    tmp.as_file().sync_all()?;
    let result: Result<File, tempfile::PersistError> = match placement {
        Placement::Replace => tmp.persist(target),
        Placement::NoClobber => tmp.persist_noclobber(target),
    };
    match result {
        Ok(_) => Ok(Persisted::Written),
        Err(e) if placement == Placement::NoClobber && e.error.kind() == io::ErrorKind::AlreadyExists => {
            Ok(Persisted::AlreadyExists)
        }
        Err(e) => Err(e.error),
    }
}

/// Write `bytes` to `target` through a temp file.
pub fn write_bytes(target: &Path, bytes: &[u8], placement: Placement) -> io::Result<Persisted> {
    let mut tmp = temp_for(target)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    persist(tmp, target, placement)
}
