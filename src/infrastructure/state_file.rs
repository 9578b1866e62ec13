//! Reading and atomically replacing flat key/value state files.
//!
//! Writers go through a temp file in the destination directory followed by a
//! rename, so a concurrent reader sees either the old or the new contents.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::KvRecord;

/// Read a record, returning `Ok(None)` if the file does not exist.
pub fn read_record(path: &Path) -> DomainResult<Option<KvRecord>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(KvRecord::parse(&text))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DomainError::io(path, e)),
    }
}

/// Replace `path` with `record`, creating parent directories as needed.
pub fn write_record(path: &Path, record: &KvRecord) -> DomainResult<()> {
    write_atomic(path, &record.render())
}

/// Write `contents` to a sibling temp file and rename it over `path`.
pub fn write_atomic(path: &Path, contents: &str) -> DomainResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| DomainError::io(parent, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| DomainError::io(parent, e))?;
    temp.write_all(contents.as_bytes())
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| DomainError::io(temp.path(), e))?;
    temp.persist(path).map_err(|e| DomainError::io(path, e.error))?;
    Ok(())
}

/// Delete a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> DomainResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DomainError::io(path, e)),
    }
}
