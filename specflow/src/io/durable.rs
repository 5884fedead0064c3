//! Durability barriers, atomic file replacement and content fingerprints.
//!
//! A durable write is: write a sibling temp file, flush it, rename it over the
//! target, then flush the containing directory so the rename itself survives
//! a crash.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// SHA-256 of `bytes`, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fingerprint of the file at `path`, or `None` if it does not exist.
pub fn fingerprint_file(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(fingerprint(&bytes))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::io(path, err)),
    }
}

/// Flush file contents and metadata to stable storage.
pub fn fsync_file(file: &File, path: &Path) -> Result<()> {
    file.sync_all().map_err(|err| Error::io(path, err))
}

/// Flush a directory so entries created or renamed in it are durable.
#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> Result<()> {
    let handle = File::open(dir).map_err(|err| Error::io(dir, err))?;
    handle.sync_all().map_err(|err| Error::io(dir, err))
}

/// Directory handles cannot be flushed on this platform; renames are
/// durable once the file itself is.
#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Create `dir` and any missing parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))
}

/// Write `contents` to `path` and flush it before returning.
pub fn write_synced(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|err| Error::io(path, err))?;
    file.write_all(contents)
        .map_err(|err| Error::io(path, err))?;
    fsync_file(&file, path)
}

/// Replace `path` with `contents` so that a crash leaves either the old or
/// the new file, and the new one is durable once this returns.
pub fn write_durable(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = parent_of(path)?;
    ensure_dir(parent)?;
    let tmp_path = temp_sibling(path);
    debug!(path = %path.display(), bytes = contents.len(), "durable write");
    if let Err(err) = write_synced(&tmp_path, contents) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::io(path, err));
    }
    fsync_dir(parent)
}

/// Replace `path` atomically without flushing (temp file + rename).
///
/// The temp name is unique per call so concurrent writers never interleave
/// bytes; the last rename wins.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = parent_of(path)?;
    ensure_dir(parent)?;
    let tmp_path = temp_sibling(path);
    if let Err(err) = fs::write(&tmp_path, contents) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::io(&tmp_path, err));
    }
    fs::rename(&tmp_path, path).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        Error::io(path, err)
    })
}

/// Open `path` for appending, creating it if needed.
pub fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| Error::io(path, err))
}

/// Serialize `value` as pretty JSON with a trailing newline.
pub fn to_pretty_json<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>> {
    let mut buf =
        serde_json::to_string_pretty(value).map_err(|source| Error::Encode { what, source })?;
    buf.push('\n');
    Ok(buf.into_bytes())
}

/// Read and parse a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    serde_json::from_str(&contents).map_err(|err| Error::decode(path, err))
}

pub(crate) fn parent_of(path: &Path) -> Result<&Path> {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| Error::precondition(format!("{} has no parent directory", path.display())))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    path.with_file_name(format!(".{name}.{suffix}.tmp"))
}
