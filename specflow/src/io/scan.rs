//! Read-only inventory of transaction directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::core::lifecycle::{Marker, Probe, TxnClass, classify};
use crate::error::{Error, Result};
use crate::io::durable::read_json;
use crate::io::txn::{IntentMarker, Manifest, TxnPaths};

/// One transaction directory and how it was classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanEntry {
    pub id: String,
    pub dir: PathBuf,
    #[serde(flatten)]
    pub class: TxnClass,
}

/// Every transaction directory found, sorted by id (creation order).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub entries: Vec<ScanEntry>,
}

impl Inventory {
    pub fn intent_only(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.class == TxnClass::IntentOnly)
    }

    pub fn committed(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.class == TxnClass::Committed)
    }

    pub fn empty(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.class == TxnClass::Empty)
    }

    pub fn corrupt(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.class, TxnClass::Corrupt { .. }))
    }
}

/// Inspects `var/txn/` without modifying anything.
#[derive(Debug, Clone)]
pub struct Scanner {
    txn_dir: PathBuf,
}

impl Scanner {
    pub fn new(txn_dir: impl Into<PathBuf>) -> Self {
        Self {
            txn_dir: txn_dir.into(),
        }
    }

    pub fn scan(&self) -> Result<Inventory> {
        let read_dir = match fs::read_dir(&self.txn_dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Inventory::default());
            }
            Err(err) => return Err(Error::io(&self.txn_dir, err)),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|err| Error::io(&self.txn_dir, err))?;
            let file_type = dir_entry
                .file_type()
                .map_err(|err| Error::io(dir_entry.path(), err))?;
            if !file_type.is_dir() {
                continue;
            }
            let id = dir_entry.file_name().to_string_lossy().into_owned();
            let dir = dir_entry.path();
            let class = classify(&probe_dir(&dir, &id));
            debug!(txn = %id, class = ?class, "transaction scanned");
            entries.push(ScanEntry { id, dir, class });
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Inventory { entries })
    }
}

fn probe_dir(dir: &Path, id: &str) -> Probe {
    let paths = TxnPaths::new(dir);
    let (manifest, manifest_id) = probe_marker::<Manifest, _>(&paths.manifest_path, |m| &m.id);
    let (intent, intent_id) = probe_marker::<IntentMarker, _>(&paths.intent_path, |i| &i.id);
    let id_mismatch = [manifest_id, intent_id]
        .into_iter()
        .flatten()
        .any(|marker_id| marker_id != id);
    Probe {
        manifest,
        intent,
        commit: paths.commit_path.exists(),
        id_mismatch,
    }
}

fn probe_marker<T, F>(path: &Path, id_of: F) -> (Marker, Option<String>)
where
    T: DeserializeOwned,
    F: Fn(&T) -> &String,
{
    match read_json::<T>(path) {
        Ok(value) => (Marker::Readable, Some(id_of(&value).clone())),
        Err(err) if err.is_not_found() => (Marker::Missing, None),
        Err(err) => (Marker::Unreadable(err.to_string()), None),
    }
}
