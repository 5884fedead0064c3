//! Transaction manager: stage file writes, mark intent, publish, clean up.
//!
//! Each transaction owns `var/txn/<id>/`:
//!
//! ```text
//! manifest.json   {id, files:[{destRelPath, fingerprint, size}], createdAt}
//! status.intent   {id, markedAt, fingerprints, ready}
//! status.commit   {id, committedAt}
//! stage/<destRelPath>
//! ```
//!
//! Nothing outside the transaction directory is touched until `commit`, and
//! once `mark_intent` returns the transaction is only ever finished, never
//! rolled back.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::lifecycle::{TxnOp, TxnStatus, next_status};
use crate::core::path::validate_dest_rel_path;
use crate::error::{Error, Result};
use crate::io::durable::{
    ensure_dir, fingerprint, fingerprint_file, fsync_dir, parent_of, read_json, to_pretty_json,
    write_durable, write_synced,
};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const INTENT_FILE: &str = "status.intent";
pub const COMMIT_FILE: &str = "status.commit";
pub const STAGE_DIR: &str = "stage";

const MAX_ID_ATTEMPTS: usize = 16;

/// One staged file, keyed by its destination-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedFile {
    pub dest_rel_path: String,
    pub fingerprint: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub files: Vec<StagedFile>,
    pub created_at: DateTime<Utc>,
}

/// Written at the point of no return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMarker {
    pub id: String,
    pub marked_at: DateTime<Utc>,
    pub fingerprints: Vec<String>,
    pub ready: bool,
}

/// Written once every file is published and the journal callback has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitMarker {
    pub id: String,
    pub committed_at: DateTime<Utc>,
}

/// Resolved paths inside one transaction directory.
#[derive(Debug, Clone)]
pub struct TxnPaths {
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    pub intent_path: PathBuf,
    pub commit_path: PathBuf,
    pub stage_dir: PathBuf,
}

impl TxnPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            manifest_path: dir.join(MANIFEST_FILE),
            intent_path: dir.join(INTENT_FILE),
            commit_path: dir.join(COMMIT_FILE),
            stage_dir: dir.join(STAGE_DIR),
        }
    }
}

/// Handle to a unit of staged work. Owned by exactly one logical operation.
#[derive(Debug)]
pub struct Transaction {
    id: String,
    base_dir: PathBuf,
    created_at: DateTime<Utc>,
    manifest: Vec<StagedFile>,
    status: TxnStatus,
    // Set once the journal callback has succeeded through this handle.
    journal_done: bool,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn manifest(&self) -> &[StagedFile] {
        &self.manifest
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    pub fn paths(&self) -> TxnPaths {
        TxnPaths::new(&self.base_dir)
    }

    fn fingerprints(&self) -> Vec<String> {
        self.manifest
            .iter()
            .map(|file| file.fingerprint.clone())
            .collect()
    }
}

/// Creates and drives transactions under a base directory (`var/txn/`).
#[derive(Debug, Clone)]
pub struct TxnManager {
    txn_dir: PathBuf,
    sequence: Arc<AtomicU32>,
}

impl TxnManager {
    pub fn new(txn_dir: impl Into<PathBuf>) -> Self {
        Self {
            txn_dir: txn_dir.into(),
            sequence: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn txn_dir(&self) -> &Path {
        &self.txn_dir
    }

    /// Allocate an id and create the transaction directory.
    ///
    /// Cancellation is honored before and right after directory creation;
    /// a directory created for a cancelled call is removed again.
    pub fn begin(&self, cancel: &CancellationToken) -> Result<Transaction> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        ensure_dir(&self.txn_dir)?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let created_at = Utc::now();
            let id = self.next_id(created_at);
            let base_dir = self.txn_dir.join(&id);
            match fs::create_dir(&base_dir) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(Error::io(&base_dir, err)),
            }
            let paths = TxnPaths::new(&base_dir);
            if let Err(err) = fs::create_dir(&paths.stage_dir) {
                let _ = fs::remove_dir_all(&base_dir);
                return Err(Error::io(&paths.stage_dir, err));
            }
            if cancel.is_cancelled() {
                let _ = fs::remove_dir_all(&base_dir);
                return Err(Error::Cancelled);
            }
            debug!(txn = %id, "transaction opened");
            return Ok(Transaction {
                id,
                base_dir,
                created_at,
                manifest: Vec::new(),
                status: TxnStatus::Open,
                journal_done: false,
            });
        }

        Err(Error::io(
            &self.txn_dir,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "could not allocate a unique transaction id",
            ),
        ))
    }

    /// Write `content` into the staging area and upsert its manifest entry.
    ///
    /// Re-staging a path overwrites the staged bytes and fingerprint but keeps
    /// the entry's position in the manifest.
    pub fn stage_file(
        &self,
        tx: &mut Transaction,
        dest_rel_path: impl AsRef<Path>,
        content: &[u8],
    ) -> Result<()> {
        let next = next_status(tx.status, TxnOp::Stage).map_err(Error::precondition)?;
        let rel = dest_rel_path.as_ref();
        validate_dest_rel_path(rel).map_err(Error::precondition)?;
        let rel_key = manifest_key(rel)?;

        let staged_path = tx.paths().stage_dir.join(&rel_key);
        ensure_dir(parent_of(&staged_path)?)?;
        write_synced(&staged_path, content)?;

        let entry = StagedFile {
            dest_rel_path: rel_key,
            fingerprint: fingerprint(content),
            size: content.len() as u64,
        };
        debug!(
            txn = %tx.id,
            path = %entry.dest_rel_path,
            size = entry.size,
            "file staged"
        );
        match tx
            .manifest
            .iter_mut()
            .find(|existing| existing.dest_rel_path == entry.dest_rel_path)
        {
            Some(existing) => *existing = entry,
            None => tx.manifest.push(entry),
        }
        tx.status = next;
        Ok(())
    }

    /// Persist the manifest and the intent marker, each behind a durability
    /// barrier. After this returns the transaction must be finished.
    pub fn mark_intent(&self, tx: &mut Transaction) -> Result<()> {
        let next = next_status(tx.status, TxnOp::MarkIntent).map_err(Error::precondition)?;
        if tx.status == TxnStatus::IntentMarked {
            return Ok(());
        }
        let paths = tx.paths();

        for dir in staged_dirs(&paths.stage_dir, &tx.manifest) {
            fsync_dir(&dir)?;
        }
        fsync_dir(&self.txn_dir)?;

        let manifest = Manifest {
            id: tx.id.clone(),
            files: tx.manifest.clone(),
            created_at: tx.created_at,
        };
        write_durable(&paths.manifest_path, &to_pretty_json("manifest", &manifest)?)?;

        let intent = IntentMarker {
            id: tx.id.clone(),
            marked_at: Utc::now(),
            fingerprints: tx.fingerprints(),
            ready: true,
        };
        write_durable(&paths.intent_path, &to_pretty_json("intent marker", &intent)?)?;

        tx.status = next;
        info!(txn = %tx.id, files = tx.manifest.len(), "intent marked");
        Ok(())
    }

    /// Run the journal callback, publish every staged file under
    /// `destination_root`, then write the commit marker.
    ///
    /// The callback runs before publishing on purpose: a failed journal
    /// append must leave the destination files untouched.
    ///
    /// The callback runs at most once: it is skipped when the commit marker
    /// already exists or when it already succeeded through this handle.
    /// Publishing is idempotent, so a failed commit can simply be retried.
    pub fn commit<F>(&self, tx: &mut Transaction, destination_root: &Path, journal: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let next = next_status(tx.status, TxnOp::Commit).map_err(Error::precondition)?;
        let paths = tx.paths();
        self.verify_intent(tx, &paths)?;

        let already_committed = paths.commit_path.exists();
        if !already_committed && !tx.journal_done {
            journal()?;
            tx.journal_done = true;
        }

        for entry in &tx.manifest {
            publish(&tx.id, &paths, destination_root, entry)?;
        }

        if !already_committed {
            let marker = CommitMarker {
                id: tx.id.clone(),
                committed_at: Utc::now(),
            };
            write_durable(&paths.commit_path, &to_pretty_json("commit marker", &marker)?)?;
        }

        tx.status = next;
        info!(txn = %tx.id, files = tx.manifest.len(), "transaction committed");
        Ok(())
    }

    /// Remove a committed transaction's directory.
    pub fn cleanup(&self, tx: &mut Transaction) -> Result<()> {
        let next = next_status(tx.status, TxnOp::Cleanup).map_err(Error::precondition)?;
        remove_dir(&tx.base_dir)?;
        tx.status = next;
        debug!(txn = %tx.id, "transaction cleaned up");
        Ok(())
    }

    /// Discard a transaction that never reached the point of no return.
    pub fn abandon(&self, tx: &mut Transaction) -> Result<()> {
        let next = next_status(tx.status, TxnOp::Abandon).map_err(Error::precondition)?;
        remove_dir(&tx.base_dir)?;
        tx.status = next;
        debug!(txn = %tx.id, "transaction abandoned");
        Ok(())
    }

    /// Remove a leftover directory whose commit marker is on disk.
    ///
    /// Needs no handle: once committed, nothing in the directory is read again.
    pub fn sweep(&self, id: &str) -> Result<()> {
        let paths = TxnPaths::new(&self.txn_dir.join(id));
        if !paths.commit_path.is_file() {
            return Err(Error::precondition(format!(
                "transaction {id} has no commit marker; refusing to sweep"
            )));
        }
        remove_dir(&paths.dir)?;
        debug!(txn = %id, "committed transaction swept");
        Ok(())
    }

    /// Rebuild a handle for an intent-marked (or committed) transaction from
    /// its on-disk manifest and markers.
    pub fn reopen(&self, id: &str) -> Result<Transaction> {
        let base_dir = self.txn_dir.join(id);
        let paths = TxnPaths::new(&base_dir);

        let manifest: Manifest =
            read_json(&paths.manifest_path).map_err(|err| Error::corrupt(id, err.to_string()))?;
        let intent: IntentMarker =
            read_json(&paths.intent_path).map_err(|err| Error::corrupt(id, err.to_string()))?;
        if manifest.id != id || intent.id != id {
            return Err(Error::corrupt(
                id,
                format!(
                    "marker ids do not match directory (manifest {}, intent {})",
                    manifest.id, intent.id
                ),
            ));
        }
        let fingerprints: Vec<String> = manifest
            .files
            .iter()
            .map(|file| file.fingerprint.clone())
            .collect();
        if intent.fingerprints != fingerprints {
            return Err(Error::corrupt(
                id,
                "intent fingerprints do not match manifest",
            ));
        }

        let status = if paths.commit_path.exists() {
            TxnStatus::Committed
        } else {
            TxnStatus::IntentMarked
        };
        debug!(txn = %id, status = status.as_str(), "transaction reopened");
        Ok(Transaction {
            id: id.to_string(),
            base_dir,
            created_at: manifest.created_at,
            manifest: manifest.files,
            status,
            journal_done: false,
        })
    }

    fn verify_intent(&self, tx: &Transaction, paths: &TxnPaths) -> Result<()> {
        let intent: IntentMarker = match read_json(&paths.intent_path) {
            Ok(intent) => intent,
            Err(err) if err.is_not_found() => {
                return Err(Error::precondition(format!(
                    "transaction {} has no intent marker on disk",
                    tx.id
                )));
            }
            Err(err) => return Err(Error::corrupt(&tx.id, err.to_string())),
        };
        if !intent.ready || intent.id != tx.id {
            return Err(Error::corrupt(&tx.id, "intent marker is not ready"));
        }
        Ok(())
    }

    // Time-ordered: UTC timestamp, then a per-manager sequence, then noise.
    fn next_id(&self, now: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 10_000;
        let noise: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        format!("{}-{seq:04}-{noise}", now.format("%Y%m%dT%H%M%S%.9f"))
    }
}

fn publish(id: &str, paths: &TxnPaths, destination_root: &Path, entry: &StagedFile) -> Result<()> {
    let dest = destination_root.join(&entry.dest_rel_path);
    if fingerprint_file(&dest)?.as_deref() == Some(entry.fingerprint.as_str()) {
        debug!(txn = %id, path = %entry.dest_rel_path, "destination already up to date");
        return Ok(());
    }

    let staged = paths.stage_dir.join(&entry.dest_rel_path);
    match fingerprint_file(&staged)? {
        None => {
            return Err(Error::corrupt(
                id,
                format!(
                    "staged copy of {} is missing and the destination does not match",
                    entry.dest_rel_path
                ),
            ));
        }
        Some(actual) if actual != entry.fingerprint => {
            return Err(Error::corrupt(
                id,
                format!(
                    "staged copy of {} does not match its manifest fingerprint",
                    entry.dest_rel_path
                ),
            ));
        }
        Some(_) => {}
    }

    let parent = parent_of(&dest)?;
    ensure_dir(parent)?;
    fs::rename(&staged, &dest).map_err(|err| Error::io(&dest, err))?;
    fsync_dir(parent)?;
    debug!(txn = %id, path = %entry.dest_rel_path, "file published");
    Ok(())
}

fn remove_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::io(dir, err)),
    }
}

// Manifest keys use `/` separators and drop `.` components.
fn manifest_key(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            let part = part.to_str().ok_or_else(|| {
                Error::precondition(format!("{} is not valid UTF-8", rel.display()))
            })?;
            parts.push(part);
        }
    }
    Ok(parts.join("/"))
}

// Every directory between the stage root and a staged file, inclusive.
fn staged_dirs(stage_dir: &Path, files: &[StagedFile]) -> BTreeSet<PathBuf> {
    let mut dirs = BTreeSet::new();
    dirs.insert(stage_dir.to_path_buf());
    for file in files {
        let mut current = stage_dir.to_path_buf();
        let parts: Vec<&str> = file.dest_rel_path.split('/').collect();
        for part in &parts[..parts.len().saturating_sub(1)] {
            current = current.join(part);
            dirs.insert(current.clone());
        }
    }
    dirs
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn manager(root: &Path) -> TxnManager {
        TxnManager::new(root.join("var").join("txn"))
    }

    fn intent_marked(mgr: &TxnManager, files: &[(&str, &[u8])]) -> Transaction {
        let mut tx = mgr.begin(&CancellationToken::new()).expect("begin");
        for (path, content) in files {
            mgr.stage_file(&mut tx, path, content).expect("stage");
        }
        mgr.mark_intent(&mut tx).expect("mark intent");
        tx
    }

    #[test]
    fn begin_creates_isolated_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let tx = mgr.begin(&CancellationToken::new()).expect("begin");

        assert_eq!(tx.status(), TxnStatus::Open);
        assert!(tx.base_dir().starts_with(mgr.txn_dir()));
        assert!(tx.paths().stage_dir.is_dir());
    }

    #[test]
    fn begin_honors_cancellation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = mgr.begin(&cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!mgr.txn_dir().exists());
    }

    #[test]
    fn ids_sort_in_creation_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let cancel = CancellationToken::new();
        let ids: Vec<String> = (0..5)
            .map(|_| mgr.begin(&cancel).expect("begin").id().to_string())
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn restaging_overwrites_in_place() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = mgr.begin(&CancellationToken::new()).expect("begin");

        mgr.stage_file(&mut tx, "a.txt", b"first").expect("stage a");
        mgr.stage_file(&mut tx, "dir/b.txt", b"b").expect("stage b");
        mgr.stage_file(&mut tx, "./a.txt", b"second!").expect("restage a");

        let paths: Vec<&str> = tx
            .manifest()
            .iter()
            .map(|file| file.dest_rel_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a.txt", "dir/b.txt"]);
        assert_eq!(tx.manifest()[0].fingerprint, fingerprint(b"second!"));
        assert_eq!(tx.manifest()[0].size, 7);
        assert_eq!(
            fs::read(tx.paths().stage_dir.join("a.txt")).expect("read staged"),
            b"second!"
        );
    }

    #[test]
    fn staging_rejects_paths_outside_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = mgr.begin(&CancellationToken::new()).expect("begin");

        let err = mgr.stage_file(&mut tx, "../escape", b"x").unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
        assert_eq!(tx.status(), TxnStatus::Open);
    }

    #[test]
    fn mark_intent_requires_staged_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = mgr.begin(&CancellationToken::new()).expect("begin");

        assert!(matches!(
            mgr.mark_intent(&mut tx).unwrap_err(),
            Error::Precondition(_)
        ));
    }

    #[test]
    fn mark_intent_writes_manifest_and_marker_without_publishing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let tx = intent_marked(&mgr, &[("out/a.txt", b"alpha")]);

        let paths = tx.paths();
        let manifest: Manifest = read_json(&paths.manifest_path).expect("manifest");
        let intent: IntentMarker = read_json(&paths.intent_path).expect("intent");
        assert_eq!(manifest.id, tx.id());
        assert_eq!(manifest.files, tx.manifest());
        assert!(intent.ready);
        assert_eq!(intent.fingerprints, vec![fingerprint(b"alpha")]);
        assert!(!temp.path().join("out/a.txt").exists());

        let raw = fs::read_to_string(&paths.manifest_path).expect("raw manifest");
        assert!(raw.contains("\"destRelPath\""));
        assert!(raw.contains("\"createdAt\""));
    }

    #[test]
    fn staging_after_intent_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = intent_marked(&mgr, &[("a.txt", b"a")]);

        assert!(matches!(
            mgr.stage_file(&mut tx, "b.txt", b"b").unwrap_err(),
            Error::Precondition(_)
        ));
        assert!(matches!(
            mgr.abandon(&mut tx).unwrap_err(),
            Error::Precondition(_)
        ));
    }

    #[test]
    fn commit_without_intent_is_a_precondition_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = mgr.begin(&CancellationToken::new()).expect("begin");
        mgr.stage_file(&mut tx, "a.txt", b"a").expect("stage");

        let called = Cell::new(false);
        let err = mgr
            .commit(&mut tx, temp.path(), || {
                called.set(true);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
        assert!(!called.get());
        assert!(!temp.path().join("a.txt").exists());
    }

    #[test]
    fn commit_publishes_files_and_runs_callback_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("dest");
        let mgr = manager(temp.path());
        let mut tx = intent_marked(&mgr, &[("a.txt", b"alpha"), ("nested/b.txt", b"beta")]);

        let calls = Cell::new(0);
        mgr.commit(&mut tx, &dest, || {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .expect("commit");
        mgr.commit(&mut tx, &dest, || {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .expect("second commit");

        assert_eq!(calls.get(), 1);
        assert_eq!(tx.status(), TxnStatus::Committed);
        assert_eq!(fs::read(dest.join("a.txt")).expect("a"), b"alpha");
        assert_eq!(fs::read(dest.join("nested/b.txt")).expect("b"), b"beta");
        assert!(tx.paths().commit_path.is_file());
    }

    #[test]
    fn failed_callback_publishes_nothing_and_can_be_retried() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("dest");
        let mgr = manager(temp.path());
        let mut tx = intent_marked(&mgr, &[("a.txt", b"alpha")]);

        let err = mgr
            .commit(&mut tx, &dest, || Err(Error::precondition("journal offline")))
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
        assert!(!dest.join("a.txt").exists());
        assert_eq!(tx.status(), TxnStatus::IntentMarked);

        mgr.commit(&mut tx, &dest, || Ok(())).expect("retry");
        assert_eq!(fs::read(dest.join("a.txt")).expect("a"), b"alpha");
    }

    #[test]
    fn interrupted_publish_resumes_without_rerunning_callback() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("dest");
        fs::create_dir_all(&dest).expect("dest");
        // A plain file where a directory is needed makes the second publish fail.
        fs::write(dest.join("blocked"), b"not a dir").expect("blocker");
        let mgr = manager(temp.path());
        let mut tx = intent_marked(&mgr, &[("a.txt", b"alpha"), ("blocked/b.txt", b"beta")]);

        let calls = Cell::new(0);
        let err = mgr
            .commit(&mut tx, &dest, || {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(fs::read(dest.join("a.txt")).expect("a"), b"alpha");
        assert!(!tx.paths().commit_path.exists());

        fs::remove_file(dest.join("blocked")).expect("unblock");
        mgr.commit(&mut tx, &dest, || {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .expect("resume");

        assert_eq!(calls.get(), 1);
        assert_eq!(fs::read(dest.join("blocked/b.txt")).expect("b"), b"beta");
    }

    #[test]
    fn tampered_staged_bytes_are_reported_corrupt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = intent_marked(&mgr, &[("a.txt", b"alpha")]);
        fs::write(tx.paths().stage_dir.join("a.txt"), b"tampered").expect("tamper");

        let err = mgr.commit(&mut tx, temp.path(), || Ok(())).unwrap_err();
        assert!(matches!(err, Error::CorruptTransaction { .. }));
        assert!(!temp.path().join("a.txt").exists());
    }

    #[test]
    fn cleanup_only_after_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = intent_marked(&mgr, &[("a.txt", b"alpha")]);

        assert!(matches!(
            mgr.cleanup(&mut tx).unwrap_err(),
            Error::Precondition(_)
        ));
        assert!(tx.base_dir().is_dir());

        mgr.commit(&mut tx, temp.path(), || Ok(())).expect("commit");
        mgr.cleanup(&mut tx).expect("cleanup");
        assert_eq!(tx.status(), TxnStatus::CleanedUp);
        assert!(!tx.base_dir().exists());
    }

    #[test]
    fn abandon_discards_unmarked_work() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = mgr.begin(&CancellationToken::new()).expect("begin");
        mgr.stage_file(&mut tx, "a.txt", b"a").expect("stage");

        mgr.abandon(&mut tx).expect("abandon");
        assert!(!tx.base_dir().exists());
        assert!(!temp.path().join("a.txt").exists());
    }

    #[test]
    fn sweep_requires_commit_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let mut tx = intent_marked(&mgr, &[("a.txt", b"alpha")]);

        assert!(matches!(
            mgr.sweep(tx.id()).unwrap_err(),
            Error::Precondition(_)
        ));
        mgr.commit(&mut tx, temp.path(), || Ok(())).expect("commit");
        mgr.sweep(tx.id()).expect("sweep");
        assert!(!tx.base_dir().exists());
    }

    #[test]
    fn reopen_rebuilds_handle_from_markers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let tx = intent_marked(&mgr, &[("a.txt", b"alpha"), ("b.txt", b"beta")]);

        let reopened = mgr.reopen(tx.id()).expect("reopen");
        assert_eq!(reopened.status(), TxnStatus::IntentMarked);
        assert_eq!(reopened.manifest(), tx.manifest());
    }

    #[test]
    fn reopen_rejects_unreadable_manifest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mgr = manager(temp.path());
        let tx = intent_marked(&mgr, &[("a.txt", b"alpha")]);
        fs::write(tx.paths().manifest_path, b"{ truncated").expect("corrupt");

        assert!(matches!(
            mgr.reopen(tx.id()).unwrap_err(),
            Error::CorruptTransaction { .. }
        ));
    }
}
