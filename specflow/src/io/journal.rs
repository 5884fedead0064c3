//! Append-only journal (`var/journal.ndjson`).
//!
//! One compact JSON object per line. A crash mid-append can leave a damaged
//! trailing line: readers ignore it and the next append cuts it off before
//! writing.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::core::types::JournalEntry;
use crate::error::{Error, Result};
use crate::io::durable::{ensure_dir, fsync_dir, fsync_file, open_append, parent_of};

/// Entries recovered from the journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalReplay {
    pub entries: Vec<JournalEntry>,
    /// Damaged trailing content was ignored.
    pub torn_tail: bool,
}

/// Append `entry` as one line, then flush the file and its directory.
///
/// Open and write failures are errors. Flush failures are logged only: the
/// bytes are already in the file, the flush just strengthens durability.
pub fn append_entry(path: &Path, entry: &JournalEntry) -> Result<()> {
    let parent = parent_of(path)?;
    ensure_dir(parent)?;
    repair_torn_tail(path)?;

    let mut line = serde_json::to_string(entry).map_err(|source| Error::Encode {
        what: "journal entry",
        source,
    })?;
    line.push('\n');

    let mut file = open_append(path)?;
    file.write_all(line.as_bytes())
        .map_err(|err| Error::io(path, err))?;

    if let Err(err) = fsync_file(&file, path) {
        warn!(path = %path.display(), error = %err, "journal flush failed");
    }
    if let Err(err) = fsync_dir(parent) {
        warn!(dir = %parent.display(), error = %err, "journal directory flush failed");
    }
    debug!(turn = entry.turn, step = entry.step.as_str(), "journal entry appended");
    Ok(())
}

/// Read every intact entry. A missing journal is empty.
///
/// Trailing content a crash may have damaged is skipped and flagged: an
/// unterminated last line (even one cut inside a multi-byte character), or a
/// terminated last line that does not parse. A bad line anywhere else is
/// `CorruptJournal`.
pub fn read_journal(path: &Path) -> Result<JournalReplay> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(JournalReplay::default());
        }
        Err(err) => return Err(Error::io(path, err)),
    };

    let keep = intact_len(&bytes);
    let mut entries = Vec::new();
    for (index, (_, line)) in lines(&bytes[..keep]).enumerate() {
        if is_blank(line) {
            continue;
        }
        let entry = parse_line(line).map_err(|reason| Error::CorruptJournal {
            path: path.to_path_buf(),
            line: index + 1,
            reason,
        })?;
        entries.push(entry);
    }

    let torn_tail = keep < bytes.len();
    if torn_tail {
        debug!(
            path = %path.display(),
            bytes = bytes.len() - keep,
            "ignoring torn journal tail"
        );
    }
    Ok(JournalReplay { entries, torn_tail })
}

/// Most recent intact entry, if any.
pub fn last_entry(path: &Path) -> Result<Option<JournalEntry>> {
    Ok(read_journal(path)?.entries.pop())
}

// Cut off damaged trailing content so the next append starts clean.
fn repair_torn_tail(path: &Path) -> Result<()> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(Error::io(path, err)),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|err| Error::io(path, err))?;

    let keep = intact_len(&bytes);
    if keep == bytes.len() {
        return Ok(());
    }
    file.set_len(keep as u64)
        .map_err(|err| Error::io(path, err))?;
    warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "truncated torn journal tail"
    );
    Ok(())
}

// Length of the prefix that ends on an intact line boundary. Only the final
// line is judged here; earlier lines are left for the reader to report.
fn intact_len(bytes: &[u8]) -> usize {
    let terminated = bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |pos| pos + 1);
    if terminated < bytes.len() {
        return terminated;
    }
    match lines(bytes).filter(|(_, line)| !is_blank(line)).last() {
        Some((start, line)) if parse_line(line).is_err() => start,
        _ => bytes.len(),
    }
}

// Newline-terminated lines with their byte offsets, newline stripped.
fn lines(bytes: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    bytes
        .split_inclusive(|byte| *byte == b'\n')
        .scan(0, |offset, chunk| {
            let start = *offset;
            *offset += chunk.len();
            Some((start, chunk.strip_suffix(b"\n").unwrap_or(chunk)))
        })
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_line(line: &[u8]) -> std::result::Result<JournalEntry, String> {
    let text = std::str::from_utf8(line).map_err(|err| err.to_string())?;
    serde_json::from_str(text).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::core::types::{ArtifactRef, Step};

    fn entry(turn: u32, decision: &str) -> JournalEntry {
        JournalEntry {
            ts: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            turn,
            step: Step::Implement,
            decision: decision.to_string(),
            elapsed_ms: 250,
            error: None,
            artifacts: vec![ArtifactRef {
                kind: "patch".to_string(),
                path: format!("out/turn-{turn}.diff"),
            }],
        }
    }

    fn line_of(entry: &JournalEntry) -> Vec<u8> {
        let mut line = serde_json::to_vec(entry).expect("encode");
        line.push(b'\n');
        line
    }

    #[test]
    fn missing_journal_replays_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let replay = read_journal(&temp.path().join("journal.ndjson")).expect("read");
        assert_eq!(replay, JournalReplay::default());
    }

    #[test]
    fn appends_one_line_per_entry_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("var").join("journal.ndjson");

        append_entry(&path, &entry(1, "continue")).expect("append 1");
        append_entry(&path, &entry(2, "advance")).expect("append 2");

        let raw = fs::read_to_string(&path).expect("raw");
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));

        let replay = read_journal(&path).expect("read");
        assert!(!replay.torn_tail);
        let decisions: Vec<&str> = replay
            .entries
            .iter()
            .map(|entry| entry.decision.as_str())
            .collect();
        assert_eq!(decisions, vec!["continue", "advance"]);
    }

    #[test]
    fn torn_tail_is_ignored_then_repaired_by_next_append() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("journal.ndjson");
        append_entry(&path, &entry(1, "continue")).expect("append");
        let mut file = open_append(&path).expect("open");
        file.write_all(b"{\"ts\":\"2026-03-01T12:").expect("partial");
        drop(file);

        let replay = read_journal(&path).expect("read torn");
        assert!(replay.torn_tail);
        assert_eq!(replay.entries.len(), 1);

        append_entry(&path, &entry(2, "advance")).expect("append after tear");
        let replay = read_journal(&path).expect("read repaired");
        assert!(!replay.torn_tail);
        assert_eq!(replay.entries.len(), 2);
        assert_eq!(
            last_entry(&path).expect("last").map(|e| e.decision),
            Some("advance".to_string())
        );
    }

    #[test]
    fn corrupt_middle_line_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("journal.ndjson");
        let mut raw = line_of(&entry(1, "continue"));
        raw.extend_from_slice(b"garbage\n");
        raw.extend_from_slice(&line_of(&entry(3, "advance")));
        fs::write(&path, raw).expect("write");

        let err = read_journal(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptJournal { line: 2, .. }));

        // Appending leaves an interior bad line alone.
        append_entry(&path, &entry(4, "advance")).expect("append");
        let err = read_journal(&path).unwrap_err();
        assert!(matches!(err, Error::CorruptJournal { line: 2, .. }));
    }

    #[test]
    fn tail_torn_inside_a_multibyte_character_is_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("journal.ndjson");
        append_entry(&path, &entry(1, "résumé")).expect("append");

        let second = line_of(&entry(2, "résumé"));
        let accent = second
            .windows(2)
            .position(|pair| pair == "é".as_bytes())
            .expect("accent");
        let mut file = open_append(&path).expect("open");
        file.write_all(&second[..=accent]).expect("partial");
        drop(file);

        let replay = read_journal(&path).expect("read torn");
        assert!(replay.torn_tail);
        assert_eq!(replay.entries, vec![entry(1, "résumé")]);

        append_entry(&path, &entry(3, "advance")).expect("append after tear");
        let replay = read_journal(&path).expect("read repaired");
        assert!(!replay.torn_tail);
        assert_eq!(replay.entries, vec![entry(1, "résumé"), entry(3, "advance")]);
    }

    #[test]
    fn unparsable_terminated_last_line_is_treated_as_torn() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("journal.ndjson");
        append_entry(&path, &entry(1, "continue")).expect("append");
        let mut file = open_append(&path).expect("open");
        file.write_all(b"{\"ts\":\"2026\n").expect("garbage");
        drop(file);

        let replay = read_journal(&path).expect("read");
        assert!(replay.torn_tail);
        assert_eq!(replay.entries, vec![entry(1, "continue")]);

        append_entry(&path, &entry(2, "advance")).expect("append");
        let replay = read_journal(&path).expect("read repaired");
        assert!(!replay.torn_tail);
        assert_eq!(replay.entries, vec![entry(1, "continue"), entry(2, "advance")]);
    }

    #[test]
    fn zero_filled_last_line_is_treated_as_torn() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("journal.ndjson");
        let mut raw = line_of(&entry(1, "continue"));
        raw.extend_from_slice(&[0u8; 16]);
        raw.push(b'\n');
        fs::write(&path, raw).expect("write");

        let replay = read_journal(&path).expect("read");
        assert!(replay.torn_tail);
        assert_eq!(
            last_entry(&path).expect("last").map(|e| e.turn),
            Some(1)
        );
    }
}
