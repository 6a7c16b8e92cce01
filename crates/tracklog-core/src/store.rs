//! Append-only per-session log files.
//!
//! Layout of `<root>/<name>_<key>.csv`:
//!
//! ```text
//! {"upload_key":"…","upload_name":"…","user_agent":"…","received_at":"…"}
//! 1,{"a":1}
//! 2,{"a":2}
//! ```
//!
//! The first line is written once when the file is created. Data lines carry a
//! 1-based index that continues from the number of lines already present.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SessionError, SessionResult};
use crate::key::SessionKey;
use crate::naming::name_for;

pub const LOG_FILE_EXTENSION: &str = "csv";

/// Provenance recorded on the first line of every log file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMetadata {
    pub upload_key: String,
    pub upload_name: String,
    pub user_agent: String,
    pub received_at: String,
}

/// Records past a follow cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogSlice {
    /// Number of complete data lines in the file.
    pub total: u64,
    /// Stored `<index>,<payload>` lines after the cursor, in file order.
    pub lines: Vec<String>,
}

pub struct SessionStore {
    root: PathBuf,
    append_locks: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &SessionKey) -> PathBuf {
        let filename = format!(
            "{}_{}.{}",
            name_for(key.as_str()),
            key.as_str(),
            LOG_FILE_EXTENSION
        );
        self.root.join(filename)
    }

    /// Appends one batch of already-validated JSON lines.
    ///
    /// Appends for the same key are serialized; a file created by this call is
    /// removed again if any later step fails.
    pub fn append(
        &self,
        key: &SessionKey,
        client_identity: &str,
        received_at: DateTime<Utc>,
        lines: &[String],
    ) -> SessionResult<PathBuf> {
        let batch = PendingBatch {
            key,
            client_identity,
            received_at,
            lines,
        };
        self.append_with(&batch, commit)
    }

    fn append_with<C>(&self, batch: &PendingBatch<'_>, commit: C) -> SessionResult<PathBuf>
    where
        C: FnOnce(&File, &Path, &[u8]) -> SessionResult<()>,
    {
        let lock = self.append_lock(batch.key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        fs::create_dir_all(&self.root)
            .map_err(|err| SessionError::storage("create upload directory", &self.root, err))?;

        let path = self.path_for(batch.key);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|err| SessionError::storage("open upload file", &path, err))?;

        let is_new = match file.metadata() {
            Ok(meta) => meta.len() == 0,
            Err(err) => return Err(SessionError::storage("stat upload file", &path, err)),
        };

        let outcome = prepare_batch(&file, &path, is_new, batch).and_then(|prepared| {
            commit(&file, &path, &prepared.bytes)?;
            Ok(prepared)
        });
        drop(file);

        match outcome {
            Ok(prepared) => {
                tracing::debug!(
                    "appended records {}..={} to {}",
                    prepared.first_index,
                    prepared.last_index,
                    path.display()
                );
                Ok(path)
            }
            Err(err) => {
                if is_new {
                    if let Err(remove_err) = fs::remove_file(&path) {
                        tracing::warn!(
                            "failed to remove incomplete upload file {}: {}",
                            path.display(),
                            remove_err
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Returns `None` when nothing has been uploaded under `key` yet.
    ///
    /// A trailing line without its terminator belongs to an append still in
    /// flight and is not counted.
    pub fn read_since(&self, key: &SessionKey, cursor: u64) -> SessionResult<Option<LogSlice>> {
        let path = self.path_for(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SessionError::storage("open upload file", &path, err)),
        };

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut header_seen = false;
        let mut slice = LogSlice::default();

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|err| SessionError::storage("read upload file", &path, err))?;
            if read == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            if !header_seen {
                header_seen = true;
                continue;
            }

            if is_blank(&buf) {
                continue;
            }

            slice.total += 1;
            if slice.total > cursor {
                slice
                    .lines
                    .push(String::from_utf8_lossy(&buf).trim().to_string());
            }
        }

        Ok(Some(slice))
    }

    fn append_lock(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .append_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

struct PendingBatch<'a> {
    key: &'a SessionKey,
    client_identity: &'a str,
    received_at: DateTime<Utc>,
    lines: &'a [String],
}

struct ExistingLog {
    records: u64,
    terminated: bool,
}

struct PreparedBatch {
    bytes: Vec<u8>,
    first_index: u64,
    last_index: u64,
}

/// Renders the whole batch, metadata and repair newline included, into one
/// buffer so it reaches the file in a single write.
fn prepare_batch(
    file: &File,
    path: &Path,
    is_new: bool,
    batch: &PendingBatch<'_>,
) -> SessionResult<PreparedBatch> {
    let existing = if is_new {
        ExistingLog {
            records: 0,
            terminated: true,
        }
    } else {
        scan_existing(file, path)?
    };

    let mut bytes = if is_new {
        let metadata = LogMetadata {
            upload_key: batch.key.to_string(),
            upload_name: name_for(batch.key.as_str()),
            user_agent: batch.client_identity.to_string(),
            received_at: format_timestamp(&batch.received_at),
        };
        let mut header = serde_json::to_vec(&metadata)?;
        header.push(b'\n');
        header
    } else if !existing.terminated {
        tracing::info!(
            "terminating interrupted final line in {} before appending",
            path.display()
        );
        vec![b'\n']
    } else {
        Vec::new()
    };

    let first_index = existing.records + 1;
    for (offset, line) in batch.lines.iter().enumerate() {
        bytes.extend_from_slice(format!("{},{}\n", first_index + offset as u64, line).as_bytes());
    }

    Ok(PreparedBatch {
        bytes,
        first_index,
        last_index: existing.records + batch.lines.len() as u64,
    })
}

fn commit(file: &File, path: &Path, bytes: &[u8]) -> SessionResult<()> {
    let mut handle = file;
    handle
        .seek(SeekFrom::End(0))
        .map_err(|err| SessionError::storage("seek upload file to end", path, err))?;
    handle
        .write_all(bytes)
        .map_err(|err| SessionError::storage("write upload file", path, err))?;
    handle
        .flush()
        .map_err(|err| SessionError::storage("flush upload data", path, err))?;
    file.sync_data()
        .map_err(|err| SessionError::storage("sync upload file", path, err))
}

/// Whitespace-only lines are not records. Both the append scan and the follow
/// read go through here so their counts agree.
fn is_blank(line: &[u8]) -> bool {
    String::from_utf8_lossy(line).trim().is_empty()
}

/// Counts non-blank data lines after the metadata line. An unterminated final
/// line is counted because the caller is about to terminate it.
fn scan_existing(file: &File, path: &Path) -> SessionResult<ExistingLog> {
    let mut handle = file;
    handle
        .seek(SeekFrom::Start(0))
        .map_err(|err| SessionError::storage("seek upload file to start", path, err))?;

    let mut reader = BufReader::new(handle);
    let mut buf = Vec::new();
    let mut lines_seen = 0u64;
    let mut existing = ExistingLog {
        records: 0,
        terminated: true,
    };

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|err| SessionError::storage("scan existing upload file", path, err))?;
        if read == 0 {
            break;
        }

        existing.terminated = buf.last() == Some(&b'\n');
        lines_seen += 1;
        if lines_seen == 1 {
            continue;
        }
        if !is_blank(&buf) {
            existing.records += 1;
        }
    }

    Ok(existing)
}
