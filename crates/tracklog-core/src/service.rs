use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;

use crate::errors::{SessionError, SessionResult};
use crate::key::SessionKey;
use crate::naming::name_for;
use crate::registry::SessionRegistry;
use crate::store::SessionStore;

#[derive(Clone, Debug)]
pub struct IssuedKey {
    pub key: SessionKey,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct UploadReceipt {
    pub records: usize,
    pub file_path: PathBuf,
    pub received_at: DateTime<Utc>,
    pub upload_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FollowOutcome {
    /// Total records stored for the session; the caller's next cursor.
    pub position: u64,
    pub lines: Vec<String>,
}

impl FollowOutcome {
    pub fn has_new_data(&self) -> bool {
        !self.lines.is_empty()
    }

    pub fn body(&self) -> String {
        self.lines.join("\n")
    }
}

/// Entry point shared by every request handler: key admission, batch
/// validation and the read/write paths of the store.
pub struct SessionService {
    registry: Arc<SessionRegistry>,
    store: SessionStore,
}

impl SessionService {
    pub fn new(registry: Arc<SessionRegistry>, store: SessionStore) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn issue_key(&self) -> SessionResult<IssuedKey> {
        let key = self.registry.issue()?;
        let name = name_for(key.as_str());
        tracing::info!(upload_name = %name, upload_key = %key, "generated upload key");
        Ok(IssuedKey { key, name })
    }

    /// Shape check plus registry membership; no I/O.
    pub fn admit(&self, key_param: Option<&str>) -> SessionResult<SessionKey> {
        let key = SessionKey::parse(key_param)?;
        if !self.registry.is_valid(&key) {
            return Err(SessionError::UnknownKey);
        }
        Ok(key)
    }

    /// Validates a newline-delimited JSON batch and appends it in one store
    /// call. A single invalid line rejects the whole batch before any write.
    pub fn upload<R: BufRead>(
        &self,
        key_param: Option<&str>,
        body: R,
        client_identity: &str,
    ) -> SessionResult<UploadReceipt> {
        let key = self.admit(key_param)?;
        let upload_name = name_for(key.as_str());
        let received_at = Utc::now();

        let lines = match collect_records(body) {
            Ok(lines) => lines,
            Err(err) => {
                tracing::warn!(upload_name = %upload_name, "rejected upload batch: {err}");
                return Err(err);
            }
        };
        for (index, line) in lines.iter().enumerate() {
            tracing::debug!(
                upload_name = %upload_name,
                record = index + 1,
                "upload record {line}"
            );
        }

        let file_path = self
            .store
            .append(&key, client_identity, received_at, &lines)?;

        tracing::info!(
            upload_name = %upload_name,
            user_agent = %client_identity,
            records = lines.len(),
            saved_to = %file_path.display(),
            "upload received"
        );

        Ok(UploadReceipt {
            records: lines.len(),
            file_path,
            received_at,
            upload_name,
        })
    }

    /// Returns the records stored after `position_param` (default 0) and the
    /// new cursor. Never writes.
    pub fn follow(
        &self,
        key_param: Option<&str>,
        position_param: Option<&str>,
    ) -> SessionResult<FollowOutcome> {
        let key = self.admit(key_param)?;
        let cursor = parse_position(position_param)?;

        let Some(slice) = self.store.read_since(&key, cursor)? else {
            return Ok(FollowOutcome::default());
        };

        Ok(FollowOutcome {
            position: slice.total,
            lines: slice.lines,
        })
    }
}

fn parse_position(raw: Option<&str>) -> SessionResult<u64> {
    match raw.map(str::trim) {
        None | Some("") => Ok(0),
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| SessionError::InvalidPosition(value.to_string())),
    }
}

fn collect_records<R: BufRead>(mut body: R) -> SessionResult<Vec<String>> {
    let mut lines = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if body.read_until(b'\n', &mut buf).map_err(SessionError::Body)? == 0 {
            break;
        }

        let line_number = lines.len() + 1;
        let text = std::str::from_utf8(&buf).map_err(|err| SessionError::InvalidRecord {
            line: line_number,
            reason: err.to_string(),
        })?;
        let line = text.trim();
        if line.is_empty() {
            continue;
        }

        serde_json::from_str::<IgnoredAny>(line).map_err(|err| SessionError::InvalidRecord {
            line: line_number,
            reason: err.to_string(),
        })?;
        lines.push(line.to_string());
    }

    Ok(lines)
}
