use std::fmt;

use serde::Serialize;

use crate::errors::{SessionError, SessionResult};

/// Number of random bytes behind every upload key (512 bits).
pub const UPLOAD_KEY_BYTES: usize = 64;
pub const UPLOAD_KEY_HEX_LENGTH: usize = UPLOAD_KEY_BYTES * 2;

/// Opaque session capability, always lowercase hex of the expected length.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Normalizes a raw `upload_key` parameter and checks its shape.
    ///
    /// This does not consult the registry; a well-formed key may still be
    /// unknown to this process.
    pub fn parse(raw: Option<&str>) -> SessionResult<Self> {
        let normalized = raw.map(|value| value.trim().to_ascii_lowercase());
        let Some(key) = normalized.filter(|value| !value.is_empty()) else {
            return Err(SessionError::MissingKey);
        };

        if key.len() != UPLOAD_KEY_HEX_LENGTH {
            return Err(SessionError::InvalidKeyLength { actual: key.len() });
        }

        if hex::decode(&key).is_err() {
            return Err(SessionError::InvalidKeyFormat);
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
