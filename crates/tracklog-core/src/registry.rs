//! In-memory registry of upload keys issued by this process.
//!
//! Nothing is persisted: a restart invalidates every outstanding key.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::{SessionError, SessionResult};
use crate::key::{SessionKey, UPLOAD_KEY_BYTES};

#[derive(Default)]
pub struct SessionRegistry {
    keys: Mutex<HashSet<SessionKey>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh key from the OS entropy source and records it.
    pub fn issue(&self) -> SessionResult<SessionKey> {
        let mut buf = [0u8; UPLOAD_KEY_BYTES];
        OsRng.try_fill_bytes(&mut buf).map_err(SessionError::Entropy)?;
        let key = SessionKey::from_bytes(&buf);

        self.keys().insert(key.clone());
        Ok(key)
    }

    pub fn is_valid(&self, key: &SessionKey) -> bool {
        self.keys().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the guard cannot leave the set half-updated.
    fn keys(&self) -> MutexGuard<'_, HashSet<SessionKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
