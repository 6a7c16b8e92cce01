//! Session-keyed, append-only record logs.
//!
//! Clients obtain an upload key from the [`SessionRegistry`], submit batches
//! of newline-delimited JSON under that key, and followers poll for records
//! appended after a cursor they hold.

pub mod errors;
pub mod key;
pub mod naming;
pub mod registry;
pub mod service;
pub mod store;

pub use errors::{SessionError, SessionResult};
pub use key::{SessionKey, UPLOAD_KEY_HEX_LENGTH};
pub use naming::name_for;
pub use registry::SessionRegistry;
pub use service::{FollowOutcome, IssuedKey, SessionService, UploadReceipt};
pub use store::{format_timestamp, LogMetadata, LogSlice, SessionStore};
