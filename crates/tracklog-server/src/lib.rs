use std::sync::Arc;

use tracklog_core::{SessionRegistry, SessionService, SessionStore};

pub mod config;
mod http_server;

pub use http_server::{build_router, run_http_server, FOLLOW_POSITION_HEADER};

use crate::config::ServerConfig;

/// Builds the process-wide session service. The registry starts empty, so
/// keys issued before a restart are no longer accepted.
pub fn build_service(config: &ServerConfig) -> Arc<SessionService> {
    Arc::new(SessionService::new(
        Arc::new(SessionRegistry::new()),
        SessionStore::new(config.upload_dir.clone()),
    ))
}
