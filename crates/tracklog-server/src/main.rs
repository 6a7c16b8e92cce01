use std::{io, path::PathBuf};

use anyhow::Result;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;
use tracklog_server::{
    build_service,
    config::{self, CliServerOptions},
    run_http_server,
};

#[derive(Parser, Debug)]
#[command(name = "tracklog-server", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// TOML configuration file with a [server] table
    #[arg(long = "config", value_name = "FILE")]
    config_path: Option<PathBuf>,

    /// Optional log filter (e.g. info, debug, tracklog_core=debug)
    #[arg(long = "log-level", value_name = "LEVEL")]
    log_level: Option<String>,

    /// Host address to bind to (default: all interfaces)
    #[arg(long = "host", value_name = "HOST")]
    host: Option<String>,

    /// Port number to bind to
    #[arg(long = "port", value_name = "PORT")]
    port: Option<u16>,

    /// Directory receiving one log file per upload session
    #[arg(long = "upload-dir", value_name = "PATH")]
    upload_dir: Option<PathBuf>,

    /// Serve static files from this directory for unmatched paths
    #[arg(long = "static-dir", value_name = "PATH")]
    static_dir: Option<PathBuf>,

    /// Largest accepted upload body in bytes
    #[arg(long = "max-body-bytes", value_name = "BYTES")]
    max_body_bytes: Option<usize>,

    /// Additional CORS allowed origins
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    cors_origins: Vec<String>,

    /// Enable TLS
    #[arg(long = "tls", action = ArgAction::SetTrue)]
    tls: bool,

    /// Path to SSL certificate file
    #[arg(long = "cert", value_name = "FILE")]
    cert_path: Option<PathBuf>,

    /// Path to SSL private key file
    #[arg(long = "key", value_name = "FILE")]
    key_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args);
    tracing::info!("tracklog-server {}", env!("CARGO_PKG_VERSION"));

    let cli = CliServerOptions {
        host: args.host.clone(),
        port: args.port,
        upload_dir: args.upload_dir.clone(),
        static_dir: args.static_dir.clone(),
        max_body_bytes: args.max_body_bytes,
        cors_origins: args.cors_origins.clone(),
        tls: args.tls,
        cert_path: args.cert_path.clone(),
        key_path: args.key_path.clone(),
    };

    let file_config = config::load_file_config(args.config_path.as_deref())?;
    let server_config = config::determine_config(&cli, file_config.as_ref())?;

    let service = build_service(&server_config);
    run_http_server(service, server_config).await
}

fn init_tracing(args: &Args) {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    let _ = builder.try_init();
}
