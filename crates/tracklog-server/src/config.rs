use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
/// Matches the largest single line the capture client is expected to send.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub max_body_bytes: usize,
    pub cors: Option<CorsConfig>,
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from(DEFAULT_UPLOAD_DIR),
            static_dir: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cors: None,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CliServerOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upload_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub max_body_bytes: Option<usize>,
    pub cors_origins: Vec<String>,
    pub tls: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone)]
pub struct FileServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upload_dir: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub max_body_bytes: Option<usize>,
    pub cors_origins: Vec<String>,
    pub tls: Option<bool>,
}

#[derive(Deserialize)]
struct RootConfig {
    #[serde(default)]
    server: Option<RawFileServerConfig>,
}

#[derive(Deserialize, Default)]
struct RawFileServerConfig {
    host: Option<String>,
    port: Option<u16>,
    upload_dir: Option<String>,
    static_dir: Option<String>,
    max_body_bytes: Option<usize>,
    cors: Option<RawFileCorsConfig>,
    tls: Option<bool>,
}

#[derive(Deserialize, Default)]
struct RawFileCorsConfig {
    allowed_origins: Option<Vec<String>>,
}

pub fn load_file_config(path: Option<&Path>) -> Result<Option<FileServerConfig>> {
    let Some(path) = path else {
        return Ok(None);
    };

    if !path.exists() {
        return Err(anyhow!("Config file {} does not exist", path.display()));
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let parsed: RootConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse TOML config {}", path.display()))?;

    Ok(parsed
        .server
        .map(|raw| raw.into_runtime_config(path.parent().unwrap_or(Path::new(".")))))
}

/// CLI flags win over the config file, which wins over built-in defaults.
pub fn determine_config(
    cli: &CliServerOptions,
    file_cfg: Option<&FileServerConfig>,
) -> Result<ServerConfig> {
    let tls = cli.tls || file_cfg.and_then(|cfg| cfg.tls).unwrap_or(false);
    if tls {
        return Err(anyhow!(
            "HTTPS is not implemented yet. Terminate TLS in front of tracklog-server and serve plain HTTP."
        ));
    }
    if cli.cert_path.is_some() || cli.key_path.is_some() {
        tracing::warn!("TLS cert and/or key path provided but not using TLS");
    }

    let host = cli
        .host
        .clone()
        .or_else(|| file_cfg.and_then(|cfg| cfg.host.clone()))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = cli
        .port
        .or_else(|| file_cfg.and_then(|cfg| cfg.port))
        .unwrap_or(DEFAULT_PORT);

    let upload_dir = cli
        .upload_dir
        .clone()
        .or_else(|| file_cfg.and_then(|cfg| cfg.upload_dir.clone()))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR));

    let static_dir = cli
        .static_dir
        .clone()
        .or_else(|| file_cfg.and_then(|cfg| cfg.static_dir.clone()));

    let max_body_bytes = cli
        .max_body_bytes
        .or_else(|| file_cfg.and_then(|cfg| cfg.max_body_bytes))
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes == 0 {
        return Err(anyhow!("max_body_bytes must be greater than zero"));
    }

    Ok(ServerConfig {
        host,
        port,
        upload_dir,
        static_dir,
        max_body_bytes,
        cors: build_cors_config(cli, file_cfg),
    })
}

fn build_cors_config(
    cli: &CliServerOptions,
    file_cfg: Option<&FileServerConfig>,
) -> Option<CorsConfig> {
    let mut origins: Vec<String> = Vec::new();

    if let Some(cfg) = file_cfg {
        origins.extend(cfg.cors_origins.iter().cloned());
    }

    origins.extend(cli.cors_origins.iter().cloned());

    if origins.is_empty() {
        return None;
    }

    origins.sort();
    origins.dedup();

    Some(CorsConfig {
        allowed_origins: origins,
    })
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl RawFileServerConfig {
    fn into_runtime_config(self, base: &Path) -> FileServerConfig {
        let resolve = |value: String| resolve_relative(base, Path::new(&value));

        FileServerConfig {
            host: self.host,
            port: self.port,
            upload_dir: self.upload_dir.map(resolve),
            static_dir: self.static_dir.map(resolve),
            max_body_bytes: self.max_body_bytes,
            cors_origins: self
                .cors
                .and_then(|cors| cors.allowed_origins)
                .unwrap_or_default(),
            tls: self.tls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_without_cli_or_file() {
        let config =
            determine_config(&CliServerOptions::default(), None).expect("determine config");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.upload_dir, PathBuf::from(DEFAULT_UPLOAD_DIR));
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert!(config.static_dir.is_none());
        assert!(config.cors.is_none());
    }

    #[test]
    fn file_config_is_loaded_and_paths_resolve_against_it() {
        let dir = tempdir().expect("tempdir");
        let config_path = dir.path().join("tracklog.toml");
        fs::write(
            &config_path,
            r#"
[server]
host = "127.0.0.1"
port = 9100
upload_dir = "data/uploads"
static_dir = "/srv/www"

[server.cors]
allowed_origins = ["https://example.com"]
"#,
        )
        .expect("write config");

        let file_cfg = load_file_config(Some(&config_path))
            .expect("load config")
            .expect("server table");
        let config = determine_config(&CliServerOptions::default(), Some(&file_cfg))
            .expect("determine config");

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9100);
        assert_eq!(config.upload_dir, dir.path().join("data/uploads"));
        assert_eq!(config.static_dir, Some(PathBuf::from("/srv/www")));
        let cors = config.cors.expect("cors config");
        assert_eq!(cors.allowed_origins, vec!["https://example.com".to_string()]);
    }

    #[test]
    fn cli_overrides_file_values() {
        let file_cfg = FileServerConfig {
            host: Some("0.0.0.0".to_string()),
            port: Some(4000),
            upload_dir: Some(PathBuf::from("/var/lib/tracklog")),
            cors_origins: vec!["https://b.example".to_string()],
            ..FileServerConfig::default()
        };

        let cli = CliServerOptions {
            host: Some("127.0.0.1".to_string()),
            port: Some(9000),
            upload_dir: Some(PathBuf::from("elsewhere")),
            cors_origins: vec![
                "https://a.example".to_string(),
                "https://b.example".to_string(),
            ],
            ..CliServerOptions::default()
        };

        let config = determine_config(&cli, Some(&file_cfg)).expect("determine config");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.upload_dir, PathBuf::from("elsewhere"));
        assert_eq!(
            config.cors.expect("cors").allowed_origins,
            vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ]
        );
    }

    #[test]
    fn tls_request_is_refused() {
        let cli = CliServerOptions {
            tls: true,
            ..CliServerOptions::default()
        };
        let err = determine_config(&cli, None).unwrap_err();
        assert!(err.to_string().contains("HTTPS is not implemented"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        assert!(load_file_config(Some(&missing)).is_err());
        assert!(load_file_config(None).expect("no path").is_none());
    }

    #[test]
    fn bind_addr_parses_host_and_port() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8123,
            ..ServerConfig::default()
        };
        let addr = config.bind_addr().expect("bind addr");
        assert_eq!(addr.port(), 8123);
    }
}
