// MIT License
// Copyright 2023--present liaison developers

//! Session bootstrap configuration.
//!
//! Two JSON documents are involved:
//!
//! - a **transport config** (`--transport-config`), naming the endpoints to
//!   listen on or connect to, optional TLS material and the query timeout;
//! - a **unit config** (`resources/liaison.json` inside a packaged unit),
//!   carrying the routing namespace plus an embedded transport config.
//!
//! Relative file paths inside either document are resolved against the
//! directory of the document itself, never the working directory, so a
//! packaged unit keeps working wherever it is extracted.
//!
//! ```json
//! {
//!   "namespace": "bouncingBall",
//!   "transport": {
//!     "connect": ["tcp/10.0.0.5:7447"],
//!     "tls": { "root_ca_certificate": "root_ca_certificate" },
//!     "query_timeout_ms": 5000
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Endpoint used when a config names none.
pub const DEFAULT_ENDPOINT: &str = "tcp/127.0.0.1:7447";

/// Environment variable naming a unit config, for hosts that pass no
/// resource path to instantiate.
pub const CONFIG_ENV: &str = "LIAISON_CONFIG";

const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid namespace `{namespace}`: {reason}")]
    InvalidNamespace {
        namespace: String,
        reason: &'static str,
    },
    #[error("unsupported endpoint `{0}`, expected tcp/<host>:<port>")]
    UnsupportedEndpoint(String),
    #[error("no unit config: no resource path was given and {CONFIG_ENV} is not set")]
    NotFound,
}

/// Paths to PEM-encoded TLS material, as carried in a transport config.
///
/// A listening session presents `listen_certificate` and, when
/// `root_ca_certificate` is set, requires clients to present a certificate
/// issued under it. A connecting session verifies the server against
/// `root_ca_certificate` and presents `connect_certificate` if one is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_certificate: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_private_key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_certificate: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_private_key: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_ca_certificate: Option<PathBuf>,
}

impl TlsConfig {
    /// `(field name, path)` for every configured file.
    pub fn files(&self) -> Vec<(&'static str, &Path)> {
        [
            ("listen_certificate", &self.listen_certificate),
            ("listen_private_key", &self.listen_private_key),
            ("connect_certificate", &self.connect_certificate),
            ("connect_private_key", &self.connect_private_key),
            ("root_ca_certificate", &self.root_ca_certificate),
        ]
        .into_iter()
        .filter_map(|(name, path)| path.as_deref().map(|p| (name, p)))
        .collect()
    }

    pub fn files_mut(&mut self) -> [(&'static str, &mut Option<PathBuf>); 5] {
        [
            ("listen_certificate", &mut self.listen_certificate),
            ("listen_private_key", &mut self.listen_private_key),
            ("connect_certificate", &mut self.connect_certificate),
            ("connect_private_key", &mut self.connect_private_key),
            ("root_ca_certificate", &mut self.root_ca_certificate),
        ]
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for (_, path) in self.files_mut() {
            if let Some(p) = path.as_mut() {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            }
        }
    }
}

/// Where and how a session talks to its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect: Vec<String>,
    pub listen: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    pub query_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect: Vec::new(),
            listen: Vec::new(),
            tls: None,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    /// Read a transport config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = read_json(path)?;
        config.resolve_relative_to(&parent_dir(path));
        Ok(config)
    }

    pub fn resolve_relative_to(&mut self, base: &Path) {
        if let Some(tls) = self.tls.as_mut() {
            tls.resolve_relative_to(base);
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Endpoints to connect to, defaulting to [`DEFAULT_ENDPOINT`].
    pub fn connect_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        parse_endpoints(&self.connect)
    }

    /// Endpoints to listen on, defaulting to [`DEFAULT_ENDPOINT`].
    pub fn listen_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        parse_endpoints(&self.listen)
    }
}

fn parse_endpoints(raw: &[String]) -> Result<Vec<Endpoint>, ConfigError> {
    if raw.is_empty() {
        return Ok(vec![DEFAULT_ENDPOINT.parse()?]);
    }
    raw.iter().map(|e| e.parse()).collect()
}

/// A parsed `<scheme>/<address>` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some(("tcp", address)) if address.rsplit_once(':').is_some_and(|(h, p)| {
                !h.is_empty() && p.parse::<u16>().is_ok()
            }) =>
            {
                Ok(Endpoint::Tcp(address.to_owned()))
            }
            _ => Err(ConfigError::UnsupportedEndpoint(s.to_owned())),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(address) => write!(f, "tcp/{address}"),
        }
    }
}

/// Bootstrap config embedded in a packaged unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub namespace: String,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl UnitConfig {
    /// File name of the unit config inside `resources/`.
    pub const FILE_NAME: &'static str = "liaison.json";

    pub fn new(namespace: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            namespace: namespace.into(),
            transport,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = read_json(path)?;
        validate_namespace(&config.namespace)?;
        config.transport.resolve_relative_to(&parent_dir(path));
        Ok(config)
    }

    /// Find the unit config for an instantiate call.
    ///
    /// `resource_path` is the unit's `resources/` location as passed by the
    /// host (a plain path or a `file://` URI). Without one, [`CONFIG_ENV`]
    /// names the config file.
    pub fn locate(resource_path: Option<&str>) -> Result<PathBuf, ConfigError> {
        match resource_path.filter(|p| !p.is_empty()) {
            Some(resources) => {
                let resources = resources.strip_prefix("file://").unwrap_or(resources);
                Ok(Path::new(resources).join(Self::FILE_NAME))
            }
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .ok_or(ConfigError::NotFound),
        }
    }
}

/// A namespace is one routing key segment.
pub fn validate_namespace(namespace: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidNamespace {
        namespace: namespace.to_owned(),
        reason,
    };
    if namespace.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if namespace.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }
    if namespace.contains(['/', '*', '?', '#', '$']) {
        return Err(invalid("must not contain any of / * ? # $"));
    }
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_document() {
        let config: TransportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.query_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.connect_endpoints().unwrap(),
            vec![Endpoint::Tcp("127.0.0.1:7447".into())]
        );
    }

    #[test]
    fn endpoints_are_parsed() {
        assert_eq!(
            "tcp/example.org:9000".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("example.org:9000".into())
        );
        assert_eq!(
            "tcp/[::1]:7447".parse::<Endpoint>().unwrap().to_string(),
            "tcp/[::1]:7447"
        );
        for bad in ["udp/127.0.0.1:7447", "tls/host:1", "tcp/host", "tcp/:80", "host:80"] {
            assert!(
                matches!(bad.parse::<Endpoint>(), Err(ConfigError::UnsupportedEndpoint(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn namespace_rules() {
        assert!(validate_namespace("bouncingBall").is_ok());
        assert!(validate_namespace("model-01_v2").is_ok());
        for bad in ["", "a/b", "a*", "what?", "a#b", "$x", "two words", "tab\t"] {
            assert!(validate_namespace(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn tls_paths_resolve_against_config_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transport.json");
        std::fs::write(
            &path,
            r#"{"connect": ["tcp/10.0.0.1:7447"],
                "tls": {"root_ca_certificate": "ca.pem",
                        "connect_certificate": "/etc/certs/client.pem"}}"#,
        )
        .unwrap();

        let config = TransportConfig::load(&path).unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.root_ca_certificate, Some(dir.path().join("ca.pem")));
        assert_eq!(
            tls.connect_certificate,
            Some(PathBuf::from("/etc/certs/client.pem"))
        );
        assert_eq!(tls.connect_private_key, None);
    }

    #[test]
    fn unit_config_is_found_through_resource_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = UnitConfig::new("ball", TransportConfig::default());
        std::fs::write(
            dir.path().join(UnitConfig::FILE_NAME),
            serde_json::to_string(&config).unwrap(),
        )
        .unwrap();

        let uri = format!("file://{}/", dir.path().display());
        let path = UnitConfig::locate(Some(&uri)).unwrap();
        assert_eq!(UnitConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn unit_config_rejects_bad_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(UnitConfig::FILE_NAME);
        std::fs::write(&path, r#"{"namespace": "a/b"}"#).unwrap();
        assert!(matches!(
            UnitConfig::load(&path),
            Err(ConfigError::InvalidNamespace { .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TransportConfig::load(Path::new("/nonexistent/transport.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/transport.json"));
    }
}
