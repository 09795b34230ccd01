//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

/// Root service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP boundary settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Defaults applied to tasks that leave copy options unset.
    #[serde(default)]
    pub migration: MigrationDefaults,

    /// Task persistence.
    #[serde(default)]
    pub state: StateConfig,

    /// Named connections, referenced by the `/connections/{name}` endpoints
    /// and the CLI subcommands.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default: 127.0.0.1:8080).
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Copy option defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationDefaults {
    /// Rows per batch for tabular copies (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Create missing namespaces/databases/tables on the target (default: true).
    #[serde(default = "default_true")]
    pub create_schema: bool,

    /// Empty existing target units before writing (default: false).
    #[serde(default)]
    pub truncate_target: bool,
}

impl Default for MigrationDefaults {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            create_schema: true,
            truncate_target: false,
        }
    }
}

/// Task persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory for task records. Tasks are kept in memory only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// The family of system a connection points at.
///
/// Used as the key of the connector catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    Kubernetes,
    Mysql,
}

impl SystemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemKind::Kubernetes => "kubernetes",
            SystemKind::Mysql => "mysql",
        }
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters for one system instance.
///
/// Deserialization validates the parameters, so a value obtained from YAML
/// or JSON is always usable. Programmatic construction should go through
/// [`ConnectionConfig::mysql`] or [`ConnectionConfig::kubernetes`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    try_from = "RawConnectionConfig"
)]
pub enum ConnectionConfig {
    Kubernetes(KubernetesConfig),
    Mysql(MysqlConfig),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawConnectionConfig {
    Kubernetes(KubernetesConfig),
    Mysql(MysqlConfig),
}

impl TryFrom<RawConnectionConfig> for ConnectionConfig {
    type Error = MigrateError;

    fn try_from(raw: RawConnectionConfig) -> Result<Self, Self::Error> {
        match raw {
            RawConnectionConfig::Kubernetes(k) => ConnectionConfig::kubernetes(k),
            RawConnectionConfig::Mysql(m) => ConnectionConfig::mysql(m),
        }
    }
}

impl ConnectionConfig {
    /// Build a validated MySQL connection config.
    pub fn mysql(config: MysqlConfig) -> crate::error::Result<Self> {
        super::validation::validate_mysql(&config)?;
        Ok(ConnectionConfig::Mysql(config))
    }

    /// Build a validated Kubernetes connection config.
    pub fn kubernetes(config: KubernetesConfig) -> crate::error::Result<Self> {
        super::validation::validate_kubernetes(&config)?;
        Ok(ConnectionConfig::Kubernetes(config))
    }

    pub fn kind(&self) -> SystemKind {
        match self {
            ConnectionConfig::Kubernetes(_) => SystemKind::Kubernetes,
            ConnectionConfig::Mysql(_) => SystemKind::Mysql,
        }
    }

    /// Re-run construction-time validation.
    pub fn validate(&self) -> crate::error::Result<()> {
        match self {
            ConnectionConfig::Kubernetes(k) => super::validation::validate_kubernetes(k),
            ConnectionConfig::Mysql(m) => super::validation::validate_mysql(m),
        }
    }

    /// Human-readable endpoint without secrets, e.g. `mysql://app@db:3306/shop`.
    pub fn endpoint(&self) -> String {
        match self {
            ConnectionConfig::Mysql(m) => {
                let db = m.database.as_deref().unwrap_or("");
                format!("mysql://{}@{}:{}/{}", m.user, m.host, m.port, db)
            }
            ConnectionConfig::Kubernetes(k) => match &k.context {
                Some(ctx) => format!("kubernetes (context: {})", ctx),
                None => "kubernetes (current context)".to_string(),
            },
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionConfig::Kubernetes(k) => k.fmt(f),
            ConnectionConfig::Mysql(m) => m.fmt(f),
        }
    }
}

/// Kubernetes cluster access.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Kubeconfig document (YAML contents, not a path).
    pub kubeconfig: String,

    /// Context to use (default: the kubeconfig's current context).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl fmt::Debug for KubernetesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubernetesConfig")
            .field("kubeconfig", &"[REDACTED]")
            .field("context", &self.context)
            .finish()
    }
}

/// MySQL server access.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct MysqlConfig {
    /// Server host.
    pub host: String,

    /// Server port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Connection charset (default: utf8mb4).
    #[serde(default = "default_charset")]
    pub charset: String,

    /// Default database, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// TLS mode: disable, prefer, require (default: disable).
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Connect timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for MysqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("charset", &self.charset)
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl MysqlConfig {
    /// Minimal config with defaults for everything but the address and user.
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_mysql_port(),
            user: user.into(),
            password: String::new(),
            charset: default_charset(),
            database: None,
            ssl_mode: default_ssl_mode(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}
