//! Configuration validation.

use super::{KubernetesConfig, MysqlConfig, ServiceConfig};
use crate::error::{MigrateError, Result};

/// Validate the service configuration.
pub fn validate(config: &ServiceConfig) -> Result<()> {
    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(MigrateError::Config(format!(
            "server.bind must be a socket address, got '{}'",
            config.server.bind
        )));
    }

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }

    for (name, conn) in &config.connections {
        if name.trim().is_empty() {
            return Err(MigrateError::Config("connection names must not be empty".into()));
        }
        conn.validate()
            .map_err(|e| MigrateError::Config(format!("connections.{}: {}", name, e)))?;
    }

    Ok(())
}

/// Validate MySQL connection parameters.
pub fn validate_mysql(config: &MysqlConfig) -> Result<()> {
    if config.host.trim().is_empty() {
        return Err(MigrateError::Config("mysql host is required".into()));
    }
    if config.port == 0 {
        return Err(MigrateError::Config("mysql port must be non-zero".into()));
    }
    if config.user.trim().is_empty() {
        return Err(MigrateError::Config("mysql user is required".into()));
    }
    if config.charset.trim().is_empty()
        || !config.charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(MigrateError::Config(format!(
            "mysql charset '{}' is not a valid charset name",
            config.charset
        )));
    }
    match config.ssl_mode.to_lowercase().as_str() {
        "disable" | "prefer" | "require" => {}
        other => {
            return Err(MigrateError::Config(format!(
                "mysql ssl_mode must be disable, prefer or require, got '{}'",
                other
            )))
        }
    }
    if let Some(db) = &config.database {
        if db.trim().is_empty() {
            return Err(MigrateError::Config(
                "mysql database must be omitted or non-empty".into(),
            ));
        }
    }
    Ok(())
}

/// Validate Kubernetes connection parameters.
pub fn validate_kubernetes(config: &KubernetesConfig) -> Result<()> {
    if config.kubeconfig.trim().is_empty() {
        return Err(MigrateError::Config("kubeconfig is required".into()));
    }
    if serde_yaml::from_str::<serde_yaml::Value>(&config.kubeconfig).is_err() {
        return Err(MigrateError::Config("kubeconfig is not valid YAML".into()));
    }
    if let Some(ctx) = &config.context {
        if ctx.trim().is_empty() {
            return Err(MigrateError::Config(
                "kubernetes context must be omitted or non-empty".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, MigrationDefaults, ServerConfig, StateConfig};
    use std::collections::BTreeMap;

    fn valid_config() -> ServiceConfig {
        let mut connections = BTreeMap::new();
        connections.insert(
            "source".to_string(),
            ConnectionConfig::Mysql(MysqlConfig::new("localhost", "root")),
        );
        ServiceConfig {
            server: ServerConfig::default(),
            migration: MigrationDefaults::default(),
            state: StateConfig::default(),
            connections,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_bad_bind_address() {
        let mut config = valid_config();
        config.server.bind = "not-an-address".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_named_connection() {
        let mut config = valid_config();
        config.connections.insert(
            "broken".to_string(),
            ConnectionConfig::Mysql(MysqlConfig::new("", "root")),
        );
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("connections.broken"));
    }

    #[test]
    fn test_mysql_rejects_bad_charset() {
        let mut m = MysqlConfig::new("localhost", "root");
        m.charset = "utf8mb4; DROP".to_string();
        assert!(validate_mysql(&m).is_err());
    }

    #[test]
    fn test_mysql_rejects_unknown_ssl_mode() {
        let mut m = MysqlConfig::new("localhost", "root");
        m.ssl_mode = "sometimes".to_string();
        assert!(validate_mysql(&m).is_err());
    }

    #[test]
    fn test_kubernetes_requires_yaml() {
        let cfg = KubernetesConfig {
            kubeconfig: "clusters: [".to_string(),
            context: None,
        };
        assert!(validate_kubernetes(&cfg).is_err());

        let cfg = KubernetesConfig {
            kubeconfig: "apiVersion: v1\nkind: Config\n".to_string(),
            context: Some("".to_string()),
        };
        assert!(validate_kubernetes(&cfg).is_err());
    }
}
