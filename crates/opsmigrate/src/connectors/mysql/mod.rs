//! MySQL/MariaDB connector.
//!
//! Collections are databases and units are base tables (unit type
//! `table`). Definitions carry the `SHOW CREATE TABLE` DDL, so a copy
//! reproduces indexes and column types exactly. Rows move in pages ordered
//! by primary key, each page seeking past the last key of the one before.
//! Keyless tables are ordered by every column and paged by offset. Keyed
//! tables are written with multi-row upserts, keyless ones with inserts.

mod rows;
mod sql;

use std::time::Duration;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, Row, SslOpts, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::{ConnectionConfig, MysqlConfig, SystemKind};
use crate::core::{
    Connection, Connector, Definition, MigrationUnit, RowBatch, RowCursor, TableDefinition,
    UnitCount, WriteOptions,
};
use crate::error::{MigrateError, Result};

use sql::{
    create_if_not_exists, insert_statement, qualify_table, quote_ident, select_page,
    upsert_statement, MAX_PLACEHOLDERS, SYSTEM_SCHEMAS,
};

/// The only unit type this connector serves.
pub const TABLE_UNIT_TYPE: &str = "table";

const ER_BAD_DB_ERROR: u16 = 1049;
const ER_TABLE_EXISTS_ERROR: u16 = 1050;
const ER_NO_SUCH_TABLE: u16 = 1146;

/// Opens [`MysqlConnection`]s.
#[derive(Debug, Default)]
pub struct MysqlConnector;

impl MysqlConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    fn kind(&self) -> SystemKind {
        SystemKind::Mysql
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        match config {
            ConnectionConfig::Mysql(cfg) => Ok(Box::new(MysqlConnection::open(cfg).await?)),
            other => Err(MigrateError::Config(format!(
                "mysql connector cannot open a {} connection",
                other.kind()
            ))),
        }
    }
}

fn server_code(err: &mysql_async::Error) -> Option<u16> {
    match err {
        mysql_async::Error::Server(se) => Some(se.code),
        _ => None,
    }
}

/// The socket broke under a statement, as opposed to the server rejecting it.
fn is_link_error(err: &mysql_async::Error) -> bool {
    matches!(err, mysql_async::Error::Io(_))
}

/// A pooled connection to one MySQL server.
pub struct MysqlConnection {
    pool: Pool,
    label: String,
    connect_timeout: Duration,
}

impl MysqlConnection {
    /// Open a pool and verify it with `SELECT 1`.
    ///
    /// A configured default database that does not exist yet is not an
    /// error: the connection falls back to server level so the database
    /// can be created by the first write with `create_schema`.
    #[instrument(skip_all, fields(host = %config.host, port = config.port))]
    pub async fn open(config: &MysqlConfig) -> Result<Self> {
        let label = format!("mysql://{}@{}:{}", config.user, config.host, config.port);
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs.max(1));

        let conn = Self::with_database(config, config.database.clone(), label.clone(), connect_timeout);
        match conn.test_connection().await {
            Ok(()) => {}
            Err(e) if config.database.is_some() && e.1 == Some(ER_BAD_DB_ERROR) => {
                warn!(
                    "Database {:?} does not exist on {}, connecting without a default database",
                    config.database, label
                );
                conn.pool.clone().disconnect().await.ok();
                let conn = Self::with_database(config, None, label.clone(), connect_timeout);
                conn.test_connection()
                    .await
                    .map_err(|(e, _)| MigrateError::connection(&label, e))?;
                info!("Connected to MySQL: {}", label);
                return Ok(conn);
            }
            Err((e, _)) => return Err(MigrateError::connection(&label, e)),
        }

        info!("Connected to MySQL: {}", label);
        Ok(conn)
    }

    fn with_database(
        config: &MysqlConfig,
        database: Option<String>,
        label: String,
        connect_timeout: Duration,
    ) -> Self {
        let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => None,
            _ => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .db_name(database)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            // Tables are copied in listing order, not dependency order.
            .init(vec![
                format!("SET NAMES {}", config.charset),
                "SET FOREIGN_KEY_CHECKS = 0".to_string(),
            ]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let opts: Opts = builder.into();
        Self {
            pool: Pool::new(opts),
            label,
            connect_timeout,
        }
    }

    async fn test_connection(&self) -> std::result::Result<(), (String, Option<u16>)> {
        let mut conn = match tokio::time::timeout(self.connect_timeout, self.pool.get_conn()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err((e.to_string(), server_code(&e))),
            Err(_) => {
                return Err((
                    format!("timed out after {}s", self.connect_timeout.as_secs()),
                    None,
                ))
            }
        };
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| (e.to_string(), server_code(&e)))
    }

    async fn conn(&self) -> Result<Conn> {
        match tokio::time::timeout(self.connect_timeout, self.pool.get_conn()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(MigrateError::connection(&self.label, e)),
            Err(_) => Err(MigrateError::connection(
                &self.label,
                format!("timed out after {}s", self.connect_timeout.as_secs()),
            )),
        }
    }

    async fn database_exists(conn: &mut Conn, database: &str) -> mysql_async::Result<bool> {
        let found: Option<String> = conn
            .exec_first(
                "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
                (database,),
            )
            .await?;
        Ok(found.is_some())
    }

    async fn table_exists(conn: &mut Conn, database: &str, table: &str) -> mysql_async::Result<bool> {
        let found: Option<String> = conn
            .exec_first(
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE'",
                (database, table),
            )
            .await?;
        Ok(found.is_some())
    }

    fn check_unit_type(unit: &MigrationUnit) -> Result<()> {
        if unit.unit_type != TABLE_UNIT_TYPE {
            return Err(MigrateError::write(
                unit,
                format!("mysql only stores units of type '{}'", TABLE_UNIT_TYPE),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn default_unit_type(&self) -> &str {
        TABLE_UNIT_TYPE
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(&self.label, e))
    }

    #[instrument(skip(self), fields(system = %self.label))]
    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut conn = self
            .conn()
            .await
            .map_err(|e| MigrateError::discovery("*", e))?;
        let databases: Vec<String> = conn
            .query("SHOW DATABASES")
            .await
            .map_err(|e| MigrateError::discovery("*", e))?;
        Ok(databases
            .into_iter()
            .filter(|db| !SYSTEM_SCHEMAS.contains(&db.to_lowercase().as_str()))
            .collect())
    }

    #[instrument(skip(self), fields(system = %self.label))]
    async fn list_units(
        &self,
        collection: &str,
        unit_types: &[String],
    ) -> Result<Vec<MigrationUnit>> {
        if let Some(other) = unit_types
            .iter()
            .find(|t| t.as_str() != TABLE_UNIT_TYPE && t.as_str() != "tables")
        {
            return Err(MigrateError::discovery(
                collection,
                format!("unsupported unit type '{}' for mysql", other),
            ));
        }

        let mut conn = self
            .conn()
            .await
            .map_err(|e| MigrateError::discovery(collection, e))?;
        if !Self::database_exists(&mut conn, collection)
            .await
            .map_err(|e| MigrateError::discovery(collection, e))?
        {
            return Err(MigrateError::discovery(collection, "database does not exist"));
        }

        let tables: Vec<String> = conn
            .exec(
                "SELECT TABLE_NAME FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
                (collection,),
            )
            .await
            .map_err(|e| MigrateError::discovery(collection, e))?;

        debug!("MySQL: {} tables in {}", tables.len(), collection);
        Ok(tables
            .into_iter()
            .map(|t| MigrationUnit::new(collection, TABLE_UNIT_TYPE, t))
            .collect())
    }

    #[instrument(skip(self), fields(unit = %unit))]
    async fn fetch_definition(&self, unit: &MigrationUnit) -> Result<Definition> {
        let mut conn = self.conn().await?;
        let qualified = qualify_table(&unit.collection, &unit.name);

        let created: Option<(String, String)> = match conn
            .query_first(format!("SHOW CREATE TABLE {}", qualified))
            .await
        {
            Ok(row) => row,
            Err(e) if matches!(server_code(&e), Some(ER_NO_SUCH_TABLE | ER_BAD_DB_ERROR)) => None,
            Err(e) if is_link_error(&e) => return Err(MigrateError::connection(&self.label, e)),
            Err(e) => return Err(MigrateError::discovery(&unit.collection, e)),
        };
        let Some((_, create_statement)) = created else {
            return Err(MigrateError::NotFound(unit.to_string()));
        };

        let columns: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.COLUMNS \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION",
                (&unit.collection, &unit.name),
            )
            .await
            .map_err(|e| MigrateError::discovery(&unit.collection, e))?;

        let primary_key: Vec<String> = conn
            .exec(
                "SELECT COLUMN_NAME FROM information_schema.KEY_COLUMN_USAGE \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
                 ORDER BY ORDINAL_POSITION",
                (&unit.collection, &unit.name),
            )
            .await
            .map_err(|e| MigrateError::discovery(&unit.collection, e))?;

        let row_count: Option<u64> = conn
            .query_first(format!("SELECT COUNT(*) FROM {}", qualified))
            .await
            .map_err(|e| MigrateError::discovery(&unit.collection, e))?;

        Ok(Definition::Table(TableDefinition {
            create_statement,
            columns,
            primary_key,
            row_count: row_count.unwrap_or(0),
        }))
    }

    #[instrument(skip(self, definition), fields(unit = %unit))]
    async fn write_definition(
        &self,
        unit: &MigrationUnit,
        definition: &Definition,
        options: &WriteOptions,
    ) -> Result<()> {
        Self::check_unit_type(unit)?;
        let Definition::Table(table) = definition else {
            return Err(MigrateError::write(unit, "mysql can only store table definitions"));
        };

        let mut conn = self.conn().await?;
        let qualified = qualify_table(&unit.collection, &unit.name);

        if options.create_schema {
            conn.query_drop(format!(
                "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
                quote_ident(&unit.collection)
            ))
            .await
            .map_err(|e| MigrateError::write(unit, format!("creating database: {}", e)))?;
        }

        let exists = Self::table_exists(&mut conn, &unit.collection, &unit.name)
            .await
            .map_err(|e| MigrateError::write(unit, e))?;

        if !exists {
            if !options.create_schema {
                return Err(MigrateError::write(
                    unit,
                    "target table does not exist and create_schema is false",
                ));
            }
            conn.query_drop(format!("USE {}", quote_ident(&unit.collection)))
                .await
                .map_err(|e| MigrateError::write(unit, e))?;
            match conn.query_drop(create_if_not_exists(&table.create_statement)).await {
                Ok(()) => info!("Created table {}", qualified),
                Err(e) if server_code(&e) == Some(ER_TABLE_EXISTS_ERROR) => {
                    debug!("Table {} appeared concurrently, keeping it", qualified);
                }
                Err(e) => {
                    return Err(MigrateError::write(unit, format!("creating table: {}", e)))
                }
            }
        } else if options.truncate_target {
            conn.query_drop(format!("TRUNCATE TABLE {}", qualified))
                .await
                .map_err(|e| MigrateError::write(unit, format!("truncating: {}", e)))?;
            debug!("Truncated {}", qualified);
        }

        Ok(())
    }

    async fn read_rows(
        &self,
        unit: &MigrationUnit,
        definition: &Definition,
        cursor: &RowCursor,
        limit: usize,
    ) -> Result<RowBatch> {
        let Definition::Table(table) = definition else {
            return Ok(RowBatch::empty());
        };
        if table.columns.is_empty() {
            return Ok(RowBatch::empty());
        }

        let key_idx: Vec<usize> = table
            .primary_key
            .iter()
            .filter_map(|pk| table.columns.iter().position(|c| c == pk))
            .collect();
        let keyed = !key_idx.is_empty() && key_idx.len() == table.primary_key.len();
        let primary_key = if keyed {
            table.primary_key.clone()
        } else {
            Vec::new()
        };

        let after = if keyed { cursor.last_key.as_ref() } else { None };
        let sql = select_page(
            &qualify_table(&unit.collection, &unit.name),
            &table.columns,
            &primary_key,
            after.is_some(),
        );
        let params: Vec<Value> = match after {
            Some(key) => key
                .iter()
                .map(rows::to_mysql)
                .chain(std::iter::once(Value::UInt(limit as u64)))
                .collect(),
            None => vec![Value::UInt(limit as u64), Value::UInt(cursor.offset)],
        };

        let mut conn = self.conn().await?;
        let fetched: Vec<Row> = match conn.exec(sql, params).await {
            Ok(rows) => rows,
            Err(e) if server_code(&e) == Some(ER_NO_SUCH_TABLE) => {
                return Err(MigrateError::NotFound(unit.to_string()))
            }
            Err(e) if is_link_error(&e) => return Err(MigrateError::connection(&self.label, e)),
            Err(e) => return Err(MigrateError::discovery(&unit.collection, e)),
        };

        let values: Vec<Vec<_>> = fetched
            .into_iter()
            .map(|mut row| {
                (0..row.len())
                    .map(|i| rows::from_mysql(row.take::<Value, usize>(i).unwrap_or(Value::NULL)))
                    .collect()
            })
            .collect();

        let last_key = if keyed {
            values.last().and_then(|row| rows::seek_key(row, &key_idx))
        } else {
            None
        };
        if keyed && last_key.is_none() && !values.is_empty() {
            debug!(
                "{}: primary key not usable for keyset paging, next page uses OFFSET",
                unit
            );
        }

        Ok(RowBatch::new(table.columns.clone(), values)
            .with_primary_key(primary_key)
            .with_last_key(last_key))
    }

    async fn write_rows(&self, unit: &MigrationUnit, batch: RowBatch) -> Result<u64> {
        if batch.is_empty() || batch.columns.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let qualified = qualify_table(&unit.collection, &unit.name);
        let max_rows_per_statement = (MAX_PLACEHOLDERS / batch.columns.len()).max(1);
        let keyed = !batch.primary_key.is_empty();

        let mut written = 0u64;
        for chunk in batch.rows.chunks(max_rows_per_statement) {
            let sql = if keyed {
                upsert_statement(&qualified, &batch.columns, chunk.len())
            } else {
                insert_statement(&qualified, &batch.columns, chunk.len())
            };
            let params: Vec<Value> = chunk
                .iter()
                .flat_map(|row| row.iter().map(rows::to_mysql))
                .collect();
            conn.exec_drop(sql, params).await.map_err(|e| {
                if is_link_error(&e) {
                    MigrateError::connection(&self.label, e)
                } else {
                    MigrateError::write(unit, format!("INSERT batch: {}", e))
                }
            })?;
            written += chunk.len() as u64;
        }

        debug!("MySQL: wrote {} rows to {}", written, qualified);
        Ok(written)
    }

    async fn count_units(&self, unit: &MigrationUnit) -> Result<UnitCount> {
        if unit.unit_type != TABLE_UNIT_TYPE {
            return Ok(UnitCount::absent());
        }
        let mut conn = self
            .conn()
            .await
            .map_err(|e| MigrateError::discovery(&unit.collection, e))?;
        if !Self::table_exists(&mut conn, &unit.collection, &unit.name)
            .await
            .map_err(|e| MigrateError::discovery(&unit.collection, e))?
        {
            return Ok(UnitCount::absent());
        }
        let count: Option<u64> = conn
            .query_first(format!(
                "SELECT COUNT(*) FROM {}",
                qualify_table(&unit.collection, &unit.name)
            ))
            .await
            .map_err(|e| MigrateError::discovery(&unit.collection, e))?;
        Ok(UnitCount::present(count.unwrap_or(0)))
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            debug!("MySQL: error closing pool for {}: {}", self.label, e);
        }
    }
}
