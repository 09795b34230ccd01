//! Concrete connectors.
//!
//! - [`kubernetes`]: namespaces and objects via `kube`
//! - [`mysql`]: databases and tables via `mysql_async`
//! - [`memory`]: in-process systems for tests

pub mod kubernetes;
pub mod memory;
pub mod mysql;

pub use kubernetes::{KubernetesConnection, KubernetesConnector};
pub use memory::{MemoryConnector, MemorySystem};
pub use mysql::{MysqlConnection, MysqlConnector};
