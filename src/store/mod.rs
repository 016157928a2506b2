//! Persistence layer: libSQL-backed records, seen-ledger, and stored configuration.

pub mod libsql_backend;
pub mod migrations;
pub mod schema;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use schema::Field;
pub use traits::{Cell, Database, NewRecord, Record};
