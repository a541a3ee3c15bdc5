//! Sqlite-backed [`ingest_model::DocumentSink`] and filesystem
//! [`ingest_model::CasStore`].

pub mod cas;
pub mod error;
pub mod sqlite;

pub use cas::LocalCasStore;
pub use error::{ErrorKind, Result, StorageError};
pub use sqlite::{init_schema, SqliteDocumentSink};
