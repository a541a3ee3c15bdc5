//! Domain entities and storage/bridge port traits shared by every
//! ingest-* crate.

pub mod entities;
pub mod error;
pub mod ports;
pub mod unid;
pub mod value_kind;

pub use entities::*;
pub use error::{ErrorKind, ModelError, Result};
pub use ports::{
    CasStore, DocumentSink, PreparedDocument, PreparedItemValue, PreparedItemWrite, UpsertOutcome,
};
pub use unid::Unid;
pub use value_kind::TypedValue;
