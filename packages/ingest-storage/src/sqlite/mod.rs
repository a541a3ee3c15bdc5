pub mod schema;
pub mod sink;

pub use schema::init_schema;
pub use sink::SqliteDocumentSink;
