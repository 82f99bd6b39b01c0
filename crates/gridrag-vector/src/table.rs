//! LanceDB connection and table helpers.

use arrow_array::RecordBatchIterator;
use arrow_schema::SchemaRef;
use lancedb::{connect, Connection, Table};
use tracing::info;

use gridrag_core::error::{Error, Result};

use crate::schema::vector_dim;

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(|e| Error::Transient(format!("lancedb connect {uri}: {e}")))
}

/// Open `name`, creating it empty with `schema` when missing. An existing
/// table must have the same vector width as `schema`.
pub async fn ensure_table(conn: &Connection, name: &str, schema: SchemaRef) -> Result<Table> {
    let names = conn.table_names().execute().await.map_err(Error::backend)?;
    if !names.iter().any(|n| n == name) {
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
        let table = conn.create_table(name, Box::new(iter)).execute().await.map_err(Error::backend)?;
        info!(table = name, "created vector table");
        return Ok(table);
    }
    let table = conn.open_table(name).execute().await.map_err(Error::backend)?;
    let existing = table.schema().await.map_err(Error::backend)?;
    let expected = vector_dim(&schema).unwrap_or_default();
    match vector_dim(&existing) {
        Some(actual) if actual == expected => Ok(table),
        Some(actual) => Err(Error::DimensionMismatch { expected, actual }),
        None => Err(Error::InvalidConfig(format!("table '{name}' has no vector column"))),
    }
}
