use crate::{error::Result, types::Message};
use deadpool_postgres::Pool;

use super::read::parse_message_row;

/// Retrieve the most recent message from a stream
///
/// Returns `None` if the stream is empty or no message matches `message_type`.
pub async fn get_last_stream_message(
    pool: &Pool,
    schema_name: &str,
    stream_name: &str,
    message_type: Option<&str>,
) -> Result<Option<Message>> {
    let conn = pool.get().await?;

    let sql = format!(
        "SELECT * FROM {}.get_last_stream_message($1, $2)",
        schema_name
    );

    let rows = conn.query(&sql, &[&stream_name, &message_type]).await?;

    match rows.first() {
        Some(row) => parse_message_row(row).map(Some),
        None => Ok(None),
    }
}

/// Get the current version (position of last message) of a stream
///
/// For a stream with n messages, returns n-1. `None` if the stream doesn't exist.
pub async fn stream_version(
    pool: &Pool,
    schema_name: &str,
    stream_name: &str,
) -> Result<Option<i64>> {
    let conn = pool.get().await?;

    let sql = format!("SELECT {}.stream_version($1)", schema_name);

    let row = conn.query_one(&sql, &[&stream_name]).await?;

    let version: Option<i64> = row.get(0);
    Ok(version)
}
