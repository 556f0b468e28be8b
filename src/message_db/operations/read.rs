use crate::{
    error::{Error, Result},
    store::{CategoryReadOptions, StreamReadOptions},
    types::Message,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::Pool;
use serde_json::Value;
use tokio_postgres::Row;
use uuid::Uuid;

/// Parse a message row returned by any of the Message DB read functions
pub(crate) fn parse_message_row(row: &Row) -> Result<Message> {
    // Message DB returns ids as text
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::store("invalid UUID in id column", e))?;

    // data and metadata come back as varchar, not jsonb
    let data_str: Option<String> = row.get("data");
    let data: Value = match data_str {
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| Error::store("invalid JSON in data column", e))?,
        None => Value::Null,
    };

    let metadata: Option<Value> = match row.get::<_, Option<String>>("metadata") {
        Some(s) => Some(
            serde_json::from_str(&s)
                .map_err(|e| Error::store("invalid JSON in metadata column", e))?,
        ),
        None => None,
    };

    // Timestamp without timezone, written in UTC
    let naive_time: NaiveDateTime = row.get("time");
    let time = DateTime::<Utc>::from_naive_utc_and_offset(naive_time, Utc);

    Ok(Message {
        id,
        stream_name: row.get("stream_name"),
        message_type: row.get("type"),
        data,
        metadata,
        position: row.get("position"),
        global_position: row.get("global_position"),
        time,
    })
}

/// Retrieve messages from a single stream, ordered by position
pub async fn get_stream_messages(
    pool: &Pool,
    schema_name: &str,
    options: StreamReadOptions,
) -> Result<Vec<Message>> {
    options.validate()?;
    let conn = pool.get().await?;

    let sql = format!(
        "SELECT * FROM {}.get_stream_messages($1, $2, $3)",
        schema_name
    );

    let rows = conn
        .query(
            &sql,
            &[&options.stream_name, &options.position, &options.batch_size],
        )
        .await?;

    rows.iter().map(parse_message_row).collect()
}

/// Retrieve messages from all streams in a category, ordered by global position.
///
/// Correlation and consumer group filtering happen inside Message DB.
pub async fn get_category_messages(
    pool: &Pool,
    schema_name: &str,
    options: CategoryReadOptions,
) -> Result<Vec<Message>> {
    options.validate()?;
    let conn = pool.get().await?;

    let sql = format!(
        "SELECT * FROM {}.get_category_messages($1, $2, $3, $4, $5, $6)",
        schema_name
    );

    // Message DB category positions start at 1
    let position = options.position.max(1);

    let rows = conn
        .query(
            &sql,
            &[
                &options.category_name,
                &position,
                &options.batch_size,
                &options.correlation,
                &options.consumer_group_member,
                &options.consumer_group_size,
            ],
        )
        .await?;

    rows.iter().map(parse_message_row).collect()
}
