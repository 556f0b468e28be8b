use crate::{
    error::{Error, Result},
    types::WriteMessage,
};
use deadpool_postgres::Pool;
use tokio_postgres::GenericClient;
use tracing::debug;
use uuid::Uuid;

fn write_sql(schema_name: &str) -> String {
    format!(
        "SELECT {}.write_message($1, $2, $3, $4, $5, $6)",
        schema_name
    )
}

/// Map a failed `write_message` call onto the store's error kinds
fn write_error(
    err: tokio_postgres::Error,
    stream_name: &str,
    expected_version: Option<i64>,
) -> Error {
    match Error::from(err) {
        Error::ExpectedVersion { actual_version, .. } => Error::ExpectedVersion {
            stream_name: stream_name.to_string(),
            expected_version: expected_version.unwrap_or(-1),
            actual_version,
        },
        other => other,
    }
}

fn is_duplicate_id(err: &tokio_postgres::Error) -> bool {
    err.as_db_error()
        .map(|db_error| {
            let message = db_error.message();
            message.contains("duplicate key") && message.contains("messages_id")
        })
        .unwrap_or(false)
}

/// Position of `id` when it is already stored on `stream_name`. Ids are unique
/// across the whole store, so an id found on another stream is an error.
async fn stored_position<C: GenericClient>(
    client: &C,
    schema_name: &str,
    id: Uuid,
    stream_name: &str,
) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT stream_name, position FROM {}.messages WHERE id = $1",
        schema_name
    );

    match client.query_opt(&sql, &[&id]).await? {
        Some(row) => {
            let existing: String = row.get(0);
            if existing == stream_name {
                Ok(Some(row.get(1)))
            } else {
                Err(Error::DuplicateMessageId {
                    id,
                    stream_name: stream_name.to_string(),
                    existing_stream_name: existing,
                })
            }
        }
        None => Ok(None),
    }
}

async fn current_version<C: GenericClient>(
    client: &C,
    schema_name: &str,
    stream_name: &str,
) -> Result<Option<i64>> {
    let sql = format!("SELECT {}.stream_version($1)", schema_name);
    let row = client.query_one(&sql, &[&stream_name]).await?;
    Ok(row.get(0))
}

async fn write_one<C: GenericClient>(
    client: &C,
    schema_name: &str,
    id: Uuid,
    msg: &WriteMessage,
    stream_name: &str,
    expected_version: Option<i64>,
) -> std::result::Result<i64, tokio_postgres::Error> {
    let id_str = id.to_string();
    let metadata = msg.normalized_metadata();

    let row = client
        .query_one(
            &write_sql(schema_name),
            &[
                &id_str,
                &stream_name,
                &msg.message_type,
                &msg.data,
                &metadata,
                &expected_version,
            ],
        )
        .await?;

    let position: i64 = row.get(0);
    debug!(stream_name, %id, position, message_type = %msg.message_type, "Wrote message");
    Ok(position)
}

/// Write a message to a stream with optional optimistic concurrency control
///
/// # Behavior
///
/// 1. **Idempotency**: If a message with the same `id` already exists in the stream,
///    the write is ignored and the existing position is returned
/// 2. **Expected Version**: If `expected_version` is provided and doesn't match the
///    current stream version, [`Error::ExpectedVersion`] is returned
/// 3. **Timestamp**: The database sets the `time` field automatically
pub async fn write_message(
    pool: &Pool,
    schema_name: &str,
    msg: WriteMessage,
    stream_name: &str,
    expected_version: Option<i64>,
) -> Result<i64> {
    let conn = pool.get().await?;
    let id = msg.id_or_new();

    match write_one(&**conn, schema_name, id, &msg, stream_name, expected_version).await {
        Ok(position) => Ok(position),
        // write_message checks the expected version before inserting, so only
        // an id clash is left to resolve here
        Err(e) if is_duplicate_id(&e) => {
            match stored_position(&**conn, schema_name, id, stream_name).await? {
                Some(position) => {
                    debug!(stream_name, %id, position, "Ignoring duplicate message id");
                    Ok(position)
                }
                None => Err(Error::from(e)),
            }
        }
        Err(e) => Err(write_error(e, stream_name, expected_version)),
    }
}

/// Write a batch of messages to one stream inside a single transaction.
///
/// `expected_version` applies to the first message and is incremented for each
/// written one. Messages whose id is already stored on the stream are skipped,
/// as in [`write_message`]. Any failure rolls the whole batch back.
pub async fn write_messages(
    pool: &Pool,
    schema_name: &str,
    messages: Vec<WriteMessage>,
    stream_name: &str,
    expected_version: Option<i64>,
) -> Result<i64> {
    if messages.is_empty() {
        return Err(Error::assertion("cannot write an empty batch"));
    }

    let mut conn = pool.get().await?;
    let tx = conn.transaction().await?;

    let mut expected = expected_version;
    let mut last_position = -1;

    for msg in &messages {
        let id = msg.id_or_new();

        // A failed insert aborts the transaction, so look the id up first
        if let Some(position) = stored_position(&*tx, schema_name, id, stream_name).await? {
            if let Some(expected_version) = expected {
                let actual_version = current_version(&*tx, schema_name, stream_name).await?;
                if actual_version.unwrap_or(-1) != expected_version {
                    return Err(Error::ExpectedVersion {
                        stream_name: stream_name.to_string(),
                        expected_version,
                        actual_version,
                    });
                }
            }
            debug!(stream_name, %id, position, "Ignoring duplicate message id");
            last_position = position;
            continue;
        }

        last_position = write_one(&*tx, schema_name, id, msg, stream_name, expected)
            .await
            .map_err(|e| write_error(e, stream_name, expected))?;
        expected = expected.map(|v| v + 1);
    }

    tx.commit().await?;
    Ok(last_position)
}
