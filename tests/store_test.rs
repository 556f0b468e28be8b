//! Behaviour every `MessageStore` backend shares. Each check runs against the
//! in-memory store, and against Message DB when Docker is available.

mod common;

use futures::TryStreamExt;
use message_store::store::{CategoryReadOptions, GetOptions, MessageStore, StreamReadOptions};
use message_store::types::{Message, WriteMessage};
use message_store::{Error, InMemoryMessageStore};
use serde_json::json;
use testcontainers::clients::Cli;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

/// A category no other test writes to
fn unique_category(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

fn msg(message_type: &str, n: i64) -> WriteMessage {
    WriteMessage::new(message_type).with_data(json!({ "n": n }))
}

async fn append_only_ordering(store: &dyn MessageStore) {
    let category = unique_category("account");
    let stream = format!("{}-1", category);
    let other = format!("{}-2", category);

    assert_eq!(assert_ok!(store.put(msg("Opened", 1), &stream, None).await), 0);
    assert_eq!(assert_ok!(store.put(msg("Opened", 2), &other, None).await), 0);
    assert_eq!(assert_ok!(store.put(msg("Deposited", 3), &stream, None).await), 1);

    let messages = store
        .get_stream_messages(StreamReadOptions::new(&stream))
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].data, json!({ "n": 1 }));
    assert_eq!(messages[0].position, 0);
    assert_eq!(messages[1].data, json!({ "n": 3 }));
    assert_eq!(messages[1].position, 1);

    let category_messages = store
        .get_category_messages(CategoryReadOptions::new(&category))
        .await
        .unwrap();
    let globals: Vec<i64> = category_messages.iter().map(|m| m.global_position).collect();
    assert_eq!(globals.len(), 3);
    assert!(globals.windows(2).all(|pair| pair[0] < pair[1]));
}

async fn optimistic_concurrency(store: &dyn MessageStore) {
    let stream = format!("{}-1", unique_category("account"));

    assert_ok!(store.put(msg("Opened", 1), &stream, Some(-1)).await);
    let err = assert_err!(store.put(msg("Opened", 2), &stream, Some(-1)).await);
    assert!(matches!(err, Error::ExpectedVersion { .. }));

    assert_eq!(assert_ok!(store.put(msg("Deposited", 3), &stream, Some(0)).await), 1);
    let err = assert_err!(store.put(msg("Deposited", 4), &stream, Some(0)).await);
    assert!(!err.is_retryable());

    assert_eq!(store.stream_version(&stream).await.unwrap(), Some(1));

    // A stale batch leaves nothing behind
    assert_err!(
        store
            .write(vec![msg("Deposited", 5), msg("Deposited", 6)], &stream, Some(0))
            .await
    );
    assert_eq!(store.stream_version(&stream).await.unwrap(), Some(1));

    let last = store
        .write(vec![msg("Deposited", 5), msg("Deposited", 6)], &stream, Some(1))
        .await
        .unwrap();
    assert_eq!(last, 3);
}

async fn idempotent_writes(store: &dyn MessageStore) {
    let stream = format!("{}-1", unique_category("account"));
    let id = Uuid::new_v4();

    assert_eq!(store.put(msg("Opened", 1).with_id(id), &stream, None).await.unwrap(), 0);
    assert_eq!(store.put(msg("Deposited", 2), &stream, None).await.unwrap(), 1);
    assert_eq!(store.put(msg("Opened", 1).with_id(id), &stream, None).await.unwrap(), 0);
    assert_eq!(store.stream_version(&stream).await.unwrap(), Some(1));

    let first = store.get_stream_messages(StreamReadOptions::new(&stream)).await.unwrap();
    assert_eq!(first[0].id, id);

    // Ids are unique across streams
    let other = format!("{}-2", unique_category("account"));
    let err = assert_err!(store.put(msg("Opened", 3).with_id(id), &other, None).await);
    match err {
        Error::DuplicateMessageId {
            stream_name,
            existing_stream_name,
            ..
        } => {
            assert_eq!(stream_name, other);
            assert_eq!(existing_stream_name, stream);
        }
        unexpected => panic!("unexpected error: {:?}", unexpected),
    }
    assert_eq!(store.stream_version(&other).await.unwrap(), None);

    // A stored id inside a batch is skipped and the rest is written
    let last = assert_ok!(
        store
            .write(
                vec![msg("Opened", 1).with_id(id), msg("Withdrawn", 4)],
                &stream,
                Some(1),
            )
            .await
    );
    assert_eq!(last, 2);
    assert_eq!(store.stream_version(&stream).await.unwrap(), Some(2));

    // A batch reusing an id from another stream leaves nothing behind
    assert_err!(
        store
            .write(vec![msg("Opened", 5), msg("Opened", 6).with_id(id)], &other, None)
            .await
    );
    assert_eq!(store.stream_version(&other).await.unwrap(), None);
}

async fn category_filters(store: &dyn MessageStore) {
    let category = unique_category("account");
    let correlated = json!({ "correlationStreamName": "transfer-1" });

    // "A" hashes to member 0 and "C" to member 1 for a group of 2
    store
        .put(msg("Deposited", 1).with_metadata(correlated.clone()), &format!("{}-A", category), None)
        .await
        .unwrap();
    store
        .put(msg("Deposited", 2), &format!("{}-C", category), None)
        .await
        .unwrap();
    store
        .put(msg("Deposited", 3).with_metadata(correlated), &format!("{}-C", category), None)
        .await
        .unwrap();
    store
        .put(msg("Deposited", 4), &format!("{}-A", category), None)
        .await
        .unwrap();

    let numbers = |messages: Vec<Message>| -> Vec<i64> {
        messages.iter().filter_map(|m| m.data["n"].as_i64()).collect()
    };

    let member_0 = store
        .get(&category, GetOptions::new().with_consumer_group(0, 2))
        .await
        .unwrap();
    assert_eq!(numbers(member_0), vec![1, 4]);

    let member_1 = store
        .get(&category, GetOptions::new().with_consumer_group(1, 2))
        .await
        .unwrap();
    assert_eq!(numbers(member_1), vec![2, 3]);

    let transfers = store
        .get(&category, GetOptions::new().with_correlation("transfer"))
        .await
        .unwrap();
    assert_eq!(numbers(transfers), vec![1, 3]);

    let both = store
        .get(
            &category,
            GetOptions::new()
                .with_correlation("transfer")
                .with_consumer_group(1, 2),
        )
        .await
        .unwrap();
    assert_eq!(numbers(both), vec![3]);

    // Stream reads reject category filters
    assert_err!(
        store
            .get(&format!("{}-A", category), GetOptions::new().with_consumer_group(0, 2))
            .await
    );
}

async fn last_message_and_version(store: &dyn MessageStore) {
    let stream = format!("{}-1", unique_category("account"));

    assert!(store.get_last(&stream).await.unwrap().is_none());
    assert_eq!(store.stream_version(&stream).await.unwrap(), None);

    store.put(msg("Opened", 1), &stream, None).await.unwrap();
    store.put(msg("Closed", 2), &stream, None).await.unwrap();

    let last = store.get_last(&stream).await.unwrap().unwrap();
    assert_eq!(last.message_type, "Closed");
    assert_eq!(last.position, 1);
    assert_eq!(store.stream_version(&stream).await.unwrap(), Some(1));
}

async fn lazy_read(store: &dyn MessageStore) {
    let category = unique_category("account");
    let stream = format!("{}-1", category);
    for n in 0..5 {
        store.put(msg("Deposited", n), &stream, None).await.unwrap();
    }

    let options = GetOptions::new().with_batch_size(2);
    let messages: Vec<Message> = store.read(&stream, options.clone()).try_collect().await.unwrap();
    let positions: Vec<i64> = messages.iter().map(|m| m.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3, 4]);

    let from_category: Vec<Message> = store.read(&category, options).try_collect().await.unwrap();
    assert_eq!(from_category.len(), 5);
}

async fn run_all(store: &dyn MessageStore) {
    append_only_ordering(store).await;
    optimistic_concurrency(store).await;
    idempotent_writes(store).await;
    category_filters(store).await;
    last_message_and_version(store).await;
    lazy_read(store).await;
}

#[tokio::test]
async fn test_in_memory_store() {
    let store = InMemoryMessageStore::new();
    run_all(&store).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_message_db_store() {
    let docker = Cli::default();
    let container = docker.run(common::create_message_db_container());
    let client = common::connect(container.get_host_port_ipv4(common::POSTGRES_PORT)).await;

    run_all(&client).await;
}
