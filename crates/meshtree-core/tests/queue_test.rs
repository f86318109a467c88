//! Serialization queue tests.

mod common;

use std::time::Duration;

use common::{RecordingStore, RecordingSubscriber};
use futures::future::join_all;
use meshtree_core::{Dispatcher, EngineSettings, Envelope, MessageQueue, RawMessage};
use serde_json::json;
use tokio::sync::oneshot;

fn value_update(node: u64, property: &str, value: u64) -> Envelope {
    Envelope::new(
        "_EVENTS/ZWAVE_GATEWAY-zw/node/node_value_updated",
        json!({"data": [
            {"id": node},
            {"commandClassName": "Meter", "propertyName": property, "newValue": value, "prevValue": null}
        ]}),
    )
}

#[tokio::test]
async fn test_concurrent_producers_are_handled_in_submission_order() {
    // Earlier messages hit slower writes, so interleaving would reorder them.
    let store = RecordingStore::with_delay(|path| {
        let n: u64 = path
            .last_segment()
            .trim_start_matches('p')
            .parse()
            .unwrap_or(0);
        Duration::from_millis(20u64.saturating_sub(n * 2))
    });
    let dispatcher = Dispatcher::new(store.clone(), RecordingSubscriber::new(), EngineSettings::default());
    let queue = MessageQueue::spawn(dispatcher, 16);
    let handle = queue.handle();

    // Producers run concurrently; each submits once its predecessor has.
    let (mut senders, receivers): (Vec<_>, Vec<_>) = (0..8).map(|_| oneshot::channel::<()>()).unzip();
    let first = senders.remove(0);
    let producers: Vec<_> = receivers
        .into_iter()
        .zip(senders.into_iter().map(Some).chain(std::iter::once(None)))
        .enumerate()
        .map(|(i, (my_turn, next))| {
            let handle = handle.clone();
            let envelope = value_update(1, &format!("p{}", i), i as u64);
            async move {
                my_turn.await.unwrap();
                handle.submit_envelope(envelope).await.unwrap();
                if let Some(next) = next {
                    next.send(()).unwrap();
                }
            }
        })
        .collect();
    first.send(()).unwrap();
    join_all(producers).await;
    handle.flush().await.unwrap();

    let order: Vec<String> = store
        .writes()
        .into_iter()
        .map(|(path, _)| path)
        .filter(|path| path.starts_with("nodeID_001.Meter."))
        .collect();
    let expected: Vec<String> = (0..8).map(|i| format!("nodeID_001.Meter.p{}", i)).collect();
    assert_eq!(order, expected);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_message_does_not_block_queue() {
    let store = RecordingStore::new();
    let dispatcher = Dispatcher::new(store.clone(), RecordingSubscriber::new(), EngineSettings::default());
    let queue = MessageQueue::spawn(dispatcher, 4);
    let handle = queue.handle();

    handle.submit(RawMessage::new("7/nodeinfo", "{broken")).await.unwrap();
    handle.submit(RawMessage::new("unknown/topic", "1")).await.unwrap();
    handle
        .submit(RawMessage::new(
            "_CLIENTS/ZWAVE_GATEWAY-zw/version",
            r#"{"value":"9.0.0"}"#,
        ))
        .await
        .unwrap();
    handle.flush().await.unwrap();

    assert_eq!(store.value("info.gateway_version").await, Some(json!("9.0.0")));
    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_finishes_tail_and_ends_session() {
    let store = RecordingStore::with_delay(|_| Duration::from_millis(5));
    let dispatcher = Dispatcher::new(store.clone(), RecordingSubscriber::new(), EngineSettings::default());
    let queue = MessageQueue::spawn(dispatcher, 4);
    let handle = queue.handle();

    handle.set_connected(true).await.unwrap();
    handle.submit_envelope(value_update(2, "last", 1)).await.unwrap();
    let dispatcher = queue.shutdown().await.unwrap();

    assert_eq!(store.value("nodeID_002.Meter.last").await, Some(json!(1)));
    assert_eq!(store.value("nodeID_002.ready").await, None);
    assert_eq!(store.value("info.connection").await, Some(json!(false)));
    assert!(dispatcher.cache().contains(&"nodeID_002.Meter.last".into()));
    assert!(handle.submit_envelope(value_update(2, "late", 1)).await.is_err());
}
