mod common;

use abi_bind::{
    BindError, ContractHandle, EventRecord, LogFilterSpec, SubscriptionState, Transport,
    WatchOpts,
};
use alloy::dyn_abi::DynSolValue;
use alloy::primitives::Bytes;
use common::*;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn bind(fake: &Arc<FakeTransport>) -> ContractHandle {
    let transport: Arc<dyn Transport> = fake.clone();
    ContractHandle::new(TOKEN, token_abi(), transport)
}

fn value(record: &EventRecord) -> u64 {
    match record.get("value") {
        Some(DynSolValue::Uint(value, _)) => value.to::<u64>(),
        other => panic!("expected value, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pull_delivers_in_order_until_closed() {
    init_tracing();
    let fake = FakeTransport::new();
    let token = bind(&fake);

    let mut stream = token
        .subscribe(&LogFilterSpec::new("Transfer"), &WatchOpts::default())
        .await
        .unwrap();
    assert_eq!(stream.state(), SubscriptionState::Open);

    fake.emit(transfer_log(ALICE, BOB, 1, 10, 0)).await;
    fake.emit(transfer_log(ALICE, BOB, 2, 10, 1)).await;
    assert_eq!(value(&stream.next().await.unwrap()), 1);
    assert_eq!(value(&stream.next().await.unwrap()), 2);

    stream.close();
    fake.emit(transfer_log(ALICE, BOB, 3, 11, 0)).await;

    assert!(stream.next().await.is_none());
    assert!(matches!(
        stream.recv().await,
        Err(BindError::SubscriptionClosed)
    ));

    stream.close();
    drop(stream);
    assert_eq!(fake.released(), 1);
}

#[tokio::test]
async fn test_pull_only_matching_logs() {
    let fake = FakeTransport::new();
    let token = bind(&fake);

    let spec = LogFilterSpec::new("Transfer").indexed(vec![DynSolValue::Address(CAROL)]);
    let mut stream = token.subscribe(&spec, &WatchOpts::default()).await.unwrap();

    fake.emit(transfer_log(ALICE, BOB, 1, 1, 0)).await;
    fake.emit(approval_log(CAROL, BOB, 1)).await;
    fake.emit(transfer_log(CAROL, BOB, 5, 2, 0)).await;
    fake.end_subscriptions();

    let values: Vec<u64> = stream.by_ref().map(|record| value(&record)).collect().await;
    assert_eq!(values, vec![5]);
    assert!(stream.error().is_none());
}

#[tokio::test]
async fn test_pull_drains_buffer_after_transport_error() {
    let fake = FakeTransport::new();
    let token = bind(&fake);
    let mut stream = token
        .subscribe(&LogFilterSpec::new("Transfer"), &WatchOpts::with_buffer(4))
        .await
        .unwrap();

    fake.emit(transfer_log(ALICE, BOB, 1, 1, 0)).await;
    fake.emit(transfer_log(ALICE, BOB, 2, 1, 1)).await;
    fake.fail_subscriptions("websocket closed").await;

    assert_eq!(value(&stream.recv().await.unwrap()), 1);
    assert_eq!(value(&stream.recv().await.unwrap()), 2);
    let err = stream.recv().await.unwrap_err();
    assert!(err.is_transport());
    assert!(stream.error().is_some());
    assert_eq!(stream.state(), SubscriptionState::Closed);
    assert_eq!(fake.released(), 1);
}

#[tokio::test]
async fn test_pull_decode_failure_is_terminal() {
    let fake = FakeTransport::new();
    let token = bind(&fake);
    let mut stream = token
        .subscribe(&LogFilterSpec::new("Transfer"), &WatchOpts::default())
        .await
        .unwrap();

    let mut broken = transfer_log(ALICE, BOB, 1, 1, 0);
    broken.data = Bytes::new();
    fake.emit(broken).await;
    fake.emit(transfer_log(ALICE, BOB, 2, 2, 0)).await;

    assert!(matches!(stream.recv().await, Err(BindError::Decoding(_))));
    assert!(stream.next().await.is_none());
    assert!(stream.error().is_some_and(BindError::is_decoding));
}

#[tokio::test]
async fn test_push_forwards_and_unsubscribes_once() {
    let fake = FakeTransport::new();
    let token = bind(&fake);
    let (sink, mut events) = mpsc::channel(16);

    let handle = token
        .watch(&LogFilterSpec::new("Transfer"), &WatchOpts::default(), sink)
        .await
        .unwrap();

    for n in 1..=3 {
        fake.emit(transfer_log(ALICE, BOB, n, n, 0)).await;
    }
    for n in 1..=3 {
        assert_eq!(value(&events.recv().await.unwrap()), n);
    }

    handle.unsubscribe();
    handle.unsubscribe();
    handle.wait().await.unwrap();
    assert_eq!(fake.released(), 1);
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_push_stops_on_transport_error() {
    let fake = FakeTransport::new();
    let token = bind(&fake);
    let (sink, _events) = mpsc::channel(16);

    let handle = token
        .watch(&LogFilterSpec::new("Transfer"), &WatchOpts::default(), sink)
        .await
        .unwrap();
    fake.fail_subscriptions("node restarted").await;

    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap();
    assert!(matches!(result, Err(BindError::Transport(_))));
    assert_eq!(fake.released(), 1);
}

#[tokio::test]
async fn test_error_reported_when_transport_closes_after_failing() {
    let fake = FakeTransport::new();
    let token = bind(&fake);
    let mut stream = token
        .subscribe(&LogFilterSpec::new("Transfer"), &WatchOpts::default())
        .await
        .unwrap();
    let (sink, _events) = mpsc::channel(4);
    let handle = token
        .watch(&LogFilterSpec::new("Transfer"), &WatchOpts::default(), sink)
        .await
        .unwrap();

    fake.fail_and_end_subscriptions("log poller stopped").await;

    assert!(matches!(stream.recv().await, Err(BindError::Transport(_))));
    assert!(stream.error().is_some_and(BindError::is_transport));
    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap();
    assert!(matches!(result, Err(BindError::Transport(_))));
    assert_eq!(fake.released(), 2);
}

#[tokio::test]
async fn test_push_stops_when_handle_dropped() {
    let fake = FakeTransport::new();
    let token = bind(&fake);
    let (sink, mut events) = mpsc::channel(4);

    let handle = token
        .watch(&LogFilterSpec::new("Transfer"), &WatchOpts::default(), sink)
        .await
        .unwrap();
    drop(handle);

    let closed = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    assert!(closed.is_none());
    assert_eq!(fake.released(), 1);
}

#[tokio::test]
async fn test_push_stops_when_sink_dropped() {
    let fake = FakeTransport::new();
    let token = bind(&fake);
    let (sink, events) = mpsc::channel(1);

    let handle = token
        .watch(&LogFilterSpec::new("Transfer"), &WatchOpts::default(), sink)
        .await
        .unwrap();
    drop(events);
    fake.emit(transfer_log(ALICE, BOB, 1, 1, 0)).await;

    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(fake.released(), 1);
}

#[tokio::test]
async fn test_push_ends_with_transport() {
    let fake = FakeTransport::new();
    let token = bind(&fake);
    let (sink, mut events) = mpsc::channel(4);

    let handle = token
        .watch(&LogFilterSpec::new("Transfer"), &WatchOpts::default(), sink)
        .await
        .unwrap();
    fake.emit(transfer_log(ALICE, BOB, 9, 1, 0)).await;
    fake.end_subscriptions();

    assert_eq!(value(&events.recv().await.unwrap()), 9);
    handle.wait().await.unwrap();
    assert_eq!(fake.released(), 1);
}

#[tokio::test]
async fn test_independent_subscriptions() {
    let fake = FakeTransport::new();
    let token = bind(&fake);

    let mut first = token
        .subscribe(&LogFilterSpec::new("Transfer"), &WatchOpts::default())
        .await
        .unwrap();
    let mut second = token
        .subscribe(&LogFilterSpec::new("Transfer"), &WatchOpts::default())
        .await
        .unwrap();
    assert_eq!(fake.live_subscriptions(), 2);

    fake.emit(transfer_log(ALICE, BOB, 4, 1, 0)).await;
    first.close();

    assert!(first.next().await.is_none());
    assert_eq!(value(&second.next().await.unwrap()), 4);
    assert_eq!(second.state(), SubscriptionState::Open);
    assert_eq!(fake.released(), 1);
}
