//! End-to-end tests for the engine over an in-memory transport.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wirestream_client::{
    ControlMessage, DropReason, Entity, MockFactory, MockTransport, ReconnectConfig, Stream,
    StreamConfig,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TestData {
    id: String,
    name: String,
}

impl Entity for TestData {
    fn id(&self) -> &str {
        &self.id
    }
}

fn entity(id: &str, name: &str) -> TestData {
    TestData {
        id: id.into(),
        name: name.into(),
    }
}

fn connect() -> (Stream, Arc<MockFactory>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let factory = Arc::new(MockFactory::new());
    let config = StreamConfig::new("mock://")
        .with_reconnect(ReconnectConfig::fixed(Duration::from_millis(10)));
    let stream = Stream::connect(config, Arc::clone(&factory));
    (stream, factory)
}

fn open_first(factory: &MockFactory) -> Arc<MockTransport> {
    let transport = factory.connection(0).unwrap();
    transport.open();
    transport
}

fn frame(
    stream_name: &str,
    group_id: &str,
    id: Option<&str>,
    timestamp: u64,
    event: serde_json::Value,
) -> String {
    let mut message = json!({
        "streamName": stream_name,
        "groupId": group_id,
        "timestamp": timestamp,
        "event": event,
    });
    if let Some(id) = id {
        message["id"] = json!(id);
    }
    message.to_string()
}

fn join_count(transport: &MockTransport) -> usize {
    transport
        .sent_frames()
        .iter()
        .filter_map(|f| ControlMessage::from_json(f).ok())
        .filter(|c| matches!(c, ControlMessage::Join { .. }))
        .count()
}

fn wait_for_connection(factory: &MockFactory, count: usize) -> Arc<MockTransport> {
    let deadline = Instant::now() + Duration::from_secs(2);
    while factory.connection_count() < count {
        assert!(Instant::now() < deadline, "no reconnect within deadline");
        std::thread::sleep(Duration::from_millis(5));
    }
    factory.connection(count - 1).unwrap()
}

#[test]
fn group_subscription_reconciles_wire_traffic() {
    let (stream, factory) = connect();
    let transport = open_first(&factory);
    let group = stream.subscribe_group::<TestData>("todo", "default");

    let changes = Arc::new(AtomicU32::new(0));
    let sink = Arc::clone(&changes);
    group.add_change_listener(move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });

    transport.deliver(&frame(
        "todo",
        "default",
        None,
        1000,
        json!({"type": "sync", "data": [{"id": "1", "name": "A"}]}),
    ));
    transport.deliver(&frame(
        "todo",
        "default",
        None,
        1100,
        json!({"type": "create", "data": {"id": "2", "name": "B"}}),
    ));
    transport.deliver(&frame(
        "todo",
        "default",
        Some("1"),
        1200,
        json!({"type": "update", "data": {"id": "1", "name": "A1"}}),
    ));

    assert_eq!(group.get_state(), vec![entity("1", "A1"), entity("2", "B")]);
    assert_eq!(changes.load(Ordering::SeqCst), 3);
    stream.close();
}

#[test]
fn item_subscription_reconciles_wire_traffic() {
    let (stream, factory) = connect();
    let transport = open_first(&factory);
    let item = stream.subscribe_item::<TestData>("todo", "default", "1");

    transport.deliver(&frame(
        "todo",
        "default",
        Some("1"),
        1000,
        json!({"type": "sync", "data": {"id": "1", "name": "A"}}),
    ));
    assert_eq!(item.get_state(), Some(entity("1", "A")));

    transport.deliver(&frame(
        "todo",
        "default",
        Some("1"),
        1200,
        json!({"type": "delete", "data": {"id": "1"}}),
    ));
    assert_eq!(item.get_state(), None);
    stream.close();
}

#[test]
fn rooms_are_isolated() {
    let (stream, factory) = connect();
    let transport = open_first(&factory);
    let group = stream.subscribe_group::<TestData>("t", "g");
    let item = stream.subscribe_item::<TestData>("t", "g", "1");

    transport.deliver(&frame(
        "t",
        "g",
        None,
        100,
        json!({"type": "sync", "data": [{"id": "1", "name": "A"}]}),
    ));

    // A different group on the same stream.
    transport.deliver(&frame(
        "t",
        "other",
        None,
        200,
        json!({"type": "sync", "data": [{"id": "9", "name": "Z"}]}),
    ));
    // Item-addressed sync: reaches the item room, and its single-object
    // payload cannot replace a group collection.
    transport.deliver(&frame(
        "t",
        "g",
        Some("1"),
        300,
        json!({"type": "sync", "data": {"id": "1", "name": "FROM-ITEM-SYNC"}}),
    ));

    assert_eq!(group.get_state(), vec![entity("1", "A")]);
    assert_eq!(item.get_state(), Some(entity("1", "FROM-ITEM-SYNC")));

    // Group-addressed traffic never reaches an item room.
    transport.deliver(&frame(
        "t",
        "g",
        None,
        400,
        json!({"type": "sync", "data": [{"id": "1", "name": "B"}]}),
    ));
    assert_eq!(item.get_state(), Some(entity("1", "FROM-ITEM-SYNC")));
    assert_eq!(group.get_state(), vec![entity("1", "B")]);
    stream.close();
}

#[test]
fn reconnect_rejoins_every_subscription_without_touching_state() {
    let (stream, factory) = connect();
    let transport = open_first(&factory);
    let group = stream.subscribe_group::<TestData>("t", "g");
    let item = stream.subscribe_item::<TestData>("t", "g", "1");

    transport.deliver(&frame(
        "t",
        "g",
        None,
        100,
        json!({"type": "sync", "data": [{"id": "1", "name": "A"}]}),
    ));
    transport.deliver(&frame(
        "t",
        "g",
        Some("1"),
        100,
        json!({"type": "sync", "data": {"id": "1", "name": "A"}}),
    ));
    let group_before = group.get_state();
    let item_before = item.get_state();

    transport.drop_connection();
    let replacement = wait_for_connection(&factory, 2);
    replacement.open();

    // Exactly one join per registered subscription.
    assert_eq!(join_count(&replacement), 2);
    // Reconnecting by itself never mutates subscription state.
    assert_eq!(group.get_state(), group_before);
    assert_eq!(item.get_state(), item_before);
    stream.close();
}

#[test]
fn closed_subscription_no_longer_receives() {
    let (stream, factory) = connect();
    let transport = open_first(&factory);
    let group = stream.subscribe_group::<TestData>("t", "g");
    let survivor = stream.subscribe_group::<TestData>("t", "g");

    transport.deliver(&frame(
        "t",
        "g",
        None,
        100,
        json!({"type": "sync", "data": [{"id": "1", "name": "A"}]}),
    ));
    group.close();
    transport.deliver(&frame(
        "t",
        "g",
        None,
        200,
        json!({"type": "sync", "data": [{"id": "2", "name": "B"}]}),
    ));

    assert_eq!(group.get_state(), vec![entity("1", "A")]);
    assert_eq!(survivor.get_state(), vec![entity("2", "B")]);
    stream.close();
}

#[test]
fn shared_room_fans_out_to_every_subscription() {
    let (stream, factory) = connect();
    let transport = open_first(&factory);
    let first = stream.subscribe_group::<TestData>("t", "g");
    let second = stream.subscribe_group::<TestData>("t", "g");

    transport.deliver(&frame(
        "t",
        "g",
        None,
        100,
        json!({"type": "sync", "data": [{"id": "1", "name": "A"}]}),
    ));

    // Each subscription reconciles independently into its own state.
    assert_eq!(first.get_state(), second.get_state());
    assert_eq!(first.get_state(), vec![entity("1", "A")]);
    stream.close();
}

#[test]
fn malformed_frames_do_not_break_dispatch() {
    let drops = Arc::new(AtomicU32::new(0));
    let sink = Arc::clone(&drops);

    let factory = Arc::new(MockFactory::new());
    let config = StreamConfig::new("mock://")
        .with_reconnect(ReconnectConfig::fixed(Duration::from_millis(10)))
        .with_drop_hook(move |reason| {
            if matches!(reason, DropReason::Decode { .. }) {
                sink.fetch_add(1, Ordering::SeqCst);
            }
        });
    let stream = Stream::connect(config, Arc::clone(&factory));
    let transport = open_first(&factory);
    let group = stream.subscribe_group::<TestData>("t", "g");

    transport.deliver("{ not even json");
    transport.deliver(r#"{"streamName": "t"}"#);
    transport.deliver(&frame(
        "t",
        "g",
        None,
        100,
        json!({"type": "sync", "data": [{"id": "1", "name": "A"}]}),
    ));

    assert_eq!(group.get_state(), vec![entity("1", "A")]);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
    stream.close();
}

#[test]
fn stale_drops_are_observable_through_the_hook() {
    let stale = Arc::new(AtomicU32::new(0));
    let sink = Arc::clone(&stale);

    let factory = Arc::new(MockFactory::new());
    let config = StreamConfig::new("mock://").with_drop_hook(move |reason| {
        if matches!(reason, DropReason::Stale { .. }) {
            sink.fetch_add(1, Ordering::SeqCst);
        }
    });
    let stream = Stream::connect(config, Arc::clone(&factory));
    let transport = open_first(&factory);
    let group = stream.subscribe_group::<TestData>("t", "g");

    transport.deliver(&frame(
        "t",
        "g",
        None,
        1000,
        json!({"type": "sync", "data": [{"id": "1", "name": "A"}]}),
    ));
    transport.deliver(&frame(
        "t",
        "g",
        None,
        900,
        json!({"type": "sync", "data": [{"id": "9", "name": "Z"}]}),
    ));

    assert_eq!(group.get_state(), vec![entity("1", "A")]);
    assert_eq!(stale.load(Ordering::SeqCst), 1);
    stream.close();
}

#[test]
fn custom_events_flow_end_to_end() {
    let (stream, factory) = connect();
    let transport = open_first(&factory);
    let item = stream.subscribe_item::<TestData>("t", "g", "1");

    let received = Arc::new(AtomicU32::new(0));
    let sink = Arc::clone(&received);
    item.on_event("progress", move |event| {
        assert_eq!(event.data, json!({"pct": 80}));
        sink.fetch_add(1, Ordering::SeqCst);
    });

    transport.deliver(&frame(
        "t",
        "g",
        Some("1"),
        100,
        json!({"type": "event", "event": {"type": "progress", "data": {"pct": 80}}}),
    ));

    assert_eq!(received.load(Ordering::SeqCst), 1);
    assert_eq!(item.get_state(), None);
    stream.close();
}

#[test]
fn sorted_group_subscription_over_the_wire() {
    let (stream, factory) = connect();
    let transport = open_first(&factory);
    let group = stream.subscribe_group_sorted::<TestData>("t", "g", "name");

    transport.deliver(&frame(
        "t",
        "g",
        None,
        100,
        json!({"type": "sync", "data": [{"id": "1", "name": "B"}, {"id": "2", "name": "A"}]}),
    ));

    assert_eq!(group.get_state(), vec![entity("2", "A"), entity("1", "B")]);
    stream.close();
}
