mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blipmq_stomp::config::TransportOptions;
use blipmq_stomp::core::properties::PropertiesFormat;
use blipmq_stomp::stomp::memory::{ClientCall, MemoryBroker, Op};
use blipmq_stomp::stomp::logical_queue_name;
use blipmq_stomp::transport::SessionState;
use blipmq_stomp::{
    register_transport, Channel, ConnectionConfig, DeliveryTag, NormalizedMessage, StompChannel,
    TransportRegistry,
};
use serde_json::json;

use common::{channel, init_logging};

#[test]
fn published_message_is_consumed_and_acked_on_the_broker() {
    init_logging();
    let broker = MemoryBroker::recording();
    let mut consumer = channel(&broker, "work.");
    let mut producer = channel(&broker, "work.");

    consumer.queue_bind("orders", None, "", None).unwrap();
    let outgoing = NormalizedMessage::new(r#"{"hello": "world"}"#)
        .with_header("content-type", "application/json")
        .with_properties(json!({
            "delivery_info": {"exchange": "", "routing_key": "orders"},
            "delivery_mode": 2,
        }));
    producer.put("orders", outgoing.into()).unwrap();

    let message = consumer
        .basic_get("orders", Some(Duration::from_secs(1)))
        .unwrap();
    assert_eq!(message.body().as_ref(), br#"{"hello": "world"}"#);
    assert_eq!(message.headers()["content-type"], "application/json");
    assert_eq!(message.properties()["delivery_mode"], 2);
    let broker_id = message.broker_message_id().unwrap().to_owned();
    assert_eq!(consumer.qos().unacked_len(), 1);

    let tag = message.delivery_tag().unwrap().clone();
    consumer.basic_ack(&tag).unwrap();

    assert_eq!(
        broker.calls_of(Op::Ack),
        vec![ClientCall::Ack {
            message_id: broker_id
        }]
    );
    assert_eq!(consumer.qos().unacked_len(), 0);
}

#[test]
fn destinations_round_trip_through_the_prefix() {
    let broker = MemoryBroker::recording();
    let channel = channel(&broker, "work.");
    let destination = channel.queue_destination("orders");

    assert_eq!(destination, "/queue/work.orders");
    assert_eq!(logical_queue_name(&destination, "work.").unwrap(), "orders");
}

#[test]
fn deliveries_come_out_in_arrival_order() {
    let broker = MemoryBroker::recording();
    let mut consumer = channel(&broker, "");
    consumer.queue_bind("q", None, "", None).unwrap();
    let mut producer = channel(&broker, "");
    for n in 0..5 {
        producer
            .put("q", NormalizedMessage::new(n.to_string()).into())
            .unwrap();
    }

    let bodies: Vec<String> = (0..5)
        .map(|_| {
            let delivery = consumer.get_many(&["q"], None).unwrap();
            assert_eq!(delivery.queue, "q");
            String::from_utf8(delivery.message.body.to_vec()).unwrap()
        })
        .collect();

    assert_eq!(bodies, ["0", "1", "2", "3", "4"]);
    assert!(consumer.get_many(&["q"], None).unwrap_err().is_empty());
}

#[test]
fn get_many_waits_for_a_late_publisher() {
    let broker = MemoryBroker::recording();
    let mut consumer = channel(&broker, "");
    consumer.queue_bind("late", None, "", None).unwrap();

    let publisher = broker.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        let headers = [("properties".to_owned(), "{}".to_owned())].into();
        publisher.publish("/queue/late", headers, "finally");
    });

    let delivery = consumer
        .get_many(&["late"], Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(delivery.message.body.as_ref(), b"finally");
    handle.join().unwrap();
}

#[test]
fn legacy_literal_properties_are_understood() {
    let broker = MemoryBroker::recording();
    let config = ConnectionConfig::default().with_transport_options(TransportOptions {
        properties_format: PropertiesFormat::Literal,
        ..Default::default()
    });
    let mut consumer = StompChannel::new(Arc::new(broker.clone()), &config);
    consumer.queue_bind("simple_queue", None, "", None).unwrap();

    let headers = [
        ("content-type", "application/json"),
        ("content-encoding", "utf-8"),
        ("message-id", "ID:services-55311-1412009732901-5:6816:-1:1:1"),
        ("timestamp", "1412068081608"),
        ("expires", "0"),
        ("priority", "4"),
        (
            "properties",
            "{'body_encoding': u'base64', u'delivery_info': {u'priority': 0, \
             'routing_key': u'simple_queue', 'exchange': u'simple_queue'}, \
             'delivery_mode': 2, 'delivery_tag': '423e3830-e67a-458d-9aa0-f58df4d01639'}",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    broker.publish("/queue/simple_queue", headers, "eyJoZWxsbyI6ICJ3b3JsZCJ9");

    let delivery = consumer.get_many(&["simple_queue"], None).unwrap();
    assert_eq!(
        delivery.broker_message_id,
        "ID:services-55311-1412009732901-5:6816:-1:1:1"
    );
    assert_eq!(delivery.queue, "simple_queue");
    assert_eq!(
        delivery.message.properties["delivery_info"]["routing_key"],
        "simple_queue"
    );
    let names: Vec<&str> = delivery.message.headers.keys().map(String::as_str).collect();
    assert_eq!(names, ["content-encoding", "content-type"]);
}

#[test]
fn malformed_frames_never_reach_the_consumer() {
    let broker = MemoryBroker::recording();
    let mut consumer = channel(&broker, "");
    consumer.queue_bind("q", None, "", None).unwrap();

    let bad = [("properties".to_owned(), "{'literal': True}".to_owned())].into();
    broker.publish("/queue/q", bad, "dropped");

    assert!(consumer.get_many(&["q"], None).unwrap_err().is_empty());
}

#[test]
fn registry_opens_working_stomp_channels() {
    let broker = MemoryBroker::recording();
    let registry = TransportRegistry::new();
    register_transport(&registry, broker.clone());

    let mut channel = registry.open("stomp", &common::config("")).unwrap();
    channel.queue_bind("q", None, "", None).unwrap();
    channel.close().unwrap();

    assert_eq!(
        broker.built()[0].host_and_ports,
        vec![("mq.internal".to_owned(), 61613)]
    );
    assert_eq!(broker.calls_of(Op::Disconnect).len(), 1);
}

#[test]
fn closed_channel_reconnects_only_through_a_new_channel() {
    let broker = MemoryBroker::recording();
    let mut first = channel(&broker, "");
    first.queue_bind("q", None, "", None).unwrap();
    first.close().unwrap();
    assert_eq!(first.state(), SessionState::Unconnected);
    assert!(first.put("q", NormalizedMessage::new("x").into()).is_err());

    let mut second = channel(&broker, "");
    second.put("q", NormalizedMessage::new("x").into()).unwrap();
    assert_eq!(broker.calls_of(Op::Connect).len(), 2);
    assert_eq!(broker.built().len(), 2);
}

#[test]
fn producer_delivery_tag_is_used_for_acknowledgment() {
    let broker = MemoryBroker::recording();
    let mut consumer = channel(&broker, "");
    consumer.queue_bind("q", None, "", None).unwrap();
    let mut producer = channel(&broker, "");

    let tagged = NormalizedMessage::new("tagged")
        .with_properties(json!({"delivery_tag": "423e3830-e67a-458d-9aa0-f58df4d01639"}));
    producer.put("q", tagged.into()).unwrap();
    producer.put("q", NormalizedMessage::new("untagged").into()).unwrap();

    let first = consumer.basic_get("q", None).unwrap();
    let tag = first.delivery_tag().unwrap().clone();
    assert_eq!(&*tag, "423e3830-e67a-458d-9aa0-f58df4d01639");

    let second = consumer.basic_get("q", None).unwrap();
    let generated = second.delivery_tag().unwrap().clone();
    assert_ne!(generated, tag);
    assert_eq!(generated.len(), 36);

    consumer.basic_ack(&DeliveryTag::from("423e3830-e67a-458d-9aa0-f58df4d01639")).unwrap();
    assert_eq!(
        broker.calls_of(Op::Ack),
        vec![ClientCall::Ack {
            message_id: first.broker_message_id().unwrap().to_owned()
        }]
    );
    assert_eq!(consumer.qos().unacked_len(), 1);
}

#[test]
fn bounded_queue_accepts_puts_from_its_own_consumer() {
    let broker = MemoryBroker::recording();
    let config = common::config("").with_transport_options(TransportOptions {
        delivery_queue_capacity: Some(2),
        ..Default::default()
    });
    let mut channel = StompChannel::new(Arc::new(broker.clone()), &config);
    channel.queue_bind("q", None, "", None).unwrap();

    for n in 0..3 {
        channel
            .put("q", NormalizedMessage::new(n.to_string()).into())
            .unwrap();
    }
    assert_eq!(broker.parked("/queue/q"), 1);

    let first = channel.basic_get("q", None).unwrap();
    let second = channel.basic_get("q", None).unwrap();
    assert_eq!(first.body().as_ref(), b"0");
    assert_eq!(second.body().as_ref(), b"1");
    assert!(channel.get_many(&["q"], None).unwrap_err().is_empty());

    // the ack frees room, the parked frame follows
    channel.basic_ack(first.delivery_tag().unwrap()).unwrap();
    let third = channel.basic_get("q", None).unwrap();
    assert_eq!(third.body().as_ref(), b"2");
    assert_eq!(broker.parked("/queue/q"), 0);
}
