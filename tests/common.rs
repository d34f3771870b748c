#![allow(dead_code)]

use std::sync::Once;

use blipmq_stomp::config::TransportOptions;
use blipmq_stomp::stomp::memory::MemoryBroker;
use blipmq_stomp::{ConnectionConfig, StompChannel};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = blipmq_stomp::logging::init_logging();
    });
}

pub fn config(prefix: &str) -> ConnectionConfig {
    ConnectionConfig {
        hostname: Some("mq.internal".into()),
        port: Some(61613),
        userid: Some("user".into()),
        password: Some("pass".into()),
        ..Default::default()
    }
    .with_transport_options(TransportOptions {
        queue_name_prefix: prefix.to_owned(),
        ..Default::default()
    })
}

pub fn channel(broker: &MemoryBroker, prefix: &str) -> StompChannel<MemoryBroker> {
    StompChannel::new(std::sync::Arc::new(broker.clone()), &config(prefix))
}
