//! In-process STOMP broker.
//!
//! [`MemoryBroker`] implements [`StompConnector`]; each client it builds
//! behaves like a connection to the same broker:
//!
//! * `send` stamps `message-id`, `destination`, `timestamp`, `expires` and
//!   `priority` and hands the frame to one subscriber of the destination
//! * frames nobody can take right now (no subscriber, or a full bounded
//!   listener) are parked and retried on the next client call
//! * a broker built with [`MemoryBroker::recording`] keeps every client
//!   call, see [`MemoryBroker::calls`]
//! * a failure can be queued for the next call of a given kind, see
//!   [`MemoryBroker::fail_next`]
//!
//! Delivery happens on the calling thread and never waits on a listener,
//! so a channel can publish to its own subscription.
//!
//! Useful for tests and for running a channel without a real broker.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::error::StompError;
use crate::core::message::{Envelope, Headers, DESTINATION_HEADER, MESSAGE_ID_HEADER};
use crate::stomp::{AckMode, ConnectParams, FrameListener, StompClient, StompConnector};

/// Kinds of client call, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Send,
    Ack,
}

/// A client call as observed by the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    Start,
    Connect {
        username: Option<String>,
        passcode: Option<String>,
        wait: bool,
    },
    Disconnect,
    Subscribe {
        destination: String,
        ack: AckMode,
    },
    Unsubscribe {
        destination: String,
    },
    Send {
        destination: String,
        body: Bytes,
        headers: Headers,
    },
    Ack {
        message_id: String,
    },
}

struct Subscription {
    client_id: u64,
    listeners: Vec<Arc<dyn FrameListener>>,
}

#[derive(Default)]
struct BrokerState {
    recording: bool,
    calls: Vec<ClientCall>,
    built: Vec<ConnectParams>,
    failures: HashMap<Op, VecDeque<StompError>>,
    subscriptions: HashMap<String, Vec<Subscription>>,
    /// Frames no subscriber has taken yet, oldest first.
    parked: HashMap<String, VecDeque<Envelope>>,
    /// Round-robin cursor per destination.
    cursor: HashMap<String, usize>,
}

/// Shared handle to an in-process broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_message_id: Arc<AtomicU64>,
    next_client_id: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that keeps every client call and built client for inspection.
    pub fn recording() -> Self {
        let broker = Self::default();
        broker.state.lock().recording = true;
        broker
    }

    /// Every client call made so far, in order. Empty unless the broker is
    /// [`recording`](Self::recording).
    pub fn calls(&self) -> Vec<ClientCall> {
        self.state.lock().calls.clone()
    }

    /// Calls of one kind, e.g. all acks.
    pub fn calls_of(&self, op: Op) -> Vec<ClientCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.op() == Some(op))
            .collect()
    }

    /// Parameters of every client built through a recording broker.
    pub fn built(&self) -> Vec<ConnectParams> {
        self.state.lock().built.clone()
    }

    /// Make the next call of kind `op` fail with `error`.
    pub fn fail_next(&self, op: Op, error: StompError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Push a frame to `destination` as the broker would. A missing
    /// `message-id` is filled in; other headers are kept as given.
    pub fn publish(&self, destination: &str, mut headers: Headers, body: impl Into<Bytes>) {
        headers
            .entry(MESSAGE_ID_HEADER.to_owned())
            .or_insert_with(|| self.message_id());
        headers.insert(DESTINATION_HEADER.to_owned(), destination.to_owned());
        self.route(Envelope::new(headers, body));
    }

    /// Frames on `destination` no subscriber has taken yet.
    pub fn parked(&self, destination: &str) -> usize {
        self.state
            .lock()
            .parked
            .get(destination)
            .map_or(0, VecDeque::len)
    }

    fn message_id(&self) -> String {
        format!("ID:memory-{}", self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn record(&self, call: ClientCall) -> Result<(), StompError> {
        let mut state = self.state.lock();
        let op = call.op();
        if state.recording {
            state.calls.push(call);
        }
        match op.and_then(|op| state.failures.get_mut(&op)) {
            Some(queue) => queue.pop_front().map_or(Ok(()), Err),
            None => Ok(()),
        }
    }

    fn route(&self, envelope: Envelope) {
        let Some(destination) = envelope.destination().map(str::to_owned) else {
            return;
        };
        self.state
            .lock()
            .parked
            .entry(destination.clone())
            .or_default()
            .push_back(envelope);
        self.flush(&destination);
    }

    /// Hand parked frames of `destination` to its subscribers, round-robin,
    /// until none are left or the chosen subscriber is full.
    fn flush(&self, destination: &str) {
        loop {
            let (envelope, listeners) = {
                let mut state = self.state.lock();
                let count = state.subscriptions.get(destination).map_or(0, Vec::len);
                if count == 0 {
                    return;
                }
                let Some(envelope) = state
                    .parked
                    .get_mut(destination)
                    .and_then(VecDeque::pop_front)
                else {
                    return;
                };
                let cursor = state.cursor.entry(destination.to_owned()).or_insert(0);
                let index = *cursor % count;
                *cursor = cursor.wrapping_add(1);
                (envelope, state.subscriptions[destination][index].listeners.clone())
            };

            // deliver outside the lock; listeners may call back into the broker
            let taken = listeners
                .iter()
                .all(|listener| listener.try_on_message(&envelope.headers, envelope.body.clone()));
            if !taken {
                self.state
                    .lock()
                    .parked
                    .entry(destination.to_owned())
                    .or_default()
                    .push_front(envelope);
                return;
            }
        }
    }

    fn flush_all(&self) {
        let destinations: Vec<String> = self
            .state
            .lock()
            .parked
            .iter()
            .filter(|(_, frames)| !frames.is_empty())
            .map(|(destination, _)| destination.clone())
            .collect();
        for destination in destinations {
            self.flush(&destination);
        }
    }

    fn add_subscription(&self, destination: &str, subscription: Subscription) {
        self.state
            .lock()
            .subscriptions
            .entry(destination.to_owned())
            .or_default()
            .push(subscription);
        self.flush(destination);
    }

    fn remove_subscriptions(&self, client_id: u64, destination: Option<&str>) {
        let mut state = self.state.lock();
        for (name, subs) in state.subscriptions.iter_mut() {
            if destination.map_or(true, |d| d == name.as_str()) {
                subs.retain(|sub| sub.client_id != client_id);
            }
        }
        state.subscriptions.retain(|_, subs| !subs.is_empty());
    }
}

impl StompConnector for MemoryBroker {
    type Client = MemoryClient;

    fn build(&self, params: &ConnectParams) -> MemoryClient {
        let mut state = self.state.lock();
        if state.recording {
            state.built.push(params.clone());
        }
        drop(state);
        MemoryClient {
            id: self.next_client_id.fetch_add(1, Ordering::Relaxed),
            broker: self.clone(),
            connected: false,
            listeners: HashMap::new(),
        }
    }
}

/// Client connected to a [`MemoryBroker`].
pub struct MemoryClient {
    id: u64,
    broker: MemoryBroker,
    connected: bool,
    listeners: HashMap<String, Arc<dyn FrameListener>>,
}

impl MemoryClient {
    fn ensure_connected(&self) -> Result<(), StompError> {
        if self.connected {
            Ok(())
        } else {
            Err(StompError::NotConnected)
        }
    }
}

impl StompClient for MemoryClient {
    fn start(&mut self) -> Result<(), StompError> {
        self.broker.record(ClientCall::Start)
    }

    fn connect(
        &mut self,
        username: Option<&str>,
        passcode: Option<&str>,
        wait: bool,
    ) -> Result<(), StompError> {
        self.broker.record(ClientCall::Connect {
            username: username.map(str::to_owned),
            passcode: passcode.map(str::to_owned),
            wait,
        })?;
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), StompError> {
        self.broker.record(ClientCall::Disconnect)?;
        self.ensure_connected()?;
        self.broker.remove_subscriptions(self.id, None);
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn subscribe(&mut self, destination: &str, ack: AckMode) -> Result<(), StompError> {
        self.broker.record(ClientCall::Subscribe {
            destination: destination.to_owned(),
            ack,
        })?;
        self.ensure_connected()?;
        self.broker.add_subscription(
            destination,
            Subscription {
                client_id: self.id,
                listeners: self.listeners.values().cloned().collect(),
            },
        );
        Ok(())
    }

    fn unsubscribe(&mut self, destination: &str) -> Result<(), StompError> {
        self.broker.record(ClientCall::Unsubscribe {
            destination: destination.to_owned(),
        })?;
        self.ensure_connected()?;
        self.broker.remove_subscriptions(self.id, Some(destination));
        Ok(())
    }

    fn send(&mut self, destination: &str, body: Bytes, headers: &Headers) -> Result<(), StompError> {
        self.broker.record(ClientCall::Send {
            destination: destination.to_owned(),
            body: body.clone(),
            headers: headers.clone(),
        })?;
        self.ensure_connected()?;

        let mut stamped = headers.clone();
        stamped.insert(MESSAGE_ID_HEADER.to_owned(), self.broker.message_id());
        stamped.insert(DESTINATION_HEADER.to_owned(), destination.to_owned());
        stamped.insert("timestamp".to_owned(), now_millis().to_string());
        stamped.insert("expires".to_owned(), "0".to_owned());
        stamped.insert("priority".to_owned(), "4".to_owned());
        self.broker.route(Envelope::new(stamped, body));
        Ok(())
    }

    fn ack(&mut self, message_id: &str) -> Result<(), StompError> {
        self.broker.record(ClientCall::Ack {
            message_id: message_id.to_owned(),
        })?;
        self.ensure_connected()?;
        // an ack frees room in the consumer's queue
        self.broker.flush_all();
        Ok(())
    }

    fn set_listener(&mut self, name: &str, listener: Arc<dyn FrameListener>) {
        self.listeners.insert(name.to_owned(), listener);
    }

    fn get_listener(&self, name: &str) -> Option<Arc<dyn FrameListener>> {
        self.listeners.get(name).cloned()
    }
}

impl ClientCall {
    fn op(&self) -> Option<Op> {
        match self {
            ClientCall::Start => None,
            ClientCall::Connect { .. } => Some(Op::Connect),
            ClientCall::Disconnect => Some(Op::Disconnect),
            ClientCall::Subscribe { .. } => Some(Op::Subscribe),
            ClientCall::Unsubscribe { .. } => Some(Op::Unsubscribe),
            ClientCall::Send { .. } => Some(Op::Send),
            ClientCall::Ack { .. } => Some(Op::Ack),
        }
    }
}

fn now_millis() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
