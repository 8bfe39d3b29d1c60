//! Recording transport shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crossbeam_channel::{Receiver, unbounded};
use pmocast::{
    CastChannel, CastConnection, CastError, CastTransport, ChannelRoute, ConnectionId,
    DeviceMonitor, DiscoveryEvent, InboundMessage, MonitorConfig, MonitorEvent, MonitorInput,
    Result, TransportEvent, TransportEvents,
};
use serde_json::Value;

pub const GARAGE: &str = "Garage";

pub struct Connect {
    pub address: SocketAddr,
    pub events: TransportEvents,
    pub closed: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sent {
    pub connection: ConnectionId,
    pub route: ChannelRoute,
    pub payload: Value,
}

#[derive(Default)]
pub struct Recorded {
    pub connects: Vec<Connect>,
    pub sent: Vec<Sent>,
    pub opened: Vec<(ConnectionId, ChannelRoute)>,
    pub closed_channels: Vec<(ConnectionId, ChannelRoute)>,
    pub refuse_connect: bool,
}

/// Transport that records everything and never touches the network.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap()
    }

    pub fn connect_count(&self) -> usize {
        self.recorded().connects.len()
    }

    pub fn last_connection(&self) -> ConnectionId {
        self.recorded()
            .connects
            .last()
            .expect("no connect attempt recorded")
            .events
            .connection()
    }

    pub fn last_events(&self) -> TransportEvents {
        self.recorded()
            .connects
            .last()
            .expect("no connect attempt recorded")
            .events
            .clone()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.recorded().connects[index].closed
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.recorded().refuse_connect = refuse;
    }

    /// Payloads sent on `namespace` to `receiver_id`.
    pub fn sent_to(&self, receiver_id: &str, namespace: &str) -> Vec<Value> {
        self.recorded()
            .sent
            .iter()
            .filter(|sent| sent.route.receiver_id == receiver_id && sent.route.namespace == namespace)
            .map(|sent| sent.payload.clone())
            .collect()
    }

    /// `type` of every payload sent on `namespace` to `receiver_id`.
    pub fn sent_types(&self, receiver_id: &str, namespace: &str) -> Vec<String> {
        self.sent_to(receiver_id, namespace)
            .iter()
            .filter_map(|payload| payload.get("type").and_then(Value::as_str).map(String::from))
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.recorded().sent.len()
    }

    pub fn clear_sent(&self) {
        self.recorded().sent.clear();
    }

    pub fn is_channel_closed(&self, receiver_id: &str, namespace: &str) -> bool {
        self.recorded()
            .closed_channels
            .iter()
            .any(|(_, route)| route.receiver_id == receiver_id && route.namespace == namespace)
    }
}

impl CastTransport for MockTransport {
    fn connect(
        &mut self,
        address: SocketAddr,
        events: TransportEvents,
    ) -> Result<Box<dyn CastConnection>> {
        let mut recorded = self.recorded();
        if recorded.refuse_connect {
            return Err(CastError::transport("connect refused"));
        }
        let id = events.connection();
        let index = recorded.connects.len();
        recorded.connects.push(Connect {
            address,
            events,
            closed: false,
        });
        Ok(Box::new(MockConnection {
            id,
            index,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockConnection {
    id: ConnectionId,
    index: usize,
    inner: Arc<Mutex<Recorded>>,
}

impl CastConnection for MockConnection {
    fn open_channel(&mut self, route: ChannelRoute) -> Box<dyn CastChannel> {
        self.inner
            .lock()
            .unwrap()
            .opened
            .push((self.id, route.clone()));
        Box::new(MockChannel {
            connection: self.id,
            route,
            inner: Arc::clone(&self.inner),
            open: true,
        })
    }

    fn close(&mut self) {
        self.inner.lock().unwrap().connects[self.index].closed = true;
    }
}

struct MockChannel {
    connection: ConnectionId,
    route: ChannelRoute,
    inner: Arc<Mutex<Recorded>>,
    open: bool,
}

impl CastChannel for MockChannel {
    fn route(&self) -> &ChannelRoute {
        &self.route
    }

    fn send(&mut self, payload: &Value) -> Result<()> {
        if !self.open {
            return Err(CastError::channel_closed(&self.route.namespace));
        }
        self.inner.lock().unwrap().sent.push(Sent {
            connection: self.connection,
            route: self.route.clone(),
            payload: payload.clone(),
        });
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.inner
                .lock()
                .unwrap()
                .closed_channels
                .push((self.connection, self.route.clone()));
        }
    }
}

/// Monitor on a mock transport with a virtual clock starting at `t0`.
pub struct Harness {
    pub monitor: DeviceMonitor,
    pub transport: MockTransport,
    pub events: Receiver<MonitorEvent>,
    pub inputs: Receiver<MonitorInput>,
    pub t0: Instant,
}

impl Harness {
    pub fn new(config: MonitorConfig) -> Self {
        let transport = MockTransport::new();
        let (tx, inputs) = unbounded();
        let t0 = Instant::now();
        let monitor = DeviceMonitor::new(config, Box::new(transport.clone()), tx, t0);
        let events = monitor.subscribe();
        Self {
            monitor,
            transport,
            events,
            inputs,
            t0,
        }
    }

    pub fn garage() -> Self {
        Self::new(MonitorConfig::new(GARAGE))
    }

    pub fn drain_events(&self) -> Vec<MonitorEvent> {
        self.events.try_iter().collect()
    }

    pub fn appear(&mut self, address: &str, now: Instant) {
        self.monitor.handle_discovery(appeared(GARAGE, None, address), now);
    }

    /// Completes the pending connect attempt.
    pub fn connected(&mut self, now: Instant) {
        let connection = self.transport.last_connection();
        self.monitor
            .handle_transport(connection, TransportEvent::Connected, now);
    }

    pub fn fail(&mut self, reason: &str, now: Instant) {
        let connection = self.transport.last_connection();
        self.monitor
            .handle_transport(connection, TransportEvent::Error(reason.to_string()), now);
    }

    /// Delivers `payload` from `source` on the current connection.
    pub fn deliver(&mut self, source: &str, destination: &str, namespace: &str, payload: Value, now: Instant) {
        let connection = self.transport.last_connection();
        self.monitor.handle_transport(
            connection,
            TransportEvent::Message(inbound(source, destination, namespace, payload)),
            now,
        );
    }

    pub fn receiver_status(&mut self, payload: Value, now: Instant) {
        self.deliver("receiver-0", "sender-0", pmocast::messages::NS_RECEIVER, payload, now);
    }

    pub fn media_status(&mut self, transport_id: &str, payload: Value, now: Instant) {
        self.deliver(transport_id, "client-17558", pmocast::messages::NS_MEDIA, payload, now);
    }
}

pub fn appeared(name: &str, interface: Option<&str>, address: &str) -> DiscoveryEvent {
    DiscoveryEvent::DeviceAppeared {
        name: name.to_string(),
        interface: interface.map(String::from),
        address: address.parse().unwrap(),
    }
}

pub fn disappeared(name: &str, interface: Option<&str>) -> DiscoveryEvent {
    DiscoveryEvent::DeviceDisappeared {
        name: name.to_string(),
        interface: interface.map(String::from),
    }
}

pub fn inbound(source: &str, destination: &str, namespace: &str, payload: Value) -> InboundMessage {
    InboundMessage {
        source_id: source.to_string(),
        destination_id: destination.to_string(),
        namespace: namespace.to_string(),
        payload,
    }
}

pub fn receiver_app(display_name: &str, transport_id: &str, session_id: &str, level: f64) -> Value {
    serde_json::json!({
        "type": "RECEIVER_STATUS",
        "requestId": 0,
        "status": {
            "applications": [{
                "displayName": display_name,
                "transportId": transport_id,
                "sessionId": session_id
            }],
            "volume": {"level": level, "muted": false}
        }
    })
}

pub fn playing(media_session_id: i64, player_state: &str, artist: &str, title: &str) -> Value {
    serde_json::json!({
        "type": "MEDIA_STATUS",
        "status": [{
            "mediaSessionId": media_session_id,
            "playerState": player_state,
            "media": {"metadata": {"artist": artist, "title": title}}
        }]
    })
}
