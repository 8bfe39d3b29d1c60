//! Seam between the session engine and the Cast wire protocol.
//!
//! A [`CastTransport`] opens one [`CastConnection`] per connect attempt. The
//! connection multiplexes any number of logical [`CastChannel`]s, each scoped
//! to a (sender id, receiver id, namespace) triple, and reports what happens on
//! the wire as [`TransportEvent`]s pushed into the monitor's input queue.

use std::fmt;
use std::net::SocketAddr;

use crossbeam_channel::Sender;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::errors::Result;
use crate::messages::CastRequest;
use crate::monitor::MonitorInput;

pub mod frame;
pub mod tls;

pub use tls::TlsTransport;

/// Identifies one connect attempt.
///
/// Events tagged with an id other than the session's current one come from a
/// connection that has since been torn down and are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Addressing of a logical channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelRoute {
    pub sender_id: String,
    pub receiver_id: String,
    pub namespace: String,
}

impl ChannelRoute {
    pub fn new(sender_id: &str, receiver_id: &str, namespace: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// True if `message` is addressed to this channel.
    ///
    /// The message must come from our receiver, target our sender id or the
    /// broadcast id `*`, and carry our namespace.
    pub fn accepts(&self, message: &InboundMessage) -> bool {
        message.source_id == self.receiver_id
            && (message.destination_id == self.sender_id || message.destination_id == "*")
            && message.namespace == self.namespace
    }
}

impl fmt::Display for ChannelRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}]",
            self.sender_id, self.receiver_id, self.namespace
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub source_id: String,
    pub destination_id: String,
    pub namespace: String,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The connection is up and channels can be opened.
    Connected,
    Message(InboundMessage),
    /// The connection failed or was closed by the peer. Nothing more will be
    /// reported for it.
    Error(String),
}

/// Where a connection reports its events.
#[derive(Clone, Debug)]
pub struct TransportEvents {
    connection: ConnectionId,
    tx: Sender<MonitorInput>,
}

impl TransportEvents {
    pub fn new(connection: ConnectionId, tx: Sender<MonitorInput>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Queues `event` for the monitor. Returns false once the monitor is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        trace!(connection = %self.connection, ?event, "transport event");
        self.tx
            .send(MonitorInput::Transport {
                connection: self.connection,
                event,
            })
            .is_ok()
    }
}

/// Opens connections to devices.
pub trait CastTransport: Send {
    /// Starts connecting to `address`.
    ///
    /// Completion is reported asynchronously through `events`: `Connected` on
    /// success, `Error` on failure. An `Err` return means the attempt could
    /// not even be started.
    fn connect(&mut self, address: SocketAddr, events: TransportEvents)
        -> Result<Box<dyn CastConnection>>;
}

pub trait CastConnection: Send {
    fn open_channel(&mut self, route: ChannelRoute) -> Box<dyn CastChannel>;

    /// Shuts the connection down. No further events are reported.
    fn close(&mut self);
}

pub trait CastChannel: Send {
    fn route(&self) -> &ChannelRoute;

    fn send(&mut self, payload: &Value) -> Result<()>;

    fn close(&mut self);

    /// Serializes and sends a request.
    fn send_request(&mut self, request: &CastRequest) -> Result<()> {
        let payload = request.to_payload()?;
        self.send(&payload)
    }
}

/// Sends `request`, logging instead of failing. Returns true if it was queued.
pub(crate) fn send_or_log(channel: &mut dyn CastChannel, request: &CastRequest) -> bool {
    match channel.send_request(request) {
        Ok(()) => {
            debug!(route = %channel.route(), request = request.name(), "request sent");
            true
        }
        Err(e) => {
            warn!(route = %channel.route(), request = request.name(), error = %e, "failed to send request");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{NS_RECEIVER, PLATFORM_RECEIVER_ID, PLATFORM_SENDER_ID};
    use serde_json::json;

    fn inbound(source: &str, destination: &str, namespace: &str) -> InboundMessage {
        InboundMessage {
            source_id: source.to_string(),
            destination_id: destination.to_string(),
            namespace: namespace.to_string(),
            payload: json!({}),
        }
    }

    #[test]
    fn test_route_accepts_addressed_and_broadcast() {
        let route = ChannelRoute::new(PLATFORM_SENDER_ID, PLATFORM_RECEIVER_ID, NS_RECEIVER);

        assert!(route.accepts(&inbound("receiver-0", "sender-0", NS_RECEIVER)));
        assert!(route.accepts(&inbound("receiver-0", "*", NS_RECEIVER)));
    }

    #[test]
    fn test_route_rejects_other_channels() {
        let route = ChannelRoute::new(PLATFORM_SENDER_ID, PLATFORM_RECEIVER_ID, NS_RECEIVER);

        assert!(!route.accepts(&inbound("T1", "sender-0", NS_RECEIVER)));
        assert!(!route.accepts(&inbound("receiver-0", "client-17558", NS_RECEIVER)));
        assert!(!route.accepts(&inbound(
            "receiver-0",
            "sender-0",
            "urn:x-cast:com.google.cast.media"
        )));
    }

    #[test]
    fn test_events_are_tagged_with_connection() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let events = TransportEvents::new(ConnectionId(7), tx);

        assert!(events.emit(TransportEvent::Connected));
        match rx.try_recv().unwrap() {
            MonitorInput::Transport { connection, event } => {
                assert_eq!(connection, ConnectionId(7));
                assert_eq!(event, TransportEvent::Connected);
            }
            other => panic!("unexpected input {other:?}"),
        }

        drop(rx);
        assert!(!events.emit(TransportEvent::Connected));
    }
}
