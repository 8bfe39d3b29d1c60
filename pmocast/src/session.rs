//! One connection to a device and its reconnect loop.
//!
//! ```text
//! Connecting --Connected--> Connected --error/CLOSE--> Reconnecting
//!     ^                                                     |
//!     +----------------- backoff elapsed -------------------+
//! ```
//!
//! Any state goes to `Closed` on [`Session::close`]; a closed session never
//! reconnects.

use std::net::SocketAddr;
use std::time::Instant;

use crossbeam_channel::Sender;
use tracing::{debug, info, trace, warn};

use crate::config::MonitorConfig;
use crate::media_session::MediaSession;
use crate::messages::{
    CastRequest, NS_CONNECTION, NS_HEARTBEAT, NS_RECEIVER, PLATFORM_RECEIVER_ID,
    PLATFORM_SENDER_ID, message_type, parse_receiver_status,
};
use crate::model::{IdSequence, SessionId};
use crate::monitor::MonitorInput;
use crate::state::StatusSink;
use crate::timer::{Timer, earliest};
use crate::transport::{
    CastChannel, CastConnection, CastTransport, ChannelRoute, ConnectionId, InboundMessage,
    TransportEvent, TransportEvents, send_or_log,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    /// Waiting for the backoff before the next connect attempt.
    Reconnecting,
    Closed,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

/// The always-open channels to the device itself.
struct PlatformChannels {
    connection: Box<dyn CastChannel>,
    receiver: Box<dyn CastChannel>,
    heartbeat: Box<dyn CastChannel>,
}

impl PlatformChannels {
    fn open(connection: &mut dyn CastConnection) -> Self {
        let route =
            |namespace: &str| ChannelRoute::new(PLATFORM_SENDER_ID, PLATFORM_RECEIVER_ID, namespace);
        Self {
            connection: connection.open_channel(route(NS_CONNECTION)),
            receiver: connection.open_channel(route(NS_RECEIVER)),
            heartbeat: connection.open_channel(route(NS_HEARTBEAT)),
        }
    }

    fn close(&mut self) {
        self.connection.close();
        self.receiver.close();
        self.heartbeat.close();
    }
}

pub struct Session {
    id: SessionId,
    address: SocketAddr,
    config: MonitorConfig,
    state: SessionState,
    connection_id: Option<ConnectionId>,
    connection: Option<Box<dyn CastConnection>>,
    channels: Option<PlatformChannels>,
    media: Option<MediaSession>,
    heartbeat_timer: Timer,
    reconnect_timer: Timer,
    request_ids: IdSequence,
    connection_ids: IdSequence,
    events: Sender<MonitorInput>,
    /// Routing id of the foreground application.
    transport_id: Option<String>,
    /// Receiver session id, target of STOP.
    receiver_session_id: Option<String>,
    volume: Option<f64>,
}

impl Session {
    /// Creates a session and starts its first connect attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        id: SessionId,
        address: SocketAddr,
        config: MonitorConfig,
        transport: &mut dyn CastTransport,
        request_ids: IdSequence,
        connection_ids: IdSequence,
        events: Sender<MonitorInput>,
        now: Instant,
    ) -> Self {
        let mut session = Self {
            id,
            address,
            config,
            state: SessionState::Connecting,
            connection_id: None,
            connection: None,
            channels: None,
            media: None,
            heartbeat_timer: Timer::new(),
            reconnect_timer: Timer::new(),
            request_ids,
            connection_ids,
            events,
            transport_id: None,
            receiver_session_id: None,
            volume: None,
        };
        session.start_connect(transport, now);
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    pub fn transport_id(&self) -> Option<&str> {
        self.transport_id.as_deref()
    }

    pub fn receiver_session_id(&self) -> Option<&str> {
        self.receiver_session_id.as_deref()
    }

    pub fn volume(&self) -> Option<f64> {
        self.volume
    }

    pub fn media_session(&self) -> Option<&MediaSession> {
        self.media.as_ref()
    }

    fn start_connect(&mut self, transport: &mut dyn CastTransport, now: Instant) {
        let connection_id = ConnectionId(self.connection_ids.next());
        info!(session = %self.id, address = %self.address, connection = %connection_id, "connecting");
        self.state = SessionState::Connecting;

        let events = TransportEvents::new(connection_id, self.events.clone());
        match transport.connect(self.address, events) {
            Ok(connection) => {
                self.connection_id = Some(connection_id);
                self.connection = Some(connection);
            }
            Err(e) => self.fail(&e.to_string(), now),
        }
    }

    pub fn handle_transport(
        &mut self,
        connection: ConnectionId,
        event: TransportEvent,
        sink: &mut dyn StatusSink,
        now: Instant,
    ) {
        if self.connection_id != Some(connection) {
            trace!(session = %self.id, %connection, "ignoring event from stale connection");
            return;
        }

        match event {
            TransportEvent::Connected => self.on_connected(now),
            TransportEvent::Message(message) => self.on_message(&message, sink, now),
            TransportEvent::Error(reason) => self.fail(&reason, now),
        }
    }

    fn on_connected(&mut self, now: Instant) {
        if self.state != SessionState::Connecting {
            return;
        }
        let Some(connection) = self.connection.as_deref_mut() else {
            return;
        };

        info!(session = %self.id, address = %self.address, "connected");
        let mut channels = PlatformChannels::open(connection);
        send_or_log(channels.connection.as_mut(), &CastRequest::Connect);
        self.heartbeat_timer.arm(now, self.config.heartbeat_interval);
        let request = CastRequest::GetStatus {
            request_id: self.request_ids.next(),
        };
        send_or_log(channels.receiver.as_mut(), &request);

        self.channels = Some(channels);
        self.state = SessionState::Connected;
    }

    fn on_message(&mut self, message: &InboundMessage, sink: &mut dyn StatusSink, now: Instant) {
        let Some(channels) = self.channels.as_mut() else {
            return;
        };

        if channels.connection.route().accepts(message) {
            if message_type(&message.payload) == Some("CLOSE") {
                self.fail("device closed the virtual connection", now);
            }
            return;
        }

        if channels.heartbeat.route().accepts(message) {
            if message_type(&message.payload) == Some("PING") {
                send_or_log(channels.heartbeat.as_mut(), &CastRequest::Pong);
            }
            return;
        }

        if channels.receiver.route().accepts(message) {
            self.handle_receiver_status(message, sink, now);
            return;
        }

        if let Some(media) = self.media.as_mut() {
            if media.handle_message(message, sink, now) {
                return;
            }
        }

        trace!(
            session = %self.id,
            source = %message.source_id,
            namespace = %message.namespace,
            "unrouted message"
        );
    }

    fn handle_receiver_status(
        &mut self,
        message: &InboundMessage,
        sink: &mut dyn StatusSink,
        now: Instant,
    ) {
        let update = match parse_receiver_status(&message.payload) {
            Ok(Some(update)) => update,
            Ok(None) => {
                trace!(session = %self.id, "receiver status without application");
                return;
            }
            Err(e) => {
                debug!(session = %self.id, error = %e, "malformed receiver status");
                return;
            }
        };

        sink.set_application(&update.application, now);

        if let Some(volume) = update.volume {
            self.volume = Some(volume);
        }

        if update.transport_id != self.transport_id {
            self.transport_id = update.transport_id;
            self.rebind_media();
        }

        self.receiver_session_id = update.session_id;
    }

    /// Opens a media session on the current routing id, then closes the
    /// previous one.
    fn rebind_media(&mut self) {
        let next = match (self.transport_id.as_deref(), self.connection.as_deref_mut()) {
            (Some(transport_id), Some(connection)) => Some(MediaSession::open(
                connection,
                &self.config.media_sender_id,
                transport_id,
                self.request_ids.clone(),
            )),
            _ => None,
        };

        if let Some(mut previous) = std::mem::replace(&mut self.media, next) {
            debug!(session = %self.id, transport_id = previous.transport_id(), "dropping media session");
            previous.close();
        }
    }

    /// Tears the connection down and schedules a reconnect.
    fn fail(&mut self, reason: &str, now: Instant) {
        warn!(
            session = %self.id,
            address = %self.address,
            reason,
            backoff = ?self.config.reconnect_backoff,
            "session lost, reconnecting"
        );
        self.teardown();
        self.reconnect_timer.arm(now, self.config.reconnect_backoff);
        self.state = SessionState::Reconnecting;
    }

    fn teardown(&mut self) {
        self.heartbeat_timer.cancel();
        if let Some(mut media) = self.media.take() {
            media.close();
        }
        if let Some(mut channels) = self.channels.take() {
            channels.close();
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.connection_id = None;
        self.transport_id = None;
    }

    /// Idempotent. Cancels a pending reconnect when called mid-backoff.
    pub fn close(&mut self) {
        match self.state {
            SessionState::Connecting | SessionState::Connected => {
                info!(session = %self.id, address = %self.address, "closing session");
                self.teardown();
            }
            SessionState::Reconnecting => {
                if self.reconnect_timer.cancel() {
                    debug!(session = %self.id, "pending reconnect cancelled");
                }
            }
            SessionState::Closed => {}
        }
        self.state = SessionState::Closed;
    }

    pub fn poll_timers(&mut self, transport: &mut dyn CastTransport, now: Instant) {
        if self.state == SessionState::Closed {
            return;
        }

        if self.heartbeat_timer.fire(now) {
            if let Some(channels) = self.channels.as_mut() {
                send_or_log(channels.heartbeat.as_mut(), &CastRequest::Ping);
                self.heartbeat_timer.arm(now, self.config.heartbeat_interval);
            }
        }

        if self.reconnect_timer.fire(now) && self.state == SessionState::Reconnecting {
            self.start_connect(transport, now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.heartbeat_timer.deadline(),
            self.reconnect_timer.deadline(),
        ])
    }

    /// Sends a receiver request built from a fresh request id. No-op while the
    /// receiver channel is not open.
    fn send_receiver(&mut self, build: impl FnOnce(u64) -> CastRequest) {
        let Some(channels) = self.channels.as_mut() else {
            debug!(session = %self.id, "receiver channel not open, ignoring command");
            return;
        };
        let request = build(self.request_ids.next());
        send_or_log(channels.receiver.as_mut(), &request);
    }

    pub fn stop_device(&mut self) {
        let Some(session_id) = self.receiver_session_id.clone() else {
            debug!(session = %self.id, "no receiver session to stop");
            return;
        };
        self.send_receiver(|request_id| CastRequest::Stop {
            request_id,
            session_id,
        });
    }

    pub fn pause_device(&mut self) {
        match self.media.as_mut() {
            Some(media) => media.pause(),
            None => debug!(session = %self.id, "no media session, ignoring pause"),
        }
    }

    pub fn play_device(&mut self) {
        match self.media.as_mut() {
            Some(media) => media.play(),
            None => debug!(session = %self.id, "no media session, ignoring play"),
        }
    }

    pub fn volume_up(&mut self) {
        self.step_volume(self.config.volume_step);
    }

    pub fn volume_down(&mut self) {
        self.step_volume(-self.config.volume_step);
    }

    fn step_volume(&mut self, delta: f64) {
        let Some(volume) = self.volume else {
            debug!(session = %self.id, "volume unknown, ignoring relative change");
            return;
        };
        self.set_volume(volume + delta);
    }

    /// Level is clamped to `[0, 1]`.
    pub fn set_volume(&mut self, level: f64) {
        self.send_receiver(|request_id| CastRequest::set_volume(request_id, level));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
