//! The device monitor facade.
//!
//! [`DeviceMonitor`] is a single-threaded state machine: it never blocks and
//! never spawns. Every entry point takes the current instant, so the caller
//! decides what "now" is. [`crate::runtime`] drives it from a dedicated thread
//! with the wall clock; tests drive it with a virtual one.

use std::net::SocketAddr;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::discovery::DiscoveryEvent;
use crate::events::MonitorEventBus;
use crate::model::{
    EventKind, IdSequence, Media, MonitorEvent, MonitorSnapshot, PlayState, PowerState, SessionId,
};
use crate::session::{Session, SessionState};
use crate::state::MonitorState;
use crate::timer::earliest;
use crate::transport::{CastTransport, ConnectionId, TransportEvent};

/// Caller commands.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitorCommand {
    Stop,
    Pause,
    Play,
    VolumeUp,
    VolumeDown,
    SetVolume(f64),
}

/// Everything that can wake the monitor up, multiplexed on one queue.
#[derive(Debug)]
pub enum MonitorInput {
    Discovery(DiscoveryEvent),
    Transport {
        connection: ConnectionId,
        event: TransportEvent,
    },
    Command(MonitorCommand),
    Shutdown,
}

pub struct DeviceMonitor {
    config: MonitorConfig,
    state: MonitorState,
    session: Option<Session>,
    address: Option<SocketAddr>,
    transport: Box<dyn CastTransport>,
    events: Sender<MonitorInput>,
    bus: MonitorEventBus,
    request_ids: IdSequence,
    session_ids: IdSequence,
    connection_ids: IdSequence,
}

impl DeviceMonitor {
    /// Creates the monitor. Transport events are posted to `events`; whoever
    /// drains that queue must feed them back through [`Self::handle_input`].
    pub fn new(
        config: MonitorConfig,
        transport: Box<dyn CastTransport>,
        events: Sender<MonitorInput>,
        now: Instant,
    ) -> Self {
        let bus = MonitorEventBus::new();
        info!(device = %config.device_name, interface = ?config.interface, "starting device monitor");
        Self {
            state: MonitorState::new(&config, bus.clone(), now),
            config,
            session: None,
            address: None,
            transport,
            events,
            bus,
            request_ids: IdSequence::new(),
            session_ids: IdSequence::new(),
            connection_ids: IdSequence::new(),
        }
    }

    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_kind(&self, kind: EventKind) -> Receiver<MonitorEvent> {
        self.bus.subscribe_kind(kind)
    }

    pub fn bus(&self) -> &MonitorEventBus {
        &self.bus
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn power_state(&self) -> Option<PowerState> {
        self.state.power_state()
    }

    pub fn play_state(&self) -> PlayState {
        self.state.play_state()
    }

    pub fn application(&self) -> Option<&str> {
        self.state.application()
    }

    pub fn media(&self) -> &Media {
        self.state.media()
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(Session::state)
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            power_state: self.state.power_state(),
            play_state: self.state.play_state(),
            application: self.state.application().map(ToString::to_string),
            media: self.state.media().clone(),
            address: self.address,
            session_attached: self.session.is_some(),
        }
    }

    /// Dispatches one queued input. Returns false on [`MonitorInput::Shutdown`].
    pub fn handle_input(&mut self, input: MonitorInput, now: Instant) -> bool {
        match input {
            MonitorInput::Discovery(event) => self.handle_discovery(event, now),
            MonitorInput::Transport { connection, event } => {
                self.handle_transport(connection, event, now)
            }
            MonitorInput::Command(command) => self.handle_command(command),
            MonitorInput::Shutdown => {
                self.close();
                return false;
            }
        }
        true
    }

    fn matches(&self, name: &str, interface: Option<&str>) -> bool {
        if name != self.config.device_name {
            return false;
        }
        match self.config.interface.as_deref() {
            Some(wanted) => interface == Some(wanted),
            None => true,
        }
    }

    pub fn handle_discovery(&mut self, event: DiscoveryEvent, now: Instant) {
        if !self.matches(event.name(), event.interface()) {
            return;
        }

        match event {
            DiscoveryEvent::DeviceAppeared { address, .. } => {
                if self.address == Some(address) {
                    debug!(%address, "device re-announced at the same address");
                    return;
                }
                info!(device = %self.config.device_name, %address, "device appeared");
                self.address = Some(address);
                self.replace_session(address, now);
            }
            DiscoveryEvent::DeviceDisappeared { .. } => {
                info!(device = %self.config.device_name, "device disappeared");
                self.address = None;
                if let Some(mut session) = self.session.take() {
                    session.close();
                }
            }
        }
    }

    /// Closes the current session, then starts one on `address`.
    fn replace_session(&mut self, address: SocketAddr, now: Instant) {
        if let Some(mut previous) = self.session.take() {
            debug!(session = %previous.id(), "replacing session");
            previous.close();
        }

        let id = SessionId(self.session_ids.next());
        self.session = Some(Session::connect(
            id,
            address,
            self.config.clone(),
            self.transport.as_mut(),
            self.request_ids.clone(),
            self.connection_ids.clone(),
            self.events.clone(),
            now,
        ));
    }

    pub fn handle_transport(&mut self, connection: ConnectionId, event: TransportEvent, now: Instant) {
        match self.session.as_mut() {
            Some(session) => session.handle_transport(connection, event, &mut self.state, now),
            None => debug!(%connection, "transport event without session"),
        }
    }

    pub fn handle_command(&mut self, command: MonitorCommand) {
        match command {
            MonitorCommand::Stop => self.stop_device(),
            MonitorCommand::Pause => self.pause_device(),
            MonitorCommand::Play => self.play_device(),
            MonitorCommand::VolumeUp => self.volume_up(),
            MonitorCommand::VolumeDown => self.volume_down(),
            MonitorCommand::SetVolume(level) => self.set_volume(level),
        }
    }

    pub fn poll_timers(&mut self, now: Instant) {
        self.state.poll_timers(now);
        if let Some(session) = self.session.as_mut() {
            session.poll_timers(self.transport.as_mut(), now);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        earliest([
            self.state.next_deadline(),
            self.session.as_ref().and_then(Session::next_deadline),
        ])
    }

    fn with_session(&mut self, command: &str, f: impl FnOnce(&mut Session)) {
        match self.session.as_mut() {
            Some(session) => f(session),
            None => debug!(command, "no session, ignoring command"),
        }
    }

    pub fn stop_device(&mut self) {
        self.with_session("stop", Session::stop_device);
    }

    /// Only while playing.
    pub fn pause_device(&mut self) {
        if self.state.play_state() != PlayState::Play {
            debug!("already paused, ignoring pause");
            return;
        }
        self.with_session("pause", Session::pause_device);
    }

    /// Only while paused.
    pub fn play_device(&mut self) {
        if self.state.play_state() != PlayState::Pause {
            debug!("already playing, ignoring play");
            return;
        }
        self.with_session("play", Session::play_device);
    }

    pub fn volume_up(&mut self) {
        self.with_session("volume up", Session::volume_up);
    }

    pub fn volume_down(&mut self) {
        self.with_session("volume down", Session::volume_down);
    }

    pub fn set_volume(&mut self, level: f64) {
        self.with_session("set volume", |session| session.set_volume(level));
    }

    /// Closes the session. Timers keep running until the monitor is dropped.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}
