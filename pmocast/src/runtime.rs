//! Threaded driver for [`DeviceMonitor`].
//!
//! One thread owns the monitor. It blocks on the input queue until either an
//! input arrives or the earliest timer deadline passes, dispatches, polls the
//! timers, and publishes a fresh [`MonitorSnapshot`].

use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::discovery::{DiscoveryEvent, MdnsDiscovery};
use crate::errors::{CastError, Result};
use crate::events::MonitorEventBus;
use crate::model::{EventKind, MonitorEvent, MonitorSnapshot};
use crate::monitor::{DeviceMonitor, MonitorCommand, MonitorInput};
use crate::transport::{CastTransport, TlsTransport};

pub struct MonitorHandle {
    tx: Sender<MonitorInput>,
    bus: MonitorEventBus,
    snapshot: Arc<RwLock<MonitorSnapshot>>,
    thread: Option<JoinHandle<()>>,
    discovery: Option<MdnsDiscovery>,
}

impl MonitorHandle {
    /// Monitors `config.device_name` over mDNS and TLS.
    pub fn spawn(config: MonitorConfig) -> Result<Self> {
        let transport = TlsTransport::new()?;
        let interface = config.interface.clone();
        let port = config.port;

        let mut handle = Self::spawn_with(config, Box::new(transport))?;
        let discovery = MdnsDiscovery::start(interface.as_deref(), port, handle.tx.clone())?;
        handle.discovery = Some(discovery);
        Ok(handle)
    }

    /// Runs the monitor on `transport` without mDNS. Discovery events are fed
    /// through [`Self::notify_discovery`].
    pub fn spawn_with(config: MonitorConfig, transport: Box<dyn CastTransport>) -> Result<Self> {
        let (tx, rx) = unbounded::<MonitorInput>();
        let monitor = DeviceMonitor::new(config, transport, tx.clone(), Instant::now());
        let bus = monitor.bus().clone();
        let snapshot = Arc::new(RwLock::new(monitor.snapshot()));

        let thread_snapshot = Arc::clone(&snapshot);
        let thread = thread::Builder::new()
            .name("pmocast-monitor".to_string())
            .spawn(move || run(monitor, rx, thread_snapshot))?;

        Ok(Self {
            tx,
            bus,
            snapshot,
            thread: Some(thread),
            discovery: None,
        })
    }

    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        self.bus.subscribe()
    }

    pub fn subscribe_kind(&self, kind: EventKind) -> Receiver<MonitorEvent> {
        self.bus.subscribe_kind(kind)
    }

    /// Latest published state.
    pub fn state(&self) -> MonitorSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn send(&self, input: MonitorInput) -> Result<()> {
        self.tx.send(input).map_err(|_| CastError::MonitorStopped)
    }

    pub fn notify_discovery(&self, event: DiscoveryEvent) -> Result<()> {
        self.send(MonitorInput::Discovery(event))
    }

    pub fn command(&self, command: MonitorCommand) -> Result<()> {
        self.send(MonitorInput::Command(command))
    }

    pub fn stop_device(&self) -> Result<()> {
        self.command(MonitorCommand::Stop)
    }

    pub fn pause_device(&self) -> Result<()> {
        self.command(MonitorCommand::Pause)
    }

    pub fn play_device(&self) -> Result<()> {
        self.command(MonitorCommand::Play)
    }

    pub fn volume_up(&self) -> Result<()> {
        self.command(MonitorCommand::VolumeUp)
    }

    pub fn volume_down(&self) -> Result<()> {
        self.command(MonitorCommand::VolumeDown)
    }

    pub fn set_volume(&self, level: f64) -> Result<()> {
        self.command(MonitorCommand::SetVolume(level))
    }

    /// Stops discovery, closes the session and joins the monitor thread.
    pub fn shutdown(&mut self) {
        if let Some(mut discovery) = self.discovery.take() {
            discovery.stop();
        }
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(MonitorInput::Shutdown);
            if thread.join().is_err() {
                debug!("monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut monitor: DeviceMonitor,
    rx: Receiver<MonitorInput>,
    snapshot: Arc<RwLock<MonitorSnapshot>>,
) {
    loop {
        let input = match monitor.next_deadline() {
            Some(deadline) => {
                match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(input) => Some(input),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(input) => Some(input),
                Err(_) => break,
            },
        };

        let now = Instant::now();
        if let Some(input) = input {
            if !monitor.handle_input(input, now) {
                break;
            }
        }
        monitor.poll_timers(now);

        *snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = monitor.snapshot();
    }

    monitor.close();
    *snapshot
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = monitor.snapshot();
    info!(device = %monitor.config().device_name, "device monitor stopped");
}
