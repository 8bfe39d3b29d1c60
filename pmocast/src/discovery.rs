//! Cast device discovery via mDNS.
//!
//! Cast receivers advertise `_googlecast._tcp.local.` with their friendly name
//! in the `fn` TXT property. The browser runs on its own thread and forwards
//! every appearance/removal to the monitor; name filtering happens there.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent};
use tracing::{debug, info, trace, warn};

use crate::errors::{CastError, Result};
use crate::monitor::MonitorInput;

pub const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

const DISCOVERY_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceAppeared {
        name: String,
        interface: Option<String>,
        address: SocketAddr,
    },
    DeviceDisappeared {
        name: String,
        interface: Option<String>,
    },
}

impl DiscoveryEvent {
    pub fn name(&self) -> &str {
        match self {
            DiscoveryEvent::DeviceAppeared { name, .. } => name,
            DiscoveryEvent::DeviceDisappeared { name, .. } => name,
        }
    }

    pub fn interface(&self) -> Option<&str> {
        match self {
            DiscoveryEvent::DeviceAppeared { interface, .. } => interface.as_deref(),
            DiscoveryEvent::DeviceDisappeared { interface, .. } => interface.as_deref(),
        }
    }
}

/// Instance part of an mDNS fullname (`Garage._googlecast._tcp.local.` -> `Garage`).
fn instance_name(fullname: &str) -> String {
    fullname
        .trim()
        .strip_suffix(CAST_SERVICE_TYPE)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(fullname)
        .trim_matches('.')
        .to_string()
}

/// Friendly name from the `fn` property, falling back to the instance name.
fn friendly_name(fn_property: Option<&str>, fullname: &str) -> String {
    fn_property
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| instance_name(fullname))
}

/// Maps resolved service fullnames to friendly names, since removals only
/// carry the fullname.
#[derive(Debug, Default)]
struct KnownServices {
    names: HashMap<String, String>,
}

impl KnownServices {
    fn resolved(&mut self, fullname: &str, name: &str) {
        self.names.insert(fullname.to_string(), name.to_string());
    }

    fn removed(&mut self, fullname: &str) -> String {
        self.names
            .remove(fullname)
            .unwrap_or_else(|| instance_name(fullname))
    }
}

/// Running mDNS browser.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MdnsDiscovery {
    /// Starts browsing, restricted to `interface` when given.
    ///
    /// Services advertised without a port are reported on `default_port`.
    pub fn start(
        interface: Option<&str>,
        default_port: u16,
        sink: Sender<MonitorInput>,
    ) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| CastError::discovery(&format!("failed to start mDNS daemon: {e}")))?;

        if let Some(name) = interface {
            daemon
                .disable_interface(IfKind::All)
                .and_then(|_| daemon.enable_interface(IfKind::Name(name.to_string())))
                .map_err(|e| {
                    CastError::discovery(&format!("failed to restrict mDNS to {name}: {e}"))
                })?;
        }

        let receiver = daemon
            .browse(CAST_SERVICE_TYPE)
            .map_err(|e| CastError::discovery(&format!("failed to browse cast services: {e}")))?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let interface = interface.map(ToString::to_string);

        let thread = thread::Builder::new()
            .name("pmocast-mdns".to_string())
            .spawn(move || {
                let mut known = KnownServices::default();
                info!(interface = ?interface, "mDNS discovery started");

                while thread_running.load(Ordering::SeqCst) {
                    let event = match receiver.recv_timeout(DISCOVERY_POLL) {
                        Ok(event) => event,
                        Err(_) if receiver.is_disconnected() => {
                            warn!("mDNS receiver disconnected, stopping discovery");
                            break;
                        }
                        Err(_) => continue,
                    };

                    let forwarded = match event {
                        ServiceEvent::ServiceResolved(service) => {
                            let fullname = service.get_fullname().to_string();
                            let name = friendly_name(service.get_property_val_str("fn"), &fullname);

                            let mut v4_addresses: Vec<_> =
                                service.get_addresses_v4().iter().copied().collect();
                            v4_addresses.sort();
                            let Some(ip) = v4_addresses.first().map(ToString::to_string) else {
                                debug!(service = %fullname, "no IPv4 address, skipping");
                                continue;
                            };
                            let port = match service.get_port() {
                                0 => default_port,
                                port => port,
                            };
                            let address = match format!("{}:{}", ip, port)
                                .parse::<SocketAddr>()
                            {
                                Ok(address) => address,
                                Err(e) => {
                                    warn!(service = %fullname, error = %e, "invalid service address");
                                    continue;
                                }
                            };

                            known.resolved(&fullname, &name);
                            debug!(%name, %address, "cast device resolved");
                            DiscoveryEvent::DeviceAppeared {
                                name,
                                interface: interface.clone(),
                                address,
                            }
                        }
                        ServiceEvent::ServiceRemoved(_, fullname) => {
                            let name = known.removed(&fullname);
                            debug!(%name, "cast device removed");
                            DiscoveryEvent::DeviceDisappeared {
                                name,
                                interface: interface.clone(),
                            }
                        }
                        other => {
                            trace!(event = ?other, "mDNS event");
                            continue;
                        }
                    };

                    if sink.send(MonitorInput::Discovery(forwarded)).is_err() {
                        break;
                    }
                }
                debug!("mDNS discovery thread exiting");
            })?;

        Ok(Self {
            daemon,
            running,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.daemon.stop_browse(CAST_SERVICE_TYPE) {
            debug!(error = %e, "failed to stop mDNS browse cleanly");
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "failed to shut mDNS daemon down");
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}
