mod events;

pub mod config;
pub mod discovery;
pub mod errors;
pub mod media_session;
pub mod messages;
pub mod model;
pub mod monitor;
pub mod runtime;
pub mod session;
pub mod state;
pub mod timer;
pub mod transport;

pub use config::MonitorConfig;
pub use discovery::{DiscoveryEvent, MdnsDiscovery};
pub use errors::{CastError, Result};
pub use events::MonitorEventBus;
pub use media_session::MediaSession;
pub use model::{
    EventKind, IdSequence, Media, MonitorEvent, MonitorSnapshot, PlayState, PowerState, SessionId,
};
pub use monitor::{DeviceMonitor, MonitorCommand, MonitorInput};
pub use runtime::MonitorHandle;
pub use session::{Session, SessionState};
pub use state::{MonitorState, StatusSink};
pub use transport::{
    CastChannel, CastConnection, CastTransport, ChannelRoute, ConnectionId, InboundMessage,
    TlsTransport, TransportEvent, TransportEvents,
};
