use thiserror::Error;

#[derive(Error, Debug)]
pub enum CastError {
    #[error("Transport Error: {0}")]
    Transport(String),
    #[error("Channel {0} is closed")]
    ChannelClosed(String),
    #[error("Frame Error: {0}")]
    Frame(String),
    #[error("Frame decoding failed: {0}")]
    FrameDecode(#[from] prost::DecodeError),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Tls Error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Discovery Error: {0}")]
    Discovery(String),
    #[error("Config Error: {0}")]
    Config(#[from] anyhow::Error),
    #[error("Device monitor is not running")]
    MonitorStopped,
}

impl CastError {
    pub fn transport(message: &str) -> Self {
        CastError::Transport(message.to_string())
    }

    pub fn channel_closed(namespace: &str) -> Self {
        CastError::ChannelClosed(namespace.to_string())
    }

    pub fn frame(message: &str) -> Self {
        CastError::Frame(message.to_string())
    }

    pub fn discovery(message: &str) -> Self {
        CastError::Discovery(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CastError>;
