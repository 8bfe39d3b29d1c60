//! JSON payloads exchanged with the device.
//!
//! Outbound requests are built from [`CastRequest`]; inbound receiver and media
//! statuses are decoded into the few fields the monitor derives state from.
//! Anything else in a payload is ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::model::Media;

pub const NS_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
pub const NS_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const NS_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
pub const NS_MEDIA: &str = "urn:x-cast:com.google.cast.media";

pub const PLATFORM_SENDER_ID: &str = "sender-0";
pub const PLATFORM_RECEIVER_ID: &str = "receiver-0";

pub const MEDIA_STATUS: &str = "MEDIA_STATUS";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum CastRequest {
    Connect,
    Close,
    Ping,
    Pong,
    GetStatus {
        request_id: u64,
    },
    Stop {
        request_id: u64,
        session_id: String,
    },
    SetVolume {
        request_id: u64,
        volume: VolumeLevel,
    },
    Pause {
        request_id: u64,
        media_session_id: i64,
    },
    Play {
        request_id: u64,
        media_session_id: i64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeLevel {
    pub level: f64,
}

impl CastRequest {
    pub fn set_volume(request_id: u64, level: f64) -> Self {
        CastRequest::SetVolume {
            request_id,
            volume: VolumeLevel {
                level: level.clamp(0.0, 1.0),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CastRequest::Connect => "CONNECT",
            CastRequest::Close => "CLOSE",
            CastRequest::Ping => "PING",
            CastRequest::Pong => "PONG",
            CastRequest::GetStatus { .. } => "GET_STATUS",
            CastRequest::Stop { .. } => "STOP",
            CastRequest::SetVolume { .. } => "SET_VOLUME",
            CastRequest::Pause { .. } => "PAUSE",
            CastRequest::Play { .. } => "PLAY",
        }
    }

    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// The `type` field of an inbound payload.
pub fn message_type(payload: &Value) -> Option<&str> {
    payload.get("type").and_then(Value::as_str)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiverStatusMessage {
    status: Option<ReceiverStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiverStatus {
    applications: Option<Vec<ApplicationStatus>>,
    volume: Option<VolumeStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationStatus {
    display_name: Option<String>,
    transport_id: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeStatus {
    level: Option<f64>,
}

/// What a receiver status tells about the foreground application.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverUpdate {
    pub application: String,
    pub transport_id: Option<String>,
    pub session_id: Option<String>,
    pub volume: Option<f64>,
}

/// Decodes a receiver-channel payload.
///
/// Returns `Ok(None)` for partial statuses: no `status`, no application list,
/// an empty list, or a first application without a display name.
pub fn parse_receiver_status(payload: &Value) -> Result<Option<ReceiverUpdate>> {
    let message = ReceiverStatusMessage::deserialize(payload)?;
    let Some(status) = message.status else {
        return Ok(None);
    };
    let Some(first) = status.applications.and_then(|apps| apps.into_iter().next()) else {
        return Ok(None);
    };
    let Some(application) = first.display_name else {
        return Ok(None);
    };

    Ok(Some(ReceiverUpdate {
        application,
        transport_id: first.transport_id,
        session_id: first.session_id,
        volume: status.volume.and_then(|v| v.level),
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaStatusMessage {
    status: Option<Vec<MediaStatusEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaStatusEntry {
    media_session_id: Option<i64>,
    player_state: Option<String>,
    media: Option<MediaInformation>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaInformation {
    metadata: Option<MediaMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaMetadata {
    artist: Option<String>,
    title: Option<String>,
}

/// What the first entry of a `MEDIA_STATUS` tells about playback.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaUpdate {
    pub media_session_id: Option<i64>,
    pub player_state: Option<String>,
    /// Present only when the entry carries `media.metadata`.
    pub media: Option<Media>,
}

/// Decodes a media-channel payload.
///
/// Returns `Ok(None)` for other message types and for statuses without entries.
pub fn parse_media_status(payload: &Value) -> Result<Option<MediaUpdate>> {
    if message_type(payload) != Some(MEDIA_STATUS) {
        return Ok(None);
    }
    let message = MediaStatusMessage::deserialize(payload)?;
    let Some(entry) = message.status.and_then(|entries| entries.into_iter().next()) else {
        return Ok(None);
    };

    let media = entry
        .media
        .and_then(|m| m.metadata)
        .map(|metadata| Media {
            artist: metadata.artist.unwrap_or_default(),
            title: metadata.title.unwrap_or_default(),
        });

    Ok(Some(MediaUpdate {
        media_session_id: entry.media_session_id,
        player_state: entry.player_state,
        media,
    }))
}
