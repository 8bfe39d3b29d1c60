use std::time::Instant;

use tracing::{debug, info, trace};

use crate::messages::{
    CastRequest, NS_CONNECTION, NS_MEDIA, message_type, parse_media_status,
};
use crate::model::IdSequence;
use crate::state::StatusSink;
use crate::transport::{CastChannel, CastConnection, ChannelRoute, InboundMessage, send_or_log};

/// Channels scoped to the application currently running on the device.
///
/// Bound to one transport-routing id. When the device reports another id, the
/// owning session opens a new `MediaSession` and closes this one.
pub struct MediaSession {
    transport_id: String,
    connection: Box<dyn CastChannel>,
    media: Box<dyn CastChannel>,
    media_session_id: Option<i64>,
    request_ids: IdSequence,
    open: bool,
}

impl MediaSession {
    /// Opens the application channels, sends `CONNECT` and asks for the
    /// media status.
    pub fn open(
        connection: &mut dyn CastConnection,
        sender_id: &str,
        transport_id: &str,
        request_ids: IdSequence,
    ) -> Self {
        info!(transport_id, "binding media session");
        let mut session = Self {
            transport_id: transport_id.to_string(),
            connection: connection.open_channel(ChannelRoute::new(
                sender_id,
                transport_id,
                NS_CONNECTION,
            )),
            media: connection.open_channel(ChannelRoute::new(sender_id, transport_id, NS_MEDIA)),
            media_session_id: None,
            request_ids,
            open: true,
        };

        send_or_log(session.connection.as_mut(), &CastRequest::Connect);
        let request = CastRequest::GetStatus {
            request_id: session.request_ids.next(),
        };
        send_or_log(session.media.as_mut(), &request);
        session
    }

    pub fn transport_id(&self) -> &str {
        &self.transport_id
    }

    pub fn media_session_id(&self) -> Option<i64> {
        self.media_session_id
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Handles `message` if it is addressed to one of our channels.
    /// Returns false if the message belongs elsewhere.
    pub fn handle_message(
        &mut self,
        message: &InboundMessage,
        sink: &mut dyn StatusSink,
        now: Instant,
    ) -> bool {
        if !self.open {
            return false;
        }

        if self.connection.route().accepts(message) {
            if message_type(&message.payload) == Some("CLOSE") {
                debug!(transport_id = %self.transport_id, "application closed the connection");
                self.close();
            }
            return true;
        }

        if self.media.route().accepts(message) {
            self.handle_media_status(message, sink, now);
            return true;
        }

        false
    }

    fn handle_media_status(
        &mut self,
        message: &InboundMessage,
        sink: &mut dyn StatusSink,
        now: Instant,
    ) {
        let update = match parse_media_status(&message.payload) {
            Ok(Some(update)) => update,
            Ok(None) => {
                trace!(payload = %message.payload, "ignoring media message");
                return;
            }
            Err(e) => {
                debug!(error = %e, "malformed media status");
                return;
            }
        };

        if let Some(id) = update.media_session_id {
            self.media_session_id = Some(id);
        }
        if let Some(player_state) = update.player_state.as_deref() {
            sink.set_play_state(player_state, now);
        }
        if let Some(media) = update.media {
            sink.set_media(media);
        }
    }

    pub fn pause(&mut self) {
        self.send_playback(|request_id, media_session_id| CastRequest::Pause {
            request_id,
            media_session_id,
        });
    }

    pub fn play(&mut self) {
        self.send_playback(|request_id, media_session_id| CastRequest::Play {
            request_id,
            media_session_id,
        });
    }

    fn send_playback(&mut self, build: impl FnOnce(u64, i64) -> CastRequest) {
        if !self.open {
            debug!(transport_id = %self.transport_id, "media channels closed, ignoring command");
            return;
        }
        let Some(media_session_id) = self.media_session_id else {
            debug!(transport_id = %self.transport_id, "no media session yet, ignoring command");
            return;
        };
        let request = build(self.request_ids.next(), media_session_id);
        send_or_log(self.media.as_mut(), &request);
    }

    pub fn close(&mut self) {
        if self.open {
            self.open = false;
            self.connection.close();
            self.media.close();
        }
    }
}
