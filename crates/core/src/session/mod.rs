//! Per-connection RTSP session state.
//!
//! Every TCP connection owns exactly one [`Session`]. It starts without a
//! role and becomes a pusher through ANNOUNCE or a puller through DESCRIBE:
//!
//! ```text
//! Init ──ANNOUNCE──▶ PusherAnnounced ──SETUP──▶ PusherReady ──SETUP──▶ PusherReady
//!   └───DESCRIBE──▶ PullerDescribed ──SETUP──▶ PullerReady ──SETUP──▶ PullerReady
//! ```
//!
//! The session is only touched by its connection's thread, so it needs no
//! locking. On disconnect the connection unregisters it from the
//! [`Registry`](crate::registry::Registry).

pub mod transport;

use std::collections::HashMap;

use rand::Rng;

use crate::relay::{MediaKind, PortPair};
pub use transport::{ChannelPair, TransportHeader};

/// What the client on this connection does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unknown,
    /// Publishes a stream (ANNOUNCE).
    Pusher,
    /// Subscribes to a published stream (DESCRIBE).
    Puller,
}

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    PusherAnnounced,
    PusherReady,
    PullerDescribed,
    PullerReady,
}

impl SessionState {
    pub fn role(self) -> Role {
        match self {
            Self::Init => Role::Unknown,
            Self::PusherAnnounced | Self::PusherReady => Role::Pusher,
            Self::PullerDescribed | Self::PullerReady => Role::Puller,
        }
    }
}

/// UDP ports negotiated for one media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaTransport {
    /// Ports from the client's `client_port`.
    pub client: PortPair,
    /// Ports the server bound for a pusher; `None` for pullers.
    pub server: Option<PortPair>,
}

/// State of one RTSP connection.
#[derive(Debug)]
pub struct Session {
    /// Identifier echoed in the `Session` header (16-char hex string).
    pub id: String,
    state: SessionState,
    path: Option<String>,
    interleaved: Option<ChannelPair>,
    media: HashMap<MediaKind, MediaTransport>,
}

impl Session {
    /// Create a session with a random identifier.
    pub fn new() -> Self {
        Self::with_id(&format!("{:016X}", rand::rng().random::<u64>()))
    }

    pub fn with_id(id: &str) -> Self {
        Session {
            id: id.to_string(),
            state: SessionState::Init,
            path: None,
            interleaved: None,
            media: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    /// Resource path, set once the role is known.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// ANNOUNCE succeeded: this session publishes `path`.
    pub fn announced(&mut self, path: &str) {
        self.path = Some(path.to_string());
        self.set_state(SessionState::PusherAnnounced);
    }

    /// DESCRIBE succeeded: this session subscribes to `path`.
    pub fn described(&mut self, path: &str) {
        self.path = Some(path.to_string());
        self.set_state(SessionState::PullerDescribed);
    }

    /// Record channels from an `interleaved=` SETUP.
    pub fn record_interleaved(&mut self, channels: ChannelPair) {
        tracing::debug!(
            session_id = %self.id,
            rtp = channels.rtp,
            rtcp = channels.rtcp,
            "interleaved channels recorded"
        );
        self.interleaved = Some(channels);
    }

    pub fn interleaved(&self) -> Option<ChannelPair> {
        self.interleaved
    }

    /// Record a completed UDP SETUP for `kind`.
    pub fn record_media(&mut self, kind: MediaKind, transport: MediaTransport) {
        self.media.insert(kind, transport);
        match self.state {
            SessionState::PusherAnnounced => self.set_state(SessionState::PusherReady),
            SessionState::PullerDescribed => self.set_state(SessionState::PullerReady),
            _ => {}
        }
    }

    pub fn media_transport(&self, kind: MediaKind) -> Option<MediaTransport> {
        self.media.get(&kind).copied()
    }

    fn set_state(&mut self, state: SessionState) {
        tracing::debug!(
            session_id = %self.id,
            old_state = ?self.state,
            new_state = ?state,
            "state transition"
        );
        self.state = state;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
