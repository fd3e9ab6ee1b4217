//! RTP/RTCP relay: UDP endpoints and per-media fan-out.
//!
//! A pusher publishes to a pair of server-side UDP sockets (RTP, RTCP) per
//! media. Every datagram that arrives there is queued and copied to each
//! puller's client-side sockets:
//!
//! ```text
//!                    ┌──────────── RelayPair (path, video) ────────────┐
//! pusher ──RTP──▶ [server :P1] ─▶ receiver ─▶ queue ─▶ forwarder ─┬─▶ puller A :5000
//!        ──RTCP─▶ [server :P2] ─▶ receiver ─▶ queue ─▶ forwarder ─┼─▶ puller B :6000
//!                    └─────────────────────────────────────────────┴───┘
//! ```
//!
//! - [`endpoint`]: opening and tuning the UDP sockets.
//! - [`pair`]: the relay pair and its worker threads.

pub mod endpoint;
pub mod pair;

use std::fmt;
use std::time::Duration;

pub use endpoint::{Endpoint, EndpointAllocator};
pub use pair::{PullerEndpoints, RelayPair};

/// Media types a resource can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Map the media field of an SDP `m=` line.
    pub fn from_sdp(media: &str) -> Option<Self> {
        match media {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two packet classes of a media stream, each with its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Rtp,
    Rtcp,
}

impl PacketClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rtp => "rtp",
            Self::Rtcp => "rtcp",
        }
    }
}

/// An (RTP, RTCP) port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub rtp: u16,
    pub rtcp: u16,
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.rtp, self.rtcp)
    }
}

/// What a receiver does when its relay queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullPolicy {
    /// Drop the incoming packet and count it. Keeps the pusher socket
    /// drained even when a forwarder falls behind.
    #[default]
    DropNewest,
    /// Wait for the forwarder to make room.
    Block,
}

/// Tuning for relay pairs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Capacity of each per-class packet queue.
    pub queue_capacity: usize,
    pub full_policy: QueueFullPolicy,
    /// Receive timeout on pusher sockets; bounds how long a stop takes to
    /// reach the receivers.
    pub poll_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 512,
            full_policy: QueueFullPolicy::DropNewest,
            poll_interval: Duration::from_millis(100),
        }
    }
}
