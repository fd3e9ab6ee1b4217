//! Error types for the RTSP relay library.

use std::fmt;

use crate::protocol::StatusCode;
use crate::relay::MediaKind;

/// Errors that can occur in the RTSP relay library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`InvalidUrl`](Self::InvalidUrl),
///   [`MissingHeader`](Self::MissingHeader),
///   [`UnsupportedTransport`](Self::UnsupportedTransport),
///   [`MethodNotAllowed`](Self::MethodNotAllowed).
/// - **Transport**: [`Io`](Self::Io), socket and network failures.
/// - **Registry**: [`ResourceInUse`](Self::ResourceInUse),
///   [`ResourceNotFound`](Self::ResourceNotFound),
///   [`NotRegistered`](Self::NotRegistered),
///   [`RoleConflict`](Self::RoleConflict).
/// - **SDP**: [`Sdp`](Self::Sdp), [`UnsupportedMediaType`](Self::UnsupportedMediaType).
/// - **Relay**: [`UnknownMedia`](Self::UnknownMedia),
///   [`RelayNotReady`](Self::RelayNotReady), [`RelayExists`](Self::RelayExists),
///   [`RelayStopped`](Self::RelayStopped), [`AlreadyStopped`](Self::AlreadyStopped),
///   [`WorkerPanicked`](Self::WorkerPanicked).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
///
/// [`status`](Self::status) maps each variant to the RTSP status line sent
/// back to the client.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or frame an RTSP request (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The request URL could not be parsed.
    #[error("invalid request URL {uri:?}: {reason}")]
    InvalidUrl { uri: String, reason: String },

    /// A header the method requires was absent.
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// The `Transport` header carried neither `interleaved=` nor `client_port=`.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// The method is not handled by this server.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// ANNOUNCE on a path that already has a pusher.
    #[error("resource already published: {0}")]
    ResourceInUse(String),

    /// DESCRIBE on a path nobody has announced.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The session is not bound to the resource it operates on.
    #[error("session {session_id} is not registered on {path}")]
    NotRegistered { session_id: String, path: String },

    /// The session already holds a role incompatible with the request.
    #[error("session role conflict: {0}")]
    RoleConflict(String),

    /// The ANNOUNCE body could not be decoded as SDP.
    #[error("SDP decode error: {0}")]
    Sdp(String),

    /// The SDP declares a media type other than audio or video.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// No media of the resource matches the SETUP URL.
    #[error("no media of {path} matches {uri}")]
    UnknownMedia { path: String, uri: String },

    /// Puller SETUP before the pusher set up this media.
    #[error("no relay for {media} on {path}")]
    RelayNotReady { path: String, media: MediaKind },

    /// Pusher SETUP repeated for a media that already relays.
    #[error("relay for {media} on {path} already exists")]
    RelayExists { path: String, media: MediaKind },

    /// The relay pair was stopped and accepts no new work.
    #[error("relay for {media} on {path} is stopped")]
    RelayStopped { path: String, media: MediaKind },

    /// `stop` called on a relay pair that is already stopped.
    #[error("relay already stopped")]
    AlreadyStopped,

    /// A relay worker thread panicked before it could be joined.
    #[error("relay worker {0} panicked")]
    WorkerPanicked(String),

    /// [`Server::local_addr`](crate::Server::local_addr) or similar called before start.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    /// RTSP status reported to the client when a request fails with this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse { .. } | Self::InvalidUrl { .. } | Self::MissingHeader(_) => {
                StatusCode::BadRequest
            }
            Self::ResourceInUse(_) | Self::NotRegistered { .. } | Self::RoleConflict(_) => {
                StatusCode::Forbidden
            }
            Self::ResourceNotFound(_) => StatusCode::NotFound,
            Self::MethodNotAllowed(_) => StatusCode::MethodNotAllowed,
            Self::UnsupportedMediaType(_) => StatusCode::UnsupportedMediaType,
            Self::UnsupportedTransport(_) => StatusCode::UnsupportedTransport,
            Self::Io(_)
            | Self::Sdp(_)
            | Self::UnknownMedia { .. }
            | Self::RelayNotReady { .. }
            | Self::RelayExists { .. }
            | Self::RelayStopped { .. }
            | Self::AlreadyStopped
            | Self::WorkerPanicked(_)
            | Self::NotStarted
            | Self::AlreadyRunning => StatusCode::InternalServerError,
        }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// The version token does not start with `RTSP`.
    InvalidVersion,
    /// `Content-Length` was present but not an integer.
    InvalidContentLength,
    /// `Content-Length` exceeds the configured body limit.
    BodyTooLarge { length: usize, limit: usize },
    /// Request line and headers ran past the configured head limit.
    HeadTooLarge { limit: usize },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidVersion => write!(f, "invalid protocol version"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
            Self::BodyTooLarge { length, limit } => {
                write!(f, "body of {length} bytes exceeds limit of {limit}")
            }
            Self::HeadTooLarge { limit } => {
                write!(f, "request head exceeds limit of {limit} bytes")
            }
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
