//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol: framing and
//! parsing requests, building responses, routing methods, and reducing
//! announced SDP to what the relay needs.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! ANNOUNCE rtsp://server/live/stream1 RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Content-Type: application/sdp\r\n
//! Content-Length: 142\r\n
//! \r\n
//! v=0\r\n...
//! ```
//!
//! ## Supported methods
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | ANNOUNCE | §10.3 | Publish a stream (pusher) |
//! | DESCRIBE | §10.2 | Fetch the announced SDP (puller) |
//! | SETUP | §10.4 | Negotiate UDP ports or interleaved channels |
//!
//! Anything else is answered with `405 Method Not Allowed`.

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use handler::MethodHandler;
pub use request::{Method, RequestFrame, RtspRequest, read_frame};
pub use response::{RtspResponse, StatusCode};
