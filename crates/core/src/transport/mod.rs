//! Network transport for RTSP signaling.
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling. One TCP
//!   connection per client, with a thread per connection.
//!
//! Media never passes through here: RTP and RTCP travel over the UDP
//! endpoints of [`crate::relay`].

pub mod tcp;
