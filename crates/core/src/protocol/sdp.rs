//! SDP (Session Description Protocol) handling for ANNOUNCE bodies.
//!
//! The decoding itself is delegated to `sdp-types`; this module reduces the
//! decoded session to what the relay needs: one entry per `m=` line with
//! its media type and `a=control` attribute.
//!
//! ```text
//! m=video 0 RTP/AVP 96          ← media type: video
//! a=rtpmap:96 H264/90000
//! a=control:trackID=0           ← control attribute, matched against SETUP URLs
//! m=audio 0 RTP/AVP 97
//! a=control:trackID=1
//! ```
//!
//! The raw body is kept verbatim by the registry and served back to
//! pullers in DESCRIBE responses; nothing here re-serializes SDP.

use crate::error::{Result, RtspError};
use crate::relay::MediaKind;

/// One `m=` section reduced to its type and control attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub kind: MediaKind,
    /// Value of `a=control`, empty when the media has none.
    pub control: String,
}

/// The media list of an announced stream.
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    pub medias: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Decode an ANNOUNCE body.
    ///
    /// Fails with [`RtspError::Sdp`] when the body is not valid SDP and with
    /// [`RtspError::UnsupportedMediaType`] when a media is neither audio nor
    /// video.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let session =
            sdp_types::Session::parse(body).map_err(|e| RtspError::Sdp(e.to_string()))?;

        let mut medias = Vec::with_capacity(session.medias.len());
        for media in &session.medias {
            let kind = MediaKind::from_sdp(&media.media)
                .ok_or_else(|| RtspError::UnsupportedMediaType(media.media.clone()))?;
            let control = media
                .attributes
                .iter()
                .find(|attr| attr.attribute == "control")
                .and_then(|attr| attr.value.clone())
                .unwrap_or_default();

            tracing::debug!(media = %kind, control, "SDP media");
            medias.push(MediaDescription { kind, control });
        }

        Ok(Self { medias })
    }

    /// Control attribute of the given media type. The last `m=` line of a
    /// type wins when a type repeats.
    pub fn control(&self, kind: MediaKind) -> Option<&str> {
        self.medias
            .iter()
            .rev()
            .find(|m| m.kind == kind)
            .map(|m| m.control.as_str())
    }

    pub fn has(&self, kind: MediaKind) -> bool {
        self.medias.iter().any(|m| m.kind == kind)
    }

    /// Decide which media a SETUP URL targets.
    ///
    /// A media matches when its control attribute is non-empty and occurs
    /// in the URL. When audio and video both match, the longer control wins.
    /// A stream with a single media and no `a=control` applies to the
    /// aggregate URL (RFC 2326 §C.1.1), so that media is the target of any
    /// SETUP.
    pub fn resolve(&self, uri: &str) -> Option<MediaKind> {
        match self.medias.as_slice() {
            [only] if only.control.is_empty() => Some(only.kind),
            _ => [MediaKind::Video, MediaKind::Audio]
                .into_iter()
                .filter_map(|kind| self.control(kind).map(|control| (kind, control)))
                .filter(|(_, control)| !control.is_empty() && uri.contains(control))
                .max_by_key(|(_, control)| control.len())
                .map(|(kind, _)| kind),
        }
    }
}
