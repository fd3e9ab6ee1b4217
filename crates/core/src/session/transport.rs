use crate::relay::PortPair;

/// Interleaved channel numbers for RTP and RTCP over the RTSP TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPair {
    pub rtp: u8,
    pub rtcp: u8,
}

/// The client's request in the RTSP `Transport` header (RFC 2326 §12.39).
///
/// Two forms are recognized, checked in this order:
///
/// ```text
/// RTP/AVP/TCP;unicast;interleaved=0-1      → Interleaved { rtp: 0, rtcp: 1 }
/// RTP/AVP;unicast;client_port=8000-8001    → ClientPort { rtp: 8000, rtcp: 8001 }
/// ```
///
/// The second number is optional; when absent RTCP uses the first plus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader {
    Interleaved(ChannelPair),
    ClientPort(PortPair),
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp_relay::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert!(matches!(th, TransportHeader::ClientPort(p) if p.rtp == 8000 && p.rtcp == 8001));
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        // An out-of-range form is skipped so the other one still gets a look.
        if let Some(channels) = find_range(header, "interleaved=").and_then(channel_pair) {
            return Some(Self::Interleaved(channels));
        }

        find_range(header, "client_port=")
            .and_then(port_pair)
            .map(Self::ClientPort)
    }
}

fn channel_pair((rtp, rtcp): (u32, Option<u32>)) -> Option<ChannelPair> {
    let rtp = u8::try_from(rtp).ok()?;
    let rtcp = match rtcp {
        Some(n) => u8::try_from(n).ok()?,
        None => rtp.checked_add(1)?,
    };
    Some(ChannelPair { rtp, rtcp })
}

fn port_pair((rtp, rtcp): (u32, Option<u32>)) -> Option<PortPair> {
    let rtp = u16::try_from(rtp).ok()?;
    let rtcp = match rtcp {
        Some(n) => u16::try_from(n).ok()?,
        None => rtp.checked_add(1)?,
    };
    Some(PortPair { rtp, rtcp })
}

/// Find `<key><digits>[-<digits>]` anywhere in the header.
fn find_range(header: &str, key: &str) -> Option<(u32, Option<u32>)> {
    header.match_indices(key).find_map(|(pos, _)| {
        let rest = &header[pos + key.len()..];
        let (first, rest) = leading_number(rest)?;
        let second = rest
            .strip_prefix('-')
            .and_then(leading_number)
            .map(|(n, _)| n);
        Some((first, second))
    })
}

fn leading_number(s: &str) -> Option<(u32, &str)> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let n = s[..end].parse().ok()?;
    Some((n, &s[end..]))
}
