use std::fmt;
use std::io::{BufRead, Read};

use url::Url;

use crate::error::{ParseErrorKind, Result, RtspError};

/// RTSP methods this server dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Announce,
    Describe,
    Setup,
    /// Any other token; answered with `405 Method Not Allowed`.
    Other(String),
}

impl Method {
    pub fn parse(token: &str) -> Self {
        match token {
            "OPTIONS" => Self::Options,
            "ANNOUNCE" => Self::Announce,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Announce => "ANNOUNCE",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body of Content-Length bytes]
/// ```
///
/// Header lookup is case-insensitive; when a header repeats, the last
/// value wins.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: Method,
    /// Request-URI (e.g. `rtsp://host:port/live/stream1/trackID=0`).
    pub uri: String,
    /// Protocol version, always prefixed `RTSP`.
    pub version: String,
    /// Headers as ordered (name, value) pairs, names stored as received.
    pub headers: Vec<(String, String)>,
    /// Raw body (ANNOUNCE carries SDP here).
    pub body: Vec<u8>,
}

impl RtspRequest {
    /// Parse the request line and headers of a request head.
    ///
    /// The body is attached separately by the reader; see [`read_frame`].
    pub fn parse(head: &str) -> Result<Self> {
        let mut lines = head.lines();

        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        if !parts[2].starts_with("RTSP") {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidVersion,
            });
        }

        Ok(RtspRequest {
            method: Method::parse(parts[0]),
            uri: parts[1].to_string(),
            version: parts[2].to_string(),
            headers: parse_headers(lines),
            body: Vec::new(),
        })
    }

    /// Look up a header value by name (case-insensitive, last value wins).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the CSeq header value (RFC 2326 §12.17).
    ///
    /// Every RTSP request must include a CSeq, and the response must echo it.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Resource path addressed by the request URL.
    pub fn resource_path(&self) -> Result<String> {
        resource_path(&self.uri)
    }
}

/// A request head and its body as read off the wire, before parsing.
#[derive(Debug)]
pub struct RequestFrame {
    pub head: String,
    pub body: Vec<u8>,
}

impl RequestFrame {
    /// Parse the frame into a request, attaching the body.
    pub fn into_request(self) -> Result<RtspRequest> {
        let mut request = RtspRequest::parse(&self.head)?;
        request.body = self.body;
        Ok(request)
    }

    /// Header lookup on an unparsed frame, used to answer requests whose
    /// request line is malformed.
    pub fn header(&self, name: &str) -> Option<String> {
        let headers = parse_headers(self.head.lines().skip(1));
        find_header(&headers, name).map(str::to_string)
    }
}

/// Read one request frame from the stream.
///
/// Reads lines until an empty line ends the header block, then reads
/// exactly `Content-Length` bytes of body when that header is a positive
/// integer. Blank lines before a request are skipped. Returns `Ok(None)` on
/// a clean EOF between requests.
///
/// Every error is fatal for the connection: I/O failures, EOF inside a
/// request, a head longer than `max_head` bytes, an unparsable
/// `Content-Length`, or one larger than `max_body`.
pub fn read_frame<R: BufRead>(
    reader: &mut R,
    max_head: usize,
    max_body: usize,
) -> Result<Option<RequestFrame>> {
    let mut head = String::new();

    loop {
        // One byte past the limit is enough to tell an overflow apart.
        let budget = max_head.saturating_sub(head.len()).saturating_add(1);
        let mut line = String::new();
        let read = reader
            .by_ref()
            .take(u64::try_from(budget).unwrap_or(u64::MAX))
            .read_line(&mut line)?;
        if read == 0 {
            if head.is_empty() {
                return Ok(None);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        if line == "\r\n" || line == "\n" {
            if head.is_empty() {
                continue;
            }
            break;
        }
        head.push_str(&line);
        if head.len() > max_head {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::HeadTooLarge { limit: max_head },
            });
        }
    }

    let headers = parse_headers(head.lines().skip(1));
    let body = match content_length(&headers)? {
        Some(length) if length > max_body => {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::BodyTooLarge {
                    length,
                    limit: max_body,
                },
            });
        }
        Some(length) => {
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body)?;
            body
        }
        None => Vec::new(),
    };

    Ok(Some(RequestFrame { head, body }))
}

/// Extract the resource path from a request URL.
///
/// Accepts absolute URLs (`rtsp://host:8554/live/stream1` → `/live/stream1`)
/// and bare paths (`/live/stream1`). An empty path becomes `/`.
pub fn resource_path(uri: &str) -> Result<String> {
    let parsed = if uri.starts_with('/') {
        Url::parse("rtsp://localhost").and_then(|base| base.join(uri))
    } else {
        Url::parse(uri)
    };

    let url = parsed.map_err(|e| RtspError::InvalidUrl {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;

    match url.path() {
        "" => Ok("/".to_string()),
        path => Ok(path.to_string()),
    }
}

/// Split header lines on the first `": "`; lines without it are ignored.
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<(String, String)> {
    lines
        .map(str::trim)
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(": "))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// `Some(n)` for a positive `Content-Length`, `None` when absent or not positive.
fn content_length(headers: &[(String, String)]) -> Result<Option<usize>> {
    let Some(raw) = find_header(headers, "Content-Length") else {
        return Ok(None);
    };
    let length: i64 = raw.parse().map_err(|_| RtspError::Parse {
        kind: ParseErrorKind::InvalidContentLength,
    })?;
    if length <= 0 {
        return Ok(None);
    }
    usize::try_from(length)
        .map(Some)
        .map_err(|_| RtspError::Parse {
            kind: ParseErrorKind::InvalidContentLength,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Options);
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/test/trackID=0 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, Method::Setup);
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_unknown_method() {
        let req = RtspRequest::parse("RECORD rtsp://h/x RTSP/1.0\r\nCSeq: 9\r\n").unwrap();
        assert_eq!(req.method, Method::Other("RECORD".to_string()));
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse("").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
        assert!(RtspRequest::parse("GET / HTTP/1.1\r\n\r\n").is_err());
        assert!(RtspRequest::parse("GET / RTSP/1.0 extra\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive_last_wins() {
        let raw = "OPTIONS * RTSP/1.0\r\ncseq: 42\r\nCSeq: 43\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSEQ"), Some("43"));
    }

    #[test]
    fn header_without_separator_is_ignored() {
        let raw = "OPTIONS * RTSP/1.0\r\nCSeq: 1\r\ngarbage\r\nX-Empty:\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn read_frame_with_body() {
        let wire = b"ANNOUNCE rtsp://h/live RTSP/1.0\r\n\
                     CSeq: 1\r\nContent-Length: 5\r\n\r\nv=0\r\nOPTIONS";
        let mut reader = Cursor::new(&wire[..]);
        let frame = read_frame(&mut reader, 8192, 1024).unwrap().unwrap();
        assert_eq!(frame.body, b"v=0\r\n");
        let req = frame.into_request().unwrap();
        assert_eq!(req.method, Method::Announce);
        assert_eq!(req.body, b"v=0\r\n");
    }

    #[test]
    fn read_frame_skips_leading_blank_lines_and_detects_eof() {
        let wire = b"\r\n\r\nOPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let mut reader = Cursor::new(&wire[..]);
        assert!(read_frame(&mut reader, 8192, 0).unwrap().is_some());
        assert!(read_frame(&mut reader, 8192, 0).unwrap().is_none());
    }

    #[test]
    fn read_frame_short_body_is_fatal() {
        let wire = b"ANNOUNCE rtsp://h/live RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 50\r\n\r\nv=0";
        let mut reader = Cursor::new(&wire[..]);
        assert!(matches!(read_frame(&mut reader, 8192, 1024), Err(RtspError::Io(_))));
    }

    #[test]
    fn read_frame_bad_content_length_is_fatal() {
        let wire = b"ANNOUNCE rtsp://h/live RTSP/1.0\r\nCSeq: 1\r\nContent-Length: abc\r\n\r\n";
        let mut reader = Cursor::new(&wire[..]);
        assert!(matches!(
            read_frame(&mut reader, 8192, 1024),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidContentLength
            })
        ));
    }

    #[test]
    fn read_frame_enforces_body_limit() {
        let wire = b"ANNOUNCE rtsp://h/live RTSP/1.0\r\nCSeq: 1\r\nContent-Length: 4096\r\n\r\n";
        let mut reader = Cursor::new(&wire[..]);
        assert!(matches!(
            read_frame(&mut reader, 8192, 1024),
            Err(RtspError::Parse {
                kind: ParseErrorKind::BodyTooLarge { .. }
            })
        ));
    }

    #[test]
    fn read_frame_enforces_head_limit() {
        // A single line with no terminator never gets buffered in full.
        let long_line = vec![b'A'; 64 * 1024];
        let mut reader = Cursor::new(&long_line[..]);
        assert!(matches!(
            read_frame(&mut reader, 256, 1024),
            Err(RtspError::Parse {
                kind: ParseErrorKind::HeadTooLarge { limit: 256 }
            })
        ));
        assert!(reader.position() <= 257);

        let mut many = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n".to_vec();
        for _ in 0..100 {
            many.extend_from_slice(b"X-Filler: 0123456789\r\n");
        }
        many.extend_from_slice(b"\r\n");
        let mut reader = Cursor::new(&many[..]);
        assert!(matches!(
            read_frame(&mut reader, 256, 1024),
            Err(RtspError::Parse {
                kind: ParseErrorKind::HeadTooLarge { .. }
            })
        ));

        // The same request fits under a roomier limit.
        let mut reader = Cursor::new(&many[..]);
        assert!(read_frame(&mut reader, 8192, 1024).unwrap().is_some());
    }

    #[test]
    fn frame_header_lookup_survives_bad_request_line() {
        let wire = b"BROKEN\r\nCSeq: 7\r\n\r\n";
        let mut reader = Cursor::new(&wire[..]);
        let frame = read_frame(&mut reader, 8192, 0).unwrap().unwrap();
        assert_eq!(frame.header("cseq").as_deref(), Some("7"));
        assert!(frame.into_request().is_err());
    }

    #[test]
    fn resource_path_forms() {
        assert_eq!(
            resource_path("rtsp://127.0.0.1:8554/live/stream1").unwrap(),
            "/live/stream1"
        );
        assert_eq!(resource_path("/live/stream1").unwrap(), "/live/stream1");
        assert_eq!(resource_path("rtsp://127.0.0.1:8554").unwrap(), "/");
        assert!(resource_path("not a url").is_err());
    }
}
