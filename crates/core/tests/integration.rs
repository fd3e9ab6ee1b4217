//! Integration tests: a pusher publishes with ANNOUNCE → SETUP, a puller
//! subscribes with DESCRIBE → SETUP, and RTP datagrams flow between them.
//!
//! Each test starts its own server on `127.0.0.1:0` and talks to it over
//! plain TCP and UDP sockets.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use rtsp_relay::Server;

const SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=Stream\r\n\
c=IN IP4 127.0.0.1\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=control:trackID=0\r\n\
m=audio 0 RTP/AVP 97\r\n\
a=rtpmap:97 MPEG4-GENERIC/44100/2\r\n\
a=control:trackID=1\r\n";

struct Response {
    status_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn server_ports(&self) -> (u16, u16) {
        let transport = self.header("Transport").expect("Transport header");
        let ports = transport
            .split(';')
            .find_map(|p| p.strip_prefix("server_port="))
            .expect("server_port in Transport");
        let (rtp, rtcp) = ports.split_once('-').expect("server_port range");
        (rtp.parse().unwrap(), rtcp.parse().unwrap())
    }
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    cseq: u32,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream =
            TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect to server");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
            .set_write_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        Client {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
            cseq: 0,
        }
    }

    fn request(
        &mut self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Response {
        self.cseq += 1;
        let mut head = format!("{method} {uri} RTSP/1.0\r\nCSeq: {}\r\n", self.cseq);
        for (name, value) in headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        self.writer.write_all(head.as_bytes()).unwrap();
        self.writer.write_all(body).unwrap();
        self.writer.flush().unwrap();

        let response = self.read_response();
        assert_eq!(
            response.header("CSeq"),
            Some(self.cseq.to_string().as_str()),
            "{method}: CSeq not echoed"
        );
        response
    }

    fn read_response(&mut self) -> Response {
        let mut status_line = String::new();
        self.reader.read_line(&mut status_line).unwrap();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).unwrap() == 0 {
                break;
            }
            if line == "\r\n" || line == "\n" {
                break;
            }
            if let Some((k, v)) = line.trim_end().split_once(": ") {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        let mut response = Response {
            status_line: status_line.trim_end().to_string(),
            headers,
            body: Vec::new(),
        };
        if let Some(len) = response
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            let mut body = vec![0u8; len];
            self.reader.read_exact(&mut body).unwrap();
            response.body = body;
        }
        response
    }

    fn announce(&mut self, base: &str) -> Response {
        self.request(
            "ANNOUNCE",
            base,
            &[("Content-Type", "application/sdp")],
            SDP.as_bytes(),
        )
    }
}

fn start_server() -> (Server, SocketAddr) {
    let mut server = Server::new("127.0.0.1:0");
    server.start().expect("server start");
    let addr = server.local_addr().unwrap();
    (server, addr)
}

fn base_uri(addr: SocketAddr, path: &str) -> String {
    format!("rtsp://{addr}{path}")
}

#[test]
fn options_and_unknown_methods() {
    let (mut server, addr) = start_server();
    let mut client = Client::connect(addr);

    let resp = client.request("OPTIONS", "*", &[], b"");
    assert_eq!(resp.status_line, "RTSP/1.0 200 OK");
    assert_eq!(resp.headers[0].0, "CSeq");
    assert_eq!(resp.headers[1].0, "Session");
    assert_eq!(resp.header("Public"), Some("OPTIONS, ANNOUNCE, DESCRIBE, SETUP"));
    let session = resp.header("Session").unwrap().to_string();
    assert_eq!(session.len(), 16);

    let resp = client.request("PLAY", &base_uri(addr, "/live"), &[], b"");
    assert_eq!(resp.status_line, "RTSP/1.0 405 Method Not Allowed");
    // Same session for the whole connection.
    assert_eq!(resp.header("Session"), Some(session.as_str()));

    server.stop();
}

#[test]
fn publish_describe_setup_and_relay() {
    let (mut server, addr) = start_server();
    let base = base_uri(addr, "/live/stream1");

    // ANNOUNCE once per path.
    let mut pusher = Client::connect(addr);
    let resp = pusher.announce(&base);
    assert_eq!(resp.status_line, "RTSP/1.0 200 OK");

    let mut rival = Client::connect(addr);
    let resp = rival.announce(&base);
    assert_eq!(resp.status_line, "RTSP/1.0 403 Forbidden");

    // Pusher SETUP for video binds two distinct server ports.
    let transport = "RTP/AVP;unicast;client_port=5000-5001";
    let resp = pusher.request(
        "SETUP",
        &format!("{base}/trackID=0"),
        &[("Transport", transport)],
        b"",
    );
    assert_eq!(resp.status_line, "RTSP/1.0 200 OK");
    assert!(resp
        .header("Transport")
        .unwrap()
        .starts_with(&format!("{transport};server_port=")));
    let (server_rtp, server_rtcp) = resp.server_ports();
    assert_ne!(server_rtp, server_rtcp);
    assert_ne!(server_rtp, 0);

    // DESCRIBE returns the announced SDP verbatim.
    let mut puller = Client::connect(addr);
    let resp = puller.request("DESCRIBE", &base, &[("Accept", "application/sdp")], b"");
    assert_eq!(resp.status_line, "RTSP/1.0 200 OK");
    assert_eq!(resp.header("Content-Type"), Some("application/sdp"));
    assert_eq!(
        resp.header("Content-Length"),
        Some(SDP.len().to_string().as_str())
    );
    assert_eq!(resp.body, SDP.as_bytes());

    // Puller SETUP, then a datagram reaches it unmodified.
    let sink_rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let sink_rtcp = UdpSocket::bind("127.0.0.1:0").unwrap();
    sink_rtp
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    sink_rtcp
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let transport = format!(
        "RTP/AVP;unicast;client_port={}-{}",
        sink_rtp.local_addr().unwrap().port(),
        sink_rtcp.local_addr().unwrap().port()
    );
    let resp = puller.request(
        "SETUP",
        &format!("{base}/trackID=0"),
        &[("Transport", transport.as_str())],
        b"",
    );
    assert_eq!(resp.status_line, "RTSP/1.0 200 OK");
    assert_eq!(resp.header("Transport"), Some(transport.as_str()));

    let source = UdpSocket::bind("127.0.0.1:0").unwrap();
    let packet: [u8; 12] = [0x80, 0x60, 0x00, 0x01, 0, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef];
    source.send_to(&packet, ("127.0.0.1", server_rtp)).unwrap();

    let mut buf = [0u8; 1500];
    let n = sink_rtp.recv(&mut buf).expect("RTP datagram relayed");
    assert_eq!(&buf[..n], &packet);

    source.send_to(b"rtcp", ("127.0.0.1", server_rtcp)).unwrap();
    let n = sink_rtcp.recv(&mut buf).expect("RTCP datagram relayed");
    assert_eq!(&buf[..n], b"rtcp");

    // The path frees up once the pusher disconnects.
    drop(pusher);
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut successor = Client::connect(addr);
    loop {
        let resp = successor.announce(&base);
        if resp.status_line == "RTSP/1.0 200 OK" {
            break;
        }
        assert_eq!(resp.status_line, "RTSP/1.0 403 Forbidden");
        assert!(Instant::now() < deadline, "path still taken after pusher left");
        thread::sleep(Duration::from_millis(50));
    }

    server.stop();
}

#[test]
fn setup_errors() {
    let (mut server, addr) = start_server();
    let base = base_uri(addr, "/live/errors");
    let mut client = Client::connect(addr);

    // Neither interleaved= nor client_port=.
    let resp = client.request(
        "SETUP",
        &format!("{base}/trackID=0"),
        &[("Transport", "RTP/AVP;multicast")],
        b"",
    );
    assert_eq!(resp.status_line, "RTSP/1.0 461 Unsupported Transport");

    // No Transport at all.
    let resp = client.request("SETUP", &format!("{base}/trackID=0"), &[], b"");
    assert_eq!(resp.status_line, "RTSP/1.0 400 Bad Request");

    // Interleaved is recorded and echoed, no role needed.
    let resp = client.request(
        "SETUP",
        &format!("{base}/trackID=0"),
        &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")],
        b"",
    );
    assert_eq!(resp.status_line, "RTSP/1.0 200 OK");
    assert_eq!(
        resp.header("Transport"),
        Some("RTP/AVP/TCP;unicast;interleaved=0-1")
    );

    // DESCRIBE of a path nobody published.
    let resp = client.request("DESCRIBE", &base, &[], b"");
    assert_eq!(resp.status_line, "RTSP/1.0 404 Not Found");

    server.stop();
}

#[test]
fn malformed_request_line_keeps_connection() {
    let (mut server, addr) = start_server();
    let mut client = Client::connect(addr);

    client
        .writer
        .write_all(b"GARBAGE\r\nCSeq: 9\r\n\r\n")
        .unwrap();
    let resp = client.read_response();
    assert_eq!(resp.status_line, "RTSP/1.0 400 Bad Request");
    assert_eq!(resp.header("CSeq"), Some("9"));

    let resp = client.request("OPTIONS", "*", &[], b"");
    assert_eq!(resp.status_line, "RTSP/1.0 200 OK");

    server.stop();
}

#[test]
fn missing_cseq_closes_connection() {
    let (mut server, addr) = start_server();
    let mut client = Client::connect(addr);

    client
        .writer
        .write_all(b"OPTIONS * RTSP/1.0\r\n\r\n")
        .unwrap();
    let mut line = String::new();
    let n = client.reader.read_line(&mut line).unwrap();
    assert_eq!(n, 0, "expected the server to close, got {line:?}");

    server.stop();
}
