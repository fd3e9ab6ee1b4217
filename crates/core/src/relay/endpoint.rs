use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::SockRef;

use crate::error::Result;

/// A bound UDP socket used by the relay.
///
/// Server endpoints face the pusher: bound to an ephemeral port and
/// receiving. Client endpoints face a puller: connected to the address the
/// puller advertised in its `client_port` and sending.
#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
    local_port: u16,
    remote: Option<SocketAddr>,
}

impl Endpoint {
    /// Locally bound port.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Connected peer, for client endpoints.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Send one datagram to the connected peer.
    pub fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload)
    }

    /// Receive one datagram, honoring the read timeout.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    /// Pending socket error (`SO_ERROR`), collected when the endpoint closes.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.socket.take_error()
    }
}

/// Opens relay endpoints with the configured buffer sizes.
///
/// Allocation never retries: a failure is reported to the SETUP that asked
/// for the endpoint and nothing else is affected.
#[derive(Debug, Clone)]
pub struct EndpointAllocator {
    bind_ip: IpAddr,
    recv_buffer: usize,
    send_buffer: usize,
}

impl EndpointAllocator {
    /// `recv_buffer`/`send_buffer` of 0 keep the OS defaults.
    pub fn new(bind_ip: IpAddr, recv_buffer: usize, send_buffer: usize) -> Self {
        Self {
            bind_ip,
            recv_buffer,
            send_buffer,
        }
    }

    /// Bind a pusher-facing socket to an OS-assigned port.
    pub fn open_server(&self) -> Result<Endpoint> {
        let socket = UdpSocket::bind(SocketAddr::new(self.bind_ip, 0))?;
        self.tune(&socket)?;
        let local_port = socket.local_addr()?.port();

        tracing::debug!(bind_ip = %self.bind_ip, port = local_port, "server endpoint bound");

        Ok(Endpoint {
            socket,
            local_port,
            remote: None,
        })
    }

    /// Connect a puller-facing socket to `remote_ip:remote_port`.
    pub fn open_client(&self, remote_ip: IpAddr, remote_port: u16) -> Result<Endpoint> {
        let unspecified = match remote_ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let remote = SocketAddr::new(remote_ip, remote_port);

        let socket = UdpSocket::bind(SocketAddr::new(unspecified, 0))?;
        self.tune(&socket)?;
        socket.connect(remote)?;
        let local_port = socket.local_addr()?.port();

        tracing::debug!(%remote, port = local_port, "client endpoint connected");

        Ok(Endpoint {
            socket,
            local_port,
            remote: Some(remote),
        })
    }

    fn tune(&self, socket: &UdpSocket) -> io::Result<()> {
        let sock = SockRef::from(socket);
        if self.recv_buffer > 0 {
            sock.set_recv_buffer_size(self.recv_buffer)?;
        }
        if self.send_buffer > 0 {
            sock.set_send_buffer_size(self.send_buffer)?;
        }
        Ok(())
    }
}

impl Default for EndpointAllocator {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, 0)
    }
}
