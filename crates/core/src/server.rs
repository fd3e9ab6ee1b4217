use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::error::{Result, RtspError};
use crate::registry::Registry;
use crate::relay::{EndpointAllocator, RelayConfig};
use crate::transport::tcp;

/// Server configuration, fixed at construction.
///
/// Buffer sizes of 0 keep the OS defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `SO_RCVBUF` of accepted RTSP connections; also the capacity of the
    /// connection's buffered reader.
    pub tcp_recv_buffer: usize,
    /// `SO_SNDBUF` of accepted RTSP connections.
    pub tcp_send_buffer: usize,
    /// Address the pusher-facing UDP endpoints bind to.
    pub udp_bind_ip: IpAddr,
    /// `SO_RCVBUF` of every relay UDP endpoint.
    pub udp_recv_buffer: usize,
    /// `SO_SNDBUF` of every relay UDP endpoint.
    pub udp_send_buffer: usize,
    pub relay: RelayConfig,
    /// Longest accepted request line plus headers; longer heads close the
    /// connection.
    pub max_head_size: usize,
    /// Largest accepted `Content-Length`; larger requests close the
    /// connection.
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_recv_buffer: 0,
            tcp_send_buffer: 0,
            udp_bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_recv_buffer: 0,
            udp_send_buffer: 0,
            relay: RelayConfig::default(),
            max_head_size: 64 * 1024,
            max_body_size: 1024 * 1024,
        }
    }
}

/// RTSP relay server.
///
/// Accepts pushers and pullers on one TCP address and relays each pusher's
/// RTP/RTCP to the pullers of its path. Connection handling lives in
/// [`transport::tcp`](crate::transport::tcp); resources and relays in the
/// shared [`Registry`].
pub struct Server {
    registry: Registry,
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ServerConfig::default())
    }

    pub fn with_config(bind_addr: &str, config: ServerConfig) -> Self {
        let endpoints = EndpointAllocator::new(
            config.udp_bind_ip,
            config.udp_recv_buffer,
            config.udp_send_buffer,
        );
        Self {
            registry: Registry::new(endpoints, config.relay.clone()),
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            config: Arc::new(config),
        }
    }

    /// Bind the listener and spawn the accept thread.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let registry = self.registry.clone();
        let config = self.config.clone();

        let spawned = thread::Builder::new()
            .name("rtsp-accept".to_string())
            .spawn(move || tcp::accept_loop(listener, registry, config, running));
        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        self.local_addr = Some(local_addr);
        tracing::info!(addr = %local_addr, "RTSP relay listening");
        Ok(())
    }

    /// Stop accepting. Open connections end when their clients disconnect.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to. Useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(RtspError::NotStarted)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}
