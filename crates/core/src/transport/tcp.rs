use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use socket2::SockRef;

use crate::error::RtspError;
use crate::protocol::{MethodHandler, RtspResponse, read_frame};
use crate::registry::{Registry, Unregistered};
use crate::server::ServerConfig;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
/// Accept errors are logged and the loop keeps going.
pub fn accept_loop(
    listener: TcpListener,
    registry: Registry,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Err(e) = prepare(&stream, &config) {
                    tracing::warn!(%peer_addr, error = %e, "failed to configure client socket");
                    continue;
                }
                let registry = registry.clone();
                let config = config.clone();
                let running = running.clone();
                let spawned = thread::Builder::new()
                    .name(format!("rtsp-conn-{peer_addr}"))
                    .spawn(move || Connection::handle(stream, registry, config, running));
                if let Err(e) = spawned {
                    tracing::error!(%peer_addr, error = %e, "failed to spawn connection thread");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// Blocking mode plus the configured socket buffer sizes.
fn prepare(stream: &TcpStream, config: &ServerConfig) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    let sock = SockRef::from(stream);
    if config.tcp_recv_buffer > 0 {
        sock.set_recv_buffer_size(config.tcp_recv_buffer)?;
    }
    if config.tcp_send_buffer > 0 {
        sock.set_send_buffer_size(config.tcp_send_buffer)?;
    }
    Ok(())
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
    max_head_size: usize,
    max_body_size: usize,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    fn handle(
        stream: TcpStream,
        registry: Registry,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "failed to clone client stream");
                return;
            }
        };

        let reader = if config.tcp_recv_buffer > 0 {
            BufReader::with_capacity(config.tcp_recv_buffer, reader_stream)
        } else {
            BufReader::new(reader_stream)
        };

        let mut conn = Connection {
            reader,
            writer: stream,
            handler: MethodHandler::new(registry, peer_addr),
            peer_addr,
            max_head_size: config.max_head_size,
            max_body_size: config.max_body_size,
        };

        tracing::info!(%peer_addr, session_id = %conn.handler.session().id, "client connected");

        let reason = conn.run(&running);
        conn.cleanup();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let frame = match read_frame(
                &mut self.reader,
                self.max_head_size,
                self.max_body_size,
            ) {
                Ok(Some(frame)) => frame,
                Ok(None) => return "connection closed by client",
                Err(RtspError::Io(e)) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "read failed");
                    return "read error";
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "unreadable request");
                    return "framing error";
                }
            };

            let cseq = frame.header("CSeq");
            let response = match frame.into_request() {
                Ok(request) => {
                    tracing::debug!(
                        peer = %self.peer_addr,
                        method = %request.method,
                        uri = %request.uri,
                        version = %request.version,
                        "request"
                    );
                    match self.handler.handle(&request) {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::warn!(
                                peer = %self.peer_addr,
                                error = %e,
                                "dropping connection"
                            );
                            return "missing CSeq";
                        }
                    }
                }
                Err(e) => match cseq {
                    Some(cseq) => self.handler.reject("RTSP/1.0", &cseq, &e),
                    None => {
                        tracing::warn!(
                            peer = %self.peer_addr,
                            error = %e,
                            "malformed request without CSeq"
                        );
                        return "missing CSeq";
                    }
                },
            };

            if !self.send(&response) {
                return "write error";
            }
        }

        "server shutting down"
    }

    fn send(&mut self, response: &RtspResponse) -> bool {
        tracing::debug!(peer = %self.peer_addr, status = %response.status, "response");
        match self.writer.write_all(&response.serialize()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(peer = %self.peer_addr, error = %e, "write failed");
                false
            }
        }
    }

    /// Unregister the session from whatever resource it held.
    fn cleanup(&self) {
        match self.handler.cleanup() {
            Unregistered::Pusher { orphaned, errors } => {
                if !orphaned.is_empty() {
                    tracing::info!(
                        peer = %self.peer_addr,
                        orphaned = ?orphaned,
                        "pusher left; pullers orphaned"
                    );
                }
                if !errors.is_empty() {
                    tracing::warn!(
                        peer = %self.peer_addr,
                        errors = errors.len(),
                        "relay shut down with errors"
                    );
                }
            }
            Unregistered::Puller => {
                tracing::debug!(peer = %self.peer_addr, "puller unregistered on disconnect");
            }
            Unregistered::NotRegistered => {}
        }
    }
}
