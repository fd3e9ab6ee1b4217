use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded, select};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, RtspError};
use crate::relay::{Endpoint, MediaKind, PacketClass, PortPair, QueueFullPolicy, RelayConfig};

/// Largest datagram a pusher socket accepts.
const MAX_DATAGRAM_SIZE: usize = 65536;

/// Floor for `poll_interval`; sockets reject a zero read timeout.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The client-side sockets of one puller for one media.
#[derive(Debug, Clone)]
pub struct PullerEndpoints {
    /// Session that owns these endpoints; used to detach them on disconnect.
    pub session_id: String,
    pub rtp: Arc<Endpoint>,
    pub rtcp: Arc<Endpoint>,
}

impl PullerEndpoints {
    pub fn new(session_id: &str, rtp: Endpoint, rtcp: Endpoint) -> Self {
        Self {
            session_id: session_id.to_string(),
            rtp: Arc::new(rtp),
            rtcp: Arc::new(rtcp),
        }
    }

    fn endpoint(&self, class: PacketClass) -> &Endpoint {
        match class {
            PacketClass::Rtp => &self.rtp,
            PacketClass::Rtcp => &self.rtcp,
        }
    }
}

enum PairState {
    Idle,
    Active {
        /// Dropping this wakes both forwarders.
        stop_tx: Sender<()>,
        workers: Vec<(String, JoinHandle<()>)>,
    },
    Stopped,
}

/// Fan-out unit for one (resource path, media type).
///
/// Owns the pusher's RTP and RTCP server endpoints and an ordered list of
/// puller endpoints. While active, four threads run:
///
/// - two receivers read datagrams off the pusher sockets and push them
///   into a bounded queue per packet class;
/// - two forwarders drain those queues and write every packet to each
///   puller present in a snapshot of the list taken under its lock.
///
/// A failed write to one puller is logged and skipped. Packets keep the
/// order in which the pusher socket received them.
pub struct RelayPair {
    path: String,
    media: MediaKind,
    rtp: Arc<Endpoint>,
    rtcp: Arc<Endpoint>,
    pullers: Arc<RwLock<Vec<PullerEndpoints>>>,
    state: Mutex<PairState>,
    stopped: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    config: RelayConfig,
}

impl RelayPair {
    /// A `poll_interval` below one millisecond is raised to one.
    pub fn new(
        path: &str,
        media: MediaKind,
        rtp: Endpoint,
        rtcp: Endpoint,
        mut config: RelayConfig,
    ) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            path: path.to_string(),
            media,
            rtp: Arc::new(rtp),
            rtcp: Arc::new(rtcp),
            pullers: Arc::new(RwLock::new(Vec::new())),
            state: Mutex::new(PairState::Idle),
            stopped: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    pub fn media(&self) -> MediaKind {
        self.media
    }

    /// Ports the pusher sends RTP and RTCP to.
    pub fn server_ports(&self) -> PortPair {
        PortPair {
            rtp: self.rtp.local_port(),
            rtcp: self.rtcp.local_port(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), PairState::Active { .. })
    }

    pub fn puller_count(&self) -> usize {
        self.pullers.read().len()
    }

    /// Packets dropped because a queue was full (`DropNewest` policy).
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Append a puller. Fails once the pair is stopped.
    pub fn add_puller(&self, puller: PullerEndpoints) -> Result<()> {
        let mut pullers = self.pullers.write();
        if self.stopped.load(Ordering::Acquire) {
            return Err(RtspError::RelayStopped {
                path: self.path.clone(),
                media: self.media,
            });
        }

        tracing::debug!(
            path = %self.path,
            media = %self.media,
            session_id = %puller.session_id,
            rtp = ?puller.rtp.remote(),
            rtcp = ?puller.rtcp.remote(),
            total = pullers.len() + 1,
            "puller attached to relay"
        );
        pullers.push(puller);
        Ok(())
    }

    /// Detach every endpoint of a session. Returns how many were removed.
    pub fn remove_puller(&self, session_id: &str) -> usize {
        let mut pullers = self.pullers.write();
        let before = pullers.len();
        pullers.retain(|p| p.session_id != session_id);
        let removed = before - pullers.len();
        if removed > 0 {
            tracing::debug!(
                path = %self.path,
                media = %self.media,
                session_id,
                "puller detached from relay"
            );
        }
        removed
    }

    /// Launch the receiver and forwarder threads. Calling it again while
    /// active is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            PairState::Active { .. } => return Ok(()),
            PairState::Stopped => {
                return Err(RtspError::RelayStopped {
                    path: self.path.clone(),
                    media: self.media,
                });
            }
            PairState::Idle => {}
        }

        self.rtp.set_read_timeout(Some(self.config.poll_interval))?;
        self.rtcp.set_read_timeout(Some(self.config.poll_interval))?;

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let mut workers = Vec::with_capacity(4);

        if let Err(e) = self.spawn_workers(&stop_rx, &mut workers) {
            tracing::error!(
                path = %self.path,
                media = %self.media,
                error = %e,
                "failed to spawn relay workers"
            );
            self.stopped.store(true, Ordering::Release);
            drop(stop_tx);
            for (_, handle) in workers {
                let _ = handle.join();
            }
            *state = PairState::Stopped;
            return Err(e.into());
        }

        *state = PairState::Active { stop_tx, workers };

        tracing::info!(
            path = %self.path,
            media = %self.media,
            ports = %self.server_ports(),
            "relay started"
        );
        Ok(())
    }

    /// Stop the workers and close every endpoint.
    ///
    /// Returns the errors collected on the way: panicked workers and
    /// pending socket errors of the pusher and puller endpoints. A second
    /// call returns only [`RtspError::AlreadyStopped`].
    pub fn stop(&self) -> Vec<RtspError> {
        let previous = std::mem::replace(&mut *self.state.lock(), PairState::Stopped);
        self.stopped.store(true, Ordering::Release);

        let workers = match previous {
            PairState::Stopped => return vec![RtspError::AlreadyStopped],
            PairState::Idle => Vec::new(),
            PairState::Active { stop_tx, workers } => {
                drop(stop_tx);
                workers
            }
        };

        let mut errors = Vec::new();
        for (name, handle) in workers {
            if handle.join().is_err() {
                tracing::error!(worker = %name, "relay worker panicked");
                errors.push(RtspError::WorkerPanicked(name));
            }
        }

        collect_close_error(&self.rtp, &mut errors);
        collect_close_error(&self.rtcp, &mut errors);

        let pullers = std::mem::take(&mut *self.pullers.write());
        for puller in &pullers {
            collect_close_error(&puller.rtp, &mut errors);
            collect_close_error(&puller.rtcp, &mut errors);
        }

        tracing::info!(
            path = %self.path,
            media = %self.media,
            pullers = pullers.len(),
            dropped = self.dropped_packets(),
            errors = errors.len(),
            "relay stopped"
        );
        errors
    }

    fn spawn_workers(
        &self,
        stop_rx: &Receiver<()>,
        workers: &mut Vec<(String, JoinHandle<()>)>,
    ) -> io::Result<()> {
        for (class, endpoint) in [
            (PacketClass::Rtp, &self.rtp),
            (PacketClass::Rtcp, &self.rtcp),
        ] {
            let (tx, rx) = bounded(self.config.queue_capacity.max(1));

            let receiver = Ingress {
                path: self.path.clone(),
                media: self.media,
                class,
                endpoint: Arc::clone(endpoint),
                queue: tx,
                stopped: Arc::clone(&self.stopped),
                dropped: Arc::clone(&self.dropped),
                config: self.config.clone(),
            };
            let name = format!("relay-{}-{}-rx", self.media, class.as_str());
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || receiver.run())?;
            workers.push((name, handle));

            let forwarder = Forwarder {
                path: self.path.clone(),
                media: self.media,
                class,
                queue: rx,
                stop: stop_rx.clone(),
                pullers: Arc::clone(&self.pullers),
            };
            let name = format!("relay-{}-{}-fwd", self.media, class.as_str());
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || forwarder.run())?;
            workers.push((name, handle));
        }
        Ok(())
    }
}

impl Drop for RelayPair {
    fn drop(&mut self) {
        if !matches!(*self.state.get_mut(), PairState::Stopped) {
            self.stop();
        }
    }
}

fn collect_close_error(endpoint: &Endpoint, errors: &mut Vec<RtspError>) {
    match endpoint.take_error() {
        Ok(None) => {}
        Ok(Some(e)) | Err(e) => {
            tracing::debug!(port = endpoint.local_port(), error = %e, "endpoint closed with error");
            errors.push(e.into());
        }
    }
}

/// Reads one pusher socket into the queue of its packet class.
struct Ingress {
    path: String,
    media: MediaKind,
    class: PacketClass,
    endpoint: Arc<Endpoint>,
    queue: Sender<Vec<u8>>,
    stopped: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    config: RelayConfig,
}

impl Ingress {
    fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        while !self.stopped.load(Ordering::Acquire) {
            let len = match self.endpoint.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path,
                        media = %self.media,
                        class = self.class.as_str(),
                        error = %e,
                        "pusher receive error"
                    );
                    continue;
                }
            };

            tracing::trace!(
                path = %self.path,
                media = %self.media,
                class = self.class.as_str(),
                len,
                "packet received"
            );

            if !self.enqueue(buf[..len].to_vec()) {
                break;
            }
        }

        tracing::debug!(
            path = %self.path,
            media = %self.media,
            class = self.class.as_str(),
            "relay receiver exited"
        );
    }

    /// Queue one packet according to the full-queue policy. Returns `false`
    /// when the receiver should exit.
    fn enqueue(&self, packet: Vec<u8>) -> bool {
        match self.config.full_policy {
            QueueFullPolicy::DropNewest => match self.queue.try_send(packet) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::trace!(
                        path = %self.path,
                        media = %self.media,
                        class = self.class.as_str(),
                        dropped,
                        "relay queue full, packet dropped"
                    );
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
            QueueFullPolicy::Block => {
                let mut packet = packet;
                loop {
                    match self.queue.send_timeout(packet, self.config.poll_interval) {
                        Ok(()) => return true,
                        Err(SendTimeoutError::Timeout(p)) => {
                            if self.stopped.load(Ordering::Acquire) {
                                return false;
                            }
                            packet = p;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => return false,
                    }
                }
            }
        }
    }
}

/// Drains one queue to every puller.
struct Forwarder {
    path: String,
    media: MediaKind,
    class: PacketClass,
    queue: Receiver<Vec<u8>>,
    stop: Receiver<()>,
    pullers: Arc<RwLock<Vec<PullerEndpoints>>>,
}

impl Forwarder {
    fn run(self) {
        loop {
            select! {
                recv(self.queue) -> packet => match packet {
                    Ok(packet) => self.fan_out(&packet),
                    Err(_) => break,
                },
                recv(self.stop) -> _ => break,
            }
        }

        tracing::debug!(
            path = %self.path,
            media = %self.media,
            class = self.class.as_str(),
            "relay forwarder exited"
        );
    }

    fn fan_out(&self, packet: &[u8]) {
        let snapshot = self.pullers.read().clone();

        for puller in &snapshot {
            let endpoint = puller.endpoint(self.class);
            if let Err(e) = endpoint.send(packet) {
                tracing::warn!(
                    path = %self.path,
                    media = %self.media,
                    class = self.class.as_str(),
                    session_id = %puller.session_id,
                    remote = ?endpoint.remote(),
                    error = %e,
                    "failed to forward packet to puller"
                );
            }
        }
    }
}
