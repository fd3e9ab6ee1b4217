use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::protocol::sdp::SessionDescription;
use crate::relay::{
    EndpointAllocator, MediaKind, PortPair, PullerEndpoints, RelayConfig, RelayPair,
};
use crate::session::Role;

/// A published stream (e.g. `/live/stream1`).
///
/// Created by the pusher's ANNOUNCE and removed when the pusher's session
/// closes. Holds the announced SDP, the pullers that described it and one
/// relay pair per media, created on the pusher's SETUP for that media.
pub struct ResourceEntry {
    path: String,
    pusher_id: String,
    description: SessionDescription,
    sdp: Vec<u8>,
    puller_ids: Mutex<Vec<String>>,
    relays: Mutex<HashMap<MediaKind, Arc<RelayPair>>>,
}

impl ResourceEntry {
    fn new(path: &str, pusher_id: &str, description: SessionDescription, sdp: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            pusher_id: pusher_id.to_string(),
            description,
            sdp,
            puller_ids: Mutex::new(Vec::new()),
            relays: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pusher_id(&self) -> &str {
        &self.pusher_id
    }

    pub fn description(&self) -> &SessionDescription {
        &self.description
    }

    /// The ANNOUNCE body, served verbatim to DESCRIBE.
    pub fn sdp(&self) -> &[u8] {
        &self.sdp
    }

    pub fn puller_ids(&self) -> Vec<String> {
        self.puller_ids.lock().clone()
    }

    pub fn has_puller(&self, session_id: &str) -> bool {
        self.puller_ids.lock().iter().any(|id| id == session_id)
    }

    /// Relay pair of `media`, once the pusher has set it up.
    pub fn relay(&self, media: MediaKind) -> Option<Arc<RelayPair>> {
        self.relays.lock().get(&media).cloned()
    }

    fn relays(&self) -> Vec<Arc<RelayPair>> {
        self.relays.lock().values().cloned().collect()
    }

    /// Stop and forget every relay pair, returning their close errors.
    fn stop_relays(&self) -> Vec<RtspError> {
        let relays: Vec<_> = self.relays.lock().drain().map(|(_, r)| r).collect();
        relays.iter().flat_map(|relay| relay.stop()).collect()
    }
}

/// Result of [`Registry::unregister`].
#[derive(Debug)]
pub enum Unregistered {
    /// The pusher left: the resource and its relays are gone. `orphaned`
    /// lists the pullers that were attached; they are not notified.
    Pusher {
        orphaned: Vec<String>,
        errors: Vec<RtspError>,
    },
    /// A puller left the resource.
    Puller,
    /// The session held no role on the path.
    NotRegistered,
}

/// Registry of published resources, keyed by path.
///
/// One instance is shared by every connection of a server. The map lock is
/// held only for lookups and insert/remove; relay start/stop and socket
/// setup happen outside it.
#[derive(Clone)]
pub struct Registry {
    resources: Arc<Mutex<HashMap<String, Arc<ResourceEntry>>>>,
    endpoints: EndpointAllocator,
    relay_config: RelayConfig,
}

impl Registry {
    pub fn new(endpoints: EndpointAllocator, relay_config: RelayConfig) -> Self {
        Self {
            resources: Arc::new(Mutex::new(HashMap::new())),
            endpoints,
            relay_config,
        }
    }

    /// Look up a resource by exact path.
    pub fn get(&self, path: &str) -> Option<Arc<ResourceEntry>> {
        self.resources.lock().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }

    /// Publish `path` for the pusher `session_id`.
    ///
    /// Fails with [`RtspError::ResourceInUse`] when the path already has a
    /// pusher; of any number of concurrent calls for one path, exactly one
    /// succeeds.
    pub fn register_pusher(
        &self,
        path: &str,
        session_id: &str,
        description: SessionDescription,
        sdp: Vec<u8>,
    ) -> Result<Arc<ResourceEntry>> {
        let mut resources = self.resources.lock();
        if resources.contains_key(path) {
            return Err(RtspError::ResourceInUse(path.to_string()));
        }

        let entry = Arc::new(ResourceEntry::new(path, session_id, description, sdp));
        resources.insert(path.to_string(), entry.clone());
        tracing::info!(
            path,
            session_id,
            medias = entry.description.medias.len(),
            "resource registered"
        );
        Ok(entry)
    }

    /// Subscribe the puller `session_id` to `path`.
    ///
    /// Appends to the puller list; callers avoid registering a session
    /// twice.
    pub fn register_puller(&self, path: &str, session_id: &str) -> Result<Arc<ResourceEntry>> {
        let entry = self
            .get(path)
            .ok_or_else(|| RtspError::ResourceNotFound(path.to_string()))?;

        let mut pullers = entry.puller_ids.lock();
        pullers.push(session_id.to_string());
        tracing::debug!(path, session_id, total = pullers.len(), "puller registered");
        drop(pullers);

        Ok(entry)
    }

    /// Wire `session_id`'s UDP ports into the relay of `media` on `path`.
    ///
    /// - Pusher: opens two server endpoints, creates and starts the relay
    ///   pair, and returns the bound server ports. `ports` is the pusher's
    ///   `client_port`, kept for the response only.
    /// - Puller: connects two client endpoints to `remote_ip` at `ports`
    ///   and appends them to the existing relay pair. Returns `ports`.
    ///
    /// Endpoint failures are returned to the caller; the resource and its
    /// other relays are unaffected.
    pub fn attach_relay_endpoint(
        &self,
        path: &str,
        media: MediaKind,
        role: Role,
        session_id: &str,
        ports: PortPair,
        remote_ip: IpAddr,
    ) -> Result<PortPair> {
        let entry = self
            .get(path)
            .ok_or_else(|| RtspError::ResourceNotFound(path.to_string()))?;

        if !entry.description.has(media) {
            return Err(RtspError::UnknownMedia {
                path: path.to_string(),
                uri: media.to_string(),
            });
        }

        match role {
            Role::Pusher if entry.pusher_id == session_id => {
                self.attach_pusher(&entry, media)
            }
            Role::Puller if entry.has_puller(session_id) => {
                self.attach_puller(&entry, media, session_id, ports, remote_ip)
            }
            _ => Err(RtspError::NotRegistered {
                session_id: session_id.to_string(),
                path: path.to_string(),
            }),
        }
    }

    fn attach_pusher(&self, entry: &ResourceEntry, media: MediaKind) -> Result<PortPair> {
        let exists = || RtspError::RelayExists {
            path: entry.path.clone(),
            media,
        };
        if entry.relays.lock().contains_key(&media) {
            return Err(exists());
        }

        let rtp = self.endpoints.open_server().inspect_err(|e| {
            tracing::error!(path = %entry.path, %media, error = %e, "failed to open RTP endpoint");
        })?;
        let rtcp = self.endpoints.open_server().inspect_err(|e| {
            tracing::error!(path = %entry.path, %media, error = %e, "failed to open RTCP endpoint");
        })?;
        let relay = Arc::new(RelayPair::new(
            &entry.path,
            media,
            rtp,
            rtcp,
            self.relay_config.clone(),
        ));

        {
            let mut relays = entry.relays.lock();
            if relays.contains_key(&media) {
                return Err(exists());
            }
            relays.insert(media, relay.clone());
        }

        if let Err(e) = relay.start() {
            entry.relays.lock().remove(&media);
            relay.stop();
            return Err(e);
        }

        Ok(relay.server_ports())
    }

    fn attach_puller(
        &self,
        entry: &ResourceEntry,
        media: MediaKind,
        session_id: &str,
        ports: PortPair,
        remote_ip: IpAddr,
    ) -> Result<PortPair> {
        let relay = entry.relay(media).ok_or_else(|| RtspError::RelayNotReady {
            path: entry.path.clone(),
            media,
        })?;

        let rtp = self.endpoints.open_client(remote_ip, ports.rtp)?;
        let rtcp = self.endpoints.open_client(remote_ip, ports.rtcp)?;
        relay.add_puller(PullerEndpoints::new(session_id, rtp, rtcp))?;

        Ok(ports)
    }

    /// Remove `session_id` from `path`.
    ///
    /// A pusher takes the whole resource with it: the entry leaves the map
    /// first, so the path can be announced again right away, then its relay
    /// pairs are stopped. A puller only leaves the puller list and the relay
    /// pairs.
    pub fn unregister(&self, path: &str, session_id: &str) -> Unregistered {
        let (entry, is_pusher) = {
            let mut resources = self.resources.lock();
            let Some(entry) = resources.get(path).cloned() else {
                return Unregistered::NotRegistered;
            };
            let is_pusher = entry.pusher_id == session_id;
            if is_pusher {
                resources.remove(path);
            }
            (entry, is_pusher)
        };

        if is_pusher {
            let errors = entry.stop_relays();
            for error in &errors {
                tracing::warn!(path, error = %error, "relay close error");
            }
            let orphaned = entry.puller_ids();
            tracing::info!(path, session_id, orphaned = orphaned.len(), "resource removed");
            return Unregistered::Pusher { orphaned, errors };
        }

        let removed = {
            let mut pullers = entry.puller_ids.lock();
            let before = pullers.len();
            pullers.retain(|id| id != session_id);
            before - pullers.len()
        };
        if removed == 0 {
            return Unregistered::NotRegistered;
        }

        for relay in entry.relays() {
            relay.remove_puller(session_id);
        }
        tracing::debug!(path, session_id, "puller unregistered");
        Unregistered::Puller
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(EndpointAllocator::default(), RelayConfig::default())
    }
}
