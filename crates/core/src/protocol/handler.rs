use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{Result, RtspError};
use crate::protocol::request::{Method, RtspRequest};
use crate::protocol::response::{RtspResponse, StatusCode};
use crate::protocol::sdp::SessionDescription;
use crate::registry::{Registry, ResourceEntry, Unregistered};
use crate::relay::PortPair;
use crate::session::{MediaTransport, Role, Session, TransportHeader};

/// Methods advertised in the OPTIONS `Public` header.
pub const PUBLIC_METHODS: &str = "OPTIONS, ANNOUNCE, DESCRIBE, SETUP";

/// Handles RTSP method requests for a single TCP connection.
///
/// Owns the connection's [`Session`] and drives it through ANNOUNCE or
/// DESCRIBE and then SETUP, registering it with the shared [`Registry`].
/// Every response carries `CSeq` then `Session`, followed by the method's
/// own fields.
pub struct MethodHandler {
    registry: Registry,
    session: Session,
    peer_addr: SocketAddr,
}

impl MethodHandler {
    pub fn new(registry: Registry, peer_addr: SocketAddr) -> Self {
        MethodHandler {
            registry,
            session: Session::new(),
            peer_addr,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Answer one request.
    ///
    /// Method failures become error responses. The only `Err` is a request
    /// without `CSeq`, which gets no response at all.
    pub fn handle(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let cseq = request.cseq().ok_or(RtspError::MissingHeader("CSeq"))?;
        let ok = self.response(&request.version, cseq, StatusCode::Ok);

        let result = match &request.method {
            Method::Options => Ok(self.handle_options(ok)),
            Method::Announce => self.handle_announce(request, ok),
            Method::Describe => self.handle_describe(request, ok),
            Method::Setup => self.handle_setup(request, ok),
            Method::Other(method) => Err(RtspError::MethodNotAllowed(method.clone())),
        };

        Ok(result.unwrap_or_else(|e| self.reject(&request.version, cseq, &e)))
    }

    /// Error response for a failed request: status line, `CSeq` and
    /// `Session` only.
    pub fn reject(&self, version: &str, cseq: &str, error: &RtspError) -> RtspResponse {
        let status = error.status();
        tracing::warn!(
            peer = %self.peer_addr,
            session_id = %self.session.id,
            %cseq,
            %status,
            error = %error,
            "request failed"
        );
        self.response(version, cseq, status)
    }

    /// Leave the registry when the connection ends.
    pub fn cleanup(&self) -> Unregistered {
        match self.session.path() {
            Some(path) => self.registry.unregister(path, &self.session.id),
            None => Unregistered::NotRegistered,
        }
    }

    fn response(&self, version: &str, cseq: &str, status: StatusCode) -> RtspResponse {
        RtspResponse::new(version, status)
            .add_header("CSeq", cseq)
            .add_header("Session", &self.session.id)
    }

    fn handle_options(&self, ok: RtspResponse) -> RtspResponse {
        tracing::debug!(peer = %self.peer_addr, "OPTIONS");
        ok.add_header("Public", PUBLIC_METHODS)
    }

    fn handle_announce(&mut self, request: &RtspRequest, ok: RtspResponse) -> Result<RtspResponse> {
        let path = request.resource_path()?;
        tracing::debug!(peer = %self.peer_addr, %path, "ANNOUNCE");

        if self.session.role() != Role::Unknown {
            return Err(RtspError::RoleConflict(format!(
                "ANNOUNCE on a session that is already a {:?}",
                self.session.role()
            )));
        }

        let description = SessionDescription::decode(&request.body)?;
        self.registry.register_pusher(
            &path,
            &self.session.id,
            description,
            request.body.clone(),
        )?;
        self.session.announced(&path);

        tracing::info!(
            peer = %self.peer_addr,
            session_id = %self.session.id,
            %path,
            "pusher announced"
        );
        Ok(ok)
    }

    fn handle_describe(
        &mut self,
        request: &RtspRequest,
        ok: RtspResponse,
    ) -> Result<RtspResponse> {
        let path = request.resource_path()?;
        tracing::debug!(peer = %self.peer_addr, %path, "DESCRIBE");

        let entry = match self.session.role() {
            Role::Unknown => {
                let entry = self.registry.register_puller(&path, &self.session.id)?;
                self.session.described(&path);
                tracing::info!(
                    peer = %self.peer_addr,
                    session_id = %self.session.id,
                    %path,
                    "puller described"
                );
                entry
            }
            Role::Puller if self.session.path() == Some(path.as_str()) => {
                self.described_entry(&path)?
            }
            role => {
                return Err(RtspError::RoleConflict(format!(
                    "DESCRIBE {path} on a {role:?} session"
                )));
            }
        };

        Ok(ok
            .add_header("Content-Type", "application/sdp")
            .with_body(entry.sdp().to_vec()))
    }

    /// The resource this puller already described, if it is still published.
    fn described_entry(&self, path: &str) -> Result<Arc<ResourceEntry>> {
        self.registry
            .get(path)
            .filter(|entry| entry.has_puller(&self.session.id))
            .ok_or_else(|| RtspError::ResourceNotFound(path.to_string()))
    }

    fn handle_setup(&mut self, request: &RtspRequest, ok: RtspResponse) -> Result<RtspResponse> {
        let transport = request
            .get_header("Transport")
            .ok_or(RtspError::MissingHeader("Transport"))?;
        tracing::debug!(peer = %self.peer_addr, uri = %request.uri, transport, "SETUP");

        match TransportHeader::parse(transport) {
            Some(TransportHeader::Interleaved(channels)) => {
                self.session.record_interleaved(channels);
                Ok(ok.add_header("Transport", transport))
            }
            Some(TransportHeader::ClientPort(ports)) => {
                let server_ports = self.setup_udp(&request.uri, ports)?;
                let value = match server_ports {
                    Some(server) => format!("{transport};server_port={server}"),
                    None => transport.to_string(),
                };
                Ok(ok.add_header("Transport", &value))
            }
            None => Err(RtspError::UnsupportedTransport(transport.to_string())),
        }
    }

    /// Attach this session's UDP ports to the relay of the media `uri`
    /// targets. Returns the server ports for a pusher.
    fn setup_udp(&mut self, uri: &str, client: PortPair) -> Result<Option<PortPair>> {
        let role = self.session.role();
        let path = match (role, self.session.path()) {
            (Role::Pusher | Role::Puller, Some(path)) => path.to_string(),
            _ => {
                return Err(RtspError::RoleConflict(
                    "SETUP before ANNOUNCE or DESCRIBE".to_string(),
                ));
            }
        };

        let entry = self
            .registry
            .get(&path)
            .ok_or_else(|| RtspError::ResourceNotFound(path.clone()))?;
        let media = entry
            .description()
            .resolve(uri)
            .ok_or_else(|| RtspError::UnknownMedia {
                path: path.clone(),
                uri: uri.to_string(),
            })?;

        let bound = self.registry.attach_relay_endpoint(
            &path,
            media,
            role,
            &self.session.id,
            client,
            self.peer_addr.ip(),
        )?;

        let server = (role == Role::Pusher).then_some(bound);
        self.session
            .record_media(media, MediaTransport { client, server });

        tracing::info!(
            peer = %self.peer_addr,
            session_id = %self.session.id,
            %path,
            %media,
            role = ?role,
            client = %client,
            server = ?server.map(|p| p.to_string()),
            "media set up"
        );
        Ok(server)
    }
}
