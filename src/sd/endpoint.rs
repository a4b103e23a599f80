//! Per-interface SD endpoint: owns the unicast and multicast UDP sockets,
//! reads datagrams off the reactor, and dispatches parsed messages to
//! whichever registered client/server state machine owns the matching
//! service instance.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::rc::Rc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::header::{ClientId, MethodId, MessageType, ServiceId, SessionId, SomeIpHeader};
use crate::types::ReturnCode;

use super::client_sm::ClientSm;
use super::collaborators::{AllowAll, IamPolicy, NullStatistics, StatEvent, StatisticsSink};
use super::config::ProvidedInstanceConfig;
use super::entry::{EventgroupEntry, SdEntry};
use super::eventgroup::{AdmitResult, EventgroupSubscriptionManager};
use super::message::SdMessage;
use super::observer::{ObserverKey, OfferObserverRegistry};
use super::reboot::{RebootTracker, SessionObservation};
use super::server_sm::{ServerSm, ServerState};
use super::types::{
    CastKind, EntryType, InstanceId, ServiceInstanceId, TransportProtocol, SD_DEFAULT_PORT,
    SD_METHOD_ID, SD_MULTICAST_ADDR, SD_SERVICE_ID,
};

/// A datagram received by an endpoint, with enough context for the caller
/// to dispatch it and to detect peer reboots.
pub struct Inbound {
    pub message: SdMessage,
    pub from: SocketAddr,
    pub cast: CastKind,
    pub session_id: u16,
    pub reboot: SessionObservation,
}

/// A service instance this endpoint provides: its state machine, its
/// configuration, and the subscriptions admitted against it.
struct ProvidedInstance {
    server: ServerSm,
    config: ProvidedInstanceConfig,
    subscriptions: EventgroupSubscriptionManager,
}

fn identity_of(service_id: ServiceId, instance_id: InstanceId, major: u8, minor: u32) -> ServiceInstanceId {
    ServiceInstanceId::new(service_id, instance_id, major, minor)
}

fn single_entry_message(entry: SdEntry) -> SdMessage {
    SdMessage {
        flags: Default::default(),
        entries: vec![entry],
        options: Vec::new(),
    }
}

/// Owns one interface's unicast socket and the shared multicast socket, and
/// stamps outbound session ids via the [`RebootTracker`]'s mirror, the
/// per-endpoint [`super::reboot::OutboundSession`]. Also owns the registered
/// server/client state machines this endpoint dispatches inbound SD traffic
/// to (component B of the SD architecture).
pub struct SdEndpoint {
    unicast: UdpSocket,
    multicast: UdpSocket,
    multicast_addr: SocketAddr,
    reboot_tracker: RebootTracker,
    outbound: super::reboot::OutboundSession,
    client_id: ClientId,
    recv_buf: Vec<u8>,
    servers: Vec<ProvidedInstance>,
    clients: Vec<ClientSm>,
    observers: OfferObserverRegistry,
    iam: Rc<dyn IamPolicy>,
    stats: Rc<dyn StatisticsSink>,
}

impl SdEndpoint {
    /// Bind the unicast socket to `local_addr` and join `multicast_addr`
    /// (defaulting to the standard SD group/port) on `local_addr`'s
    /// interface.
    pub async fn open(local_addr: Ipv4Addr, multicast_addr: Option<SocketAddrV4>) -> Result<Self> {
        let multicast_addr =
            multicast_addr.unwrap_or_else(|| SocketAddrV4::new(SD_MULTICAST_ADDR, SD_DEFAULT_PORT));

        let unicast = UdpSocket::bind(SocketAddrV4::new(local_addr, SD_DEFAULT_PORT)).await?;

        let multicast = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, multicast_addr.port())).await?;
        multicast.join_multicast_v4(*multicast_addr.ip(), local_addr)?;
        multicast.set_multicast_loop_v4(true)?;

        debug!(local = %local_addr, multicast = %multicast_addr, "sd endpoint opened");

        Ok(Self {
            unicast,
            multicast,
            multicast_addr: SocketAddr::V4(multicast_addr),
            reboot_tracker: RebootTracker::new(),
            outbound: super::reboot::OutboundSession::new(),
            client_id: ClientId(0x0000),
            recv_buf: vec![0u8; super::config::DEFAULT_MAX_SD_MESSAGE_SIZE],
            servers: Vec::new(),
            clients: Vec::new(),
            observers: OfferObserverRegistry::new(),
            iam: Rc::new(AllowAll),
            stats: Rc::new(NullStatistics),
        })
    }

    pub fn multicast_addr(&self) -> SocketAddr {
        self.multicast_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.unicast.local_addr()?)
    }

    /// Replace the access-control policy consulted before acting on an
    /// inbound entry. Defaults to [`AllowAll`].
    pub fn set_iam_policy(&mut self, policy: Rc<dyn IamPolicy>) {
        self.iam = policy;
    }

    /// Replace the statistics sink. Defaults to [`NullStatistics`].
    pub fn set_statistics_sink(&mut self, sink: Rc<dyn StatisticsSink>) {
        self.stats = sink;
    }

    /// Register a provided service instance as a dispatch target for
    /// inbound FindService/SubscribeEventgroup entries.
    pub fn register_server(&mut self, server: ServerSm, config: ProvidedInstanceConfig) -> ServiceInstanceId {
        let id = identity_of(server.service_id, server.instance_id, server.major_version, server.minor_version);
        self.servers.push(ProvidedInstance {
            server,
            config,
            subscriptions: EventgroupSubscriptionManager::new(),
        });
        id
    }

    /// Register a required service instance as a dispatch target for
    /// inbound OfferService/StopOfferService entries.
    pub fn register_client(&mut self, client: ClientSm) -> ServiceInstanceId {
        let id = identity_of(client.service_id, client.instance_id, client.major_version, client.minor_version);
        self.clients.push(client);
        id
    }

    /// Remove a previously registered server or client instance.
    pub fn unregister(&mut self, id: ServiceInstanceId) {
        self.servers.retain(|p| {
            identity_of(p.server.service_id, p.server.instance_id, p.server.major_version, p.server.minor_version) != id
        });
        self.clients.retain(|c| identity_of(c.service_id, c.instance_id, c.major_version, c.minor_version) != id);
    }

    pub fn observers_mut(&mut self) -> &mut OfferObserverRegistry {
        &mut self.observers
    }

    /// Tear down subscriptions whose deadline has passed, across every
    /// registered provided instance, emitting the corresponding statistic.
    pub fn expire_subscriptions(&mut self, now: Instant) {
        for provided in self.servers.iter_mut() {
            let expired = provided.subscriptions.expire(now);
            for _ in &expired {
                self.stats.increment(StatEvent::SubscriptionExpired);
            }
        }
    }

    /// Await and parse the next datagram from either socket. Cancel-safe:
    /// callers typically `tokio::select!` this against other readiness
    /// events.
    pub async fn recv(&mut self) -> Result<Inbound> {
        let (len, from, cast) = tokio::select! {
            res = self.unicast.recv_from(&mut self.recv_buf) => {
                let (len, from) = res?;
                (len, from, CastKind::Unicast)
            }
            res = self.multicast.recv_from(&mut self.recv_buf) => {
                let (len, from) = res?;
                (len, from, CastKind::Multicast)
            }
        };

        let header = match SomeIpHeader::from_bytes(&self.recv_buf[..len]) {
            Ok(header) => header,
            Err(e) => {
                self.stats.increment(StatEvent::HeaderRejected);
                return Err(e);
            }
        };
        if let Err(e) = validate_sd_header(&header) {
            self.stats.increment(StatEvent::HeaderRejected);
            return Err(e);
        }

        let message = SdMessage::from_bytes(&self.recv_buf[crate::header::HEADER_SIZE..len])?;
        let reboot = self
            .reboot_tracker
            .observe(from.ip(), cast, header.session_id.0, message.flags.reboot);

        if reboot == SessionObservation::Rebooted {
            warn!(peer = %from, "sd peer reboot detected");
        }

        Ok(Inbound {
            message,
            from,
            cast,
            session_id: header.session_id.0,
            reboot,
        })
    }

    /// Dispatch an inbound message to the registered state machines: notify
    /// dependent server/client state of a detected peer reboot first, then
    /// process each entry in arrival order (FindService, OfferService,
    /// SubscribeEventgroup), consulting the IAM policy before acting on any
    /// of them. A deny drops the entry silently. Replies are sent back
    /// unicast to the entry's sender.
    pub async fn dispatch(&mut self, inbound: Inbound) -> Result<()> {
        let from = inbound.from;

        if inbound.reboot == SessionObservation::Rebooted {
            self.stats.increment(StatEvent::RebootDetected);
            for provided in self.servers.iter_mut() {
                provided.subscriptions.on_peer_rebooted(from.ip());
            }
            for client in self.clients.iter_mut() {
                if client.endpoints().iter().any(|ep| ep.address.ip() == from.ip()) {
                    client.on_stop_offer();
                }
            }
        }

        let mut outbox: Vec<SdMessage> = Vec::new();

        for entry in &inbound.message.entries {
            match entry {
                SdEntry::Service(s) if s.entry_type == EntryType::FindService => {
                    for provided in self.servers.iter_mut() {
                        if !provided.server.matches_find(s.service_id, s.instance_id, s.major_version, s.minor_version) {
                            continue;
                        }
                        if !self.iam.check_find_service(s.service_id, provided.server.instance_id, from) {
                            self.stats.increment(StatEvent::IamDenied);
                            continue;
                        }
                        if let Some(reply) = provided.server.on_find_service(from, Instant::now()) {
                            outbox.push(single_entry_message(reply));
                        }
                    }
                }
                SdEntry::Service(s) if s.entry_type == EntryType::OfferService => {
                    let endpoints = inbound.message.get_endpoints_for_entry(entry);
                    for client in self.clients.iter_mut() {
                        if !client.matches(s.service_id, s.instance_id, s.major_version, s.minor_version) {
                            continue;
                        }
                        if !self.iam.check_offer_service(s.service_id, client.instance_id, from) {
                            self.stats.increment(StatEvent::IamDenied);
                            continue;
                        }
                        let key = ObserverKey {
                            service_id: client.service_id,
                            instance_id: client.instance_id,
                        };
                        if s.ttl == 0 {
                            client.on_stop_offer();
                            self.observers.notify_stop_offer(key);
                        } else {
                            client.on_offer(endpoints.clone(), s.ttl, Instant::now());
                            self.observers.notify_offer(key, client.endpoints());
                        }
                    }
                }
                SdEntry::Eventgroup(eg) if eg.entry_type == EntryType::SubscribeEventgroup => {
                    let endpoints = inbound.message.get_endpoints_for_entry(entry);
                    let udp_endpoint = endpoints.iter().find(|e| e.protocol == TransportProtocol::Udp).map(|e| e.address);
                    let tcp_endpoint = endpoints.iter().find(|e| e.protocol == TransportProtocol::Tcp).map(|e| e.address);

                    for provided in self.servers.iter_mut() {
                        if provided.server.service_id != eg.service_id || provided.server.instance_id != eg.instance_id {
                            continue;
                        }
                        if !self.iam.check_subscribe_eventgroup(eg.service_id, eg.instance_id, eg.eventgroup_id, from) {
                            self.stats.increment(StatEvent::IamDenied);
                            continue;
                        }
                        if eg.ttl == 0 {
                            provided.subscriptions.unsubscribe(from, eg.eventgroup_id);
                            continue;
                        }
                        let instance_up = matches!(provided.server.state(), ServerState::Main | ServerState::Repetition { .. });
                        let result = provided.subscriptions.admit(
                            instance_up,
                            &provided.config,
                            from,
                            eg,
                            udp_endpoint,
                            tcp_endpoint,
                            |_| false,
                            Instant::now(),
                        );
                        match result {
                            AdmitResult::Ack { ttl, .. } => {
                                self.stats.increment(StatEvent::SubscribeAccepted);
                                let ack = EventgroupEntry::subscribe_ack(
                                    eg.service_id,
                                    eg.instance_id,
                                    eg.major_version,
                                    eg.eventgroup_id,
                                    ttl,
                                    eg.counter,
                                );
                                outbox.push(single_entry_message(SdEntry::Eventgroup(ack)));
                            }
                            AdmitResult::Nack(_reason) => {
                                self.stats.increment(StatEvent::SubscribeRejected);
                                let nack = EventgroupEntry::subscribe_nack(
                                    eg.service_id,
                                    eg.instance_id,
                                    eg.major_version,
                                    eg.eventgroup_id,
                                    eg.counter,
                                );
                                outbox.push(single_entry_message(SdEntry::Eventgroup(nack)));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        for message in outbox {
            self.send_unicast(from, &message).await?;
        }

        Ok(())
    }

    pub async fn send_unicast(&mut self, to: SocketAddr, message: &SdMessage) -> Result<()> {
        let bytes = self.frame(message);
        self.unicast.send_to(&bytes, to).await?;
        trace!(to = %to, entries = message.entries.len(), "sd unicast sent");
        Ok(())
    }

    pub async fn send_multicast(&mut self, message: &SdMessage) -> Result<()> {
        let to = self.multicast_addr;
        let bytes = self.frame(message);
        self.multicast.send_to(&bytes, to).await?;
        trace!(entries = message.entries.len(), "sd multicast sent");
        Ok(())
    }

    fn frame(&mut self, message: &SdMessage) -> Vec<u8> {
        let (session_id, reboot) = self.outbound.advance();
        let mut message = message.clone();
        message.flags.reboot = reboot;

        let payload = message.to_bytes();
        let mut header = SomeIpHeader::notification(ServiceId(SD_SERVICE_ID), MethodId(SD_METHOD_ID));
        header.client_id = self.client_id;
        header.session_id = SessionId(session_id);
        header.set_payload_length(payload.len() as u32);

        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&payload);
        out
    }

    pub fn forget_peer(&mut self, peer: std::net::IpAddr, cast: CastKind) {
        self.reboot_tracker.forget(peer, cast);
    }
}

fn validate_sd_header(header: &SomeIpHeader) -> Result<()> {
    use crate::error::SomeIpError;

    if header.service_id != ServiceId(SD_SERVICE_ID) {
        return Err(SomeIpError::invalid_header("not an SD service id"));
    }
    if header.method_id != MethodId(SD_METHOD_ID) {
        return Err(SomeIpError::invalid_header("not the SD method id"));
    }
    if header.message_type != MessageType::Notification {
        return Err(SomeIpError::invalid_header("SD message must be a notification"));
    }
    if header.client_id != ClientId(0) {
        return Err(SomeIpError::invalid_header("SD client id must be zero"));
    }
    if header.return_code != ReturnCode::Ok {
        return Err(SomeIpError::invalid_header("SD return code must be E_OK"));
    }
    if header.interface_version != 0x01 {
        return Err(SomeIpError::invalid_header("unsupported SD interface version"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_sd_header() {
        let header = SomeIpHeader::notification(ServiceId(0x1111), MethodId(SD_METHOD_ID));
        assert!(validate_sd_header(&header).is_err());
    }

    #[test]
    fn accepts_well_formed_sd_header() {
        let header = SomeIpHeader::notification(ServiceId(SD_SERVICE_ID), MethodId(SD_METHOD_ID));
        assert!(validate_sd_header(&header).is_ok());
    }

    #[test]
    fn rejects_wrong_interface_version() {
        let mut header = SomeIpHeader::notification(ServiceId(SD_SERVICE_ID), MethodId(SD_METHOD_ID));
        header.interface_version = 0x02;
        assert!(validate_sd_header(&header).is_err());
    }

    #[test]
    fn rejects_non_ok_return_code() {
        let mut header = SomeIpHeader::notification(ServiceId(SD_SERVICE_ID), MethodId(SD_METHOD_ID));
        header.return_code = ReturnCode::NotOk;
        assert!(validate_sd_header(&header).is_err());
    }
}
