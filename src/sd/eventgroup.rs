//! Eventgroup subscription admission, TTL monitoring, and teardown.
//!
//! One [`EventgroupSubscriptionManager`] per provided service instance.
//! Mirrors the admit/refresh/expire lifecycle of a subscription object that
//! owns its own TTL timer, but collapsed into a single map driven by an
//! explicit `check_ttls(now)` rather than one timer per subscription.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use super::config::{EventgroupConfig, ProvidedInstanceConfig};
use super::entry::EventgroupEntry;
use super::option::Endpoint;
use super::types::EventgroupId;

/// Why a SubscribeEventgroup was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InstanceNotUp,
    UnknownEventgroup,
    MissingRequiredTcp,
    MissingRequiredUdp,
    NoMulticastConfigured,
    TcpConnectionAbsent,
    NegativeTtl,
}

/// Outcome of [`EventgroupSubscriptionManager::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitResult {
    Ack { ttl: u32, multicast: Option<SocketAddr> },
    Nack(RejectReason),
}

/// Whether a subscriber is reachable via explicit endpoints or only via the
/// eventgroup's multicast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Unicast,
    MulticastOnly,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub sd_endpoint: SocketAddr,
    pub udp_endpoint: Option<SocketAddr>,
    pub tcp_endpoint: Option<SocketAddr>,
    pub eventgroup_id: EventgroupId,
    pub kind: SubscriptionKind,
    ttl_deadline: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubKey {
    sd_endpoint: SocketAddr,
    eventgroup_id: EventgroupId,
}

/// Admits, refreshes, and expires subscriptions for one provided instance.
pub struct EventgroupSubscriptionManager {
    subscriptions: HashMap<SubKey, Subscription>,
}

impl EventgroupSubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
        }
    }

    /// Run the admit algorithm for an inbound SubscribeEventgroup.
    ///
    /// `instance_up` reflects whether the server state machine is in a
    /// state that can serve subscriptions at all. `has_tcp_connection` is
    /// queried only when the eventgroup requires TCP.
    #[allow(clippy::too_many_arguments)]
    pub fn admit(
        &mut self,
        instance_up: bool,
        config: &ProvidedInstanceConfig,
        sd_endpoint: SocketAddr,
        entry: &EventgroupEntry,
        udp_endpoint: Option<SocketAddr>,
        tcp_endpoint: Option<SocketAddr>,
        has_tcp_connection: impl FnOnce(SocketAddr) -> bool,
        now: Instant,
    ) -> AdmitResult {
        if entry.is_negative() {
            self.unsubscribe(sd_endpoint, entry.eventgroup_id);
            return AdmitResult::Nack(RejectReason::NegativeTtl);
        }
        if !instance_up {
            return AdmitResult::Nack(RejectReason::InstanceNotUp);
        }

        let Some(eg_config) = config.eventgroup(entry.eventgroup_id) else {
            return AdmitResult::Nack(RejectReason::UnknownEventgroup);
        };

        if eg_config.requires_tcp() && tcp_endpoint.is_none() {
            return AdmitResult::Nack(RejectReason::MissingRequiredTcp);
        }
        if eg_config.requires_udp() && udp_endpoint.is_none() {
            return AdmitResult::Nack(RejectReason::MissingRequiredUdp);
        }

        let kind = if udp_endpoint.is_none() && tcp_endpoint.is_none() {
            if eg_config.multicast_endpoint.is_none() {
                return AdmitResult::Nack(RejectReason::NoMulticastConfigured);
            }
            SubscriptionKind::MulticastOnly
        } else {
            SubscriptionKind::Unicast
        };

        if let Some(tcp) = tcp_endpoint {
            if eg_config.requires_tcp() && !has_tcp_connection(tcp) {
                return AdmitResult::Nack(RejectReason::TcpConnectionAbsent);
            }
        }

        let deadline = ttl_deadline(entry.ttl, now);
        let key = SubKey {
            sd_endpoint,
            eventgroup_id: entry.eventgroup_id,
        };
        self.subscriptions.insert(
            key,
            Subscription {
                sd_endpoint,
                udp_endpoint,
                tcp_endpoint,
                eventgroup_id: entry.eventgroup_id,
                kind,
                ttl_deadline: deadline,
            },
        );

        AdmitResult::Ack {
            ttl: entry.ttl,
            multicast: eg_config.multicast_endpoint,
        }
    }

    /// Remove a subscription on an explicit StopSubscribeEventgroup.
    pub fn unsubscribe(&mut self, sd_endpoint: SocketAddr, eventgroup_id: EventgroupId) {
        self.subscriptions.remove(&SubKey {
            sd_endpoint,
            eventgroup_id,
        });
    }

    /// Tear down every subscription whose deadline has passed, returning
    /// them so the caller can release any associated remote-client state.
    pub fn expire(&mut self, now: Instant) -> Vec<Subscription> {
        let expired_keys: Vec<SubKey> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| matches!(sub.ttl_deadline, Some(d) if now >= d))
            .map(|(k, _)| *k)
            .collect();
        expired_keys
            .into_iter()
            .filter_map(|k| self.subscriptions.remove(&k))
            .collect()
    }

    /// Tear down subscriptions whose TCP endpoint matches `lost_peer` and
    /// whose eventgroup actually required TCP.
    pub fn on_tcp_lost(&mut self, lost_peer: SocketAddr, config: &ProvidedInstanceConfig) -> Vec<Subscription> {
        let dropped_keys: Vec<SubKey> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| {
                sub.tcp_endpoint == Some(lost_peer)
                    && config
                        .eventgroup(sub.eventgroup_id)
                        .is_some_and(EventgroupConfig::requires_tcp)
            })
            .map(|(k, _)| *k)
            .collect();
        dropped_keys
            .into_iter()
            .filter_map(|k| self.subscriptions.remove(&k))
            .collect()
    }

    /// Tear down every subscription whose SD endpoint address matches a
    /// peer that was detected to have rebooted.
    pub fn on_peer_rebooted(&mut self, peer: IpAddr) -> Vec<Subscription> {
        let dropped_keys: Vec<SubKey> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.sd_endpoint.ip() == peer)
            .map(|(k, _)| *k)
            .collect();
        dropped_keys
            .into_iter()
            .filter_map(|k| self.subscriptions.remove(&k))
            .collect()
    }

    /// Drop every subscription, e.g. on service-down. No wire message is
    /// emitted; peers learn via the StopOffer.
    pub fn clear(&mut self) -> Vec<Subscription> {
        self.subscriptions.drain().map(|(_, v)| v).collect()
    }

    pub fn subscribers_for(&self, eventgroup_id: EventgroupId) -> Vec<&Subscription> {
        self.subscriptions
            .values()
            .filter(|sub| sub.eventgroup_id == eventgroup_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl Default for EventgroupSubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn ttl_deadline(ttl: u32, now: Instant) -> Option<Instant> {
    if ttl == 0xFFFFFF {
        None
    } else {
        Some(now + Duration::from_secs(ttl as u64))
    }
}

/// Policy for delivering one outbound event to an eventgroup's subscribers:
/// multicast once the subscriber count reaches the configured threshold,
/// otherwise unicast to each, deduplicated by endpoint.
pub fn dispatch_targets(config: &EventgroupConfig, subscribers: &[&Subscription]) -> DispatchPlan {
    if let (Some(threshold), Some(multicast)) = (config.multicast_threshold, config.multicast_endpoint) {
        if subscribers.len() as u32 >= threshold {
            return DispatchPlan::Multicast(multicast);
        }
    }

    let mut seen = std::collections::HashSet::new();
    let mut unicast = Vec::new();
    for sub in subscribers {
        let target = match (sub.tcp_endpoint, sub.udp_endpoint) {
            (Some(tcp), _) => Endpoint::tcp(tcp),
            (None, Some(udp)) => Endpoint::udp(udp),
            (None, None) => continue,
        };
        if seen.insert(target.address) {
            unicast.push(target);
        }
    }
    DispatchPlan::Unicast(unicast)
}

pub enum DispatchPlan {
    Multicast(SocketAddr),
    Unicast(Vec<Endpoint>),
}
