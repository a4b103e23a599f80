//! Trait seams the SD core talks to but does not own an implementation of:
//! access control, statistics, and the data-plane hand-off to remote peers.
//!
//! These exist so the state machines and the eventgroup manager can be unit
//! tested against small hand-written fakes instead of a real IPC/network
//! stack, matching how collaborators are modeled as injected interfaces
//! rather than concrete types throughout this crate.

use std::net::SocketAddr;

use crate::header::ServiceId;

use super::option::Endpoint;
use super::types::{EventgroupId, InstanceId};

/// Access-control decision points consulted before acting on an inbound SD
/// entry. A deny causes the entry to be dropped silently.
pub trait IamPolicy {
    fn check_find_service(&self, service_id: ServiceId, instance_id: InstanceId, from: SocketAddr) -> bool;
    fn check_offer_service(&self, service_id: ServiceId, instance_id: InstanceId, from: SocketAddr) -> bool;
    fn check_subscribe_eventgroup(
        &self,
        service_id: ServiceId,
        instance_id: InstanceId,
        eventgroup_id: EventgroupId,
        from: SocketAddr,
    ) -> bool;
}

/// An [`IamPolicy`] that allows everything; the default when no access
/// control has been configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl IamPolicy for AllowAll {
    fn check_find_service(&self, _: ServiceId, _: InstanceId, _: SocketAddr) -> bool {
        true
    }
    fn check_offer_service(&self, _: ServiceId, _: InstanceId, _: SocketAddr) -> bool {
        true
    }
    fn check_subscribe_eventgroup(&self, _: ServiceId, _: InstanceId, _: EventgroupId, _: SocketAddr) -> bool {
        true
    }
}

/// Kinds of events the statistics sink is told about. Carried as a tagged
/// enum rather than a string so a sink can switch on it cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    HeaderRejected,
    IamDenied,
    SubscribeAccepted,
    SubscribeRejected,
    SubscriptionExpired,
    RebootDetected,
}

/// Sink for operational counters. The core only ever increments; aggregation
/// and export are the embedding daemon's concern.
pub trait StatisticsSink {
    fn increment(&self, event: StatEvent);
}

/// A [`StatisticsSink`] that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStatistics;

impl StatisticsSink for NullStatistics {
    fn increment(&self, _event: StatEvent) {}
}

/// The data-plane counterpart for a remote client that subscribed to an
/// eventgroup: where to deliver events, and whether its TCP connection
/// (if required) currently exists.
pub trait RemoteClient {
    fn has_tcp_connection(&self, endpoint: &Endpoint) -> bool;
    fn on_subscription_added(&self, eventgroup_id: EventgroupId, subscriber: SocketAddr);
    fn on_subscription_removed(&self, eventgroup_id: EventgroupId, subscriber: SocketAddr);
}

/// Notified when a required service instance's offer state changes.
pub trait OfferObserver {
    fn on_offer(&self, instance_id: InstanceId, endpoints: &[Endpoint]);
    fn on_stop_offer(&self, instance_id: InstanceId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_permits_everything() {
        let policy = AllowAll;
        let addr: SocketAddr = "10.0.0.1:30490".parse().unwrap();
        assert!(policy.check_find_service(ServiceId(1), InstanceId(1), addr));
        assert!(policy.check_offer_service(ServiceId(1), InstanceId(1), addr));
        assert!(policy.check_subscribe_eventgroup(ServiceId(1), InstanceId(1), EventgroupId(1), addr));
    }

    #[test]
    fn null_statistics_does_not_panic() {
        let sink = NullStatistics;
        sink.increment(StatEvent::HeaderRejected);
    }
}
