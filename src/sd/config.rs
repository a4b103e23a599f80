//! Configuration types consumed by the SD core.
//!
//! These are plain, already-validated structs: parsing them out of a JSON
//! document (or any other on-disk format) is a concern of the daemon binary
//! that embeds this crate, not of the core itself. Deriving `Deserialize`
//! keeps that loader a thin shim instead of hand-written field glue.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::header::ServiceId;

use super::types::{EventgroupId, InstanceId};

/// How a required service instance should be treated once discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunicationType {
    /// Run SD and forward the resulting endpoints to the communication layer.
    SdAndCommunication,
    /// Only track discovery state; never hand off to the communication layer.
    SdOnly,
    /// Skip SD; endpoints are configured statically elsewhere.
    CommunicationOnly,
}

/// Timing parameters for the client-side (required instance) state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientTiming {
    pub initial_delay_min: Duration,
    pub initial_delay_max: Duration,
    pub initial_repetitions_base_delay: Duration,
    pub initial_repetitions_max: u32,
}

impl Default for ClientTiming {
    fn default() -> Self {
        Self {
            initial_delay_min: Duration::from_millis(0),
            initial_delay_max: Duration::from_millis(500),
            initial_repetitions_base_delay: Duration::from_millis(200),
            initial_repetitions_max: 3,
        }
    }
}

/// Timing parameters for the server-side (provided instance) state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTiming {
    pub initial_delay_min: Duration,
    pub initial_delay_max: Duration,
    pub initial_repetitions_base_delay: Duration,
    pub initial_repetitions_max: u32,
    pub cyclic_offer_delay: Option<Duration>,
    pub request_response_delay_min: Duration,
    pub request_response_delay_max: Duration,
}

impl Default for ServerTiming {
    fn default() -> Self {
        Self {
            initial_delay_min: Duration::from_millis(0),
            initial_delay_max: Duration::from_millis(500),
            initial_repetitions_base_delay: Duration::from_millis(200),
            initial_repetitions_max: 3,
            cyclic_offer_delay: Some(Duration::from_secs(2)),
            request_response_delay_min: Duration::from_millis(10),
            request_response_delay_max: Duration::from_millis(50),
        }
    }
}

/// Per-event transport requirement within an eventgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTransport {
    Udp,
    Tcp,
}

/// Configuration of a single eventgroup offered by a provided instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventgroupConfig {
    pub eventgroup_id: EventgroupId,
    pub event_transports: Vec<EventTransport>,
    /// Minimum number of subscribers before multicast delivery replaces
    /// per-subscriber unicast. `None` disables multicast entirely.
    pub multicast_threshold: Option<u32>,
    pub multicast_endpoint: Option<SocketAddr>,
}

impl EventgroupConfig {
    pub fn requires_tcp(&self) -> bool {
        self.event_transports.contains(&EventTransport::Tcp)
    }

    pub fn requires_udp(&self) -> bool {
        self.event_transports.contains(&EventTransport::Udp)
    }
}

/// Configuration of a service instance this daemon provides locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidedInstanceConfig {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub major_version: u8,
    pub minor_version: u32,
    pub udp_endpoint: Option<SocketAddr>,
    pub tcp_endpoint: Option<SocketAddr>,
    pub eventgroups: Vec<EventgroupConfig>,
    pub timing: ServerTiming,
}

impl ProvidedInstanceConfig {
    pub fn eventgroup(&self, id: EventgroupId) -> Option<&EventgroupConfig> {
        self.eventgroups.iter().find(|eg| eg.eventgroup_id == id)
    }
}

/// Configuration of a service instance this daemon requires (consumes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredInstanceConfig {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub major_version: u8,
    pub minor_version: u32,
    pub communication_type: CommunicationType,
    pub timing: ClientTiming,
}

/// Maximum size of a single SD datagram before the scheduler must split it
/// across multiple transmissions while keeping the session id shared.
pub const DEFAULT_MAX_SD_MESSAGE_SIZE: usize = 1400;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eventgroup_requires_transport() {
        let eg = EventgroupConfig {
            eventgroup_id: EventgroupId(1),
            event_transports: vec![EventTransport::Tcp],
            multicast_threshold: None,
            multicast_endpoint: None,
        };
        assert!(eg.requires_tcp());
        assert!(!eg.requires_udp());
    }

    #[test]
    fn default_client_timing_is_sane() {
        let timing = ClientTiming::default();
        assert!(timing.initial_delay_max >= timing.initial_delay_min);
        assert!(timing.initial_repetitions_max > 0);
    }
}
