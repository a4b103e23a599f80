//! Client-side SD state machine, one instance per required service.
//!
//! Drives `FindService` repetition while a matching instance is unknown,
//! and tracks the OFFER TTL once one has been found.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::header::ServiceId;

use super::collaborators::OfferObserver;
use super::config::ClientTiming;
use super::entry::{EventgroupEntry, ServiceEntry, SdEntry};
use super::option::Endpoint;
use super::types::InstanceId;

/// Observable state of a required service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    NotRequested,
    InitialWait,
    Repetition { attempts_left: u32 },
    Main { has_offer: bool },
    Stopped,
}

/// One required service instance and the FindService/TTL bookkeeping that
/// drives its discovery.
pub struct ClientSm {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub major_version: u8,
    pub minor_version: u32,
    timing: ClientTiming,
    state: ClientState,
    offer_deadline: Option<Instant>,
    endpoints: Vec<Endpoint>,
    observers: Vec<std::rc::Weak<dyn OfferObserver>>,
}

impl ClientSm {
    pub fn new(
        service_id: ServiceId,
        instance_id: InstanceId,
        major_version: u8,
        minor_version: u32,
        timing: ClientTiming,
    ) -> Self {
        Self {
            service_id,
            instance_id,
            major_version,
            minor_version,
            timing,
            state: ClientState::NotRequested,
            offer_deadline: None,
            endpoints: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn register_observer(&mut self, observer: std::rc::Weak<dyn OfferObserver>) {
        self.observers.push(observer);
    }

    /// Transition out of `NotRequested` and begin the initial-wait phase.
    /// Returns the jittered delay after which `start_repetition` should be
    /// called by the owning reactor/timer.
    pub fn request(&mut self) -> Duration {
        self.state = ClientState::InitialWait;
        let min = self.timing.initial_delay_min;
        let max = self.timing.initial_delay_max;
        if max > min {
            let jitter_ms = rand::rng().random_range(0..=(max - min).as_millis() as u64);
            min + Duration::from_millis(jitter_ms)
        } else {
            min
        }
    }

    /// Called once the initial-wait delay has elapsed. Returns the
    /// FindService entry to emit immediately, unless an offer already
    /// arrived during the wait.
    pub fn start_repetition(&mut self) -> Option<SdEntry> {
        if matches!(self.state, ClientState::Main { .. }) {
            return None;
        }
        self.state = ClientState::Repetition {
            attempts_left: self.timing.initial_repetitions_max,
        };
        Some(self.find_service_entry())
    }

    /// Called each time the repetition timer fires. Returns the next
    /// FindService entry to send (if attempts remain) and whether the
    /// machine has now settled into `Main` silently.
    pub fn on_repetition_tick(&mut self) -> Option<SdEntry> {
        match &mut self.state {
            ClientState::Repetition { attempts_left } if *attempts_left > 0 => {
                *attempts_left -= 1;
                Some(self.find_service_entry())
            }
            ClientState::Repetition { .. } => {
                self.state = ClientState::Main { has_offer: false };
                None
            }
            _ => None,
        }
    }

    fn find_service_entry(&self) -> SdEntry {
        SdEntry::Service(ServiceEntry::find_service(
            self.service_id,
            self.instance_id,
            self.major_version,
            self.minor_version,
        ))
    }

    /// Whether `entry` refers to this instance, honoring the wildcard
    /// instance id a client may configure for itself.
    pub fn matches(&self, entry_service: ServiceId, entry_instance: InstanceId, major: u8, minor: u32) -> bool {
        entry_service == self.service_id
            && major == self.major_version
            && minor == self.minor_version
            && (self.instance_id.is_any() || entry_instance == self.instance_id)
    }

    /// Handle an inbound OfferService entry that matched this instance.
    pub fn on_offer(&mut self, endpoints: Vec<Endpoint>, ttl: u32, now: Instant) {
        self.endpoints = endpoints;
        self.offer_deadline = if ttl == 0xFFFFFF {
            None
        } else {
            Some(now + Duration::from_secs(ttl as u64))
        };
        self.state = ClientState::Main { has_offer: true };
        self.notify_offer();
    }

    /// Handle an inbound StopOfferService entry that matched this instance.
    pub fn on_stop_offer(&mut self) {
        self.endpoints.clear();
        self.offer_deadline = None;
        if !matches!(self.state, ClientState::NotRequested | ClientState::Stopped) {
            self.state = ClientState::Main { has_offer: false };
        }
        self.notify_stop_offer();
    }

    /// Check the offer TTL against `now`, tearing it down if expired.
    pub fn check_ttl(&mut self, now: Instant) {
        if let Some(deadline) = self.offer_deadline {
            if now >= deadline {
                self.on_stop_offer();
            }
        }
    }

    pub fn release(&mut self) {
        self.state = ClientState::NotRequested;
        self.offer_deadline = None;
        self.endpoints.clear();
    }

    pub fn network_down(&mut self) {
        self.state = ClientState::NotRequested;
        self.offer_deadline = None;
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    fn notify_offer(&mut self) {
        let endpoints = self.endpoints.clone();
        self.observers.retain(|weak| {
            if let Some(obs) = weak.upgrade() {
                obs.on_offer(self.instance_id, &endpoints);
                true
            } else {
                false
            }
        });
    }

    fn notify_stop_offer(&mut self) {
        self.observers.retain(|weak| {
            if let Some(obs) = weak.upgrade() {
                obs.on_stop_offer(self.instance_id);
                true
            } else {
                false
            }
        });
    }

    /// Build a SubscribeEventgroup entry for this instance, to be scheduled
    /// by the caller through the send scheduler.
    pub fn subscribe_entry(
        &self,
        eventgroup_id: super::types::EventgroupId,
        ttl: u32,
    ) -> EventgroupEntry {
        EventgroupEntry::subscribe(
            self.service_id,
            self.instance_id,
            self.major_version,
            eventgroup_id,
            ttl,
        )
    }
}

/// Where a required instance sends its SD traffic; used by the owning
/// endpoint to decide unicast vs. multicast destinations.
#[derive(Debug, Clone, Copy)]
pub struct ClientDestination {
    pub unicast: SocketAddr,
    pub multicast: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sd::types::EventgroupId;

    fn sm() -> ClientSm {
        ClientSm::new(ServiceId(0x1234), InstanceId(0x0001), 1, 0, ClientTiming::default())
    }

    #[test]
    fn request_moves_to_initial_wait() {
        let mut sm = sm();
        sm.request();
        assert_eq!(*sm.state(), ClientState::InitialWait);
    }

    #[test]
    fn repetition_counts_down_then_settles_in_main() {
        let mut sm = sm();
        sm.request();
        let entry = sm.start_repetition();
        assert!(entry.is_some());
        assert_eq!(*sm.state(), ClientState::Repetition { attempts_left: 3 });

        for expected in [2, 1, 0] {
            let entry = sm.on_repetition_tick();
            assert!(entry.is_some());
            assert_eq!(*sm.state(), ClientState::Repetition { attempts_left: expected });
        }

        assert!(sm.on_repetition_tick().is_none());
        assert_eq!(*sm.state(), ClientState::Main { has_offer: false });
    }

    #[test]
    fn matching_offer_moves_directly_to_main_and_stops_repetition() {
        let mut sm = sm();
        sm.request();
        sm.start_repetition();
        let endpoint = Endpoint::udp("10.0.0.2:30501".parse().unwrap());
        sm.on_offer(vec![endpoint.clone()], 10, Instant::now());
        assert_eq!(*sm.state(), ClientState::Main { has_offer: true });
        assert_eq!(sm.endpoints(), &[endpoint]);
    }

    #[test]
    fn ttl_expiry_tears_down_offer() {
        let mut sm = sm();
        let now = Instant::now();
        sm.on_offer(vec![Endpoint::udp("10.0.0.2:30501".parse().unwrap())], 5, now);
        sm.check_ttl(now + Duration::from_secs(6));
        assert_eq!(*sm.state(), ClientState::Main { has_offer: false });
        assert!(sm.endpoints().is_empty());
    }

    #[test]
    fn forever_ttl_never_expires() {
        let mut sm = sm();
        let now = Instant::now();
        sm.on_offer(vec![], 0xFFFFFF, now);
        sm.check_ttl(now + Duration::from_secs(1_000_000));
        assert_eq!(*sm.state(), ClientState::Main { has_offer: true });
    }

    #[test]
    fn wildcard_instance_matches_any_instance() {
        let sm = ClientSm::new(ServiceId(0x1234), InstanceId::ANY, 1, 0, ClientTiming::default());
        assert!(sm.matches(ServiceId(0x1234), InstanceId(0x0042), 1, 0));
        assert!(!sm.matches(ServiceId(0x1234), InstanceId(0x0042), 2, 0));
    }

    #[test]
    fn release_returns_to_not_requested() {
        let mut sm = sm();
        sm.request();
        sm.release();
        assert_eq!(*sm.state(), ClientState::NotRequested);
    }

    #[test]
    fn subscribe_entry_carries_instance_identity() {
        let sm = sm();
        let entry = sm.subscribe_entry(EventgroupId(0x0001), 5);
        assert_eq!(entry.service_id, ServiceId(0x1234));
        assert_eq!(entry.eventgroup_id, EventgroupId(0x0001));
        assert_eq!(entry.ttl, 5);
    }
}
