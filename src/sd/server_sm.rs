//! Server-side SD state machine, one instance per provided service.
//!
//! Drives OFFER repetition and the cyclic re-offer once `Main` is reached,
//! and answers `FindService` while an anti-flood window is respected.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::header::ServiceId;

use super::config::ServerTiming;
use super::entry::{ServiceEntry, SdEntry};
use super::option::Endpoint;
use super::types::InstanceId;

/// Observable state of a provided service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Down,
    WaitForService,
    Initial,
    Repetition { attempts_left: u32 },
    Main,
}

pub struct ServerSm {
    pub service_id: ServiceId,
    pub instance_id: InstanceId,
    pub major_version: u8,
    pub minor_version: u32,
    pub endpoints: Vec<Endpoint>,
    timing: ServerTiming,
    state: ServerState,
    last_unicast_reply: std::collections::HashMap<SocketAddr, Instant>,
}

impl ServerSm {
    pub fn new(
        service_id: ServiceId,
        instance_id: InstanceId,
        major_version: u8,
        minor_version: u32,
        endpoints: Vec<Endpoint>,
        timing: ServerTiming,
    ) -> Self {
        Self {
            service_id,
            instance_id,
            major_version,
            minor_version,
            endpoints,
            timing,
            state: ServerState::Down,
            last_unicast_reply: std::collections::HashMap::new(),
        }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// The network interface this instance offers on became available.
    /// Moves out of `Down` into `WaitForService`, where the instance sits
    /// until the local service implementation itself signals readiness via
    /// [`Self::service_up`].
    pub fn network_up(&mut self) {
        if self.state == ServerState::Down {
            self.state = ServerState::WaitForService;
        }
    }

    /// The local service implementation became available; begin the
    /// initial-delay phase leading into OFFER repetition. Valid from `Down`
    /// (network and service readiness reported together) or from
    /// `WaitForService` (network was already up).
    pub fn service_up(&mut self) -> Duration {
        self.state = ServerState::Initial;
        self.timing.initial_delay_min
            .max(Duration::ZERO)
            .min(self.timing.initial_delay_max)
    }

    /// Initial delay elapsed without an external reason to stay put; begin
    /// the repetition phase, returning the first multicast OFFER to send.
    pub fn start_repetition(&mut self) -> SdEntry {
        self.state = ServerState::Repetition {
            attempts_left: self.timing.initial_repetitions_max,
        };
        self.offer_entry(self.offer_ttl())
    }

    /// Called each time the repetition backoff timer fires. Returns the
    /// OFFER to (re-)send while attempts remain, transitioning silently to
    /// `Main` once they are exhausted.
    pub fn on_repetition_tick(&mut self) -> Option<SdEntry> {
        match &mut self.state {
            ServerState::Repetition { attempts_left } if *attempts_left > 0 => {
                *attempts_left -= 1;
                Some(self.offer_entry(self.offer_ttl()))
            }
            ServerState::Repetition { .. } => {
                self.state = ServerState::Main;
                None
            }
            _ => None,
        }
    }

    /// Cyclic OFFER timer fired while in `Main`.
    pub fn on_cyclic_tick(&mut self) -> Option<SdEntry> {
        if self.state == ServerState::Main {
            Some(self.offer_entry(self.offer_ttl()))
        } else {
            None
        }
    }

    pub fn cyclic_offer_delay(&self) -> Option<Duration> {
        self.timing.cyclic_offer_delay
    }

    /// Whether `entry` (service_id/instance/major/minor, with the incoming
    /// entry's own wildcards) refers to this instance.
    pub fn matches_find(&self, entry_service: ServiceId, entry_instance: InstanceId, major: u8, minor: u32) -> bool {
        entry_service == self.service_id
            && (entry_instance.is_any() || entry_instance == self.instance_id)
            && (major == 0xFF || major == self.major_version)
            && (minor == 0xFFFF_FFFF || minor == self.minor_version)
    }

    /// Handle an inbound FindService matching this instance from `from`.
    /// Returns the unicast OFFER to send unless the anti-flood window for
    /// `from` has not yet elapsed.
    pub fn on_find_service(&mut self, from: SocketAddr, now: Instant) -> Option<SdEntry> {
        if !matches!(
            self.state,
            ServerState::Initial | ServerState::Repetition { .. } | ServerState::Main
        ) {
            return None;
        }
        if let Some(last) = self.last_unicast_reply.get(&from) {
            if now.saturating_duration_since(*last) < self.timing.request_response_delay_min {
                return None;
            }
        }
        self.last_unicast_reply.insert(from, now);
        Some(self.offer_entry(self.offer_ttl()))
    }

    /// Service or network went down; emit a StopOffer and reset to `Down`.
    pub fn service_down(&mut self) -> SdEntry {
        self.state = ServerState::Down;
        self.last_unicast_reply.clear();
        SdEntry::Service(ServiceEntry::stop_offer_service(
            self.service_id,
            self.instance_id,
            self.major_version,
            self.minor_version,
        ))
    }

    fn offer_ttl(&self) -> u32 {
        self.timing
            .cyclic_offer_delay
            .map(|d| (d.as_secs() as u32).saturating_mul(3).max(3))
            .unwrap_or(0xFFFFFF)
    }

    fn offer_entry(&self, ttl: u32) -> SdEntry {
        SdEntry::Service(ServiceEntry::offer_service(
            self.service_id,
            self.instance_id,
            self.major_version,
            self.minor_version,
            ttl,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sm() -> ServerSm {
        ServerSm::new(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            0,
            vec![Endpoint::udp("10.0.0.2:30501".parse().unwrap())],
            ServerTiming::default(),
        )
    }

    #[test]
    fn service_up_moves_to_initial() {
        let mut sm = sm();
        sm.service_up();
        assert_eq!(*sm.state(), ServerState::Initial);
    }

    #[test]
    fn network_up_waits_for_service_before_offering() {
        let mut sm = sm();
        sm.network_up();
        assert_eq!(*sm.state(), ServerState::WaitForService);
        sm.service_up();
        assert_eq!(*sm.state(), ServerState::Initial);
    }

    #[test]
    fn repetition_exhausts_into_main() {
        let mut sm = sm();
        sm.service_up();
        sm.start_repetition();
        assert_eq!(*sm.state(), ServerState::Repetition { attempts_left: 3 });
        for expected in [2, 1, 0] {
            assert!(sm.on_repetition_tick().is_some());
            assert_eq!(*sm.state(), ServerState::Repetition { attempts_left: expected });
        }
        assert!(sm.on_repetition_tick().is_none());
        assert_eq!(*sm.state(), ServerState::Main);
    }

    #[test]
    fn find_service_wildcards_match() {
        let sm = sm();
        assert!(sm.matches_find(ServiceId(0x1234), InstanceId::ANY, 0xFF, 0xFFFF_FFFF));
        assert!(sm.matches_find(ServiceId(0x1234), InstanceId(0x0001), 1, 0));
        assert!(!sm.matches_find(ServiceId(0x1234), InstanceId(0x0002), 1, 0));
    }

    #[test]
    fn anti_flood_window_suppresses_repeat_replies() {
        let mut sm = sm();
        sm.service_up();
        sm.start_repetition();
        sm.on_repetition_tick();
        sm.on_repetition_tick();
        sm.on_repetition_tick();
        sm.on_repetition_tick(); // settle in Main

        let from: SocketAddr = "10.0.0.5:30490".parse().unwrap();
        let now = Instant::now();
        assert!(sm.on_find_service(from, now).is_some());
        assert!(sm.on_find_service(from, now + Duration::from_millis(1)).is_none());
    }

    #[test]
    fn service_down_emits_stop_offer_and_resets() {
        let mut sm = sm();
        sm.service_up();
        let entry = sm.service_down();
        assert_eq!(entry.ttl(), 0);
        assert_eq!(*sm.state(), ServerState::Down);
    }
}
