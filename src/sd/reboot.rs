//! Session-id and reboot-flag bookkeeping for SD traffic.
//!
//! Every outbound SD message carries a monotonically increasing session id
//! and a reboot flag that is set for the first message sent after process
//! start and cleared again once the id wraps. Every inbound message is
//! checked against the sender's last known session id so a silent ECU reboot
//! can be detected and the stale state torn down.

use std::collections::HashMap;
use std::net::IpAddr;

use super::types::CastKind;

/// Tracks the outbound session id/reboot flag for one (local endpoint, cast
/// kind) pair.
#[derive(Debug, Clone)]
pub struct OutboundSession {
    next_session_id: u16,
    reboot_flag: bool,
}

impl OutboundSession {
    pub fn new() -> Self {
        Self {
            next_session_id: 1,
            reboot_flag: true,
        }
    }

    /// Returns the (session_id, reboot_flag) to stamp on the next outbound
    /// message, then advances state for the following call.
    pub fn advance(&mut self) -> (u16, bool) {
        let stamped = (self.next_session_id, self.reboot_flag);
        if self.next_session_id == 0xFFFF {
            self.next_session_id = 1;
            self.reboot_flag = false;
        } else {
            self.next_session_id += 1;
        }
        stamped
    }
}

impl Default for OutboundSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of observing an inbound SD message's session id and reboot flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionObservation {
    /// First message ever seen from this peer; not a reboot.
    FirstContact,
    /// Continuation of the same boot.
    Continuation,
    /// The peer's reboot flag/session id sequence indicates it restarted.
    Rebooted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PeerKey {
    addr: IpAddr,
    cast: CastKindKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CastKindKey {
    Unicast,
    Multicast,
}

impl From<CastKind> for CastKindKey {
    fn from(k: CastKind) -> Self {
        match k {
            CastKind::Unicast => CastKindKey::Unicast,
            CastKind::Multicast => CastKindKey::Multicast,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerState {
    last_session_id: u16,
}

/// Detects reboots of remote SD peers by watching for a non-monotonic
/// session id sequence, as flagged by the peer's own reboot bit.
#[derive(Debug, Default)]
pub struct RebootTracker {
    peers: HashMap<PeerKey, PeerState>,
}

impl RebootTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound message's session id and reboot flag for `peer`,
    /// returning whether this observation constitutes a reboot.
    pub fn observe(
        &mut self,
        peer: IpAddr,
        cast: CastKind,
        session_id: u16,
        reboot_flag: bool,
    ) -> SessionObservation {
        let key = PeerKey {
            addr: peer,
            cast: cast.into(),
        };

        match self.peers.get_mut(&key) {
            None => {
                self.peers.insert(key, PeerState { last_session_id: session_id });
                SessionObservation::FirstContact
            }
            Some(state) => {
                let is_monotonic = session_id == state.last_session_id.wrapping_add(1)
                    || (state.last_session_id == 0xFFFF && session_id == 1);
                let rebooted = reboot_flag && !is_monotonic;
                state.last_session_id = session_id;
                if rebooted {
                    SessionObservation::Rebooted
                } else {
                    SessionObservation::Continuation
                }
            }
        }
    }

    /// Drop tracked state for a peer, e.g. after a reboot has been handled.
    pub fn forget(&mut self, peer: IpAddr, cast: CastKind) {
        self.peers.remove(&PeerKey {
            addr: peer,
            cast: cast.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn outbound_session_starts_at_one_with_reboot_set() {
        let mut session = OutboundSession::new();
        assert_eq!(session.advance(), (1, true));
        assert_eq!(session.advance(), (2, false));
    }

    #[test]
    fn outbound_session_wraps_and_clears_reboot() {
        let mut session = OutboundSession {
            next_session_id: 0xFFFF,
            reboot_flag: false,
        };
        assert_eq!(session.advance(), (0xFFFF, false));
        assert_eq!(session.advance(), (1, false));
    }

    #[test]
    fn first_message_from_peer_is_first_contact() {
        let mut tracker = RebootTracker::new();
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(
            tracker.observe(peer, CastKind::Unicast, 1, true),
            SessionObservation::FirstContact
        );
    }

    #[test]
    fn monotonic_sessions_are_not_a_reboot() {
        let mut tracker = RebootTracker::new();
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        tracker.observe(peer, CastKind::Unicast, 5, false);
        assert_eq!(
            tracker.observe(peer, CastKind::Unicast, 6, false),
            SessionObservation::Continuation
        );
    }

    #[test]
    fn reboot_flag_with_session_reset_is_a_reboot() {
        let mut tracker = RebootTracker::new();
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        tracker.observe(peer, CastKind::Unicast, 5, false);
        tracker.observe(peer, CastKind::Unicast, 6, false);
        assert_eq!(
            tracker.observe(peer, CastKind::Unicast, 1, true),
            SessionObservation::Rebooted
        );
    }

    #[test]
    fn wrap_around_is_not_mistaken_for_reboot() {
        let mut tracker = RebootTracker::new();
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        tracker.observe(peer, CastKind::Unicast, 0xFFFF, false);
        assert_eq!(
            tracker.observe(peer, CastKind::Unicast, 1, false),
            SessionObservation::Continuation
        );
    }

    #[test]
    fn unicast_and_multicast_tracked_independently() {
        let mut tracker = RebootTracker::new();
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        tracker.observe(peer, CastKind::Unicast, 10, false);
        assert_eq!(
            tracker.observe(peer, CastKind::Multicast, 1, true),
            SessionObservation::FirstContact
        );
    }
}
