//! Offer observer registry: multiplexes OFFER/STOP-OFFER notifications to
//! whichever local consumers are interested in a given service instance.
//!
//! Supports more than one observer per instance (a required service
//! instance may be watched by several local consumers at once) and
//! tolerates an observer releasing itself from inside its own callback by
//! snapshotting the list before dispatch and pruning dead weak references
//! as it goes rather than mutating the map mid-iteration.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::collaborators::OfferObserver;
use super::option::Endpoint;
use super::types::InstanceId;

/// Keyed by the required instance's identity, as a human-readable tag
/// rather than the full [`ServiceInstanceId`](super::types::ServiceInstanceId)
/// so instances sharing the wildcard instance id can still be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverKey {
    pub service_id: crate::header::ServiceId,
    pub instance_id: InstanceId,
}

#[derive(Default)]
pub struct OfferObserverRegistry {
    observers: HashMap<ObserverKey, Vec<Weak<dyn OfferObserver>>>,
}

impl OfferObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: ObserverKey, observer: &Rc<dyn OfferObserver>) {
        self.observers.entry(key).or_default().push(Rc::downgrade(observer));
    }

    /// Dispatch an OFFER notification to every live observer registered for
    /// `key`, pruning any that have since been dropped.
    pub fn notify_offer(&mut self, key: ObserverKey, endpoints: &[Endpoint]) {
        let Some(list) = self.observers.get_mut(&key) else {
            return;
        };
        let snapshot = list.clone();
        list.retain(|w| w.strong_count() > 0);
        for weak in snapshot {
            if let Some(observer) = weak.upgrade() {
                observer.on_offer(key.instance_id, endpoints);
            }
        }
    }

    /// Dispatch a STOP-OFFER notification to every live observer registered
    /// for `key`.
    pub fn notify_stop_offer(&mut self, key: ObserverKey) {
        let Some(list) = self.observers.get_mut(&key) else {
            return;
        };
        let snapshot = list.clone();
        list.retain(|w| w.strong_count() > 0);
        for weak in snapshot {
            if let Some(observer) = weak.upgrade() {
                observer.on_stop_offer(key.instance_id);
            }
        }
    }

    pub fn observer_count(&self, key: ObserverKey) -> usize {
        self.observers
            .get(&key)
            .map(|list| list.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ServiceId;
    use std::cell::RefCell;

    struct Recorder {
        offers: RefCell<Vec<InstanceId>>,
        stops: RefCell<Vec<InstanceId>>,
    }

    impl OfferObserver for Recorder {
        fn on_offer(&self, instance_id: InstanceId, _endpoints: &[Endpoint]) {
            self.offers.borrow_mut().push(instance_id);
        }
        fn on_stop_offer(&self, instance_id: InstanceId) {
            self.stops.borrow_mut().push(instance_id);
        }
    }

    fn key() -> ObserverKey {
        ObserverKey {
            service_id: ServiceId(0x1234),
            instance_id: InstanceId(0x0001),
        }
    }

    #[test]
    fn registered_observer_receives_offer() {
        let mut registry = OfferObserverRegistry::new();
        let recorder: Rc<dyn OfferObserver> = Rc::new(Recorder {
            offers: RefCell::new(Vec::new()),
            stops: RefCell::new(Vec::new()),
        });
        registry.register(key(), &recorder);
        registry.notify_offer(key(), &[]);
        assert_eq!(registry.observer_count(key()), 1);
    }

    #[test]
    fn dropped_observer_is_pruned_on_next_notify() {
        let mut registry = OfferObserverRegistry::new();
        {
            let recorder: Rc<dyn OfferObserver> = Rc::new(Recorder {
                offers: RefCell::new(Vec::new()),
                stops: RefCell::new(Vec::new()),
            });
            registry.register(key(), &recorder);
        }
        registry.notify_offer(key(), &[]);
        assert_eq!(registry.observer_count(key()), 0);
    }

    #[test]
    fn multiple_observers_on_same_instance_all_get_notified() {
        let mut registry = OfferObserverRegistry::new();
        let a: Rc<dyn OfferObserver> = Rc::new(Recorder {
            offers: RefCell::new(Vec::new()),
            stops: RefCell::new(Vec::new()),
        });
        let b: Rc<dyn OfferObserver> = Rc::new(Recorder {
            offers: RefCell::new(Vec::new()),
            stops: RefCell::new(Vec::new()),
        });
        registry.register(key(), &a);
        registry.register(key(), &b);
        registry.notify_stop_offer(key());
        assert_eq!(registry.observer_count(key()), 2);
    }
}
