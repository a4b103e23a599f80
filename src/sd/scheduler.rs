//! Outbound SD message scheduling: coalescing, TTL-independent delay
//! windows, cyclic offers, and the repetition-phase backoff.
//!
//! The scheduler is driven explicitly by `tick(now)` rather than by sleeping
//! internally, so state machines and tests can advance it deterministically.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;

use super::config::DEFAULT_MAX_SD_MESSAGE_SIZE;
use super::entry::SdEntry;
use super::types::SD_ENTRY_SIZE;

/// Bytes of SD message framing (flags/reserved, entries length, options
/// length) that surround the entries array itself.
const SD_MESSAGE_OVERHEAD: usize = 12;

/// How many entries fit in one datagram bounded by
/// [`DEFAULT_MAX_SD_MESSAGE_SIZE`], ignoring any options that will be
/// attached downstream.
fn max_entries_per_message() -> usize {
    (DEFAULT_MAX_SD_MESSAGE_SIZE.saturating_sub(SD_MESSAGE_OVERHEAD) / SD_ENTRY_SIZE).max(1)
}

/// Identifies a schedulable unit of work: one logical entry destined for one
/// peer. Two requests with the same id to the same destination coalesce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub u64);

/// A post-send callback, run once after the datagram carrying the entry has
/// actually gone out. The scheduler is single-threaded, so a boxed
/// `FnOnce` is sufficient.
pub type PostAction = Box<dyn FnOnce() + Send>;

struct PendingEntry {
    entry: SdEntry,
    deadline: Instant,
    post_actions: Vec<PostAction>,
}

struct CyclicTimer {
    entry: SdEntry,
    destination: SocketAddr,
    period: Duration,
    next_fire: Instant,
}

struct RepetitionTimer {
    entry: SdEntry,
    destination: SocketAddr,
    attempts_left: u32,
    current_delay: Duration,
    next_fire: Instant,
}

/// One outgoing datagram's worth of work, ready to hand to the SD endpoint.
pub struct DueBatch {
    pub destination: SocketAddr,
    pub entries: Vec<SdEntry>,
    pub post_actions: Vec<PostAction>,
}

/// Coalesces scheduled SD entries per destination and fires cyclic /
/// repetition timers.
#[derive(Default)]
pub struct SendScheduler {
    one_shot: HashMap<(EntryId, SocketAddr), PendingEntry>,
    cyclic: HashMap<EntryId, CyclicTimer>,
    repetition: HashMap<EntryId, RepetitionTimer>,
}

impl SendScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `entry` for `destination` to go out within `[min, max]` of
    /// `now`, merging with any already-pending identical (id, destination)
    /// pair by keeping the earlier deadline and concatenating post-actions.
    pub fn schedule(
        &mut self,
        id: EntryId,
        destination: SocketAddr,
        entry: SdEntry,
        now: Instant,
        min: Duration,
        max: Duration,
        post_action: Option<PostAction>,
    ) {
        let delay = if max > min {
            let jitter_ms = rand::rng().random_range(0..=(max - min).as_millis() as u64);
            min + Duration::from_millis(jitter_ms)
        } else {
            min
        };
        let deadline = now + delay;

        let key = (id, destination);
        match self.one_shot.get_mut(&key) {
            Some(existing) => {
                if deadline < existing.deadline {
                    existing.deadline = deadline;
                }
                existing.entry = entry;
                if let Some(action) = post_action {
                    existing.post_actions.push(action);
                }
            }
            None => {
                let mut post_actions = Vec::new();
                if let Some(action) = post_action {
                    post_actions.push(action);
                }
                self.one_shot.insert(
                    key,
                    PendingEntry {
                        entry,
                        deadline,
                        post_actions,
                    },
                );
            }
        }
    }

    /// Arm (or replace) a cyclic timer that re-sends `entry` to
    /// `destination` every `period`.
    pub fn schedule_cyclic(
        &mut self,
        id: EntryId,
        destination: SocketAddr,
        entry: SdEntry,
        period: Duration,
        now: Instant,
    ) {
        self.cyclic.insert(
            id,
            CyclicTimer {
                entry,
                destination,
                period,
                next_fire: now + period,
            },
        );
    }

    /// Arm a geometric-backoff repetition timer bounded by `attempts`.
    pub fn schedule_repetition(
        &mut self,
        id: EntryId,
        destination: SocketAddr,
        entry: SdEntry,
        base_delay: Duration,
        attempts: u32,
        now: Instant,
    ) {
        self.repetition.insert(
            id,
            RepetitionTimer {
                entry,
                destination,
                attempts_left: attempts,
                current_delay: base_delay,
                next_fire: now + base_delay,
            },
        );
    }

    /// Cancel every pending send (one-shot, cyclic, repetition) for `id`.
    pub fn unschedule(&mut self, id: EntryId) {
        self.one_shot.retain(|(eid, _), _| *eid != id);
        self.cyclic.remove(&id);
        self.repetition.remove(&id);
    }

    /// The earliest instant at which `tick` would have work to do, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let one_shot_min = self.one_shot.values().map(|p| p.deadline).min();
        let cyclic_min = self.cyclic.values().map(|t| t.next_fire).min();
        let repetition_min = self.repetition.values().map(|t| t.next_fire).min();
        [one_shot_min, cyclic_min, repetition_min]
            .into_iter()
            .flatten()
            .min()
    }

    /// Advance the scheduler to `now`: fire any due cyclic/repetition
    /// timers (pushing their entries into the one-shot set at the current
    /// instant), then drain and coalesce every due one-shot entry per
    /// destination.
    pub fn tick(&mut self, now: Instant) -> Vec<DueBatch> {
        let due_cyclic: Vec<EntryId> = self
            .cyclic
            .iter()
            .filter(|(_, t)| t.next_fire <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in due_cyclic {
            let (entry, destination) = {
                let timer = self.cyclic.get_mut(&id).expect("id from this map");
                timer.next_fire = now + timer.period;
                (timer.entry.clone(), timer.destination)
            };
            self.schedule(id, destination, entry, now, Duration::ZERO, Duration::ZERO, None);
        }

        let due_repetition: Vec<EntryId> = self
            .repetition
            .iter()
            .filter(|(_, t)| t.next_fire <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in due_repetition {
            let (entry, destination, rearm) = {
                let timer = self.repetition.get_mut(&id).expect("id from this map");
                let entry = timer.entry.clone();
                let destination = timer.destination;
                let rearm = if timer.attempts_left > 0 {
                    timer.attempts_left -= 1;
                    timer.current_delay *= 2;
                    timer.next_fire = now + timer.current_delay;
                    true
                } else {
                    false
                };
                (entry, destination, rearm)
            };
            self.schedule(id, destination, entry, now, Duration::ZERO, Duration::ZERO, None);
            if !rearm {
                self.repetition.remove(&id);
            }
        }

        let due_keys: Vec<(EntryId, SocketAddr)> = self
            .one_shot
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(k, _)| *k)
            .collect();

        let mut batches: HashMap<SocketAddr, DueBatch> = HashMap::new();
        for key in due_keys {
            let pending = self.one_shot.remove(&key).expect("key just observed");
            let batch = batches.entry(key.1).or_insert_with(|| DueBatch {
                destination: key.1,
                entries: Vec::new(),
                post_actions: Vec::new(),
            });
            batch.entries.push(pending.entry);
            batch.post_actions.extend(pending.post_actions);
        }

        let max_entries = max_entries_per_message();
        let mut out = Vec::with_capacity(batches.len());
        for batch in batches.into_values() {
            if batch.entries.len() <= max_entries {
                out.push(batch);
                continue;
            }
            let DueBatch { destination, entries, mut post_actions } = batch;
            let chunk_count = entries.len().div_ceil(max_entries);
            for (i, chunk) in entries.chunks(max_entries).enumerate() {
                out.push(DueBatch {
                    destination,
                    entries: chunk.to_vec(),
                    post_actions: if i + 1 == chunk_count {
                        std::mem::take(&mut post_actions)
                    } else {
                        Vec::new()
                    },
                });
            }
        }
        out
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.one_shot.len() + self.cyclic.len() + self.repetition.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ServiceId;
    use crate::sd::entry::ServiceEntry;
    use crate::sd::types::InstanceId;

    fn find_entry() -> SdEntry {
        SdEntry::Service(ServiceEntry::find_service(
            ServiceId(0x1234),
            InstanceId::ANY,
            1,
            0,
        ))
    }

    fn dest() -> SocketAddr {
        "239.0.0.1:30490".parse().unwrap()
    }

    #[test]
    fn scheduled_entry_is_not_due_before_min_delay() {
        let mut sched = SendScheduler::new();
        let now = Instant::now();
        sched.schedule(
            EntryId(1),
            dest(),
            find_entry(),
            now,
            Duration::from_millis(100),
            Duration::from_millis(100),
            None,
        );
        assert!(sched.tick(now).is_empty());
        assert_eq!(sched.pending_count(), 1);
    }

    #[test]
    fn scheduled_entry_fires_once_deadline_passes() {
        let mut sched = SendScheduler::new();
        let now = Instant::now();
        sched.schedule(
            EntryId(1),
            dest(),
            find_entry(),
            now,
            Duration::from_millis(10),
            Duration::from_millis(10),
            None,
        );
        let batches = sched.tick(now + Duration::from_millis(10));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].entries.len(), 1);
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn same_destination_coalesces_into_one_batch() {
        let mut sched = SendScheduler::new();
        let now = Instant::now();
        sched.schedule(
            EntryId(1),
            dest(),
            find_entry(),
            now,
            Duration::ZERO,
            Duration::ZERO,
            None,
        );
        sched.schedule(
            EntryId(2),
            dest(),
            find_entry(),
            now,
            Duration::ZERO,
            Duration::ZERO,
            None,
        );
        let batches = sched.tick(now);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].entries.len(), 2);
    }

    #[test]
    fn rescheduling_same_id_and_destination_merges() {
        let mut sched = SendScheduler::new();
        let now = Instant::now();
        sched.schedule(
            EntryId(1),
            dest(),
            find_entry(),
            now,
            Duration::from_millis(50),
            Duration::from_millis(50),
            None,
        );
        sched.schedule(
            EntryId(1),
            dest(),
            find_entry(),
            now,
            Duration::from_millis(5),
            Duration::from_millis(5),
            None,
        );
        assert_eq!(sched.pending_count(), 1);
        let batches = sched.tick(now + Duration::from_millis(5));
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn unschedule_removes_all_pending_forms() {
        let mut sched = SendScheduler::new();
        let now = Instant::now();
        sched.schedule(EntryId(1), dest(), find_entry(), now, Duration::ZERO, Duration::ZERO, None);
        sched.schedule_cyclic(EntryId(1), dest(), find_entry(), Duration::from_secs(2), now);
        sched.unschedule(EntryId(1));
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn cyclic_timer_rearms_after_firing() {
        let mut sched = SendScheduler::new();
        let now = Instant::now();
        sched.schedule_cyclic(EntryId(1), dest(), find_entry(), Duration::from_secs(2), now);
        let batches = sched.tick(now + Duration::from_secs(2));
        assert_eq!(batches.len(), 1);
        assert!(sched.next_deadline().unwrap() >= now + Duration::from_secs(4));
    }

    #[test]
    fn repetition_timer_backs_off_and_eventually_stops() {
        let mut sched = SendScheduler::new();
        let mut now = Instant::now();
        sched.schedule_repetition(EntryId(1), dest(), find_entry(), Duration::from_millis(100), 2, now);

        now += Duration::from_millis(100);
        assert_eq!(sched.tick(now).len(), 1);

        now += Duration::from_millis(200);
        assert_eq!(sched.tick(now).len(), 1);

        now += Duration::from_millis(400);
        assert_eq!(sched.tick(now).len(), 1);

        assert!(sched.repetition.is_empty());
    }

    #[test]
    fn oversized_batch_splits_across_multiple_datagrams_to_same_destination() {
        let mut sched = SendScheduler::new();
        let now = Instant::now();
        let max_entries = max_entries_per_message();
        for i in 0..(max_entries as u64 + 5) {
            sched.schedule(EntryId(i), dest(), find_entry(), now, Duration::ZERO, Duration::ZERO, None);
        }
        let batches = sched.tick(now);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.destination == dest()));
        let total: usize = batches.iter().map(|b| b.entries.len()).sum();
        assert_eq!(total, max_entries + 5);
        assert!(batches[0].entries.len() <= max_entries);
    }

    #[test]
    fn post_action_runs_when_batch_is_drained() {
        let mut sched = SendScheduler::new();
        let now = Instant::now();
        // Post-actions are boxed FnOnce + Send; an atomic flag proves it ran.
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag_clone = flag.clone();
        sched.schedule(
            EntryId(1),
            dest(),
            find_entry(),
            now,
            Duration::ZERO,
            Duration::ZERO,
            Some(Box::new(move || flag_clone.store(true, std::sync::atomic::Ordering::SeqCst))),
        );
        let batches = sched.tick(now);
        for action in batches.into_iter().flat_map(|b| b.post_actions) {
            action();
        }
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}
