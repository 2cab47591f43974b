//! Outstanding-request bookkeeping.
//!
//! Every dispatched request is recorded under the fingerprint its response
//! will carry, with one deadline timer armed beside it. Whichever happens
//! first, matching response or expiry, removes the record and hands the
//! continuation back to the caller, so a continuation can never run twice.
//! Responses nobody is waiting for are dropped on the floor, which also
//! covers the response-after-timeout race.

use std::collections::HashMap;
use std::time::Instant;

use crate::error::Error;
use crate::timer::{TimerId, TimerQueue};
use crate::transfer::TransferMetadata;
use crate::types::{NodeId, PortId, TransferId};

/// Correlation key for a response: remote node, transfer ID and port packed
/// into 21 bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Fingerprint(u32);

impl Fingerprint {
    pub fn new(remote: NodeId, transfer_id: TransferId, port_id: PortId) -> Self {
        Self(
            (remote as u32 & 0x7F)
                | ((transfer_id as u32 & 0x1F) << 7)
                | ((port_id as u32 & 0x1FF) << 12),
        )
    }

    /// Fingerprint of a received response transfer.
    pub fn of_response(metadata: &TransferMetadata) -> Option<Self> {
        metadata
            .remote_node_id
            .map(|remote| Self::new(remote, metadata.transfer_id, metadata.port_id))
    }
}

/// What runs when a request resolves: the response payload on success, the
/// timeout otherwise.
pub(crate) type Continuation<X> = Box<dyn FnOnce(&mut X, Result<Vec<u8>, Error>)>;

struct Pending<X> {
    timer: TimerId,
    continuation: Continuation<X>,
}

/// The set of requests in flight, generic over the context handed to
/// continuations.
pub(crate) struct Tracker<X> {
    pending: HashMap<Fingerprint, Pending<X>>,
}

impl<X> Tracker<X> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Registers a request and arms its deadline timer.
    ///
    /// A fingerprint collision means 32 requests to the same node and port
    /// are already outstanding; there is nowhere left to put this one.
    pub fn track(
        &mut self,
        fingerprint: Fingerprint,
        deadline: Instant,
        timers: &mut TimerQueue,
        continuation: Continuation<X>,
    ) -> Result<(), Error> {
        if self.pending.contains_key(&fingerprint) {
            return Err(Error::OutOfMemory);
        }
        let timer = timers.arm(deadline);
        self.pending.insert(
            fingerprint,
            Pending {
                timer,
                continuation,
            },
        );
        Ok(())
    }

    /// Takes the record matching a response, cancelling its timer.
    pub fn remove(
        &mut self,
        fingerprint: Fingerprint,
        timers: &mut TimerQueue,
    ) -> Option<Continuation<X>> {
        let pending = self.pending.remove(&fingerprint)?;
        timers.cancel(pending.timer);
        Some(pending.continuation)
    }

    /// Takes the record whose deadline timer just fired.
    pub fn remove_by_timer(&mut self, timer: TimerId) -> Option<Continuation<X>> {
        let fingerprint = self
            .pending
            .iter()
            .find(|(_, p)| p.timer == timer)
            .map(|(f, _)| *f)?;
        self.pending
            .remove(&fingerprint)
            .map(|p| p.continuation)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every record without invoking continuations, releasing the
    /// timers. Shutdown path.
    pub fn clear(&mut self, timers: &mut TimerQueue) {
        for pending in self.pending.values() {
            timers.cancel(pending.timer);
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type Log = Vec<String>;

    fn logging(tag: &'static str) -> Continuation<Log> {
        Box::new(move |log: &mut Log, result| {
            log.push(format!("{tag}:{}", result.is_ok()));
        })
    }

    #[test]
    fn fingerprint_packs_the_three_fields() {
        let fp = Fingerprint::new(42, 3, 430);
        assert_eq!(fp.0, 42 | (3 << 7) | (430 << 12));
        // Distinct tuples never collide within the field ranges.
        assert_ne!(fp, Fingerprint::new(43, 3, 430));
        assert_ne!(fp, Fingerprint::new(42, 4, 430));
        assert_ne!(fp, Fingerprint::new(42, 3, 431));
    }

    #[test]
    fn completion_takes_the_record_and_its_timer() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        let mut tracker: Tracker<Log> = Tracker::new();
        let mut log = Log::new();

        let fp = Fingerprint::new(9, 0, 384);
        tracker
            .track(fp, t0 + Duration::from_millis(100), &mut timers, logging("a"))
            .unwrap();
        assert_eq!(tracker.len(), 1);

        let continuation = tracker.remove(fp, &mut timers).expect("tracked");
        continuation(&mut log, Ok(vec![1, 2, 3]));
        assert_eq!(log, vec!["a:true"]);
        assert!(tracker.is_empty());
        assert!(timers.is_empty());

        // A second, late response finds nothing.
        assert!(tracker.remove(fp, &mut timers).is_none());
    }

    #[test]
    fn duplicate_fingerprint_is_rejected() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        let mut tracker: Tracker<Log> = Tracker::new();

        let fp = Fingerprint::new(9, 0, 384);
        tracker.track(fp, t0, &mut timers, logging("a")).unwrap();
        assert!(matches!(
            tracker.track(fp, t0, &mut timers, logging("b")),
            Err(Error::OutOfMemory)
        ));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn expiry_resolves_through_the_timer() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        let mut tracker: Tracker<Log> = Tracker::new();
        let mut log = Log::new();

        let fp = Fingerprint::new(5, 1, 435);
        tracker
            .track(fp, t0 + Duration::from_millis(100), &mut timers, logging("t"))
            .unwrap();

        let timer = timers
            .pop_expired(t0 + Duration::from_millis(150))
            .expect("deadline due");
        let continuation = tracker.remove_by_timer(timer).expect("record");
        continuation(&mut log, Err(Error::Timeout));
        assert_eq!(log, vec!["t:false"]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn clear_releases_without_invoking() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        let mut tracker: Tracker<Log> = Tracker::new();

        tracker
            .track(Fingerprint::new(1, 0, 384), t0, &mut timers, logging("x"))
            .unwrap();
        tracker
            .track(Fingerprint::new(2, 0, 384), t0, &mut timers, logging("y"))
            .unwrap();

        tracker.clear(&mut timers);
        assert!(tracker.is_empty());
        assert!(timers.is_empty());
    }
}
