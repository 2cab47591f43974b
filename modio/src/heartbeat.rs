//! Passive heartbeat tracking.
//!
//! Every node broadcasts a heartbeat; this side only listens. A node counts
//! as online from its first non-offline heartbeat until either it announces
//! mode offline itself or three seconds pass in silence, at which point its
//! status is reset and the registered status callback hears about it.
//!
//! Wire layout, all little-endian: uptime 32 bits, then health in the two
//! low bits of the next byte, mode in the three low bits of the byte after,
//! then the vendor status byte. Truncated payloads read as zeros.

use std::time::{Duration, Instant};

use log::debug;
use num_traits::FromPrimitive;

use crate::timer::{TimerId, TimerQueue};
use crate::types::{NODE_ID_MAX, NodeId};

/// Silence span after which a node is declared offline.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(3);

/// Node health as announced in heartbeats.
#[derive(FromPrimitive, ToPrimitive, Copy, Clone, Debug, Eq, PartialEq)]
pub enum Health {
    Nominal = 0,
    Advisory = 1,
    Caution = 2,
    Warning = 3,
}

/// Node operating mode. `Offline` is what silent or departing nodes read as.
#[derive(FromPrimitive, ToPrimitive, Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Operational = 0,
    Initialization = 1,
    Maintenance = 2,
    SoftwareUpdate = 3,
    Offline = 7,
}

/// Last known state of one node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeStatus {
    pub uptime: u32,
    pub health: Health,
    pub mode: Mode,
    pub vendor_status: u8,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            uptime: 0,
            health: Health::Nominal,
            mode: Mode::Offline,
            vendor_status: 0,
        }
    }
}

impl NodeStatus {
    pub fn is_online(&self) -> bool {
        self.mode != Mode::Offline
    }
}

fn parse(payload: &[u8]) -> Option<NodeStatus> {
    let byte = |i: usize| payload.get(i).copied().unwrap_or(0);
    let uptime = u32::from_le_bytes([byte(0), byte(1), byte(2), byte(3)]);
    let health = Health::from_u8(byte(4) & 0x03)?;
    let mode = Mode::from_u8(byte(5) & 0x07)?;
    Some(NodeStatus {
        uptime,
        health,
        mode,
        vendor_status: byte(6),
    })
}

/// Status table plus the liveness timer of every online node.
pub(crate) struct HeartbeatTracker {
    statuses: Vec<NodeStatus>,
    timers: Vec<Option<TimerId>>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        let nodes = NODE_ID_MAX as usize + 1;
        Self {
            statuses: vec![NodeStatus::default(); nodes],
            timers: vec![None; nodes],
        }
    }

    pub fn status(&self, node: NodeId) -> Option<NodeStatus> {
        self.statuses.get(node as usize).copied()
    }

    /// Applies one heartbeat, returning `(previous, new)` status for the
    /// caller's notification. Heartbeats with reserved mode codes are
    /// dropped.
    pub fn ingest(
        &mut self,
        node: NodeId,
        payload: &[u8],
        timers: &mut TimerQueue,
        now: Instant,
    ) -> Option<(NodeStatus, NodeStatus)> {
        if node > NODE_ID_MAX {
            return None;
        }
        let Some(status) = parse(payload) else {
            debug!("node {node}: heartbeat with reserved mode bits, ignored");
            return None;
        };

        let slot = &mut self.timers[node as usize];
        if status.mode == Mode::Offline {
            if let Some(id) = slot.take() {
                timers.cancel(id);
            }
        } else {
            match *slot {
                Some(id) => timers.rearm(id, now + LIVENESS_TIMEOUT),
                None => *slot = Some(timers.arm(now + LIVENESS_TIMEOUT)),
            }
        }

        let previous = self.statuses[node as usize];
        self.statuses[node as usize] = status;
        Some((previous, status))
    }

    /// Handles an expired liveness timer, resetting the node to offline.
    /// Returns `None` if the timer was not one of ours.
    pub fn on_timer(&mut self, timer: TimerId) -> Option<(NodeId, NodeStatus, NodeStatus)> {
        let node = self.timers.iter().position(|t| *t == Some(timer))?;
        self.timers[node] = None;

        let previous = self.statuses[node];
        let offline = NodeStatus::default();
        self.statuses[node] = offline;
        Some((node as NodeId, previous, offline))
    }

    /// True when the node has a liveness timer armed.
    #[cfg(test)]
    pub fn has_timer(&self, node: NodeId) -> bool {
        self.timers[node as usize].is_some()
    }

    /// Cancels every liveness timer. Shutdown path.
    pub fn clear(&mut self, timers: &mut TimerQueue) {
        for slot in &mut self.timers {
            if let Some(id) = slot.take() {
                timers.cancel(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(uptime: u32, health: u8, mode: u8, vendor: u8) -> Vec<u8> {
        let mut payload = uptime.to_le_bytes().to_vec();
        payload.push(health);
        payload.push(mode);
        payload.push(vendor);
        payload
    }

    #[test]
    fn decodes_fields() {
        let mut tracker = HeartbeatTracker::new();
        let mut timers = TimerQueue::new();
        let now = Instant::now();

        let (previous, new) = tracker
            .ingest(5, &heartbeat(1234, 2, 0, 0x55), &mut timers, now)
            .expect("well-formed");
        assert_eq!(previous, NodeStatus::default());
        assert_eq!(new.uptime, 1234);
        assert_eq!(new.health, Health::Caution);
        assert_eq!(new.mode, Mode::Operational);
        assert_eq!(new.vendor_status, 0x55);
        assert_eq!(tracker.status(5), Some(new));
    }

    #[test]
    fn silence_declares_offline_after_three_seconds() {
        let mut tracker = HeartbeatTracker::new();
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();

        tracker
            .ingest(5, &heartbeat(10, 0, 0, 0), &mut timers, t0)
            .unwrap();
        assert!(tracker.has_timer(5));

        // Nothing before the deadline.
        assert!(timers.pop_expired(t0 + Duration::from_millis(2_900)).is_none());

        let timer = timers
            .pop_expired(t0 + Duration::from_millis(3_001))
            .expect("liveness deadline");
        let (node, previous, new) = tracker.on_timer(timer).expect("our timer");
        assert_eq!(node, 5);
        assert!(previous.is_online());
        assert_eq!(new, NodeStatus::default());
        assert!(!tracker.has_timer(5));
        assert!(!tracker.status(5).unwrap().is_online());
    }

    #[test]
    fn fresh_heartbeats_keep_the_node_alive() {
        let mut tracker = HeartbeatTracker::new();
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();

        tracker
            .ingest(5, &heartbeat(10, 0, 0, 0), &mut timers, t0)
            .unwrap();
        tracker
            .ingest(
                5,
                &heartbeat(12, 0, 0, 0),
                &mut timers,
                t0 + Duration::from_secs(2),
            )
            .unwrap();

        // The rearmed deadline is two seconds later than the original.
        assert!(timers.pop_expired(t0 + Duration::from_millis(4_900)).is_none());
        assert!(
            timers
                .pop_expired(t0 + Duration::from_millis(5_001))
                .is_some()
        );
    }

    #[test]
    fn offline_mode_tears_down_the_timer_immediately() {
        let mut tracker = HeartbeatTracker::new();
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();

        tracker
            .ingest(5, &heartbeat(10, 0, 0, 0), &mut timers, t0)
            .unwrap();
        assert!(tracker.has_timer(5));

        let (previous, new) = tracker
            .ingest(
                5,
                &heartbeat(11, 0, 7, 0),
                &mut timers,
                t0 + Duration::from_millis(100),
            )
            .unwrap();
        assert!(previous.is_online());
        assert!(!new.is_online());
        assert!(!tracker.has_timer(5));
        assert!(timers.is_empty());
    }

    #[test]
    fn online_iff_timer_exists() {
        let mut tracker = HeartbeatTracker::new();
        let mut timers = TimerQueue::new();
        let t0 = Instant::now();

        for node in [3u8, 60, 127] {
            tracker
                .ingest(node, &heartbeat(1, 0, 0, 0), &mut timers, t0)
                .unwrap();
        }
        tracker
            .ingest(60, &heartbeat(2, 0, 7, 0), &mut timers, t0)
            .unwrap();

        for node in 0..=NODE_ID_MAX {
            assert_eq!(
                tracker.status(node).unwrap().is_online(),
                tracker.has_timer(node),
                "node {node}"
            );
        }
    }

    #[test]
    fn reserved_mode_bits_are_ignored() {
        let mut tracker = HeartbeatTracker::new();
        let mut timers = TimerQueue::new();

        let result = tracker.ingest(5, &heartbeat(1, 0, 5, 0), &mut timers, Instant::now());
        assert!(result.is_none());
        assert!(!tracker.has_timer(5));
        assert_eq!(tracker.status(5), Some(NodeStatus::default()));
    }

    #[test]
    fn truncated_heartbeat_reads_zeros() {
        let mut tracker = HeartbeatTracker::new();
        let mut timers = TimerQueue::new();

        let (_, new) = tracker
            .ingest(5, &[1], &mut timers, Instant::now())
            .expect("zero fill decodes");
        assert_eq!(new.uptime, 1);
        assert_eq!(new.health, Health::Nominal);
        assert_eq!(new.mode, Mode::Operational);
    }
}
