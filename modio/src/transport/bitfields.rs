//! Wire layouts for the 29-bit CAN ID variants and the tail byte.
//!
//! Two ID formats exist on the bus: message (subject) frames and service
//! frames. Which one applies is decided by bit 25. Reserved bits are
//! transmitted as the specification dictates and checked on reception;
//! frames with misused reserved bits are dropped as invalid.

use bitfield::bitfield;

use crate::types::{NodeId, PortId, TransferId};
use crate::Priority;

bitfield! {
    /// Service frame CAN ID: request/response transfers between two nodes.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct CanServiceId(u32);
    impl Debug;
    pub u8, priority, set_priority: 28, 26;
    pub is_svc, set_svc: 25;
    pub is_req, set_req: 24;
    pub reserved, set_reserved: 23;
    pub u16, service_id, set_service_id: 22, 14;
    pub u8, destination_id, set_destination_id: 13, 7;
    pub u8, source_id, set_source_id: 6, 0;
}

impl CanServiceId {
    pub fn new(
        priority: Priority,
        is_request: bool,
        service_id: PortId,
        destination: NodeId,
        source: NodeId,
    ) -> Self {
        let mut id = CanServiceId(0);
        id.set_priority(priority as u8);
        id.set_svc(true);
        id.set_req(is_request);
        id.set_service_id(service_id);
        id.set_destination_id(destination);
        id.set_source_id(source);
        id
    }

    /// Reserved bit 23 must read zero.
    pub fn valid(&self) -> bool {
        !self.reserved()
    }
}

bitfield! {
    /// Message frame CAN ID: broadcast subject transfers.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct CanMessageId(u32);
    impl Debug;
    pub u8, priority, set_priority: 28, 26;
    pub is_svc, set_svc: 25;
    pub is_anon, set_anon: 24;
    pub reserved23, set_reserved23: 23;
    pub u8, reserved_subject, set_reserved_subject: 22, 21;
    pub u16, subject_id, set_subject_id: 20, 8;
    pub reserved7, set_reserved7: 7;
    pub u8, source_id, set_source_id: 6, 0;
}

impl CanMessageId {
    pub fn new(priority: Priority, subject_id: PortId, node_id: Option<NodeId>) -> Self {
        let mut id = CanMessageId(0);
        id.set_priority(priority as u8);
        id.set_anon(node_id.is_none());
        // The two bits above the 13-bit subject ID are transmitted as ones.
        id.set_reserved_subject(0b11);
        id.set_subject_id(subject_id);
        id.set_source_id(node_id.unwrap_or(0));
        id
    }

    /// Reserved bits 23 and 7 must read zero; bits 22-21 are ignored on RX.
    pub fn valid(&self) -> bool {
        !self.reserved23() && !self.reserved7()
    }
}

bitfield! {
    /// Final byte of every frame: transfer delimiters plus the transfer ID.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct TailByte(u8);
    impl Debug;
    pub start_of_transfer, set_start_of_transfer: 7;
    pub end_of_transfer, set_end_of_transfer: 6;
    pub toggle, set_toggle: 5;
    pub u8, transfer_id, set_transfer_id: 4, 0;
}

impl TailByte {
    pub fn new(start: bool, end: bool, toggle: bool, transfer_id: TransferId) -> Self {
        let mut tail = TailByte(0);
        tail.set_start_of_transfer(start);
        tail.set_end_of_transfer(end);
        tail.set_toggle(toggle);
        tail.set_transfer_id(transfer_id);
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_round_trip() {
        let id = CanServiceId::new(Priority::Nominal, true, 384, 9, 1);
        assert!(id.is_svc());
        assert!(id.is_req());
        assert!(id.valid());
        assert_eq!(id.priority(), Priority::Nominal as u8);
        assert_eq!(id.service_id(), 384);
        assert_eq!(id.destination_id(), 9);
        assert_eq!(id.source_id(), 1);

        let parsed = CanServiceId(id.0);
        assert_eq!(parsed, id);
    }

    #[test]
    fn message_id_round_trip() {
        let id = CanMessageId::new(Priority::Nominal, 7509, Some(42));
        assert!(!id.is_svc());
        assert!(!id.is_anon());
        assert!(id.valid());
        assert_eq!(id.subject_id(), 7509);
        assert_eq!(id.source_id(), 42);
        assert_eq!(id.reserved_subject(), 0b11);
    }

    #[test]
    fn anonymous_message_has_no_source() {
        let id = CanMessageId::new(Priority::Low, 100, None);
        assert!(id.is_anon());
        assert_eq!(id.source_id(), 0);
    }

    #[test]
    fn reserved_bit_invalidates_service_id() {
        let mut id = CanServiceId::new(Priority::Nominal, false, 430, 1, 42);
        id.set_reserved(true);
        assert!(!id.valid());
    }

    #[test]
    fn tail_byte_fields() {
        let tail = TailByte::new(true, false, true, 17);
        assert!(tail.start_of_transfer());
        assert!(!tail.end_of_transfer());
        assert!(tail.toggle());
        assert_eq!(tail.transfer_id(), 17);
        assert_eq!(tail.0 & 0x1F, 17);
        assert_eq!(tail.0 & 0xE0, 0xA0);
    }
}
