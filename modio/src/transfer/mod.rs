//! Transfer management.
//!
//! A transfer is one logical protocol message, possibly split across several
//! CAN frames and correlated by the 5-bit transfer ID in each frame's tail
//! byte. [`rx`] reassembles incoming frames into [`Transfer`]s against the
//! subscription set; [`tx`] splits outgoing transfers into padded CAN-FD
//! frames with the transfer CRC appended.

use crate::Priority;
use crate::types::{NodeId, PortId, TransferId};

pub mod rx;
pub mod tx;

pub use rx::Reassembler;

/// Protocol-level transfer types.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum TransferKind {
    Message,
    Response,
    Request,
}

/// Metadata describing a transfer. This metadata is transport-agnostic.
#[derive(Debug, Clone)]
pub struct TransferMetadata {
    /// Kernel receive time of the first frame, microseconds since the epoch.
    /// Zero for outgoing transfers.
    pub timestamp_us: u64,
    pub priority: Priority,
    pub transfer_kind: TransferKind,
    pub port_id: PortId,
    pub remote_node_id: Option<NodeId>,
    pub transfer_id: TransferId,
}

/// A fully reassembled transfer with an owned payload.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub metadata: TransferMetadata,
    pub payload: Vec<u8>,
}
