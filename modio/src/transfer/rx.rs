//! Transfer reception: frame parsing and multi-frame reassembly.
//!
//! Incoming frames are parsed against the two CAN ID formats, filtered to the
//! ports in the subscription set, and accumulated in per-(kind, port, source)
//! sessions until the end-of-transfer frame closes them. Multi-frame
//! transfers carry a CRC-16/CCITT-FALSE over payload and padding; the check
//! exploits the zero residue of the appended big-endian CRC. Completed
//! payloads are truncated to the subscription extent, so oversized or padded
//! responses never reach the service parsers at full length.

use std::collections::HashMap;

use crc_any::CRCu16;
use num_traits::FromPrimitive;

use super::{Transfer, TransferKind, TransferMetadata};
use crate::transport::{CanMessageId, CanServiceId, MTU, TailByte, WireFrame};
use crate::types::{NodeId, PortId, TransferId};
use crate::{Priority, RxError, Subscription};

/// One parsed frame, borrowed from the wire frame it came from.
#[derive(Debug)]
pub(crate) struct FrameView<'a> {
    pub metadata: TransferMetadata,
    pub payload: &'a [u8],
    pub first_frame: bool,
    pub last_frame: bool,
    pub toggle: bool,
}

/// Parses a raw frame into transfer terms.
///
/// Returns `Ok(None)` for frames that are well-formed but not interesting:
/// service transfers addressed to some other node, or anonymous messages,
/// which this client has no way to track.
pub(crate) fn parse_frame<'a>(
    frame: &'a WireFrame,
    local_node: NodeId,
) -> Result<Option<FrameView<'a>>, RxError> {
    // Frames cannot be empty. They must at least have a tail byte.
    let Some((&tail, payload)) = frame.payload.split_last() else {
        return Err(RxError::FrameEmpty);
    };
    let tail = TailByte(tail);

    // Protocol version states SOT must have toggle set
    if tail.start_of_transfer() && !tail.toggle() {
        return Err(RxError::TransferStartMissingToggle);
    }
    // Non-last frames must use the MTU fully
    if !tail.end_of_transfer() && frame.payload.len() < MTU {
        return Err(RxError::NonLastUnderUtilization);
    }

    let raw = frame.id.as_raw();
    if CanServiceId(raw).is_svc() {
        let id = CanServiceId(raw);
        if !id.valid() {
            return Err(RxError::InvalidCanId);
        }
        if id.destination_id() != local_node {
            // Targeted at somebody else
            return Ok(None);
        }

        let transfer_kind = if id.is_req() {
            TransferKind::Request
        } else {
            TransferKind::Response
        };

        Ok(Some(FrameView {
            metadata: TransferMetadata {
                timestamp_us: frame.timestamp_us,
                priority: Priority::from_u8(id.priority()).unwrap_or(Priority::Nominal),
                transfer_kind,
                port_id: id.service_id(),
                remote_node_id: Some(id.source_id()),
                transfer_id: tail.transfer_id(),
            },
            payload,
            first_frame: tail.start_of_transfer(),
            last_frame: tail.end_of_transfer(),
            toggle: tail.toggle(),
        }))
    } else {
        let id = CanMessageId(raw);
        if !id.valid() {
            return Err(RxError::InvalidCanId);
        }

        if id.is_anon() {
            // Anonymous transfers can only be single-frame transfers
            if !(tail.start_of_transfer() && tail.end_of_transfer()) {
                return Err(RxError::AnonNotSingleFrame);
            }
            // No source to key a session or a status entry on
            return Ok(None);
        }

        Ok(Some(FrameView {
            metadata: TransferMetadata {
                timestamp_us: frame.timestamp_us,
                priority: Priority::from_u8(id.priority()).unwrap_or(Priority::Nominal),
                transfer_kind: TransferKind::Message,
                port_id: id.subject_id(),
                remote_node_id: Some(id.source_id()),
                transfer_id: tail.transfer_id(),
            },
            payload,
            first_frame: tail.start_of_transfer(),
            last_frame: tail.end_of_transfer(),
            toggle: tail.toggle(),
        }))
    }
}

type SessionKey = (TransferKind, PortId, NodeId);

/// An in-flight multi-frame transfer.
struct Session {
    transfer_id: TransferId,
    expected_toggle: bool,
    payload: Vec<u8>,
    crc: CRCu16,
    metadata: TransferMetadata,
    last_timestamp_us: u64,
}

/// Subscription set plus the reassembly sessions keyed on it.
pub struct Reassembler {
    subscriptions: Vec<Subscription>,
    sessions: HashMap<SessionKey, Session>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self, subscription: Subscription) {
        if !self.subscriptions.contains(&subscription) {
            self.subscriptions.push(subscription);
        }
    }

    fn subscription(&self, kind: TransferKind, port_id: PortId) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.transfer_kind == kind && s.port_id == port_id)
    }

    /// Feeds one parsed frame in; hands a finished transfer back out.
    pub(crate) fn accept(&mut self, view: FrameView) -> Result<Option<Transfer>, RxError> {
        let kind = view.metadata.transfer_kind;
        let port_id = view.metadata.port_id;
        let Some(subscription) = self.subscription(kind, port_id) else {
            return Ok(None);
        };
        let extent = subscription.extent;
        let timeout_us = subscription.timeout.as_micros() as u64;

        let Some(source) = view.metadata.remote_node_id else {
            return Ok(None);
        };
        let key = (kind, port_id, source);

        if view.first_frame {
            // A new start always supersedes whatever was in flight.
            self.sessions.remove(&key);

            if view.last_frame {
                let mut payload = view.payload.to_vec();
                payload.truncate(extent);
                return Ok(Some(Transfer {
                    metadata: view.metadata,
                    payload,
                }));
            }

            let mut crc = CRCu16::crc16ccitt_false();
            crc.digest(view.payload);
            self.sessions.insert(
                key,
                Session {
                    transfer_id: view.metadata.transfer_id,
                    expected_toggle: false,
                    payload: view.payload.to_vec(),
                    crc,
                    last_timestamp_us: view.metadata.timestamp_us,
                    metadata: view.metadata,
                },
            );
            return Ok(None);
        }

        let Some(session) = self.sessions.get_mut(&key) else {
            return Err(RxError::NewSessionNoStart);
        };
        if session.transfer_id != view.metadata.transfer_id {
            self.sessions.remove(&key);
            return Err(RxError::NewSessionNoStart);
        }
        if view
            .metadata
            .timestamp_us
            .saturating_sub(session.last_timestamp_us)
            > timeout_us
        {
            self.sessions.remove(&key);
            return Err(RxError::Timeout);
        }
        if view.toggle != session.expected_toggle {
            self.sessions.remove(&key);
            return Err(RxError::InvalidFrameOrdering);
        }

        session.crc.digest(view.payload);
        session.payload.extend_from_slice(view.payload);
        session.expected_toggle = !session.expected_toggle;
        session.last_timestamp_us = view.metadata.timestamp_us;

        if !view.last_frame {
            return Ok(None);
        }

        let Some(session) = self.sessions.remove(&key) else {
            return Ok(None);
        };
        if session.crc.get_crc() != 0 || session.payload.len() < 2 {
            return Err(RxError::CrcError);
        }
        let mut payload = session.payload;
        payload.truncate(payload.len() - 2);
        payload.truncate(extent);
        Ok(Some(Transfer {
            metadata: session.metadata,
            payload,
        }))
    }

    /// Drops every in-flight session.
    pub fn reset(&mut self) {
        self.sessions.clear();
    }
}
