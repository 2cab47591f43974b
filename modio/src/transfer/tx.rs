//! Transfer transmission: splitting a payload into tail-byted CAN-FD frames.
//!
//! Single-frame transfers are padded up to the nearest valid CAN-FD length.
//! Multi-frame transfers interleave padding before the transfer CRC so the
//! final frame also lands on a valid length; padding bytes are included in
//! the CRC, and the CRC itself goes on the wire big-endian. The CRC may
//! straddle the last two frames.

use std::collections::VecDeque;

use crc_any::CRCu16;

use super::{TransferKind, TransferMetadata};
use crate::transport::{CanMessageId, CanServiceId, MTU, TailByte, WireFrame};
use crate::types::NodeId;
use crate::TxError;

/// Payload bytes per frame once the tail byte is accounted for.
const CHUNK: usize = MTU - 1;

/// Largest payload the transmit path will accept. Well above every request
/// this client can produce; a guard against runaway callers.
const MAX_PAYLOAD: usize = 1024;

/// Rounds a frame length up to the nearest valid CAN-FD DLC.
pub(crate) fn dlc_round(len: usize) -> usize {
    match len {
        0..=8 => len,
        9..=12 => 12,
        13..=16 => 16,
        17..=20 => 20,
        21..=24 => 24,
        25..=32 => 32,
        33..=48 => 48,
        _ => MTU,
    }
}

/// Splits `payload` into frames and appends them to the transmit queue.
pub(crate) fn push_transfer(
    queue: &mut VecDeque<WireFrame>,
    metadata: &TransferMetadata,
    payload: &[u8],
    local_node: NodeId,
) -> Result<(), TxError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(TxError::PayloadTooLarge);
    }

    let can_id = match metadata.transfer_kind {
        TransferKind::Message => {
            CanMessageId::new(metadata.priority, metadata.port_id, Some(local_node)).0
        }
        TransferKind::Request | TransferKind::Response => {
            let destination = metadata
                .remote_node_id
                .ok_or(TxError::ServiceNoDestinationID)?;
            CanServiceId::new(
                metadata.priority,
                metadata.transfer_kind == TransferKind::Request,
                metadata.port_id,
                destination,
                local_node,
            )
            .0
        }
    };
    let transfer_id = metadata.transfer_id & 0x1F;

    if payload.len() <= CHUNK {
        // Single frame: payload, zero padding to a valid length, tail byte.
        let total = dlc_round(payload.len() + 1);
        let mut data = Vec::with_capacity(total);
        data.extend_from_slice(payload);
        data.resize(total - 1, 0);
        data.push(TailByte::new(true, true, true, transfer_id).0);
        queue.push_back(WireFrame::new(0, can_id, &data));
        return Ok(());
    }

    // Multi frame: find the least padding that lands the final frame on a
    // valid length, then stream payload + padding + CRC in 63-byte chunks.
    let mut padding = 0;
    loop {
        let stream_len = payload.len() + padding + 2;
        let last = stream_len - (stream_len - 1) / CHUNK * CHUNK;
        if dlc_round(last + 1) == last + 1 {
            break;
        }
        padding += 1;
    }

    let mut stream = Vec::with_capacity(payload.len() + padding + 2);
    stream.extend_from_slice(payload);
    stream.resize(payload.len() + padding, 0);

    let mut crc = CRCu16::crc16ccitt_false();
    crc.digest(&stream);
    let crc = crc.get_crc();
    stream.push((crc >> 8) as u8);
    stream.push((crc & 0x00FF) as u8);

    let frames = stream.chunks(CHUNK).count();
    let mut toggle = true;
    for (index, chunk) in stream.chunks(CHUNK).enumerate() {
        let mut data = Vec::with_capacity(chunk.len() + 1);
        data.extend_from_slice(chunk);
        data.push(TailByte::new(index == 0, index == frames - 1, toggle, transfer_id).0);
        queue.push_back(WireFrame::new(0, can_id, &data));
        toggle = !toggle;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Priority;

    fn request_metadata(payload_port: u16) -> TransferMetadata {
        TransferMetadata {
            timestamp_us: 0,
            priority: Priority::Nominal,
            transfer_kind: TransferKind::Request,
            port_id: payload_port,
            remote_node_id: Some(9),
            transfer_id: 3,
        }
    }

    #[test]
    fn single_frame_is_padded_to_valid_dlc() {
        let mut queue = VecDeque::new();
        push_transfer(&mut queue, &request_metadata(384), &[0xAA; 10], 1).unwrap();

        assert_eq!(queue.len(), 1);
        let frame = &queue[0];
        // 10 payload + 1 pad + tail = 12, the next valid FD length.
        assert_eq!(frame.payload.len(), 12);
        assert_eq!(frame.payload[10], 0);
        let tail = TailByte(frame.payload[11]);
        assert!(tail.start_of_transfer());
        assert!(tail.end_of_transfer());
        assert!(tail.toggle());
        assert_eq!(tail.transfer_id(), 3);
    }

    #[test]
    fn classic_length_payload_is_not_padded() {
        let mut queue = VecDeque::new();
        push_transfer(&mut queue, &request_metadata(435), &[1, 2, 3], 1).unwrap();
        assert_eq!(queue[0].payload.len(), 4);
    }

    #[test]
    fn empty_payload_is_one_tail_byte() {
        let mut queue = VecDeque::new();
        push_transfer(&mut queue, &request_metadata(430), &[], 1).unwrap();
        assert_eq!(queue[0].payload.len(), 1);
        let tail = TailByte(queue[0].payload[0]);
        assert!(tail.start_of_transfer() && tail.end_of_transfer());
    }

    #[test]
    fn multi_frame_toggles_and_delimits() {
        let mut queue = VecDeque::new();
        let payload = vec![0x55; 200];
        push_transfer(&mut queue, &request_metadata(384), &payload, 1).unwrap();

        // 200 payload + CRC needs four 63-byte chunks.
        assert_eq!(queue.len(), 4);
        for frame in queue.iter().take(3) {
            assert_eq!(frame.payload.len(), MTU);
        }
        let tails: Vec<TailByte> = queue
            .iter()
            .map(|f| TailByte(*f.payload.last().unwrap()))
            .collect();
        assert!(tails[0].start_of_transfer());
        assert!(!tails[0].end_of_transfer());
        assert!(tails[3].end_of_transfer());
        let toggles: Vec<bool> = tails.iter().map(|t| t.toggle()).collect();
        assert_eq!(toggles, vec![true, false, true, false]);
        // Final frame lands on a valid FD length.
        let last = queue[3].payload.len();
        assert_eq!(dlc_round(last), last);
    }

    #[test]
    fn message_transfer_uses_subject_id() {
        let mut queue = VecDeque::new();
        let metadata = TransferMetadata {
            transfer_kind: TransferKind::Message,
            port_id: 7509,
            remote_node_id: None,
            ..request_metadata(0)
        };
        push_transfer(&mut queue, &metadata, &[0; 7], 5).unwrap();
        let id = crate::transport::CanMessageId(queue[0].id.as_raw());
        assert!(!id.is_svc());
        assert_eq!(id.subject_id(), 7509);
        assert_eq!(id.source_id(), 5);
    }

    #[test]
    fn service_transfer_requires_destination() {
        let mut queue = VecDeque::new();
        let metadata = TransferMetadata {
            remote_node_id: None,
            ..request_metadata(384)
        };
        assert!(matches!(
            push_transfer(&mut queue, &metadata, &[0; 4], 1),
            Err(TxError::ServiceNoDestinationID)
        ));
    }
}
