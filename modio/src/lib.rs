//! # Host-side Cyphal client for CAN-FD I/O module fleets
//!
//! This crate drives a fleet of industrial I/O modules speaking UAVCAN/Cyphal
//! v1 over CAN-FD from a Linux host. It observes node liveness through the
//! standard heartbeat subject, reads and writes typed configuration registers,
//! invokes the standard remote commands, and wraps the register interface in
//! typed helpers for the known module families.
//!
//! The protocol engine itself ([`Client`]) is sans-io: it consumes timestamped
//! wire frames and produces wire frames, with every deadline expressed as a
//! plain monotonic instant. That is what makes the protocol logic testable
//! without a bus. [`Engine`] owns the actual SocketCAN endpoint and the
//! readiness primitive and pumps the client from `tick`/`wait_for_event`.
//!
//! Scheduling is single-threaded and cooperative. All continuations, timer
//! expirations and status-change notifications run on the thread driving the
//! engine; callbacks are never nested and may freely start new requests.
//! The host never publishes messages of its own, it only issues service
//! requests and listens.

#[macro_use]
extern crate num_derive;

pub mod register;
pub mod services;
pub mod transfer;
pub mod transport;

mod client;
mod engine;
mod error;
mod heartbeat;
mod modules;
mod sync;
mod timer;
mod tracker;
mod types;

pub use client::{Client, DEFAULT_REQUEST_TIMEOUT};
pub use engine::{Config, Engine};
pub use error::{Error, Result};
pub use heartbeat::{Health, Mode, NodeStatus};
pub use modules::{
    AnalogInputMode, CounterMode, EdgePolarity, InputBias, OutputDrive, SupplyReadings,
    ThermocoupleType,
};
pub use register::RegisterValue;
pub use services::{CommandStatus, NodeInfo, Version, command};
pub use transfer::TransferKind;
pub use types::{NODE_ID_MAX, NodeId, PortId, TransferId, node_id_from_gpio_lines};

use std::time::Duration;

/// Protocol errors possible from receiving incoming frames.
#[derive(Copy, Clone, Debug)]
pub enum RxError {
    TransferStartMissingToggle,
    /// Anonymous transfers must only use a single frame
    AnonNotSingleFrame,
    /// Frames that are not last cannot have less than the maximum MTU
    NonLastUnderUtilization,
    /// No type of frame can contain empty data, must always have at least a tail byte
    FrameEmpty,
    /// Id field is formatted incorrectly
    InvalidCanId,
    /// Non-start frame received without a matching session
    NewSessionNoStart,
    /// Session went stale between frames
    Timeout,
    /// Toggle bit did not alternate
    InvalidFrameOrdering,
    /// Multi-frame transfer CRC mismatch
    CrcError,
}

/// Errors caused by handing the transmit path an impossible transfer.
#[derive(Copy, Clone, Debug)]
pub enum TxError {
    ServiceNoDestinationID,
    PayloadTooLarge,
}

/// Protocol-level priorities.
///
/// The wire reserves three bits; all eight levels are listed even though this
/// client only ever sends at [`Priority::Nominal`].
#[derive(FromPrimitive, ToPrimitive, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub enum Priority {
    Exceptional,
    Immediate,
    Fast,
    High,
    Nominal,
    Low,
    Slow,
    Optional,
}

/// A single port the client is listening on.
#[derive(Debug)]
pub struct Subscription {
    pub transfer_kind: TransferKind,
    pub port_id: PortId,
    pub extent: usize,
    pub timeout: Duration,
}

impl Subscription {
    pub fn new(
        transfer_kind: TransferKind,
        port_id: PortId,
        extent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            transfer_kind,
            port_id,
            extent,
            timeout,
        }
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.transfer_kind == other.transfer_kind && self.port_id == other.port_id
    }
}
