//! The standard node services this client speaks.
//!
//! Request encoders and response parsers for GetInfo, Register.List,
//! Register.Access and ExecuteCommand, plus the well-known port numbers and
//! response extents. Response parsing is positional and robust to
//! truncation: anything beyond the end of the payload reads as zero, the way
//! short DSDL serializations are meant to be treated. Hard bounds (name and
//! certificate lengths, status codes) are still enforced as protocol errors.

use num_traits::FromPrimitive;

use crate::error::Error;
use crate::types::PortId;

/// Heartbeat subject.
pub const HEARTBEAT_PORT: PortId = 7509;
pub const HEARTBEAT_EXTENT: usize = 7;

/// GetInfo service.
pub const GET_INFO_PORT: PortId = 430;
pub const GET_INFO_EXTENT: usize = 313;

/// Register.List service.
pub const REGISTER_LIST_PORT: PortId = 385;
pub const REGISTER_LIST_EXTENT: usize = 51;

/// Register.Access service.
pub const REGISTER_ACCESS_PORT: PortId = 384;
pub const REGISTER_ACCESS_EXTENT: usize = 267;

/// ExecuteCommand service. Only the status byte of the response is of
/// interest, hence the one-byte extent.
pub const EXECUTE_COMMAND_PORT: PortId = 435;
pub const EXECUTE_COMMAND_EXTENT: usize = 1;

/// Standard command identifiers understood by every module.
pub mod command {
    pub const STORE_PERSISTENT_STATES: u16 = 65530;
    pub const EMERGENCY_STOP: u16 = 65531;
    pub const FACTORY_RESET: u16 = 65532;
    pub const BEGIN_SOFTWARE_UPDATE: u16 = 65533;
    pub const POWER_OFF: u16 = 65534;
    pub const RESTART: u16 = 65535;
}

/// Longest ExecuteCommand parameter.
pub const MAX_COMMAND_PARAMETER: usize = 112;

/// Outcome reported by a node for an executed command.
#[derive(FromPrimitive, ToPrimitive, Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandStatus {
    Success = 0,
    Failure = 1,
    NotAuthorized = 2,
    BadCommand = 3,
    BadParameter = 4,
    BadState = 5,
    InternalError = 6,
}

/// A protocol, hardware or software version pair.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// Identity structure returned by GetInfo.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeInfo {
    pub protocol_version: Version,
    pub hardware_version: Version,
    pub software_version: Version,
    pub software_vcs_revision_id: u64,
    pub unique_id: [u8; 16],
    /// Human-readable node name, at most 50 bytes on the wire.
    pub name: String,
    pub software_image_crc: Option<u64>,
    pub certificate_of_authenticity: Option<Vec<u8>>,
}

/// Longest node name GetInfo may report.
const MAX_NODE_NAME: usize = 50;
/// Longest certificate-of-authenticity blob.
const MAX_COA: usize = 222;

fn byte_at(payload: &[u8], offset: usize) -> u8 {
    payload.get(offset).copied().unwrap_or(0)
}

fn u64_at(payload: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = byte_at(payload, offset + i);
    }
    u64::from_le_bytes(bytes)
}

fn copy_available(payload: &[u8], offset: usize, want: usize) -> &[u8] {
    let start = offset.min(payload.len());
    let end = (offset + want).min(payload.len());
    &payload[start..end]
}

/// Parses a GetInfo response.
pub(crate) fn parse_node_info(payload: &[u8]) -> Result<NodeInfo, Error> {
    let mut info = NodeInfo::default();
    if payload.is_empty() {
        return Ok(info);
    }

    info.protocol_version = Version {
        major: byte_at(payload, 0),
        minor: byte_at(payload, 1),
    };
    info.hardware_version = Version {
        major: byte_at(payload, 2),
        minor: byte_at(payload, 3),
    };
    info.software_version = Version {
        major: byte_at(payload, 4),
        minor: byte_at(payload, 5),
    };
    info.software_vcs_revision_id = u64_at(payload, 6);

    let unique = copy_available(payload, 14, 16);
    info.unique_id[..unique.len()].copy_from_slice(unique);

    let name_len = byte_at(payload, 30) as usize;
    if name_len > MAX_NODE_NAME {
        return Err(Error::Protocol);
    }
    info.name = String::from_utf8_lossy(copy_available(payload, 31, name_len)).into_owned();
    let mut offset = 31 + name_len;

    let crc_present = byte_at(payload, offset);
    offset += 1;
    if crc_present > 1 {
        return Err(Error::Protocol);
    }
    if crc_present == 1 {
        info.software_image_crc = Some(u64_at(payload, offset));
        offset += 8;
    }

    let coa_len = byte_at(payload, offset) as usize;
    offset += 1;
    if coa_len > MAX_COA {
        return Err(Error::Protocol);
    }
    if coa_len > 0 {
        info.certificate_of_authenticity = Some(copy_available(payload, offset, coa_len).to_vec());
    }

    Ok(info)
}

/// Builds a Register.List request: the register index, little-endian.
pub(crate) fn encode_register_list_request(index: u16) -> [u8; 2] {
    index.to_le_bytes()
}

/// Parses a Register.List response into the register name.
///
/// An empty name marks the end of the node's register namespace.
pub(crate) fn parse_register_list_response(payload: &[u8]) -> String {
    let len = (byte_at(payload, 0) as usize).min(MAX_NODE_NAME);
    String::from_utf8_lossy(copy_available(payload, 1, len)).into_owned()
}

/// Builds an ExecuteCommand request: command ID, parameter length, parameter.
pub(crate) fn encode_execute_command_request(
    command_id: u16,
    parameter: &[u8],
) -> Result<Vec<u8>, Error> {
    if parameter.len() > MAX_COMMAND_PARAMETER {
        return Err(Error::InvalidArgument);
    }
    let mut buf = Vec::with_capacity(3 + parameter.len());
    buf.extend_from_slice(&command_id.to_le_bytes());
    buf.push(parameter.len() as u8);
    buf.extend_from_slice(parameter);
    Ok(buf)
}

/// Parses an ExecuteCommand response status byte.
///
/// An empty payload reads as success; an unknown status code is a protocol
/// error.
pub(crate) fn parse_execute_command_response(payload: &[u8]) -> Result<CommandStatus, Error> {
    CommandStatus::from_u8(byte_at(payload, 0)).ok_or(Error::Protocol)
}
