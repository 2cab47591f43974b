//! Basic protocol-level type aliases and bounds.

/// 7-bit Cyphal node identifier.
pub type NodeId = u8;

/// 16-bit logical endpoint (subject or service) identifier.
pub type PortId = u16;

/// 5-bit wrap-around transfer identifier.
pub type TransferId = u8;

/// Highest assignable node ID. IDs above this are reserved.
pub const NODE_ID_MAX: NodeId = 127;

/// Number of distinct transfer IDs before the counter wraps.
pub const TRANSFER_ID_MODULO: TransferId = 32;

/// Packs seven GPIO input levels into a node ID, line 0 being the least
/// significant bit.
///
/// Reading the lines is the platform's business; gateways that derive their
/// identity from a DIP switch or strap pins feed the sampled levels through
/// here at startup.
pub fn node_id_from_gpio_lines(levels: &[bool; 7]) -> NodeId {
    levels
        .iter()
        .enumerate()
        .fold(0, |id, (bit, &level)| id | (u8::from(level) << bit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpio_lines_pack_lsb_first() {
        assert_eq!(node_id_from_gpio_lines(&[false; 7]), 0);
        assert_eq!(node_id_from_gpio_lines(&[true; 7]), 127);
        assert_eq!(
            node_id_from_gpio_lines(&[true, false, true, false, false, false, false]),
            5
        );
        assert_eq!(
            node_id_from_gpio_lines(&[false, false, false, false, false, false, true]),
            64
        );
    }
}
