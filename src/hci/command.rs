//! Raw HCI commands issued by the controller

use heapless::Vec;

use crate::BluetoothAddress;
use crate::constants::{
    ALLOW_ROLE_SWITCH, DEFAULT_PACKET_TYPES, LE_CE_LENGTH, LE_CONNECT_SCAN_INTERVAL,
    LE_CONNECTION_INTERVAL, LE_SCAN_INTERVAL, LE_SCAN_WINDOW, LE_SUPERVISION_TIMEOUT,
    PAGE_SCAN_REPETITION_MODE_R2,
};

/// H4 packet indicator for commands
pub const COMMAND_PACKET: u8 = 0x01;

const MAX_PARAMETERS: usize = 32;

/// Command opcodes (OGF << 10 | OCF)
pub mod opcode {
    /// Inquiry
    pub const INQUIRY: u16 = 0x0401;
    /// Inquiry Cancel
    pub const INQUIRY_CANCEL: u16 = 0x0402;
    /// Create Connection
    pub const CREATE_CONNECTION: u16 = 0x0405;
    /// Disconnect
    pub const DISCONNECT: u16 = 0x0406;
    /// Remote Name Request
    pub const REMOTE_NAME_REQUEST: u16 = 0x0419;
    /// LE Set Scan Parameters
    pub const LE_SET_SCAN_PARAMETERS: u16 = 0x200B;
    /// LE Set Scan Enable
    pub const LE_SET_SCAN_ENABLE: u16 = 0x200C;
    /// LE Create Connection
    pub const LE_CREATE_CONNECTION: u16 = 0x200D;
    /// LE Create Connection Cancel
    pub const LE_CREATE_CONNECTION_CANCEL: u16 = 0x200E;
}

/// An encoded command: opcode plus little-endian parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciCommand {
    opcode: u16,
    params: Vec<u8, MAX_PARAMETERS>,
}

impl HciCommand {
    fn build(opcode: u16, fields: &[&[u8]]) -> Self {
        let mut params = Vec::new();
        for field in fields {
            // every constructor below stays well inside MAX_PARAMETERS
            params.extend_from_slice(field).ok();
        }
        Self { opcode, params }
    }

    /// Start a classic inquiry; `length` is in 1.28 s units
    #[must_use]
    pub fn inquiry(lap: [u8; 3], length: u8, responses: u8) -> Self {
        Self::build(opcode::INQUIRY, &[&lap, &[length, responses]])
    }

    /// Stop an inquiry in progress
    #[must_use]
    pub fn inquiry_cancel() -> Self {
        Self::build(opcode::INQUIRY_CANCEL, &[])
    }

    /// Page a classic device
    #[must_use]
    pub fn create_connection(address: BluetoothAddress) -> Self {
        Self::build(
            opcode::CREATE_CONNECTION,
            &[
                &address.to_le_bytes(),
                &DEFAULT_PACKET_TYPES.to_le_bytes(),
                &[PAGE_SCAN_REPETITION_MODE_R2, 0x00],
                &0u16.to_le_bytes(),
                &[ALLOW_ROLE_SWITCH],
            ],
        )
    }

    /// Terminate a connection
    #[must_use]
    pub fn disconnect(handle: u16, reason: u8) -> Self {
        Self::build(opcode::DISCONNECT, &[&handle.to_le_bytes(), &[reason]])
    }

    /// Ask a classic device for its friendly name
    #[must_use]
    pub fn remote_name_request(address: BluetoothAddress) -> Self {
        Self::build(
            opcode::REMOTE_NAME_REQUEST,
            &[
                &address.to_le_bytes(),
                &[PAGE_SCAN_REPETITION_MODE_R2, 0x00],
                &0u16.to_le_bytes(),
            ],
        )
    }

    /// Configure LE scanning; active scanning requests scan responses
    #[must_use]
    pub fn le_set_scan_parameters(passive: bool) -> Self {
        Self::build(
            opcode::LE_SET_SCAN_PARAMETERS,
            &[
                &[u8::from(!passive)],
                &LE_SCAN_INTERVAL.to_le_bytes(),
                &LE_SCAN_WINDOW.to_le_bytes(),
                &[0x00, 0x00],
            ],
        )
    }

    /// Turn LE scanning on or off
    #[must_use]
    pub fn le_set_scan_enable(enable: bool, filter_duplicates: bool) -> Self {
        Self::build(
            opcode::LE_SET_SCAN_ENABLE,
            &[&[u8::from(enable), u8::from(filter_duplicates)]],
        )
    }

    /// Initiate an LE connection; `peer_type` uses the LE encoding (0 public, 1 random)
    #[must_use]
    pub fn le_create_connection(address: BluetoothAddress, peer_type: u8) -> Self {
        Self::build(
            opcode::LE_CREATE_CONNECTION,
            &[
                &LE_CONNECT_SCAN_INTERVAL.to_le_bytes(),
                &LE_CONNECT_SCAN_INTERVAL.to_le_bytes(),
                &[0x00, peer_type],
                &address.to_le_bytes(),
                &[0x00],
                &LE_CONNECTION_INTERVAL.to_le_bytes(),
                &LE_CONNECTION_INTERVAL.to_le_bytes(),
                &0u16.to_le_bytes(),
                &LE_SUPERVISION_TIMEOUT.to_le_bytes(),
                &LE_CE_LENGTH.to_le_bytes(),
                &LE_CE_LENGTH.to_le_bytes(),
            ],
        )
    }

    /// Abandon a pending LE connection attempt
    #[must_use]
    pub fn le_create_connection_cancel() -> Self {
        Self::build(opcode::LE_CREATE_CONNECTION_CANCEL, &[])
    }

    /// Opcode of this command
    #[must_use]
    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    /// Parameter bytes
    #[must_use]
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// H4 frame: packet type, opcode, parameter length, parameters
    #[must_use]
    pub fn encode(&self) -> Vec<u8, { MAX_PARAMETERS + 4 }> {
        let mut frame = Vec::new();
        frame.push(COMMAND_PACKET).ok();
        frame.extend_from_slice(&self.opcode.to_le_bytes()).ok();
        frame.push(self.params.len() as u8).ok();
        frame.extend_from_slice(&self.params).ok();
        frame
    }
}
