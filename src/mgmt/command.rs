//! Management channel commands
//!
//! Every frame, in either direction, starts with a 6-byte header:
//! opcode or event code, controller index and parameter length, each a
//! little-endian `u16`.

use crate::constants::{MAX_NAME_LENGTH, MAX_SHORT_NAME_LENGTH};
use crate::keys::{KeyList, KeyMaterial};
use crate::{AddressType, BluetoothAddress};

/// Management opcodes used by the controller
pub mod opcode {
    /// Read Controller Information
    pub const READ_INFO: u16 = 0x0004;
    /// Set Powered
    pub const SET_POWERED: u16 = 0x0005;
    /// Set Connectable
    pub const SET_CONNECTABLE: u16 = 0x0007;
    /// Set Bondable
    pub const SET_BONDABLE: u16 = 0x0009;
    /// Set Link Security
    pub const SET_LINK_SECURITY: u16 = 0x000A;
    /// Set Secure Simple Pairing
    pub const SET_SSP: u16 = 0x000B;
    /// Set Low Energy
    pub const SET_LE: u16 = 0x000D;
    /// Set Device Class
    pub const SET_DEV_CLASS: u16 = 0x000E;
    /// Set Local Name
    pub const SET_LOCAL_NAME: u16 = 0x000F;
    /// Load Link Keys
    pub const LOAD_LINK_KEYS: u16 = 0x0012;
    /// Load Long Term Keys
    pub const LOAD_LONG_TERM_KEYS: u16 = 0x0013;
    /// PIN Code Reply
    pub const PIN_CODE_REPLY: u16 = 0x0016;
    /// PIN Code Negative Reply
    pub const PIN_CODE_NEG_REPLY: u16 = 0x0017;
    /// Pair Device
    pub const PAIR_DEVICE: u16 = 0x0019;
    /// Cancel Pair Device
    pub const CANCEL_PAIR_DEVICE: u16 = 0x001A;
    /// Unpair Device
    pub const UNPAIR_DEVICE: u16 = 0x001B;
    /// User Confirmation Reply
    pub const USER_CONFIRM_REPLY: u16 = 0x001C;
    /// User Confirmation Negative Reply
    pub const USER_CONFIRM_NEG_REPLY: u16 = 0x001D;
    /// User Passkey Reply
    pub const USER_PASSKEY_REPLY: u16 = 0x001E;
    /// User Passkey Negative Reply
    pub const USER_PASSKEY_NEG_REPLY: u16 = 0x001F;
    /// Set Secure Connections
    pub const SET_SECURE_CONN: u16 = 0x002D;
    /// Set Privacy
    pub const SET_PRIVACY: u16 = 0x002F;
    /// Load Identity Resolving Keys
    pub const LOAD_IRKS: u16 = 0x0030;
    /// Add Device (auto-connect whitelist)
    pub const ADD_DEVICE: u16 = 0x0033;
    /// Remove Device
    pub const REMOVE_DEVICE: u16 = 0x0034;
    /// Set Public Address
    pub const SET_PUBLIC_ADDRESS: u16 = 0x0039;
}

/// Management header size
pub const HEADER_SIZE: usize = 6;

/// Auto-connect policy handed to Add Device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AutoConnectMode {
    /// Report the device when seen while background scanning
    Report = 0x00,
    /// Accept incoming connections (classic)
    Direct = 0x01,
    /// Connect whenever the device shows up (LE)
    Always = 0x02,
}

/// IO capability advertised when initiating pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Capability {
    /// Display only
    DisplayOnly = 0x00,
    /// Display with yes/no input
    DisplayYesNo = 0x01,
    /// Keyboard only
    KeyboardOnly = 0x02,
    /// No input and no output
    #[default]
    NoInputNoOutput = 0x03,
    /// Keyboard and display
    KeyboardDisplay = 0x04,
}

/// Encoded management command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgmtCommand {
    opcode: u16,
    index: u16,
    params: Vec<u8>,
}

impl MgmtCommand {
    /// Command with raw parameters
    #[must_use]
    pub fn new(opcode: u16, index: u16, params: Vec<u8>) -> Self {
        Self {
            opcode,
            index,
            params,
        }
    }

    /// Single boolean mode setting (power, SSP, LE, ...)
    #[must_use]
    pub fn mode(opcode: u16, index: u16, enable: bool) -> Self {
        Self::new(opcode, index, vec![u8::from(enable)])
    }

    /// Command whose only parameter is a device address
    #[must_use]
    pub fn address(opcode: u16, index: u16, address: BluetoothAddress, kind: AddressType) -> Self {
        Self::new(opcode, index, address_info(address, kind).to_vec())
    }

    /// Set Local Name; names are truncated to the kernel's field widths
    #[must_use]
    pub fn local_name(index: u16, short_name: &str, name: &str) -> Self {
        let mut params = vec![0u8; MAX_NAME_LENGTH + 1 + MAX_SHORT_NAME_LENGTH + 1];
        let full = truncate(name, MAX_NAME_LENGTH);
        params[..full.len()].copy_from_slice(full);
        let short = truncate(short_name, MAX_SHORT_NAME_LENGTH);
        let offset = MAX_NAME_LENGTH + 1;
        params[offset..offset + short.len()].copy_from_slice(short);
        Self::new(opcode::SET_LOCAL_NAME, index, params)
    }

    /// Set Device Class
    #[must_use]
    pub fn device_class(index: u16, major: u8, minor: u8) -> Self {
        Self::new(opcode::SET_DEV_CLASS, index, vec![major & 0x1F, minor & 0x3F])
    }

    /// Set Privacy; a zero IRK lets the kernel generate one
    #[must_use]
    pub fn privacy(index: u16, mode: u8, irk: Option<&[u8; 16]>) -> Self {
        let mut params = Vec::with_capacity(17);
        params.push(mode);
        params.extend_from_slice(irk.unwrap_or(&[0u8; 16]));
        Self::new(opcode::SET_PRIVACY, index, params)
    }

    /// Set Public Address
    #[must_use]
    pub fn public_address(index: u16, address: BluetoothAddress) -> Self {
        Self::new(opcode::SET_PUBLIC_ADDRESS, index, address.to_le_bytes().to_vec())
    }

    /// Load Link Keys; debug keys are never accepted
    #[must_use]
    pub fn load_link_keys<K: KeyMaterial>(index: u16, keys: &KeyList<K>) -> Self {
        let mut params = vec![0x00];
        params.extend_from_slice(&keys.to_wire());
        Self::new(opcode::LOAD_LINK_KEYS, index, params)
    }

    /// Load Long Term Keys or Load IRKs, selected by `opcode`
    #[must_use]
    pub fn load_keys<K: KeyMaterial>(opcode: u16, index: u16, keys: &KeyList<K>) -> Self {
        Self::new(opcode, index, keys.to_wire())
    }

    /// Pair Device
    #[must_use]
    pub fn pair(
        index: u16,
        address: BluetoothAddress,
        kind: AddressType,
        capability: Capability,
    ) -> Self {
        let mut params = address_info(address, kind).to_vec();
        params.push(capability as u8);
        Self::new(opcode::PAIR_DEVICE, index, params)
    }

    /// Unpair Device, also terminating any live connection
    #[must_use]
    pub fn unpair(index: u16, address: BluetoothAddress, kind: AddressType) -> Self {
        let mut params = address_info(address, kind).to_vec();
        params.push(0x01);
        Self::new(opcode::UNPAIR_DEVICE, index, params)
    }

    /// Add Device to the auto-connect whitelist
    #[must_use]
    pub fn add_device(
        index: u16,
        address: BluetoothAddress,
        kind: AddressType,
        mode: AutoConnectMode,
    ) -> Self {
        let mut params = address_info(address, kind).to_vec();
        params.push(mode as u8);
        Self::new(opcode::ADD_DEVICE, index, params)
    }

    /// PIN Code Reply
    #[must_use]
    pub fn pin_code(index: u16, address: BluetoothAddress, kind: AddressType, pin: &str) -> Self {
        let pin = truncate(pin, 16);
        let mut params = address_info(address, kind).to_vec();
        params.push(pin.len() as u8);
        let mut code = [0u8; 16];
        code[..pin.len()].copy_from_slice(pin);
        params.extend_from_slice(&code);
        Self::new(opcode::PIN_CODE_REPLY, index, params)
    }

    /// User Passkey Reply
    #[must_use]
    pub fn passkey(index: u16, address: BluetoothAddress, kind: AddressType, passkey: u32) -> Self {
        let mut params = address_info(address, kind).to_vec();
        params.extend_from_slice(&passkey.to_le_bytes());
        Self::new(opcode::USER_PASSKEY_REPLY, index, params)
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

    /// Header followed by parameters
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_SIZE + self.params.len());
        frame.extend_from_slice(&self.opcode.to_le_bytes());
        frame.extend_from_slice(&self.index.to_le_bytes());
        frame.extend_from_slice(&(self.params.len() as u16).to_le_bytes());
        frame.extend_from_slice(&self.params);
        frame
    }
}

/// `mgmt_addr_info`: little-endian address followed by its type
fn address_info(address: BluetoothAddress, kind: AddressType) -> [u8; 7] {
    let mut info = [0u8; 7];
    info[..6].copy_from_slice(&address.to_le_bytes());
    info[6] = kind.raw();
    info
}

/// Longest prefix of `text` within `limit` bytes that ends on a char boundary
fn truncate(text: &str, limit: usize) -> &[u8] {
    let mut end = text.len().min(limit);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text.as_bytes()[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: BluetoothAddress = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

    #[test]
    fn test_header_layout() {
        let frame = MgmtCommand::mode(opcode::SET_POWERED, 0x0001, true).encode();
        assert_eq!(frame, vec![0x05, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn test_local_name_layout() {
        let cmd = MgmtCommand::local_name(0, "btcontrol-long-short", "Living Room");
        assert_eq!(cmd.params().len(), 260);
        assert_eq!(&cmd.params()[..11], b"Living Room");
        assert_eq!(cmd.params()[11], 0);
        assert_eq!(&cmd.params()[249..259], b"btcontrol-");
        assert_eq!(cmd.params()[259], 0);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), b"h");
        assert_eq!(truncate("abc", 10), b"abc");
    }

    #[test]
    fn test_pair_and_whitelist_layout() {
        let pair = MgmtCommand::pair(0, ADDR, AddressType::LePublic, Capability::KeyboardDisplay);
        assert_eq!(
            pair.params(),
            &[0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, 0x01, 0x04]
        );
        let add = MgmtCommand::add_device(0, ADDR, AddressType::BrEdr, AutoConnectMode::Direct);
        assert_eq!(add.params()[6..], [0x00, 0x01]);
        let unpair = MgmtCommand::unpair(0, ADDR, AddressType::BrEdr);
        assert_eq!(unpair.params()[7], 0x01);
    }

    #[test]
    fn test_pin_code_layout() {
        let cmd = MgmtCommand::pin_code(0, ADDR, AddressType::BrEdr, "0000");
        assert_eq!(cmd.params().len(), 7 + 1 + 16);
        assert_eq!(cmd.params()[7], 4);
        assert_eq!(&cmd.params()[8..12], b"0000");
    }
}
