//! Management channel event decoding

use crate::codec::{DecodeError, Reader};
use crate::hci::AdvertisingData;
use crate::keys::{IdentityKey, LinkKey, LongTermKey};
use crate::mgmt::Settings;
use crate::{AddressType, BluetoothAddress};

/// Management event codes
pub mod code {
    /// Command Complete
    pub const COMMAND_COMPLETE: u16 = 0x0001;
    /// Command Status
    pub const COMMAND_STATUS: u16 = 0x0002;
    /// Controller Error
    pub const CONTROLLER_ERROR: u16 = 0x0003;
    /// New Settings
    pub const NEW_SETTINGS: u16 = 0x0006;
    /// New Link Key
    pub const NEW_LINK_KEY: u16 = 0x0009;
    /// New Long Term Key
    pub const NEW_LONG_TERM_KEY: u16 = 0x000A;
    /// Device Connected
    pub const DEVICE_CONNECTED: u16 = 0x000B;
    /// Device Disconnected
    pub const DEVICE_DISCONNECTED: u16 = 0x000C;
    /// Connect Failed
    pub const CONNECT_FAILED: u16 = 0x000D;
    /// PIN Code Request
    pub const PIN_CODE_REQUEST: u16 = 0x000E;
    /// User Confirmation Request
    pub const USER_CONFIRM_REQUEST: u16 = 0x000F;
    /// User Passkey Request
    pub const USER_PASSKEY_REQUEST: u16 = 0x0010;
    /// Authentication Failed
    pub const AUTH_FAILED: u16 = 0x0011;
    /// Passkey Notify
    pub const PASSKEY_NOTIFY: u16 = 0x0017;
    /// New Identity Resolving Key
    pub const NEW_IRK: u16 = 0x0018;
    /// New Signature Resolving Key
    pub const NEW_CSRK: u16 = 0x0019;
    /// New Connection Parameter
    pub const NEW_CONN_PARAM: u16 = 0x001C;
}

/// Decoded management event together with the controller it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgmtFrame {
    /// Controller index from the header
    pub index: u16,
    /// Event payload
    pub event: MgmtEvent,
}

/// Decoded management event
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MgmtEvent {
    CommandComplete {
        opcode: u16,
        status: u8,
        data: Vec<u8>,
    },
    CommandStatus {
        opcode: u16,
        status: u8,
    },
    ControllerError {
        code: u8,
    },
    NewSettings {
        settings: Settings,
    },
    NewLinkKey {
        store_hint: bool,
        key: LinkKey,
    },
    NewLongTermKey {
        store_hint: bool,
        key: LongTermKey,
    },
    DeviceConnected {
        address: BluetoothAddress,
        address_type: AddressType,
        flags: u32,
        eir: AdvertisingData,
    },
    DeviceDisconnected {
        address: BluetoothAddress,
        address_type: AddressType,
        reason: u8,
    },
    ConnectFailed {
        address: BluetoothAddress,
        address_type: AddressType,
        status: u8,
    },
    PinCodeRequest {
        address: BluetoothAddress,
        address_type: AddressType,
        secure: bool,
    },
    UserConfirmRequest {
        address: BluetoothAddress,
        address_type: AddressType,
        confirm_hint: u8,
        value: u32,
    },
    UserPasskeyRequest {
        address: BluetoothAddress,
        address_type: AddressType,
    },
    AuthFailed {
        address: BluetoothAddress,
        address_type: AddressType,
        status: u8,
    },
    PasskeyNotify {
        address: BluetoothAddress,
        address_type: AddressType,
        passkey: u32,
        entered: u8,
    },
    NewIdentityKey {
        store_hint: bool,
        random_address: BluetoothAddress,
        key: IdentityKey,
    },
    NewSignatureKey {
        store_hint: bool,
        address: BluetoothAddress,
        address_type: AddressType,
        key_type: u8,
    },
    NewConnectionParameters {
        address: BluetoothAddress,
        address_type: AddressType,
        store_hint: bool,
        min_interval: u16,
        max_interval: u16,
        latency: u16,
        timeout: u16,
    },
    Unknown {
        code: u16,
    },
}

impl MgmtFrame {
    /// Decode one management frame
    ///
    /// # Errors
    /// Fails on a short header, a payload shorter than declared, an unknown
    /// address type, or any field running past the payload.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut header = Reader::new(frame);
        let code = header.u16()?;
        let index = header.u16()?;
        let declared = usize::from(header.u16()?);
        let payload = header.rest();
        if payload.len() < declared {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Ok(Self {
            index,
            event: MgmtEvent::decode(code, &payload[..declared])?,
        })
    }
}

impl MgmtEvent {
    fn decode(code: u16, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let event = match code {
            code::COMMAND_COMPLETE => Self::CommandComplete {
                opcode: r.u16()?,
                status: r.u8()?,
                data: r.rest().to_vec(),
            },
            code::COMMAND_STATUS => Self::CommandStatus {
                opcode: r.u16()?,
                status: r.u8()?,
            },
            code::CONTROLLER_ERROR => Self::ControllerError { code: r.u8()? },
            code::NEW_SETTINGS => Self::NewSettings {
                settings: Settings(r.u32()?),
            },
            code::NEW_LINK_KEY => {
                let store_hint = r.u8()? != 0;
                let (address, address_type) = address_info(&mut r)?;
                let key_type = r.u8()?;
                let value = r.array()?;
                let pin_length = r.u8()?;
                Self::NewLinkKey {
                    store_hint,
                    key: LinkKey {
                        address,
                        address_type,
                        key_type,
                        pin_length,
                        value,
                    },
                }
            }
            code::NEW_LONG_TERM_KEY => {
                let store_hint = r.u8()? != 0;
                let (address, address_type) = address_info(&mut r)?;
                Self::NewLongTermKey {
                    store_hint,
                    key: LongTermKey {
                        address,
                        address_type,
                        key_type: r.u8()?,
                        master: r.u8()? != 0,
                        encryption_size: r.u8()?,
                        ediv: r.u16()?,
                        random: r.u64()?,
                        value: r.array()?,
                    },
                }
            }
            code::DEVICE_CONNECTED => {
                let (address, address_type) = address_info(&mut r)?;
                let flags = r.u32()?;
                let length = usize::from(r.u16()?);
                Self::DeviceConnected {
                    address,
                    address_type,
                    flags,
                    eir: AdvertisingData::parse(r.bytes(length)?),
                }
            }
            code::DEVICE_DISCONNECTED => {
                let (address, address_type) = address_info(&mut r)?;
                Self::DeviceDisconnected {
                    address,
                    address_type,
                    reason: r.u8()?,
                }
            }
            code::CONNECT_FAILED => {
                let (address, address_type) = address_info(&mut r)?;
                Self::ConnectFailed {
                    address,
                    address_type,
                    status: r.u8()?,
                }
            }
            code::PIN_CODE_REQUEST => {
                let (address, address_type) = address_info(&mut r)?;
                Self::PinCodeRequest {
                    address,
                    address_type,
                    secure: r.u8()? != 0,
                }
            }
            code::USER_CONFIRM_REQUEST => {
                let (address, address_type) = address_info(&mut r)?;
                Self::UserConfirmRequest {
                    address,
                    address_type,
                    confirm_hint: r.u8()?,
                    value: r.u32()?,
                }
            }
            code::USER_PASSKEY_REQUEST => {
                let (address, address_type) = address_info(&mut r)?;
                Self::UserPasskeyRequest {
                    address,
                    address_type,
                }
            }
            code::AUTH_FAILED => {
                let (address, address_type) = address_info(&mut r)?;
                Self::AuthFailed {
                    address,
                    address_type,
                    status: r.u8()?,
                }
            }
            code::PASSKEY_NOTIFY => {
                let (address, address_type) = address_info(&mut r)?;
                Self::PasskeyNotify {
                    address,
                    address_type,
                    passkey: r.u32()?,
                    entered: r.u8()?,
                }
            }
            code::NEW_IRK => {
                let store_hint = r.u8()? != 0;
                let random_address = r.address()?;
                let (address, address_type) = address_info(&mut r)?;
                Self::NewIdentityKey {
                    store_hint,
                    random_address,
                    key: IdentityKey {
                        address,
                        address_type,
                        value: r.array()?,
                    },
                }
            }
            code::NEW_CSRK => {
                let store_hint = r.u8()? != 0;
                let (address, address_type) = address_info(&mut r)?;
                let key_type = r.u8()?;
                // the signature key value is not used by this controller
                r.bytes(16)?;
                Self::NewSignatureKey {
                    store_hint,
                    address,
                    address_type,
                    key_type,
                }
            }
            code::NEW_CONN_PARAM => {
                let (address, address_type) = address_info(&mut r)?;
                Self::NewConnectionParameters {
                    address,
                    address_type,
                    store_hint: r.u8()? != 0,
                    min_interval: r.u16()?,
                    max_interval: r.u16()?,
                    latency: r.u16()?,
                    timeout: r.u16()?,
                }
            }
            other => Self::Unknown { code: other },
        };
        Ok(event)
    }

    /// Device the event concerns, if any
    #[must_use]
    pub fn device(&self) -> Option<(BluetoothAddress, AddressType)> {
        match self {
            Self::NewLinkKey { key, .. } => Some((key.address, key.address_type)),
            Self::NewLongTermKey { key, .. } => Some((key.address, key.address_type)),
            Self::NewIdentityKey { key, .. } => Some((key.address, key.address_type)),
            Self::DeviceConnected {
                address,
                address_type,
                ..
            }
            | Self::DeviceDisconnected {
                address,
                address_type,
                ..
            }
            | Self::ConnectFailed {
                address,
                address_type,
                ..
            }
            | Self::PinCodeRequest {
                address,
                address_type,
                ..
            }
            | Self::UserConfirmRequest {
                address,
                address_type,
                ..
            }
            | Self::UserPasskeyRequest {
                address,
                address_type,
            }
            | Self::AuthFailed {
                address,
                address_type,
                ..
            }
            | Self::PasskeyNotify {
                address,
                address_type,
                ..
            }
            | Self::NewSignatureKey {
                address,
                address_type,
                ..
            }
            | Self::NewConnectionParameters {
                address,
                address_type,
                ..
            } => Some((*address, *address_type)),
            _ => None,
        }
    }
}

fn address_info(r: &mut Reader<'_>) -> Result<(BluetoothAddress, AddressType), DecodeError> {
    let address = r.address()?;
    let kind = AddressType::from_raw(r.u8()?).ok_or(DecodeError::InvalidField("address type"))?;
    Ok((address, kind))
}

#[cfg(test)]
pub(crate) fn frame(code: u16, index: u16, params: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + params.len());
    out.extend_from_slice(&code.to_le_bytes());
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&(params.len() as u16).to_le_bytes());
    out.extend_from_slice(params);
    out
}

#[cfg(test)]
pub(crate) fn addr_info(address: BluetoothAddress, kind: AddressType) -> Vec<u8> {
    let mut info = address.to_le_bytes().to_vec();
    info.push(kind.raw());
    info
}
