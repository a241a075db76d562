//! Raw HCI event decoding
//!
//! Frames arrive as H4 event packets: `0x04 | event code | parameter length |
//! parameters`. Every field is read through [`Reader`], so a short frame
//! yields [`DecodeError`] instead of an out-of-bounds read.

use crate::codec::{DecodeError, Reader, printable_name};
use crate::constants::{EIR_LENGTH, FEATURES_LENGTH, HANDLE_MASK, MAX_NAME_LENGTH};
use crate::hci::advertising::AdvertisingData;
use crate::{AddressType, BluetoothAddress, ClassOfDevice};

/// H4 packet indicator for events
pub const EVENT_PACKET: u8 = 0x04;

/// Event codes
pub mod code {
    /// Inquiry Complete
    pub const INQUIRY_COMPLETE: u8 = 0x01;
    /// Inquiry Result
    pub const INQUIRY_RESULT: u8 = 0x02;
    /// Connection Complete
    pub const CONNECTION_COMPLETE: u8 = 0x03;
    /// Connection Request
    pub const CONNECTION_REQUEST: u8 = 0x04;
    /// Disconnection Complete
    pub const DISCONNECTION_COMPLETE: u8 = 0x05;
    /// Authentication Complete
    pub const AUTHENTICATION_COMPLETE: u8 = 0x06;
    /// Remote Name Request Complete
    pub const REMOTE_NAME_COMPLETE: u8 = 0x07;
    /// Command Complete
    pub const COMMAND_COMPLETE: u8 = 0x0E;
    /// Command Status
    pub const COMMAND_STATUS: u8 = 0x0F;
    /// PIN Code Request
    pub const PIN_CODE_REQUEST: u8 = 0x16;
    /// Link Key Request
    pub const LINK_KEY_REQUEST: u8 = 0x17;
    /// Link Key Notification
    pub const LINK_KEY_NOTIFICATION: u8 = 0x18;
    /// Inquiry Result with RSSI
    pub const INQUIRY_RESULT_WITH_RSSI: u8 = 0x22;
    /// Extended Inquiry Result
    pub const EXTENDED_INQUIRY_RESULT: u8 = 0x2F;
    /// IO Capability Request
    pub const IO_CAPABILITY_REQUEST: u8 = 0x31;
    /// IO Capability Response
    pub const IO_CAPABILITY_RESPONSE: u8 = 0x32;
    /// User Confirmation Request
    pub const USER_CONFIRMATION_REQUEST: u8 = 0x33;
    /// User Passkey Request
    pub const USER_PASSKEY_REQUEST: u8 = 0x34;
    /// Simple Pairing Complete
    pub const SIMPLE_PAIRING_COMPLETE: u8 = 0x36;
    /// User Passkey Notification
    pub const USER_PASSKEY_NOTIFICATION: u8 = 0x3B;
    /// LE Meta Event
    pub const LE_META: u8 = 0x3E;
    /// Vendor specific
    pub const VENDOR: u8 = 0xFF;

    /// LE Connection Complete sub-event
    pub const LE_CONNECTION_COMPLETE: u8 = 0x01;
    /// LE Advertising Report sub-event
    pub const LE_ADVERTISING_REPORT: u8 = 0x02;
    /// LE Connection Update Complete sub-event
    pub const LE_CONNECTION_UPDATE_COMPLETE: u8 = 0x03;
    /// LE Read Remote Features Complete sub-event
    pub const LE_REMOTE_FEATURES_COMPLETE: u8 = 0x04;
}

/// Advertising event types that identify a connectable device
pub mod advertising_type {
    /// Connectable undirected advertising
    pub const ADV_IND: u8 = 0x00;
    /// Scan response
    pub const SCAN_RSP: u8 = 0x04;
}

/// One device answering a classic inquiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryResponse {
    /// Responding device
    pub address: BluetoothAddress,
    /// Its class of device
    pub class: ClassOfDevice,
    /// Signal strength, absent for plain inquiry results
    pub rssi: Option<i8>,
    /// Extended inquiry response payload, if any
    pub eir: Option<AdvertisingData>,
}

/// One LE advertising report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingReport {
    /// Advertising event type (see [`advertising_type`])
    pub event_type: u8,
    /// Advertiser address type
    pub address_type: AddressType,
    /// Advertiser address
    pub address: BluetoothAddress,
    /// Parsed AD structures
    pub data: AdvertisingData,
    /// Signal strength in dBm
    pub rssi: i8,
}

/// Decoded raw event
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciEvent {
    InquiryComplete {
        status: u8,
    },
    InquiryResult(Vec<InquiryResponse>),
    ConnectionComplete {
        status: u8,
        handle: u16,
        address: BluetoothAddress,
        link_type: u8,
        encryption: bool,
    },
    ConnectionRequest {
        address: BluetoothAddress,
        class: ClassOfDevice,
        link_type: u8,
    },
    DisconnectionComplete {
        status: u8,
        handle: u16,
        reason: u8,
    },
    AuthenticationComplete {
        status: u8,
        handle: u16,
    },
    RemoteNameComplete {
        status: u8,
        address: BluetoothAddress,
        name: Option<String>,
    },
    /// `status` is the first return parameter, when the command returns any
    CommandComplete {
        opcode: u16,
        status: Option<u8>,
    },
    CommandStatus {
        status: u8,
        opcode: u16,
    },
    PinCodeRequest {
        address: BluetoothAddress,
    },
    LinkKeyRequest {
        address: BluetoothAddress,
    },
    LinkKeyNotification {
        address: BluetoothAddress,
        key_type: u8,
    },
    IoCapabilityRequest {
        address: BluetoothAddress,
    },
    IoCapabilityResponse {
        address: BluetoothAddress,
        capability: u8,
        oob_data: u8,
        authentication: u8,
    },
    UserConfirmationRequest {
        address: BluetoothAddress,
        passkey: u32,
    },
    UserPasskeyRequest {
        address: BluetoothAddress,
    },
    UserPasskeyNotification {
        address: BluetoothAddress,
        passkey: u32,
    },
    SimplePairingComplete {
        status: u8,
        address: BluetoothAddress,
    },
    LeConnectionComplete {
        status: u8,
        handle: u16,
        role: u8,
        address_type: AddressType,
        address: BluetoothAddress,
        interval: u16,
        latency: u16,
        supervision_timeout: u16,
    },
    LeAdvertisingReport(Vec<AdvertisingReport>),
    LeConnectionUpdateComplete {
        status: u8,
        handle: u16,
        interval: u16,
        latency: u16,
        supervision_timeout: u16,
    },
    LeRemoteFeatures {
        status: u8,
        handle: u16,
        features: [u8; FEATURES_LENGTH],
    },
    LeUnknown {
        subevent: u8,
    },
    Vendor {
        length: usize,
    },
    Unknown {
        code: u8,
    },
}

impl HciEvent {
    /// Decode one H4 event packet
    ///
    /// # Errors
    /// Fails on a non-event packet, a payload shorter than its header declares,
    /// or any field running past the payload.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut header = Reader::new(frame);
        let packet = header.u8()?;
        if packet != EVENT_PACKET {
            return Err(DecodeError::PacketType(packet));
        }
        let code = header.u8()?;
        let declared = usize::from(header.u8()?);
        let payload = header.rest();
        if payload.len() < declared {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Self::decode_payload(code, &payload[..declared])
    }

    fn decode_payload(code: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let event = match code {
            code::INQUIRY_COMPLETE => Self::InquiryComplete { status: r.u8()? },
            code::INQUIRY_RESULT => {
                let count = r.u8()?;
                let mut responses = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let address = r.address()?;
                    // page scan repetition, period and (reserved) mode
                    r.bytes(3)?;
                    let class = r.class()?;
                    r.u16()?;
                    responses.push(InquiryResponse {
                        address,
                        class,
                        rssi: None,
                        eir: None,
                    });
                }
                Self::InquiryResult(responses)
            }
            code::INQUIRY_RESULT_WITH_RSSI => {
                let count = r.u8()?;
                let mut responses = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let address = r.address()?;
                    r.bytes(2)?;
                    let class = r.class()?;
                    r.u16()?;
                    let rssi = r.i8()?;
                    responses.push(InquiryResponse {
                        address,
                        class,
                        rssi: Some(rssi),
                        eir: None,
                    });
                }
                Self::InquiryResult(responses)
            }
            code::EXTENDED_INQUIRY_RESULT => {
                let count = r.u8()?;
                let mut responses = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    // controllers report a single record per event whatever the count says
                    if !responses.is_empty() && r.remaining() == 0 {
                        break;
                    }
                    let address = r.address()?;
                    r.bytes(2)?;
                    let class = r.class()?;
                    r.u16()?;
                    let rssi = r.i8()?;
                    let eir = AdvertisingData::parse(r.bytes(EIR_LENGTH.min(r.remaining()))?);
                    responses.push(InquiryResponse {
                        address,
                        class,
                        rssi: Some(rssi),
                        eir: Some(eir),
                    });
                }
                Self::InquiryResult(responses)
            }
            code::CONNECTION_COMPLETE => Self::ConnectionComplete {
                status: r.u8()?,
                handle: r.u16()? & HANDLE_MASK,
                address: r.address()?,
                link_type: r.u8()?,
                encryption: r.u8()? != 0,
            },
            code::CONNECTION_REQUEST => Self::ConnectionRequest {
                address: r.address()?,
                class: r.class()?,
                link_type: r.u8()?,
            },
            code::DISCONNECTION_COMPLETE => Self::DisconnectionComplete {
                status: r.u8()?,
                handle: r.u16()? & HANDLE_MASK,
                reason: r.u8()?,
            },
            code::AUTHENTICATION_COMPLETE => Self::AuthenticationComplete {
                status: r.u8()?,
                handle: r.u16()? & HANDLE_MASK,
            },
            code::REMOTE_NAME_COMPLETE => {
                let status = r.u8()?;
                let address = r.address()?;
                let raw = r.rest();
                let name = printable_name(&raw[..raw.len().min(MAX_NAME_LENGTH)]);
                Self::RemoteNameComplete {
                    status,
                    address,
                    name,
                }
            }
            code::COMMAND_COMPLETE => {
                r.u8()?;
                let opcode = r.u16()?;
                let status = (r.remaining() > 0).then(|| r.u8()).transpose()?;
                Self::CommandComplete { opcode, status }
            }
            code::COMMAND_STATUS => {
                let status = r.u8()?;
                r.u8()?;
                Self::CommandStatus {
                    status,
                    opcode: r.u16()?,
                }
            }
            code::PIN_CODE_REQUEST => Self::PinCodeRequest {
                address: r.address()?,
            },
            code::LINK_KEY_REQUEST => Self::LinkKeyRequest {
                address: r.address()?,
            },
            code::LINK_KEY_NOTIFICATION => {
                let address = r.address()?;
                // the key itself travels over the management channel as well,
                // together with the persistence hint; never keep it from here
                r.bytes(16)?;
                Self::LinkKeyNotification {
                    address,
                    key_type: r.u8()?,
                }
            }
            code::IO_CAPABILITY_REQUEST => Self::IoCapabilityRequest {
                address: r.address()?,
            },
            code::IO_CAPABILITY_RESPONSE => Self::IoCapabilityResponse {
                address: r.address()?,
                capability: r.u8()?,
                oob_data: r.u8()?,
                authentication: r.u8()?,
            },
            code::USER_CONFIRMATION_REQUEST => Self::UserConfirmationRequest {
                address: r.address()?,
                passkey: r.u32()?,
            },
            code::USER_PASSKEY_REQUEST => Self::UserPasskeyRequest {
                address: r.address()?,
            },
            code::USER_PASSKEY_NOTIFICATION => Self::UserPasskeyNotification {
                address: r.address()?,
                passkey: r.u32()?,
            },
            code::SIMPLE_PAIRING_COMPLETE => Self::SimplePairingComplete {
                status: r.u8()?,
                address: r.address()?,
            },
            code::LE_META => Self::decode_le_meta(&mut r)?,
            code::VENDOR => Self::Vendor {
                length: payload.len(),
            },
            other => Self::Unknown { code: other },
        };
        Ok(event)
    }

    fn decode_le_meta(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let subevent = r.u8()?;
        let event = match subevent {
            code::LE_CONNECTION_COMPLETE => {
                let status = r.u8()?;
                let handle = r.u16()? & HANDLE_MASK;
                let role = r.u8()?;
                let address_type = AddressType::from_le_raw(r.u8()?);
                let address = r.address()?;
                let interval = r.u16()?;
                let latency = r.u16()?;
                let supervision_timeout = r.u16()?;
                Self::LeConnectionComplete {
                    status,
                    handle,
                    role,
                    address_type,
                    address,
                    interval,
                    latency,
                    supervision_timeout,
                }
            }
            code::LE_ADVERTISING_REPORT => {
                let count = r.u8()?;
                let mut reports = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let event_type = r.u8()?;
                    let address_type = AddressType::from_le_raw(r.u8()?);
                    let address = r.address()?;
                    let length = usize::from(r.u8()?);
                    let data = AdvertisingData::parse(r.bytes(length)?);
                    let rssi = r.i8()?;
                    reports.push(AdvertisingReport {
                        event_type,
                        address_type,
                        address,
                        data,
                        rssi,
                    });
                }
                Self::LeAdvertisingReport(reports)
            }
            code::LE_CONNECTION_UPDATE_COMPLETE => Self::LeConnectionUpdateComplete {
                status: r.u8()?,
                handle: r.u16()? & HANDLE_MASK,
                interval: r.u16()?,
                latency: r.u16()?,
                supervision_timeout: r.u16()?,
            },
            code::LE_REMOTE_FEATURES_COMPLETE => Self::LeRemoteFeatures {
                status: r.u8()?,
                handle: r.u16()? & HANDLE_MASK,
                features: r.array()?,
            },
            other => Self::LeUnknown { subevent: other },
        };
        Ok(event)
    }
}

#[cfg(test)]
pub(crate) fn frame(code: u8, params: &[u8]) -> Vec<u8> {
    let mut out = vec![EVENT_PACKET, code, params.len() as u8];
    out.extend_from_slice(params);
    out
}
