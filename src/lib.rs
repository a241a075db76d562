#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines, clippy::module_name_repetitions)]

mod address;
pub mod api;
mod class_of_device;
mod codec;
pub mod constants;
pub mod control;
pub mod device;
mod exchange;
pub mod hci;
pub mod jobs;
pub mod keys;
pub mod mgmt;
pub mod processor;
pub mod registry;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SCAN_DURATION;

pub use address::{AddressType, BluetoothAddress};
pub use class_of_device::{ClassOfDevice, MajorDeviceClass, ServiceClass};
pub use codec::DecodeError;
pub use control::{AdapterProperty, AdapterStatus, BluetoothControl};
pub use device::{Action, Device, DeviceCallback, DeviceSummary, DisconnectReason};
pub use registry::{DeviceState, Observer};
pub use transport::Transport;

/// Everything that can go wrong while driving the adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BluetoothError {
    /// Another action is in flight on the device or adapter
    #[error("operation already in progress")]
    InProgress,
    /// The device is already in the requested state
    #[error("already in the requested state")]
    AlreadyDone,
    /// No device with this address is known
    #[error("unknown device {0}")]
    UnknownDevice(BluetoothAddress),
    /// Adapter powered off, blocked or lacking the feature
    #[error("adapter unavailable")]
    Unavailable,
    /// Kernel channel not open
    #[error("channel closed")]
    ChannelClosed,
    /// No completion for the command within `MAX_ACTION_TIMEOUT`
    #[error("command 0x{0:04X} timed out")]
    Timeout(u16),
    /// The kernel rejected the command
    #[error("command 0x{opcode:04X} failed with status 0x{status:02X}")]
    CommandFailed {
        /// Rejected opcode
        opcode: u16,
        /// Kernel status
        status: u8,
    },
    /// The transport failed to move a frame
    #[error("transport: {0}")]
    Transport(String),
    /// Key of the wrong transport for the device
    #[error("key does not match the device type")]
    KeyMismatch,
    /// All-zero or out of range key
    #[error("invalid key")]
    InvalidKey,
    /// Operation not allowed in the current device state
    #[error("invalid state for this operation")]
    InvalidState,
    /// Malformed argument
    #[error("invalid parameter")]
    InvalidParameter,
    /// Job queue full
    #[error("job queue full")]
    QueueFull,
    /// Malformed frame
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    /// Adapter bring-up aborted
    #[error("bring-up failed at {step}: {source}")]
    BringUp {
        /// Step that failed
        step: &'static str,
        /// Cause
        source: Box<BluetoothError>,
    },
}

/// Transport a scan runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// BR/EDR inquiry
    Classic,
    /// LE scanning
    LowEnergy,
}

/// Scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Transport
    pub kind: ScanKind,
    /// Duration in seconds
    pub duration: u16,
    /// Limited inquiry access code (classic only)
    pub limited: bool,
    /// Passive scanning (LE only)
    pub passive: bool,
}

impl ScanRequest {
    /// General inquiry for `duration` seconds
    #[must_use]
    pub const fn classic(duration: u16) -> Self {
        Self {
            kind: ScanKind::Classic,
            duration,
            limited: false,
            passive: false,
        }
    }

    /// Active LE scan for `duration` seconds
    #[must_use]
    pub const fn low_energy(duration: u16) -> Self {
        Self {
            kind: ScanKind::LowEnergy,
            duration,
            limited: false,
            passive: false,
        }
    }
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self::classic(DEFAULT_SCAN_DURATION)
    }
}

/// Which LE advertisers create devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeDiscoveryPolicy {
    /// Only advertisers with a public address
    #[default]
    PublicOnly,
    /// Public and random addresses
    All,
}

impl LeDiscoveryPolicy {
    /// Whether an advertiser of `address_type` is admitted
    #[must_use]
    pub const fn admits(self, address_type: AddressType) -> bool {
        match self {
            Self::PublicOnly => address_type.is_public(),
            Self::All => true,
        }
    }
}

/// Options for a [`BluetoothControl`]
///
/// Every field has a default, so a host can deserialize a partial JSON
/// configuration:
///
/// ```rust
/// let options: btcontrol::BluetoothControlOptions =
///     serde_json::from_str(r#"{ "name": "Living Room", "persistmac": true }"#).unwrap();
/// assert_eq!(options.short_name, "btcontrol");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothControlOptions {
    /// Controller index (`hciN`)
    pub interface: u16,
    /// Full local name
    pub name: String,
    /// Short local name
    pub short_name: String,
    /// Packed class of device; only major and minor classes are applied
    pub class: u32,
    /// Accept numeric comparison requests without asking
    pub autopasskeyconfirm: bool,
    /// Pin the adapter address across runs
    pub persistmac: bool,
    /// Directory for device records; `None` disables persistence
    pub storage: Option<PathBuf>,
    /// Another process owns the adapter configuration; only listen
    pub external: bool,
    /// LE advertisers admitted during discovery
    pub le_discovery: LeDiscoveryPolicy,
}

impl Default for BluetoothControlOptions {
    fn default() -> Self {
        Self {
            interface: 0,
            name: "BT Control".to_owned(),
            short_name: "btcontrol".to_owned(),
            class: 0,
            autopasskeyconfirm: false,
            persistmac: false,
            storage: None,
            external: false,
            le_discovery: LeDiscoveryPolicy::PublicOnly,
        }
    }
}

impl BluetoothControlOptions {
    /// Class of device as configured
    #[must_use]
    pub const fn device_class(&self) -> ClassOfDevice {
        ClassOfDevice::from_raw(self.class)
    }
}
