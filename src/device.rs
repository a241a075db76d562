//! Remote device state machine
//!
//! One [`Device`] exists per remote address and transport. It carries what
//! discovery learned about the peer, its connection handle, the single action
//! in flight and its security keys. Kernel exchanges are driven by
//! [`crate::BluetoothControl`]; this module only holds and guards state.
//!
//! # Actions
//!
//! At most one of connect, disconnect, pair and unpair runs at a time.
//! [`Device::begin`] claims the device and [`Device::finish`] releases it once
//! the matching completion event arrives:
//!
//! ```text
//! Idle --begin(Connecting)--> Connecting --connection complete--> Idle
//! Idle --begin(Pairing)-----> Pairing ----pair complete---------> Idle
//! ```

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
use serde::Serialize;

use crate::constants::{FEATURES_LENGTH, UNKNOWN_NAME};
use crate::hci::Uuid;
use crate::keys::{IdentityKey, KeyMaterial, LinkKeys, LongTermKeys, SecurityKey};
use crate::mgmt::AutoConnectMode;
use crate::{AddressType, BluetoothAddress, BluetoothError, ClassOfDevice};

/// Operation currently claiming a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Nothing in flight
    #[default]
    Idle,
    /// Connection requested
    Connecting,
    /// Disconnection requested
    Disconnecting,
    /// Pairing requested
    Pairing,
    /// Unpairing requested
    Unpairing,
}

/// Why a link went down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Supervision timeout
    ConnectionTimeout,
    /// Authentication failure
    AuthenticationFailure,
    /// Remote user terminated the connection
    TerminatedByRemote,
    /// Remote device is low on resources
    RemoteLowOnResources,
    /// Remote device powered off
    RemotePoweredOff,
    /// Any other cause, including local termination
    TerminatedByHost,
}

impl DisconnectReason {
    /// Map an HCI disconnection reason code
    #[must_use]
    pub const fn from_hci(reason: u8) -> Self {
        match reason {
            0x08 => Self::ConnectionTimeout,
            0x05 => Self::AuthenticationFailure,
            0x13 => Self::TerminatedByRemote,
            0x14 => Self::RemoteLowOnResources,
            0x15 => Self::RemotePoweredOff,
            _ => Self::TerminatedByHost,
        }
    }
}

/// Effect of a key change on the bond
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondTransition {
    /// Bonded before and after, or unbonded before and after
    Unchanged,
    /// The device just became bonded
    Bonded,
    /// The device just lost its bond
    Released,
}

impl BondTransition {
    const fn between(before: bool, after: bool) -> Self {
        match (before, after) {
            (false, true) => Self::Bonded,
            (true, false) => Self::Released,
            _ => Self::Unchanged,
        }
    }
}

/// IO capability exchange reported by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    /// IO capability
    pub capability: u8,
    /// OOB data present
    pub oob_data: u8,
    /// Authentication requirements
    pub authentication: u8,
}

/// LE connection parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionParameters {
    /// Minimum connection interval, 1.25 ms units
    pub min_interval: u16,
    /// Maximum connection interval, 1.25 ms units
    pub max_interval: u16,
    /// Peripheral latency in events
    pub latency: u16,
    /// Supervision timeout, 10 ms units
    pub timeout: u16,
}

/// Key material held by a device, shaped by its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityKeys {
    /// BR/EDR link keys
    Classic(LinkKeys),
    /// LE long-term keys and the peer's identity key
    LowEnergy {
        /// Long-term keys, one per role
        long_term_keys: LongTermKeys,
        /// Identity resolving key
        identity_key: Option<IdentityKey>,
    },
}

impl SecurityKeys {
    /// Empty holder matching `address_type`
    #[must_use]
    pub fn for_type(address_type: AddressType) -> Self {
        if address_type.is_low_energy() {
            Self::LowEnergy {
                long_term_keys: LongTermKeys::new(),
                identity_key: None,
            }
        } else {
            Self::Classic(LinkKeys::new())
        }
    }

    /// Classic needs one link key; LE needs both LTKs and a valid IRK
    #[must_use]
    pub fn is_bonded(&self) -> bool {
        match self {
            Self::Classic(link_keys) => !link_keys.is_empty(),
            Self::LowEnergy {
                long_term_keys,
                identity_key,
            } => long_term_keys.len() >= 2 && identity_key.as_ref().is_some_and(|k| k.is_valid()),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Classic(link_keys) => link_keys.clear(),
            Self::LowEnergy {
                long_term_keys,
                identity_key,
            } => {
                long_term_keys.clear();
                *identity_key = None;
            }
        }
    }
}

/// User interaction sink for one device
///
/// Methods run on a job processor, never on a read loop, so they may block
/// briefly. Answers go back through the control's `pin_code`, `passkey` and
/// `confirm_passkey`.
pub trait DeviceCallback: Send + Sync {
    /// Any device property changed
    fn updated(&self, _device: &Arc<Device>) {}

    /// The peer asks for a legacy PIN code
    fn pin_code_request(&self, device: &Arc<Device>);

    /// The peer asks for a passkey
    fn passkey_request(&self, device: &Arc<Device>);

    /// The peer asks to compare `passkey`
    fn passkey_confirm_request(&self, device: &Arc<Device>, passkey: u32);
}

/// Serializable snapshot of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSummary {
    /// Local adapter address
    pub local: BluetoothAddress,
    /// Remote address
    pub remote: BluetoothAddress,
    /// Display name
    pub name: String,
    /// LE device
    pub le: bool,
    /// Link up
    pub connected: bool,
    /// Keys stored
    pub bonded: bool,
    /// Last disconnection reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DisconnectReason>,
}

struct DeviceState {
    name: Option<String>,
    class: ClassOfDevice,
    handle: Option<u16>,
    action: Action,
    features: [u8; FEATURES_LENGTH],
    uuids: Vec<Uuid>,
    capabilities: Capabilities,
    parameters: ConnectionParameters,
    auto_connect: bool,
    reason: Option<DisconnectReason>,
    keys: SecurityKeys,
    callback: Option<Arc<dyn DeviceCallback>>,
}

/// A remote device
pub struct Device {
    address: BluetoothAddress,
    address_type: AddressType,
    state: BlockingMutex<CriticalSectionRawMutex, RefCell<DeviceState>>,
    settled: Signal<CriticalSectionRawMutex, ()>,
    update_scheduled: AtomicBool,
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("address_type", &self.address_type)
            .field("action", &self.action())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Fresh device with no name, keys or connection
    #[must_use]
    pub fn new(address: BluetoothAddress, address_type: AddressType) -> Self {
        Self {
            address,
            address_type,
            state: BlockingMutex::new(RefCell::new(DeviceState {
                name: None,
                class: ClassOfDevice::default(),
                handle: None,
                action: Action::Idle,
                features: [0xFF; FEATURES_LENGTH],
                uuids: Vec::new(),
                capabilities: Capabilities::default(),
                parameters: ConnectionParameters::default(),
                auto_connect: false,
                reason: None,
                keys: SecurityKeys::for_type(address_type),
                callback: None,
            })),
            settled: Signal::new(),
            update_scheduled: AtomicBool::new(false),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    /// Remote address
    pub fn address(&self) -> BluetoothAddress {
        self.address
    }

    /// Remote address type
    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// LE device
    pub fn is_low_energy(&self) -> bool {
        self.address_type.is_low_energy()
    }

    /// Public (not random) address
    pub fn is_public(&self) -> bool {
        self.address_type.is_public()
    }

    /// Name learned from discovery or a remote name request
    pub fn name(&self) -> Option<String> {
        self.with_state(|state| state.name.clone())
    }

    /// Name, or `"[unknown]"` when none is known yet
    pub fn display_name(&self) -> String {
        self.name().unwrap_or_else(|| UNKNOWN_NAME.to_owned())
    }

    /// Store `name`; returns whether it changed
    pub fn set_name(&self, name: &str) -> bool {
        self.with_state(|state| {
            if state.name.as_deref() == Some(name) {
                return false;
            }
            state.name = Some(name.to_owned());
            true
        })
    }

    /// Class of device
    pub fn class(&self) -> ClassOfDevice {
        self.with_state(|state| state.class)
    }

    /// Store `class`; returns whether it changed
    pub fn set_class(&self, class: ClassOfDevice) -> bool {
        self.with_state(|state| core::mem::replace(&mut state.class, class) != class)
    }

    /// Connection handle while connected
    pub fn handle(&self) -> Option<u16> {
        self.with_state(|state| state.handle)
    }

    /// Link up
    pub fn is_connected(&self) -> bool {
        self.handle().is_some()
    }

    /// Last disconnection reason
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.with_state(|state| state.reason)
    }

    /// Action in flight
    pub fn action(&self) -> Action {
        self.with_state(|state| state.action)
    }

    /// Claim the device for `action`
    ///
    /// # Errors
    /// [`BluetoothError::InProgress`] if another action is in flight; state is untouched.
    pub fn begin(&self, action: Action) -> Result<(), BluetoothError> {
        self.with_state(|state| match state.action {
            Action::Idle => {
                state.action = action;
                Ok(())
            }
            current => {
                log::debug!("[DEVICE] {} busy with {current:?}, refusing {action:?}", self.address);
                Err(BluetoothError::InProgress)
            }
        })?;
        self.settled.reset();
        Ok(())
    }

    /// Release the device if `action` is the one in flight
    pub fn finish(&self, action: Action) -> bool {
        let finished = self.with_state(|state| {
            if state.action == action {
                state.action = Action::Idle;
                true
            } else {
                false
            }
        });
        if finished {
            self.settled.signal(());
        }
        finished
    }

    /// Wait until no action is in flight
    ///
    /// # Errors
    /// [`BluetoothError::InProgress`] if the action is still running after `timeout`.
    pub async fn wait_settled(&self, timeout: Duration) -> Result<(), BluetoothError> {
        with_timeout(timeout, async {
            while self.action() != Action::Idle {
                self.settled.wait().await;
            }
        })
        .await
        .map_err(|_| BluetoothError::InProgress)
    }

    /// Link established with `handle`
    pub fn connection(&self, handle: u16) {
        self.with_state(|state| {
            state.handle = Some(handle);
            state.reason = None;
        });
        self.finish(Action::Connecting);
    }

    /// Link dropped with HCI `reason`
    pub fn disconnection(&self, reason: u8) -> DisconnectReason {
        let reason = DisconnectReason::from_hci(reason);
        self.with_state(|state| {
            state.handle = None;
            state.reason = Some(reason);
        });
        self.finish(Action::Disconnecting);
        reason
    }

    /// Supported LE features, all `0xFF` while unknown
    pub fn features(&self) -> [u8; FEATURES_LENGTH] {
        self.with_state(|state| state.features)
    }

    /// Store the LE feature mask
    pub fn set_features(&self, features: [u8; FEATURES_LENGTH]) {
        self.with_state(|state| state.features = features);
    }

    /// Advertised service UUIDs
    pub fn uuids(&self) -> Vec<Uuid> {
        self.with_state(|state| state.uuids.clone())
    }

    /// Merge advertised UUIDs; returns whether any was new
    pub fn add_uuids(&self, uuids: &[Uuid]) -> bool {
        self.with_state(|state| {
            let before = state.uuids.len();
            for uuid in uuids {
                if !state.uuids.contains(uuid) {
                    state.uuids.push(*uuid);
                }
            }
            state.uuids.len() != before
        })
    }

    /// IO capabilities reported by the peer
    pub fn capabilities(&self) -> Capabilities {
        self.with_state(|state| state.capabilities)
    }

    /// Store IO capabilities
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.with_state(|state| state.capabilities = capabilities);
    }

    /// Current LE connection parameters
    pub fn connection_parameters(&self) -> ConnectionParameters {
        self.with_state(|state| state.parameters)
    }

    /// Store LE connection parameters
    pub fn set_connection_parameters(&self, parameters: ConnectionParameters) {
        self.with_state(|state| state.parameters = parameters);
    }

    /// Device is on the kernel auto-connect whitelist
    pub fn auto_connect(&self) -> bool {
        self.with_state(|state| state.auto_connect)
    }

    /// Record the whitelist state
    ///
    /// # Errors
    /// [`BluetoothError::InvalidState`] while connected.
    pub fn set_auto_connect(&self, enable: bool) -> Result<(), BluetoothError> {
        self.with_state(|state| {
            if state.handle.is_some() {
                return Err(BluetoothError::InvalidState);
            }
            state.auto_connect = enable;
            Ok(())
        })
    }

    /// Whitelist policy for this transport
    pub fn auto_connect_mode(&self) -> AutoConnectMode {
        if self.is_low_energy() {
            AutoConnectMode::Always
        } else {
            AutoConnectMode::Direct
        }
    }

    /// Bond state derived from the held keys
    pub fn is_bonded(&self) -> bool {
        self.with_state(|state| state.keys.is_bonded())
    }

    /// Snapshot of the held keys
    pub fn security_keys(&self) -> SecurityKeys {
        self.with_state(|state| state.keys.clone())
    }

    /// Accept a key delivered by the kernel or loaded from storage
    ///
    /// # Errors
    /// [`BluetoothError::KeyMismatch`] for a key of the other transport,
    /// [`BluetoothError::InvalidKey`] for an all-zero or out of range key.
    pub fn security_key(&self, key: SecurityKey) -> Result<BondTransition, BluetoothError> {
        self.with_state(|state| {
            let before = state.keys.is_bonded();
            let accepted = match (&mut state.keys, key) {
                (SecurityKeys::Classic(link_keys), SecurityKey::Link(key)) => link_keys.add(key),
                (SecurityKeys::LowEnergy { long_term_keys, .. }, SecurityKey::LongTerm(key)) => {
                    long_term_keys.add(key)
                }
                (SecurityKeys::LowEnergy { identity_key, .. }, SecurityKey::Identity(key)) => {
                    let valid = key.is_valid();
                    if valid {
                        *identity_key = Some(key);
                    }
                    valid
                }
                (_, key) => {
                    log::warn!(
                        "[DEVICE] {} ignoring {} key for a {:?} device",
                        self.address,
                        key_kind(&key),
                        self.address_type
                    );
                    return Err(BluetoothError::KeyMismatch);
                }
            };
            if !accepted {
                return Err(BluetoothError::InvalidKey);
            }
            Ok(BondTransition::between(before, state.keys.is_bonded()))
        })
    }

    /// Drop every key
    pub fn purge_security_keys(&self) -> BondTransition {
        self.with_state(|state| {
            let before = state.keys.is_bonded();
            state.keys.clear();
            BondTransition::between(before, false)
        })
    }

    /// Link keys of a classic device
    ///
    /// # Errors
    /// [`BluetoothError::KeyMismatch`] on an LE device.
    pub fn link_keys(&self) -> Result<LinkKeys, BluetoothError> {
        self.with_state(|state| match &state.keys {
            SecurityKeys::Classic(link_keys) => Ok(link_keys.clone()),
            SecurityKeys::LowEnergy { .. } => Err(BluetoothError::KeyMismatch),
        })
    }

    /// Long-term keys of an LE device
    ///
    /// # Errors
    /// [`BluetoothError::KeyMismatch`] on a classic device.
    pub fn long_term_keys(&self) -> Result<LongTermKeys, BluetoothError> {
        self.with_state(|state| match &state.keys {
            SecurityKeys::LowEnergy { long_term_keys, .. } => Ok(long_term_keys.clone()),
            SecurityKeys::Classic(_) => Err(BluetoothError::KeyMismatch),
        })
    }

    /// Identity key of an LE device
    ///
    /// # Errors
    /// [`BluetoothError::KeyMismatch`] on a classic device.
    pub fn identity_key(&self) -> Result<Option<IdentityKey>, BluetoothError> {
        self.with_state(|state| match &state.keys {
            SecurityKeys::LowEnergy { identity_key, .. } => Ok(identity_key.clone()),
            SecurityKeys::Classic(_) => Err(BluetoothError::KeyMismatch),
        })
    }

    /// Registered user interaction callback
    pub fn callback(&self) -> Option<Arc<dyn DeviceCallback>> {
        self.with_state(|state| state.callback.clone())
    }

    /// Register (`Some`) or unregister (`None`) the callback
    ///
    /// # Errors
    /// [`BluetoothError::Unavailable`] when registering over an existing
    /// callback or unregistering when none is set.
    pub fn set_callback(
        &self,
        callback: Option<Arc<dyn DeviceCallback>>,
    ) -> Result<(), BluetoothError> {
        self.with_state(|state| match (&state.callback, callback) {
            (None, Some(callback)) => {
                state.callback = Some(callback);
                Ok(())
            }
            (Some(_), None) => {
                state.callback = None;
                Ok(())
            }
            _ => Err(BluetoothError::Unavailable),
        })
    }

    /// Mark an update job as queued; `false` if one already is
    pub(crate) fn schedule_update(&self) -> bool {
        !self.update_scheduled.swap(true, Ordering::AcqRel)
    }

    /// Allow the next update job to be queued
    pub(crate) fn update_delivered(&self) {
        self.update_scheduled.store(false, Ordering::Release);
    }

    /// Serializable snapshot; `local` is the adapter address
    pub fn summary(&self, local: BluetoothAddress) -> DeviceSummary {
        self.with_state(|state| DeviceSummary {
            local,
            remote: self.address,
            name: state.name.clone().unwrap_or_else(|| UNKNOWN_NAME.to_owned()),
            le: self.address_type.is_low_energy(),
            connected: state.handle.is_some(),
            bonded: state.keys.is_bonded(),
            reason: state.reason,
        })
    }
}

fn key_kind(key: &SecurityKey) -> &'static str {
    match key {
        SecurityKey::Link(_) => "link",
        SecurityKey::LongTerm(_) => "long-term",
        SecurityKey::Identity(_) => "identity",
    }
}
