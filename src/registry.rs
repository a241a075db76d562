//! Device collection and observer fan-out
//!
//! Devices and observers share one lock. Observer callbacks always run on a
//! snapshot taken under the lock and invoked after it is released, so an
//! observer may call back into the registry.

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use serde::Serialize;

use crate::ScanKind;
use crate::device::{Device, DisconnectReason};
use crate::{AddressType, BluetoothAddress};

/// Connection and bond transitions reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Link established
    Connected,
    /// Link dropped
    Disconnected,
    /// Bond created
    Paired,
    /// Bond removed
    Unpaired,
}

/// Receiver of registry notifications
pub trait Observer: Send + Sync {
    /// A device was discovered or one of its properties changed
    fn update(&self, device: &Arc<Device>);

    /// A scan of `kind` finished
    fn scan_complete(&self, _kind: ScanKind) {}

    /// A device changed connection or bond state
    fn state_change(
        &self,
        _device: &Arc<Device>,
        _state: DeviceState,
        _reason: Option<DisconnectReason>,
    ) {
    }
}

#[derive(Default)]
struct Inner {
    devices: Vec<Arc<Device>>,
    observers: Vec<Arc<dyn Observer>>,
}

/// Known devices and registered observers
pub struct Registry {
    inner: BlockingMutex<CriticalSectionRawMutex, RefCell<Inner>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: BlockingMutex::new(RefCell::new(Inner::default())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        self.inner.lock(|inner| f(&mut inner.borrow_mut()))
    }

    /// Find the device for `address` on the transport of `address_type`, creating it if absent
    ///
    /// Returns the device and whether it was created by this call.
    pub fn discovered(
        &self,
        address: BluetoothAddress,
        address_type: AddressType,
    ) -> (Arc<Device>, bool) {
        self.with(|inner| {
            let low_energy = address_type.is_low_energy();
            if let Some(device) = inner
                .devices
                .iter()
                .find(|d| d.address() == address && d.is_low_energy() == low_energy)
            {
                return (device.clone(), false);
            }
            let device = Arc::new(Device::new(address, address_type));
            inner.devices.push(device.clone());
            log::info!("[REGISTRY] New {address_type:?} device {address}");
            (device, true)
        })
    }

    /// Add a fully built device, unless one with the same identity exists
    pub fn insert(&self, device: Arc<Device>) -> bool {
        self.with(|inner| {
            let duplicate = inner.devices.iter().any(|d| {
                d.address() == device.address() && d.is_low_energy() == device.is_low_energy()
            });
            if !duplicate {
                inner.devices.push(device);
            }
            !duplicate
        })
    }

    /// First device with `address`, either transport
    pub fn find(&self, address: BluetoothAddress) -> Option<Arc<Device>> {
        self.with(|inner| inner.devices.iter().find(|d| d.address() == address).cloned())
    }

    /// Device with `address` on the given transport
    pub fn find_kind(&self, address: BluetoothAddress, low_energy: bool) -> Option<Arc<Device>> {
        self.with(|inner| {
            inner
                .devices
                .iter()
                .find(|d| d.address() == address && d.is_low_energy() == low_energy)
                .cloned()
        })
    }

    /// Device connected with `handle`
    pub fn find_by_handle(&self, handle: u16) -> Option<Arc<Device>> {
        self.with(|inner| {
            inner
                .devices
                .iter()
                .find(|d| d.handle() == Some(handle))
                .cloned()
        })
    }

    /// First device matching `predicate`
    pub fn find_by(&self, predicate: impl Fn(&Device) -> bool) -> Option<Arc<Device>> {
        self.with(|inner| inner.devices.iter().find(|d| predicate(d)).cloned())
    }

    /// Snapshot of every device
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.with(|inner| inner.devices.clone())
    }

    /// Drop every device matching `predicate`, returning how many went
    pub fn remove_devices(&self, predicate: impl Fn(&Device) -> bool) -> usize {
        self.with(|inner| {
            let before = inner.devices.len();
            inner.devices.retain(|d| !predicate(d));
            before - inner.devices.len()
        })
    }

    /// Add an observer and replay every known device to it
    pub fn register(&self, observer: Arc<dyn Observer>) {
        let devices = self.with(|inner| {
            inner.observers.push(observer.clone());
            inner.devices.clone()
        });
        for device in &devices {
            observer.update(device);
        }
    }

    /// Remove an observer; returns whether it was registered
    pub fn unregister(&self, observer: &Arc<dyn Observer>) -> bool {
        self.with(|inner| {
            let before = inner.observers.len();
            inner.observers.retain(|o| !Arc::ptr_eq(o, observer));
            inner.observers.len() != before
        })
    }

    fn observers(&self) -> Vec<Arc<dyn Observer>> {
        self.with(|inner| inner.observers.clone())
    }

    /// Tell every observer that `device` changed
    pub fn notify_update(&self, device: &Arc<Device>) {
        for observer in self.observers() {
            observer.update(device);
        }
    }

    /// Tell every observer that a scan finished
    pub fn notify_scan_complete(&self, kind: ScanKind) {
        for observer in self.observers() {
            observer.scan_complete(kind);
        }
    }

    /// Tell every observer about a connection or bond transition
    pub fn notify_state_change(
        &self,
        device: &Arc<Device>,
        state: DeviceState,
        reason: Option<DisconnectReason>,
    ) {
        log::info!("[REGISTRY] {} is now {state:?}", device.address());
        for observer in self.observers() {
            observer.state_change(device, state, reason);
        }
    }
}
