//! Bluetooth adapter controller
//!
//! [`BluetoothControl`] ties the two kernel channels to the device registry,
//! the key store and the job queue. It is driven by [`crate::processor::run`],
//! which must be polled alongside every call made on the controller:
//!
//! ```rust,ignore
//! let control = BluetoothControl::new(options, raw_socket, mgmt_socket);
//! embassy_futures::select::select(processor::run(&control), async {
//!     control.initialize().await?;
//!     control.scan(ScanRequest::low_energy(10))?.await;
//!     for device in control.devices() {
//!         println!("{}", device.display_name());
//!     }
//!     Ok::<_, BluetoothError>(())
//! })
//! .await;
//! ```
//!
//! ## Layout
//!
//! * `bringup` - adapter configuration, key injection and teardown
//! * `dispatch` - routing of decoded events to devices and observers
//! * `jobs` - work deferred off the read loops
//! * `operations` - the caller-facing device actions

mod bringup;
mod dispatch;
mod jobs;
mod operations;

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use serde::Serialize;

use crate::device::{Device, DeviceSummary};
use crate::hci::HciChannel;
use crate::jobs::{Job, JobQueue};
use crate::mgmt::{AdapterInfo, Administrator};
use crate::registry::{Observer, Registry};
use crate::storage::KeyStore;
use crate::transport::Transport;
use crate::{BluetoothAddress, BluetoothControlOptions, BluetoothError, ScanRequest};

/// Named adapter setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterProperty {
    /// Setting name
    pub name: &'static str,
    /// Controller supports it
    pub supported: bool,
    /// Currently enabled
    pub enabled: bool,
}

/// Serializable snapshot of the adapter and its devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterStatus {
    /// Controller information as last read
    pub adapter: AdapterInfo,
    /// A scan is running
    pub scanning: bool,
    /// Address pinned by the controller record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_address: Option<BluetoothAddress>,
    /// Supported and enabled settings
    pub properties: Vec<AdapterProperty>,
    /// Known devices
    pub devices: Vec<DeviceSummary>,
}

pub(crate) struct ScanState {
    pub(crate) active: AtomicBool,
    pub(crate) abort: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) inquiry_complete: Signal<CriticalSectionRawMutex, ()>,
    pub(crate) completed: Signal<CriticalSectionRawMutex, ()>,
}

impl ScanState {
    const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            abort: Signal::new(),
            inquiry_complete: Signal::new(),
            completed: Signal::new(),
        }
    }
}

/// Protocol controller for one Bluetooth adapter
///
/// `H` is the raw HCI event channel, `M` the management channel.
pub struct BluetoothControl<H: Transport, M: Transport> {
    pub(crate) options: BluetoothControlOptions,
    pub(crate) hci: HciChannel<H>,
    pub(crate) administrator: Administrator<M>,
    pub(crate) registry: Registry,
    pub(crate) store: KeyStore,
    pub(crate) jobs: JobQueue,
    pub(crate) scan: ScanState,
    pub(crate) adapter: BlockingMutex<CriticalSectionRawMutex, RefCell<AdapterInfo>>,
    pub(crate) pinned_address: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<BluetoothAddress>>>,
}

impl<H: Transport, M: Transport> BluetoothControl<H, M> {
    /// Controller over the given channels; nothing is sent until [`Self::initialize`]
    pub fn new(options: BluetoothControlOptions, hci: H, mgmt: M) -> Self {
        let store = KeyStore::open(options.storage.clone());
        Self {
            options,
            hci: HciChannel::new(hci),
            administrator: Administrator::new(mgmt),
            registry: Registry::new(),
            store,
            jobs: JobQueue::new(),
            scan: ScanState::new(),
            adapter: BlockingMutex::new(RefCell::new(AdapterInfo::default())),
            pinned_address: BlockingMutex::new(RefCell::new(None)),
        }
    }

    /// Options in effect
    pub fn options(&self) -> &BluetoothControlOptions {
        &self.options
    }

    /// Adapter information as last read
    pub fn adapter(&self) -> AdapterInfo {
        self.adapter.lock(|adapter| adapter.borrow().clone())
    }

    /// Start a scan
    ///
    /// Devices that are neither bonded nor connected are dropped first. The
    /// scan runs on a job processor; the returned future resolves once it has
    /// finished and observers have been told.
    ///
    /// # Errors
    /// [`BluetoothError::InProgress`] while another scan runs,
    /// [`BluetoothError::QueueFull`] if the job cannot be queued.
    pub fn scan(
        &self,
        request: ScanRequest,
    ) -> Result<impl Future<Output = ()> + '_, BluetoothError> {
        if self.scan.active.swap(true, Ordering::AcqRel) {
            return Err(BluetoothError::InProgress);
        }

        let pruned = self
            .registry
            .remove_devices(|d| !d.is_bonded() && !d.is_connected());
        if pruned > 0 {
            log::debug!("[CONTROL] Pruned {pruned} stale devices before scanning");
        }

        self.scan.abort.reset();
        self.scan.inquiry_complete.reset();
        self.scan.completed.reset();
        if let Err(e) = self.jobs.submit(Job::Scan(request)) {
            self.scan.active.store(false, Ordering::Release);
            return Err(e);
        }
        log::info!("[CONTROL] {:?} scan started for {}s", request.kind, request.duration);

        Ok(async move { self.scan.completed.wait().await })
    }

    /// Stop the running scan early; does nothing when idle
    pub fn abort_scan(&self) {
        if self.is_scanning() {
            log::info!("[CONTROL] Aborting scan");
            self.scan.abort.signal(());
        }
    }

    /// Whether a scan is running
    pub fn is_scanning(&self) -> bool {
        self.scan.active.load(Ordering::Acquire)
    }

    /// Subscribe to device notifications; known devices are replayed at once
    pub fn register(&self, observer: Arc<dyn Observer>) {
        self.registry.register(observer);
    }

    /// Unsubscribe; returns whether `observer` was registered
    pub fn unregister(&self, observer: &Arc<dyn Observer>) -> bool {
        self.registry.unregister(observer)
    }

    /// Device with `address` on either transport
    ///
    /// # Errors
    /// [`BluetoothError::UnknownDevice`] if none is known.
    pub fn device(&self, address: BluetoothAddress) -> Result<Arc<Device>, BluetoothError> {
        self.registry
            .find(address)
            .ok_or(BluetoothError::UnknownDevice(address))
    }

    /// Device with `address` on the given transport
    ///
    /// # Errors
    /// [`BluetoothError::UnknownDevice`] if none is known.
    pub fn find(
        &self,
        address: BluetoothAddress,
        low_energy: bool,
    ) -> Result<Arc<Device>, BluetoothError> {
        self.registry
            .find_kind(address, low_energy)
            .ok_or(BluetoothError::UnknownDevice(address))
    }

    /// Every known device
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.registry.devices()
    }

    /// Snapshot of the adapter, its settings and its devices
    pub fn status(&self) -> AdapterStatus {
        let adapter = self.adapter();
        let properties = adapter
            .supported
            .named()
            .into_iter()
            .zip(adapter.current.named())
            .map(|((name, supported), (_, enabled))| AdapterProperty {
                name,
                supported,
                enabled,
            })
            .collect();
        let devices = self
            .registry
            .devices()
            .iter()
            .map(|device| device.summary(adapter.address))
            .collect();

        AdapterStatus {
            scanning: self.is_scanning(),
            pinned_address: self.pinned_address.lock(|pinned| *pinned.borrow()),
            properties,
            devices,
            adapter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::event::{code, frame};
    use crate::registry::recorder::RecordingObserver;
    use crate::testing::{drive, eventually, harness};
    use crate::{AddressType, ScanKind};

    fn le_advertisement(address: [u8; 6], address_type: u8, name: &str) -> Vec<u8> {
        let mut data = vec![0x02, 0x01, 0x06, name.len() as u8 + 1, 0x09];
        data.extend_from_slice(name.as_bytes());
        let mut params = vec![code::LE_ADVERTISING_REPORT, 1, 0x00, address_type];
        params.extend_from_slice(&address);
        params.push(data.len() as u8);
        params.extend(data);
        params.push(0xC4);
        frame(code::LE_META, &params)
    }

    #[test]
    fn test_le_advertisement_creates_named_device() {
        let control = harness(BluetoothControlOptions::default());
        let public = BluetoothAddress::from_le_bytes([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let random = BluetoothAddress::from_le_bytes([0x11, 0x12, 0x13, 0x14, 0x15, 0xC6]);

        drive(&control, async {
            control.initialize().await.unwrap();
            control.hci.transport().inject(le_advertisement(random.to_le_bytes(), 0x01, "Tag"));
            control.hci.transport().inject(le_advertisement(public.to_le_bytes(), 0x00, "Remote"));
            eventually(|| control.find(public, true).is_ok()).await;
        });

        let device = control.find(public, true).unwrap();
        assert_eq!(device.name().as_deref(), Some("Remote"));
        assert_eq!(device.address_type(), AddressType::LePublic);
        // random advertisers are ignored by default
        assert!(control.find(random, true).is_err());
    }

    #[test]
    fn test_le_policy_all_admits_random() {
        let options = BluetoothControlOptions {
            le_discovery: crate::LeDiscoveryPolicy::All,
            ..BluetoothControlOptions::default()
        };
        let control = harness(options);
        let random = BluetoothAddress::from_le_bytes([0x11, 0x12, 0x13, 0x14, 0x15, 0xC6]);

        drive(&control, async {
            control.initialize().await.unwrap();
            control.hci.transport().inject(le_advertisement(random.to_le_bytes(), 0x01, "Tag"));
            eventually(|| control.find(random, true).is_ok()).await;
        });
        assert_eq!(
            control.find(random, true).map(|d| d.address_type()),
            Ok(AddressType::LeRandom)
        );
    }

    #[test]
    fn test_second_scan_rejected() {
        let control = harness(BluetoothControlOptions::default());
        let recorder = Arc::new(RecordingObserver::default());
        control.register(recorder.clone());

        drive(&control, async {
            control.initialize().await.unwrap();
            let first = control.scan(ScanRequest::low_energy(30)).unwrap();
            assert!(control.is_scanning());
            assert!(matches!(
                control.scan(ScanRequest::classic(5)),
                Err(BluetoothError::InProgress)
            ));
            eventually(|| control.hci.transport().written().len() >= 2).await;
            control.abort_scan();
            first.await;
        });

        assert!(!control.is_scanning());
        assert_eq!(recorder.scans(), vec![ScanKind::LowEnergy]);
        assert_eq!(
            control.hci.transport().hci_opcodes(),
            vec![
                crate::hci::command::opcode::LE_SET_SCAN_PARAMETERS,
                crate::hci::command::opcode::LE_SET_SCAN_ENABLE,
                crate::hci::command::opcode::LE_SET_SCAN_ENABLE,
            ]
        );
    }

    #[test]
    fn test_scan_prunes_stale_devices() {
        let control = harness(BluetoothControlOptions::default());
        control
            .registry
            .discovered(BluetoothAddress::new([1; 6]), AddressType::BrEdr);
        assert_eq!(control.devices().len(), 1);

        drive(&control, async {
            control.initialize().await.unwrap();
            let scan = control.scan(ScanRequest::low_energy(1)).unwrap();
            assert!(control.devices().is_empty());
            control.abort_scan();
            scan.await;
        });
    }

    #[test]
    fn test_abort_scan_when_idle() {
        let control = harness(BluetoothControlOptions::default());
        control.abort_scan();
        assert!(!control.scan.abort.signaled());
    }

    #[test]
    fn test_classic_scan_with_remote_name() {
        let control = harness(BluetoothControlOptions::default());
        let address = BluetoothAddress::new([0x00, 0x1B, 0xDC, 0x01, 0x02, 0x03]);

        drive(&control, async {
            control.initialize().await.unwrap();
            let scan = control.scan(ScanRequest::classic(10)).unwrap();
            eventually(|| !control.hci.transport().written().is_empty()).await;

            // inquiry result: one record, class 0x240404
            let mut params = vec![1];
            params.extend_from_slice(&address.to_le_bytes());
            params.extend_from_slice(&[0x01, 0x00, 0x00, 0x04, 0x04, 0x24, 0x00, 0x00]);
            control.hci.transport().inject(frame(code::INQUIRY_RESULT, &params));
            control.hci.transport().inject(frame(code::INQUIRY_COMPLETE, &[0x00]));
            scan.await;

            eventually(|| {
                control
                    .hci
                    .transport()
                    .hci_opcodes()
                    .contains(&crate::hci::command::opcode::REMOTE_NAME_REQUEST)
            })
            .await;
            let mut params = vec![0x00];
            params.extend_from_slice(&address.to_le_bytes());
            params.extend_from_slice(b"Speaker\0");
            params.resize(1 + 6 + 248, 0);
            control.hci.transport().inject(frame(code::REMOTE_NAME_COMPLETE, &params));
            eventually(|| control.device(address).is_ok_and(|d| d.name().is_some())).await;
        });

        let device = control.device(address).unwrap();
        assert_eq!(device.display_name(), "Speaker");
        assert_eq!(device.class().raw(), 0x24_0404);
        assert!(!device.is_low_energy());
        assert_eq!(
            control.hci.transport().hci_opcodes()[0],
            crate::hci::command::opcode::INQUIRY
        );
    }

    #[test]
    fn test_status_snapshot() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
        });
        control
            .registry
            .discovered(BluetoothAddress::new([1; 6]), AddressType::BrEdr);

        let status = control.status();
        assert!(!status.scanning);
        assert_eq!(status.devices.len(), 1);
        assert_eq!(status.devices[0].local, status.adapter.address);
        let powered = status
            .properties
            .iter()
            .find(|p| p.name == "powered")
            .unwrap();
        assert!(powered.supported && powered.enabled);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["devices"][0]["name"], "[unknown]");
    }
}
