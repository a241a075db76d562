//! Event routing
//!
//! Both read loops end here. Routing never awaits: anything that needs the
//! kernel or user code is queued as a job.

use std::sync::Arc;

use super::BluetoothControl;
use crate::codec::Reader;
use crate::device::{Action, BondTransition, Capabilities, ConnectionParameters, Device};
use crate::hci::event::advertising_type;
use crate::hci::{AdvertisingData, AdvertisingReport, HciEvent, InquiryResponse};
use crate::jobs::{Job, UserReply, UserRequest};
use crate::keys::SecurityKey;
use crate::mgmt::{MgmtEvent, MgmtFrame, Settings, opcode, status_error};
use crate::registry::DeviceState;
use crate::transport::Transport;
use crate::{AddressType, BluetoothAddress};

/// ACL link type in Connection Complete
const ACL_LINK: u8 = 0x01;

impl<H: Transport, M: Transport> BluetoothControl<H, M> {
    pub(crate) fn dispatch_hci(&self, event: HciEvent) {
        match event {
            HciEvent::CommandComplete { opcode, status } => {
                if !self.hci.complete(opcode, status.unwrap_or(0)) {
                    log::trace!("[DISPATCH] Unsolicited completion for 0x{opcode:04X}");
                }
            }
            HciEvent::CommandStatus { status, opcode } => {
                if !self.hci.complete(opcode, status) {
                    log::trace!("[DISPATCH] Unsolicited status for 0x{opcode:04X}");
                }
            }
            HciEvent::InquiryComplete { status } => {
                log::debug!("[DISPATCH] Inquiry complete, status 0x{status:02X}");
                self.scan.inquiry_complete.signal(());
            }
            HciEvent::InquiryResult(responses) => {
                for response in responses {
                    self.inquiry_response(response);
                }
            }
            HciEvent::LeAdvertisingReport(reports) => {
                for report in reports {
                    self.advertising_report(report);
                }
            }
            HciEvent::ConnectionComplete {
                status,
                handle,
                address,
                link_type,
                ..
            } => {
                if link_type != ACL_LINK {
                    log::trace!("[DISPATCH] Ignoring link type {link_type} to {address}");
                    return;
                }
                let Some(device) = self.lookup(address, false) else {
                    return;
                };
                self.connection_complete(&device, status, handle);
            }
            HciEvent::LeConnectionComplete {
                status,
                handle,
                address,
                interval,
                latency,
                supervision_timeout,
                ..
            } => {
                let Some(device) = self.lookup(address, true) else {
                    return;
                };
                if status == 0 {
                    device.set_connection_parameters(ConnectionParameters {
                        min_interval: interval,
                        max_interval: interval,
                        latency,
                        timeout: supervision_timeout,
                    });
                }
                self.connection_complete(&device, status, handle);
            }
            HciEvent::DisconnectionComplete {
                status,
                handle,
                reason,
            } => {
                let Some(device) = self.registry.find_by_handle(handle) else {
                    log::warn!("[DISPATCH] Disconnection of unknown handle 0x{handle:03X}");
                    return;
                };
                if status != 0 {
                    log::warn!(
                        "[DISPATCH] Disconnecting {} failed, status 0x{status:02X}",
                        device.address()
                    );
                    device.finish(Action::Disconnecting);
                    return;
                }
                self.disconnection_complete(&device, reason);
            }
            HciEvent::RemoteNameComplete {
                status,
                address,
                name,
            } => match (status, name) {
                (0, Some(name)) => {
                    if let Some(device) = self.lookup(address, false) {
                        if device.set_name(&name) {
                            self.jobs.schedule_update(&device);
                        }
                    }
                }
                (status, _) => {
                    log::debug!("[DISPATCH] No name for {address}, status 0x{status:02X}");
                }
            },
            HciEvent::IoCapabilityResponse {
                address,
                capability,
                oob_data,
                authentication,
            } => {
                if let Some(device) = self.lookup(address, false) {
                    device.set_capabilities(Capabilities {
                        capability,
                        oob_data,
                        authentication,
                    });
                }
            }
            HciEvent::LeRemoteFeatures {
                status: 0,
                handle,
                features,
            } => match self.registry.find_by_handle(handle) {
                Some(device) => device.set_features(features),
                None => log::warn!("[DISPATCH] Features for unknown handle 0x{handle:03X}"),
            },
            HciEvent::LeConnectionUpdateComplete {
                status: 0,
                handle,
                interval,
                latency,
                supervision_timeout,
            } => match self.registry.find_by_handle(handle) {
                Some(device) => device.set_connection_parameters(ConnectionParameters {
                    min_interval: interval,
                    max_interval: interval,
                    latency,
                    timeout: supervision_timeout,
                }),
                None => log::warn!("[DISPATCH] Parameters for unknown handle 0x{handle:03X}"),
            },
            other => log::trace!("[DISPATCH] HCI event: {other:?}"),
        }
    }

    pub(crate) fn dispatch_mgmt(&self, frame: MgmtFrame) {
        let index = self.administrator.index();
        if frame.index != index {
            log::trace!(
                "[DISPATCH] Ignoring event for controller {} (ours is {index})",
                frame.index
            );
            return;
        }

        match frame.event {
            MgmtEvent::CommandComplete {
                opcode: opcode::PAIR_DEVICE,
                status,
                data,
            } => self.pair_complete(status, &data),
            MgmtEvent::CommandComplete {
                opcode,
                status,
                data,
            } => {
                if !self.administrator.complete(opcode, status, data) {
                    log::trace!("[DISPATCH] Unsolicited management completion 0x{opcode:04X}");
                }
            }
            MgmtEvent::CommandStatus {
                opcode: opcode::PAIR_DEVICE,
                status,
            } => {
                if status != 0 {
                    self.pair_rejected(status);
                }
            }
            MgmtEvent::CommandStatus { opcode, status } => {
                if !self.administrator.complete(opcode, status, Vec::new()) {
                    log::trace!("[DISPATCH] Unsolicited management status 0x{opcode:04X}");
                }
            }
            MgmtEvent::ControllerError { code } => {
                log::error!("[DISPATCH] Controller error 0x{code:02X}");
            }
            MgmtEvent::NewSettings { settings } => self.new_settings(settings),
            MgmtEvent::NewLinkKey { store_hint, key } => {
                self.new_key(store_hint, key.address, false, SecurityKey::Link(key));
            }
            MgmtEvent::NewLongTermKey { store_hint, key } => {
                self.new_key(store_hint, key.address, true, SecurityKey::LongTerm(key));
            }
            MgmtEvent::NewIdentityKey {
                store_hint,
                random_address,
                key,
            } => {
                let address = if self.registry.find_kind(key.address, true).is_some() {
                    key.address
                } else {
                    random_address
                };
                self.new_key(store_hint, address, true, SecurityKey::Identity(key));
            }
            MgmtEvent::NewSignatureKey {
                address, key_type, ..
            } => {
                log::trace!("[DISPATCH] Signature key type {key_type} for {address} not kept");
            }
            MgmtEvent::DeviceConnected {
                address,
                address_type,
                eir,
                ..
            } => {
                if let Some(device) = self.lookup(address, address_type.is_low_energy()) {
                    if self.apply_advertising(&device, &eir) {
                        self.jobs.schedule_update(&device);
                    }
                }
            }
            MgmtEvent::DeviceDisconnected {
                address, reason, ..
            } => {
                log::debug!("[DISPATCH] Kernel reports {address} disconnected (0x{reason:02X})");
            }
            MgmtEvent::ConnectFailed {
                address,
                address_type,
                status,
            } => {
                if let Some(device) = self.lookup(address, address_type.is_low_energy()) {
                    log::warn!("[DISPATCH] Connecting {address} failed, status 0x{status:02X}");
                    device.finish(Action::Connecting);
                }
            }
            MgmtEvent::AuthFailed {
                address,
                address_type,
                status,
            } => {
                if let Some(device) = self.lookup(address, address_type.is_low_energy()) {
                    log::warn!("[DISPATCH] Authentication with {address} failed, status 0x{status:02X}");
                    device.finish(Action::Pairing);
                }
            }
            MgmtEvent::PinCodeRequest {
                address,
                address_type,
                ..
            } => self.user_request(address, address_type, UserRequest::PinCode),
            MgmtEvent::UserPasskeyRequest {
                address,
                address_type,
            } => self.user_request(address, address_type, UserRequest::Passkey),
            MgmtEvent::UserConfirmRequest {
                address,
                address_type,
                value,
                ..
            } => self.user_request(address, address_type, UserRequest::PasskeyConfirm(value)),
            MgmtEvent::PasskeyNotify {
                address, passkey, ..
            } => {
                log::info!("[DISPATCH] Passkey for {address}: {passkey:06}");
            }
            MgmtEvent::NewConnectionParameters {
                address,
                address_type,
                min_interval,
                max_interval,
                latency,
                timeout,
                ..
            } => {
                if let Some(device) = self.lookup(address, address_type.is_low_energy()) {
                    device.set_connection_parameters(ConnectionParameters {
                        min_interval,
                        max_interval,
                        latency,
                        timeout,
                    });
                }
            }
            MgmtEvent::Unknown { code } => {
                log::trace!("[DISPATCH] Management event 0x{code:04X}");
            }
        }
    }

    fn lookup(&self, address: BluetoothAddress, low_energy: bool) -> Option<Arc<Device>> {
        let device = self.registry.find_kind(address, low_energy);
        if device.is_none() {
            log::warn!("[DISPATCH] Event for unknown device {address}");
        }
        device
    }

    /// Name, class and services from advertising data; returns whether anything changed
    fn apply_advertising(&self, device: &Device, data: &AdvertisingData) -> bool {
        let mut changed = false;
        if let Some(name) = data.name() {
            changed |= device.set_name(name);
        }
        if let Some(class) = data.class {
            changed |= device.set_class(class);
        }
        changed |= device.add_uuids(&data.uuids);
        changed
    }

    fn inquiry_response(&self, response: InquiryResponse) {
        let (device, created) = self
            .registry
            .discovered(response.address, AddressType::BrEdr);
        let mut changed = device.set_class(response.class);
        if let Some(eir) = &response.eir {
            changed |= self.apply_advertising(&device, eir);
        }
        if created && device.name().is_none() {
            self.jobs.submit(Job::RemoteName(device.clone())).ok();
        }
        if created || changed {
            self.jobs.schedule_update(&device);
        }
    }

    fn advertising_report(&self, report: AdvertisingReport) {
        if !matches!(
            report.event_type,
            advertising_type::ADV_IND | advertising_type::SCAN_RSP
        ) {
            return;
        }
        if !self.options.le_discovery.admits(report.address_type) {
            log::trace!("[DISPATCH] Skipping {:?} advertiser {}", report.address_type, report.address);
            return;
        }
        let (device, created) = self.registry.discovered(report.address, report.address_type);
        if self.apply_advertising(&device, &report.data) || created {
            self.jobs.schedule_update(&device);
        }
    }

    fn connection_complete(&self, device: &Arc<Device>, status: u8, handle: u16) {
        if status != 0 {
            log::warn!(
                "[DISPATCH] Connection to {} failed, status 0x{status:02X}",
                device.address()
            );
            device.finish(Action::Connecting);
            return;
        }
        device.connection(handle);
        log::info!("[DISPATCH] {} connected, handle 0x{handle:03X}", device.address());
        self.registry
            .notify_state_change(device, DeviceState::Connected, None);
        self.jobs.schedule_update(device);
    }

    fn disconnection_complete(&self, device: &Arc<Device>, reason: u8) {
        let reason = device.disconnection(reason);
        log::info!("[DISPATCH] {} disconnected: {reason:?}", device.address());
        self.registry
            .notify_state_change(device, DeviceState::Disconnected, Some(reason));
        if device.is_bonded() && !device.auto_connect() {
            self.jobs
                .submit(Job::AutoConnect {
                    device: device.clone(),
                    enable: true,
                })
                .ok();
        }
        self.jobs.schedule_update(device);
    }

    fn pair_complete(&self, status: u8, data: &[u8]) {
        let mut r = Reader::new(data);
        let Ok(address) = r.address() else {
            log::warn!("[DISPATCH] Pair completion without address");
            return;
        };
        let low_energy = r
            .u8()
            .ok()
            .and_then(AddressType::from_raw)
            .is_some_and(AddressType::is_low_energy);
        let Some(device) = self.lookup(address, low_energy) else {
            return;
        };
        if status == 0 {
            log::info!("[DISPATCH] Pairing with {address} complete");
        } else {
            log::warn!(
                "[DISPATCH] Pairing with {address} failed: {}",
                status_error(opcode::PAIR_DEVICE, status)
            );
        }
        device.finish(Action::Pairing);
    }

    fn pair_rejected(&self, status: u8) {
        match self.registry.find_by(|d| d.action() == Action::Pairing) {
            Some(device) => {
                log::warn!(
                    "[DISPATCH] Pairing with {} rejected: {}",
                    device.address(),
                    status_error(opcode::PAIR_DEVICE, status)
                );
                device.finish(Action::Pairing);
            }
            None => log::warn!("[DISPATCH] Pairing rejected with no device pairing"),
        }
    }

    fn new_settings(&self, settings: Settings) {
        log::debug!("[DISPATCH] Adapter settings now 0x{:08X}", settings.0);
        self.adapter
            .lock(|adapter| adapter.borrow_mut().current = settings);
    }

    fn new_key(
        &self,
        store_hint: bool,
        address: BluetoothAddress,
        low_energy: bool,
        key: SecurityKey,
    ) {
        if !store_hint {
            log::trace!("[DISPATCH] Dropping non-persistent key for {address}");
            return;
        }
        let Some(device) = self.lookup(address, low_energy) else {
            return;
        };
        match device.security_key(key) {
            Ok(transition) => self.bond_changed(&device, transition),
            Err(e) => log::warn!("[DISPATCH] Key for {address} refused: {e}"),
        }
    }

    /// Persist and announce a bond flip
    pub(crate) fn bond_changed(&self, device: &Arc<Device>, transition: BondTransition) {
        let state = match transition {
            BondTransition::Unchanged => return,
            BondTransition::Bonded => {
                if let Err(e) = self.store.save(device) {
                    log::error!("[DISPATCH] Cannot store bond of {}: {e}", device.address());
                }
                DeviceState::Paired
            }
            BondTransition::Released => {
                if let Err(e) = self.store.forget(device.address()) {
                    log::error!("[DISPATCH] Cannot forget {}: {e}", device.address());
                }
                DeviceState::Unpaired
            }
        };
        self.registry.notify_state_change(device, state, None);
        self.jobs.schedule_update(device);
    }

    fn user_request(&self, address: BluetoothAddress, kind: AddressType, request: UserRequest) {
        let Some(device) = self.lookup(address, kind.is_low_energy()) else {
            return;
        };
        let job = match request {
            UserRequest::PasskeyConfirm(_) if self.options.autopasskeyconfirm => Job::UserReply {
                device,
                reply: UserReply::Confirm(true),
            },
            request => Job::UserRequest { device, request },
        };
        self.jobs.submit(job).ok();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::device::DisconnectReason;
    use crate::hci::event::{code as hci_code, frame as hci_frame};
    use crate::keys::SecurityKey;
    use crate::keys::fixtures::link_key;
    use crate::mgmt::event::{addr_info, code, frame};
    use crate::mgmt::{Settings, opcode};
    use crate::registry::DeviceState;
    use crate::registry::recorder::RecordingObserver;
    use crate::storage::scratch_dir;
    use crate::testing::{drive, eventually, harness};
    use crate::{AddressType, BluetoothAddress, BluetoothControlOptions};

    const ADDR: BluetoothAddress = BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    const OTHER: BluetoothAddress = BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x66]);

    fn new_link_key(address: BluetoothAddress, store_hint: u8) -> Vec<u8> {
        let mut params = vec![store_hint];
        params.extend(addr_info(address, AddressType::BrEdr));
        params.push(0x04);
        params.extend_from_slice(&[0x5A; 16]);
        params.push(0);
        frame(code::NEW_LINK_KEY, 0, &params)
    }

    #[test]
    fn test_store_hint_zero_is_not_persisted() {
        let dir = scratch_dir("store-hint");
        let control = harness(BluetoothControlOptions {
            storage: Some(dir.clone()),
            ..BluetoothControlOptions::default()
        });
        let recorder = Arc::new(RecordingObserver::default());
        control.register(recorder.clone());

        drive(&control, async {
            control.initialize().await.unwrap();
            let (volatile, _) = control.registry.discovered(ADDR, AddressType::BrEdr);
            let (stored, _) = control.registry.discovered(OTHER, AddressType::BrEdr);
            let mgmt = control.administrator.transport();
            mgmt.inject(new_link_key(ADDR, 0));
            mgmt.inject(new_link_key(OTHER, 1));
            eventually(|| stored.is_bonded()).await;
            assert!(!volatile.is_bonded());
        });

        assert!(!dir.join("00:11:22:33:44:55.device.json").exists());
        assert!(dir.join("00:11:22:33:44:66.device.json").exists());
        assert_eq!(
            recorder.states(),
            vec![(OTHER, DeviceState::Paired, None)]
        );
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_events_for_other_index_ignored() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::BrEdr);
            let mut params = vec![1];
            params.extend(addr_info(ADDR, AddressType::BrEdr));
            params.push(0x04);
            params.extend_from_slice(&[0x5A; 16]);
            params.push(0);
            let mgmt = control.administrator.transport();
            mgmt.inject(frame(code::NEW_LINK_KEY, 3, &params));
            mgmt.inject(frame(code::NEW_SETTINGS, 0, &0x0000_0001u32.to_le_bytes()));
            eventually(|| control.adapter().current == Settings(1)).await;
            assert!(!device.is_bonded());
        });
    }

    #[test]
    fn test_disconnect_of_bonded_device_enables_auto_connect() {
        let control = harness(BluetoothControlOptions::default());
        let recorder = Arc::new(RecordingObserver::default());
        control.register(recorder.clone());

        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::BrEdr);
            device
                .security_key(SecurityKey::Link(link_key(ADDR, 0x42)))
                .unwrap();

            let mut params = vec![0x00, 0x40, 0x00];
            params.extend_from_slice(&ADDR.to_le_bytes());
            params.extend_from_slice(&[0x01, 0x00]);
            control
                .hci
                .transport()
                .inject(hci_frame(hci_code::CONNECTION_COMPLETE, &params));
            eventually(|| device.is_connected()).await;

            control.hci.transport().inject(hci_frame(
                hci_code::DISCONNECTION_COMPLETE,
                &[0x00, 0x40, 0x00, 0x08],
            ));
            eventually(|| device.auto_connect()).await;
        });

        assert!(
            control
                .administrator
                .transport()
                .mgmt_opcodes()
                .contains(&opcode::ADD_DEVICE)
        );
        assert_eq!(
            recorder.states(),
            vec![
                (ADDR, DeviceState::Connected, None),
                (ADDR, DeviceState::Disconnected, Some(DisconnectReason::ConnectionTimeout)),
            ]
        );
    }

    #[test]
    fn test_le_features_and_parameters() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::LePublic);

            let mut params = vec![hci_code::LE_CONNECTION_COMPLETE, 0x00, 0x41, 0x00, 0x00, 0x00];
            params.extend_from_slice(&ADDR.to_le_bytes());
            params.extend_from_slice(&[0x18, 0x00, 0x00, 0x00, 0x48, 0x00, 0x00]);
            control
                .hci
                .transport()
                .inject(hci_frame(hci_code::LE_META, &params));
            control.hci.transport().inject(hci_frame(
                hci_code::LE_META,
                &[hci_code::LE_REMOTE_FEATURES_COMPLETE, 0x00, 0x41, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0],
            ));
            eventually(|| device.features()[0] == 0x01).await;
        });

        let device = control.find(ADDR, true).unwrap();
        assert_eq!(device.handle(), Some(0x0041));
        assert_eq!(device.connection_parameters().max_interval, 0x18);
        assert_eq!(device.connection_parameters().timeout, 0x48);
    }
}
