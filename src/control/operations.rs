//! Caller-facing device actions
//!
//! Every action claims the device with [`Device::begin`] and releases it
//! when its completion event arrives. A failed kernel exchange releases it
//! at once.

use std::sync::Arc;

use super::BluetoothControl;
use crate::device::{Action, Device};
use crate::hci::HciCommand;
use crate::jobs::{Job, UserReply};
use crate::mgmt::Capability;
use crate::transport::Transport;
use crate::BluetoothError;

impl<H: Transport, M: Transport> BluetoothControl<H, M> {
    /// Open a link to `device`
    ///
    /// Returns once the controller accepted the request. The device stays in
    /// [`Action::Connecting`] until the connection completes; use
    /// [`Device::wait_settled`] to block on it.
    ///
    /// # Errors
    /// [`BluetoothError::AlreadyDone`] when connected, [`BluetoothError::InProgress`]
    /// while another action runs, or the controller's refusal.
    pub async fn connect(&self, device: &Arc<Device>) -> Result<(), BluetoothError> {
        if device.is_connected() {
            return Err(BluetoothError::AlreadyDone);
        }
        device.begin(Action::Connecting)?;

        let command = match device.address_type().le_raw() {
            Some(peer_type) => HciCommand::le_create_connection(device.address(), peer_type),
            None => HciCommand::create_connection(device.address()),
        };
        log::info!("[CONTROL] Connecting to {}", device.address());
        self.hci.execute(&command).await.inspect_err(|e| {
            log::warn!("[CONTROL] Connecting to {} failed: {e}", device.address());
            device.finish(Action::Connecting);
        })
    }

    /// Drop the link to `device` with HCI `reason`
    ///
    /// # Errors
    /// [`BluetoothError::AlreadyDone`] when not connected, [`BluetoothError::InProgress`]
    /// while another action runs, or the controller's refusal.
    pub async fn disconnect(&self, device: &Arc<Device>, reason: u8) -> Result<(), BluetoothError> {
        let Some(handle) = device.handle() else {
            return Err(BluetoothError::AlreadyDone);
        };
        device.begin(Action::Disconnecting)?;

        log::info!("[CONTROL] Disconnecting {} (0x{reason:02X})", device.address());
        self.hci
            .execute(&HciCommand::disconnect(handle, reason))
            .await
            .inspect_err(|_| {
                device.finish(Action::Disconnecting);
            })
    }

    /// Start bonding with `device`
    ///
    /// Keys arrive through key events; the action ends with the kernel's
    /// pairing completion.
    ///
    /// # Errors
    /// [`BluetoothError::AlreadyDone`] when bonded, [`BluetoothError::InProgress`]
    /// while another action runs, or a channel error.
    pub async fn pair(
        &self,
        device: &Arc<Device>,
        capability: Capability,
    ) -> Result<(), BluetoothError> {
        if device.is_bonded() {
            return Err(BluetoothError::AlreadyDone);
        }
        device.begin(Action::Pairing)?;

        log::info!("[CONTROL] Pairing with {} as {capability:?}", device.address());
        self.administrator
            .pair(device.address(), device.address_type(), capability)
            .await
            .inspect_err(|_| {
                device.finish(Action::Pairing);
            })
    }

    /// Drop the bond with `device`
    ///
    /// Removes the keys and the stored record and takes the device off the
    /// auto-connect whitelist.
    ///
    /// # Errors
    /// [`BluetoothError::AlreadyDone`] when not bonded, [`BluetoothError::InProgress`]
    /// while another action runs, or the kernel's refusal.
    pub async fn unpair(&self, device: &Arc<Device>) -> Result<(), BluetoothError> {
        if !device.is_bonded() {
            return Err(BluetoothError::AlreadyDone);
        }
        device.begin(Action::Unpairing)?;

        let (address, kind) = (device.address(), device.address_type());
        if let Err(e) = self.administrator.unpair(address, kind).await {
            log::warn!("[CONTROL] Unpairing {address} failed: {e}");
            device.finish(Action::Unpairing);
            return Err(e);
        }

        if device.auto_connect() {
            match self.administrator.remove_device(address, kind).await {
                Ok(()) => {
                    if device.set_auto_connect(false).is_err() {
                        log::debug!("[CONTROL] {address} still connected, whitelist flag kept");
                    }
                }
                Err(e) => log::warn!("[CONTROL] Removing {address} from whitelist failed: {e}"),
            }
        }

        let transition = device.purge_security_keys();
        self.bond_changed(device, transition);
        device.finish(Action::Unpairing);
        log::info!("[CONTROL] Unpaired {address}");
        Ok(())
    }

    /// Cancel the pairing in progress with `device`
    ///
    /// The device is released even when the kernel refuses.
    ///
    /// # Errors
    /// [`BluetoothError::AlreadyDone`] when not pairing, or the kernel's refusal.
    pub async fn abort_pairing(&self, device: &Arc<Device>) -> Result<(), BluetoothError> {
        if device.action() != Action::Pairing {
            return Err(BluetoothError::AlreadyDone);
        }
        let result = self
            .administrator
            .pair_abort(device.address(), device.address_type())
            .await;
        device.finish(Action::Pairing);
        result
    }

    /// Answer a PIN code request; `None` rejects it
    ///
    /// # Errors
    /// [`BluetoothError::QueueFull`] if the reply cannot be queued.
    pub fn pin_code(&self, device: &Arc<Device>, pin: Option<String>) -> Result<(), BluetoothError> {
        self.reply(device, UserReply::PinCode(pin))
    }

    /// Answer a passkey request; `None` rejects it
    ///
    /// # Errors
    /// [`BluetoothError::QueueFull`] if the reply cannot be queued.
    pub fn passkey(&self, device: &Arc<Device>, passkey: Option<u32>) -> Result<(), BluetoothError> {
        self.reply(device, UserReply::Passkey(passkey))
    }

    /// Answer a numeric comparison
    ///
    /// # Errors
    /// [`BluetoothError::QueueFull`] if the reply cannot be queued.
    pub fn confirm_passkey(&self, device: &Arc<Device>, accept: bool) -> Result<(), BluetoothError> {
        self.reply(device, UserReply::Confirm(accept))
    }

    fn reply(&self, device: &Arc<Device>, reply: UserReply) -> Result<(), BluetoothError> {
        self.jobs.submit(Job::UserReply {
            device: device.clone(),
            reply,
        })
    }

    /// Put `device` on, or take it off, the kernel auto-connect whitelist
    ///
    /// # Errors
    /// [`BluetoothError::AlreadyDone`] when unchanged, [`BluetoothError::InvalidState`]
    /// while connected, or the kernel's refusal.
    pub async fn auto_connect(&self, device: &Arc<Device>, enable: bool) -> Result<(), BluetoothError> {
        if device.auto_connect() == enable {
            return Err(BluetoothError::AlreadyDone);
        }
        if device.is_connected() {
            return Err(BluetoothError::InvalidState);
        }

        let (address, kind) = (device.address(), device.address_type());
        if enable {
            self.administrator
                .add_device(address, kind, device.auto_connect_mode())
                .await?;
        } else {
            self.administrator.remove_device(address, kind).await?;
        }
        log::debug!("[CONTROL] Auto-connect for {address}: {enable}");
        device.set_auto_connect(enable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::REASON_REMOTE_USER_TERMINATED;
    use crate::hci::command::opcode as hci_opcode;
    use crate::hci::event::{code as hci_code, frame as hci_frame};
    use crate::keys::SecurityKey;
    use crate::keys::fixtures::{identity_key, link_key, long_term_key};
    use crate::mgmt::event::{addr_info, code, frame};
    use crate::mgmt::opcode;
    use crate::registry::DeviceState;
    use crate::registry::recorder::RecordingObserver;
    use crate::storage::scratch_dir;
    use crate::testing::{MockTransport, drive, eventually, harness};
    use crate::{AddressType, BluetoothAddress, BluetoothControl, BluetoothControlOptions};
    use embassy_time::Duration;

    const ADDR: BluetoothAddress = BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

    fn connection_complete(status: u8, handle: u16) -> Vec<u8> {
        let mut params = vec![status];
        params.extend_from_slice(&handle.to_le_bytes());
        params.extend_from_slice(&ADDR.to_le_bytes());
        params.extend_from_slice(&[0x01, 0x00]);
        hci_frame(hci_code::CONNECTION_COMPLETE, &params)
    }

    fn pair_complete(status: u8, kind: AddressType) -> Vec<u8> {
        let mut params = opcode::PAIR_DEVICE.to_le_bytes().to_vec();
        params.push(status);
        params.extend(addr_info(ADDR, kind));
        frame(code::COMMAND_COMPLETE, 0, &params)
    }

    #[test]
    fn test_connect_flow() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::BrEdr);

            control.connect(&device).await.unwrap();
            assert_eq!(device.action(), Action::Connecting);
            assert_eq!(control.connect(&device).await, Err(BluetoothError::InProgress));

            control.hci.transport().inject(connection_complete(0, 0x0040));
            device.wait_settled(Duration::from_secs(1)).await.unwrap();
            assert!(device.is_connected());
            assert_eq!(control.connect(&device).await, Err(BluetoothError::AlreadyDone));

            control.disconnect(&device, REASON_REMOTE_USER_TERMINATED).await.unwrap();
            assert_eq!(device.action(), Action::Disconnecting);
            control.hci.transport().inject(hci_frame(
                hci_code::DISCONNECTION_COMPLETE,
                &[0x00, 0x40, 0x00, 0x16],
            ));
            device.wait_settled(Duration::from_secs(1)).await.unwrap();
            assert_eq!(
                control.disconnect(&device, REASON_REMOTE_USER_TERMINATED).await,
                Err(BluetoothError::AlreadyDone)
            );
        });

        assert_eq!(
            control.hci.transport().hci_opcodes(),
            vec![hci_opcode::CREATE_CONNECTION, hci_opcode::DISCONNECT]
        );
    }

    #[test]
    fn test_connect_failure_releases_device() {
        let control = BluetoothControl::new(
            BluetoothControlOptions::default(),
            MockTransport::hci_failing(hci_opcode::CREATE_CONNECTION, 0x0C),
            MockTransport::mgmt(),
        );
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::BrEdr);
            assert_eq!(
                control.connect(&device).await,
                Err(BluetoothError::CommandFailed {
                    opcode: hci_opcode::CREATE_CONNECTION,
                    status: 0x0C
                })
            );
            assert_eq!(device.action(), Action::Idle);
        });
    }

    #[test]
    fn test_failed_connection_complete_releases_device() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::BrEdr);
            control.connect(&device).await.unwrap();
            control.hci.transport().inject(connection_complete(0x04, 0x0000));
            device.wait_settled(Duration::from_secs(1)).await.unwrap();
            assert!(!device.is_connected());
        });
    }

    #[test]
    fn test_le_connect_uses_le_command() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::LePublic);
            control.connect(&device).await.unwrap();
        });
        assert_eq!(
            control.hci.transport().hci_opcodes(),
            vec![hci_opcode::LE_CREATE_CONNECTION]
        );
    }

    #[test]
    fn test_pairing_completes_on_kernel_answer() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::BrEdr);

            control.pair(&device, Capability::DisplayYesNo).await.unwrap();
            assert_eq!(device.action(), Action::Pairing);
            let mgmt = control.administrator.transport();
            eventually(|| mgmt.mgmt_opcodes().contains(&opcode::PAIR_DEVICE)).await;

            mgmt.inject(pair_complete(0, AddressType::BrEdr));
            device.wait_settled(Duration::from_secs(1)).await.unwrap();
        });
    }

    #[test]
    fn test_pairing_rejected_by_status() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::LePublic);
            control.pair(&device, Capability::default()).await.unwrap();

            let mut params = opcode::PAIR_DEVICE.to_le_bytes().to_vec();
            params.push(0x0A);
            control
                .administrator
                .transport()
                .inject(frame(code::COMMAND_STATUS, 0, &params));
            device.wait_settled(Duration::from_secs(1)).await.unwrap();
            assert!(!device.is_bonded());
        });
    }

    #[test]
    fn test_abort_pairing() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::BrEdr);
            assert_eq!(
                control.abort_pairing(&device).await,
                Err(BluetoothError::AlreadyDone)
            );

            control.pair(&device, Capability::default()).await.unwrap();
            control.abort_pairing(&device).await.unwrap();
            assert_eq!(device.action(), Action::Idle);
        });
        assert!(
            control
                .administrator
                .transport()
                .mgmt_opcodes()
                .contains(&opcode::CANCEL_PAIR_DEVICE)
        );
    }

    #[test]
    fn test_pair_unpair_idempotence() {
        let dir = scratch_dir("unpair");
        let control = harness(BluetoothControlOptions {
            storage: Some(dir.clone()),
            ..BluetoothControlOptions::default()
        });
        let recorder = Arc::new(RecordingObserver::default());
        control.register(recorder.clone());

        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::LePublic);
            assert_eq!(control.unpair(&device).await, Err(BluetoothError::AlreadyDone));

            for key in [
                SecurityKey::LongTerm(long_term_key(ADDR, true, 0x11)),
                SecurityKey::LongTerm(long_term_key(ADDR, false, 0x12)),
                SecurityKey::Identity(identity_key(ADDR, 0x13)),
            ] {
                device.security_key(key).unwrap();
            }
            assert!(device.is_bonded());
            control.store.save(&device).unwrap();
            let keys = device.long_term_keys().unwrap();
            assert_eq!(
                control.pair(&device, Capability::default()).await,
                Err(BluetoothError::AlreadyDone)
            );
            assert_eq!(device.long_term_keys().unwrap(), keys);

            control.auto_connect(&device, true).await.unwrap();
            control.unpair(&device).await.unwrap();
            assert!(!device.is_bonded());
            assert!(!device.auto_connect());
            assert_eq!(device.action(), Action::Idle);
        });

        let opcodes = control.administrator.transport().mgmt_opcodes();
        assert!(opcodes.contains(&opcode::UNPAIR_DEVICE));
        assert!(opcodes.contains(&opcode::REMOVE_DEVICE));
        assert!(!dir.join("00:11:22:33:44:55.device.json").exists());
        assert_eq!(
            recorder.states(),
            vec![(ADDR, DeviceState::Unpaired, None)]
        );
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_auto_connect_toggle() {
        let control = harness(BluetoothControlOptions::default());
        drive(&control, async {
            control.initialize().await.unwrap();
            let (device, _) = control.registry.discovered(ADDR, AddressType::BrEdr);
            device
                .security_key(SecurityKey::Link(link_key(ADDR, 0x22)))
                .unwrap();

            assert_eq!(
                control.auto_connect(&device, false).await,
                Err(BluetoothError::AlreadyDone)
            );
            control.auto_connect(&device, true).await.unwrap();
            assert!(device.auto_connect());

            device.connection(0x0040);
            assert_eq!(
                control.auto_connect(&device, false).await,
                Err(BluetoothError::InvalidState)
            );
        });

        let add = control
            .administrator
            .transport()
            .written()
            .into_iter()
            .find(|frame| frame[..2] == opcode::ADD_DEVICE.to_le_bytes())
            .unwrap();
        // classic devices are added for incoming connections
        assert_eq!(add[13], 0x01);
    }
}
