use core::sync::atomic::Ordering;
use std::sync::Arc;

use embassy_futures::select::{Either, Either3, select, select3};
use embassy_time::{Duration, Timer};

use super::BluetoothControl;
use crate::constants::{GIAC, INQUIRY_GRACE, LIAC, MAX_INQUIRY_LENGTH, UNLIMITED_RESPONSES};
use crate::device::Device;
use crate::hci::HciCommand;
use crate::jobs::{Job, UserReply, UserRequest};
use crate::transport::Transport;
use crate::{BluetoothError, ScanKind, ScanRequest};

/// Inquiry length in 1.28 s units covering `seconds`
fn inquiry_length(seconds: u16) -> u8 {
    let units = (u32::from(seconds) * 100).div_ceil(128);
    u8::try_from(units.clamp(1, u32::from(MAX_INQUIRY_LENGTH))).unwrap_or(MAX_INQUIRY_LENGTH)
}

impl<H: Transport, M: Transport> BluetoothControl<H, M> {
    pub(crate) async fn process_job(&self, job: Job) {
        match job {
            Job::Scan(request) => self.run_scan(request).await,
            Job::Update(device) => {
                device.update_delivered();
                self.registry.notify_update(&device);
                if let Some(callback) = device.callback() {
                    callback.updated(&device);
                }
            }
            Job::AutoConnect { device, enable } => {
                match self.auto_connect(&device, enable).await {
                    Ok(()) | Err(BluetoothError::AlreadyDone) => {}
                    Err(e) => log::warn!(
                        "[JOBS] Auto-connect {} for {} failed: {e}",
                        if enable { "enable" } else { "disable" },
                        device.address()
                    ),
                }
            }
            Job::RemoteName(device) => {
                let command = HciCommand::remote_name_request(device.address());
                if let Err(e) = self.hci.execute(&command).await {
                    log::debug!("[JOBS] Name request for {} failed: {e}", device.address());
                }
            }
            Job::UserRequest { device, request } => self.prompt_user(&device, request).await,
            Job::UserReply { device, reply } => {
                if let Err(e) = self.send_reply(&device, &reply).await {
                    log::warn!("[JOBS] Reply {reply:?} to {} failed: {e}", device.address());
                }
            }
        }
    }

    async fn prompt_user(&self, device: &Arc<Device>, request: UserRequest) {
        let Some(callback) = device.callback() else {
            log::info!(
                "[JOBS] No callback for {}, rejecting {request:?}",
                device.address()
            );
            let reply = match request {
                UserRequest::PinCode => UserReply::PinCode(None),
                UserRequest::Passkey => UserReply::Passkey(None),
                UserRequest::PasskeyConfirm(_) => UserReply::Confirm(false),
            };
            if let Err(e) = self.send_reply(device, &reply).await {
                log::warn!("[JOBS] Rejecting {request:?} failed: {e}");
            }
            return;
        };

        match request {
            UserRequest::PinCode => callback.pin_code_request(device),
            UserRequest::Passkey => callback.passkey_request(device),
            UserRequest::PasskeyConfirm(passkey) => {
                callback.passkey_confirm_request(device, passkey);
            }
        }
    }

    async fn send_reply(&self, device: &Device, reply: &UserReply) -> Result<(), BluetoothError> {
        let (address, kind) = (device.address(), device.address_type());
        let admin = &self.administrator;
        match reply {
            UserReply::PinCode(pin) => admin.user_pin_code_reply(address, kind, pin.as_deref()).await,
            UserReply::Passkey(passkey) => admin.user_passkey_reply(address, kind, *passkey).await,
            UserReply::Confirm(accept) => {
                admin
                    .user_passkey_confirm_reply(address, kind, *accept)
                    .await
            }
        }
    }

    async fn run_scan(&self, request: ScanRequest) {
        let duration = Duration::from_secs(u64::from(request.duration));
        let result = match request.kind {
            ScanKind::LowEnergy => self.le_scan(request, duration).await,
            ScanKind::Classic => self.inquiry(request, duration).await,
        };
        if let Err(e) = result {
            log::warn!("[JOBS] {:?} scan failed: {e}", request.kind);
        }

        self.scan.active.store(false, Ordering::Release);
        log::info!("[JOBS] {:?} scan complete", request.kind);
        self.registry.notify_scan_complete(request.kind);
        self.scan.completed.signal(());
    }

    async fn le_scan(&self, request: ScanRequest, duration: Duration) -> Result<(), BluetoothError> {
        self.hci
            .execute(&HciCommand::le_set_scan_parameters(request.passive))
            .await?;
        self.hci
            .execute(&HciCommand::le_set_scan_enable(true, true))
            .await?;

        if let Either::Second(()) = select(Timer::after(duration), self.scan.abort.wait()).await {
            log::debug!("[JOBS] LE scan aborted");
        }

        self.hci
            .execute(&HciCommand::le_set_scan_enable(false, false))
            .await
    }

    async fn inquiry(&self, request: ScanRequest, duration: Duration) -> Result<(), BluetoothError> {
        let lap = if request.limited { LIAC } else { GIAC };
        self.hci
            .execute(&HciCommand::inquiry(
                lap,
                inquiry_length(request.duration),
                UNLIMITED_RESPONSES,
            ))
            .await?;

        match select3(
            self.scan.inquiry_complete.wait(),
            Timer::after(duration + INQUIRY_GRACE),
            self.scan.abort.wait(),
        )
        .await
        {
            Either3::First(()) => Ok(()),
            Either3::Second(()) => {
                log::warn!("[JOBS] Inquiry did not complete in time");
                self.hci.execute(&HciCommand::inquiry_cancel()).await
            }
            Either3::Third(()) => {
                log::debug!("[JOBS] Inquiry aborted");
                self.hci.execute(&HciCommand::inquiry_cancel()).await
            }
        }
    }
}
