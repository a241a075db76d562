use super::BluetoothControl;
use crate::BluetoothError;
use crate::transport::Transport;

/// Attach a bring-up step name to a failure
fn step<T>(name: &'static str, result: Result<T, BluetoothError>) -> Result<T, BluetoothError> {
    result.map_err(|source| {
        log::error!("[BRINGUP] {name} failed: {source}");
        BluetoothError::BringUp {
            step: name,
            source: Box::new(source),
        }
    })
}

impl<H: Transport, M: Transport> BluetoothControl<H, M> {
    /// Bring the adapter up
    ///
    /// Configures the adapter while powered off, hands the stored keys to the
    /// kernel, powers it on, puts restored bonded devices back on the
    /// auto-connect whitelist and opens the raw channel. In external mode the
    /// adapter is left as another process configured it. The first failing
    /// step aborts: the adapter is powered off where possible and both
    /// channels are closed.
    ///
    /// # Errors
    /// [`BluetoothError::BringUp`] naming the failed step.
    pub async fn initialize(&self) -> Result<(), BluetoothError> {
        if self.options.external {
            log::info!("[BRINGUP] External mode, adapter configuration is left alone");
        }

        step(
            "open management channel",
            self.administrator.open(self.options.interface),
        )?;

        match self.configure().await {
            Ok(()) => {
                self.hci.open();
                log::info!("[BRINGUP] Adapter up: {}", self.adapter());
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Power the adapter off and close both channels
    pub async fn deinitialize(&self) {
        self.abort_scan();
        self.teardown().await;
    }

    async fn teardown(&self) {
        if !self.options.external {
            if let Err(e) = self.administrator.power(false).await {
                log::warn!("[BRINGUP] Power down during teardown failed: {e}");
            }
        }
        self.hci.close();
        self.administrator.close();
    }

    async fn configure(&self) -> Result<(), BluetoothError> {
        let admin = &self.administrator;
        let loaded = self.store.load();

        if !self.options.external {
            let class = self.options.device_class();
            step("power down", admin.power(false).await)?;
            step("enable simple pairing", admin.simple_pairing(true).await)?;
            step("enable secure links", admin.secure_link(true).await)?;
            step("enable connectable", admin.connectable(true).await)?;
            step("enable bonding", admin.bondable(true).await)?;
            step("enable low energy", admin.low_energy(true).await)?;
            step("disable privacy", admin.privacy(0, None).await)?;
            step("enable secure connections", admin.secure_connection(true).await)?;
            step(
                "set local name",
                admin
                    .name(&self.options.short_name, &self.options.name)
                    .await,
            )?;
            step(
                "set device class",
                admin
                    .device_class(class.major_device_class().raw(), class.minor_device_class())
                    .await,
            )?;

            if self.options.persistmac {
                if let Some(mac) = self.store.controller() {
                    step("set public address", admin.public_address(mac).await)?;
                    self.pinned_address
                        .lock(|pinned| *pinned.borrow_mut() = Some(mac));
                    log::info!("[BRINGUP] Using pinned address {mac}");
                }
            }

            if let Err(e) = admin.load_link_keys(&loaded.link_keys).await {
                log::warn!("[BRINGUP] Failed to upload link keys: {e}");
            }
            if let Err(e) = admin.load_long_term_keys(&loaded.long_term_keys).await {
                log::warn!("[BRINGUP] Failed to upload long term keys: {e}");
            }
            if let Err(e) = admin.load_identity_keys(&loaded.identity_keys).await {
                log::warn!("[BRINGUP] Failed to upload identity keys: {e}");
            }

            step("power up", admin.power(true).await)?;
        }

        for device in loaded.devices {
            let restored = device.clone();
            if !self.registry.insert(device) || self.options.external || !restored.is_bonded() {
                continue;
            }
            match self.auto_connect(&restored, true).await {
                Ok(()) | Err(BluetoothError::AlreadyDone) => {}
                Err(e) => log::warn!(
                    "[BRINGUP] Cannot whitelist restored {}: {e}",
                    restored.address()
                ),
            }
        }

        match admin.settings().await {
            Ok(info) => {
                if self.options.persistmac
                    && !self.options.external
                    && self.store.controller().is_none()
                {
                    match self.store.save_controller(info.address) {
                        Ok(()) => {
                            self.pinned_address
                                .lock(|pinned| *pinned.borrow_mut() = Some(info.address));
                        }
                        Err(e) => log::warn!("[BRINGUP] Cannot pin address {}: {e}", info.address),
                    }
                }
                self.adapter.lock(|adapter| *adapter.borrow_mut() = info);
            }
            Err(e) => log::warn!("[BRINGUP] Cannot read controller information: {e}"),
        }

        Ok(())
    }
}
