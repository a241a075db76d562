//! Persisted bonds
//!
//! Every bonded device lives in `<AA:BB:CC:DD:EE:FF>.device.json` inside the
//! storage directory:
//!
//! ```json
//! {
//!   "type": "bredr",
//!   "name": "Headset",
//!   "class": 2360324,
//!   "linkkeys": ["0400A1B2..."]
//! }
//! ```
//!
//! LE records carry `longtermkeys` and `identitykey` instead of `linkkeys`.
//! The optional `controller.json` pins the adapter's public address.
//! Persistence failures are reported to the caller, which logs them; they
//! never abort the operation that triggered the write.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::{CONTROLLER_RECORD, DEVICE_RECORD_SUFFIX};
use crate::device::{Device, SecurityKeys};
use crate::keys::{
    IdentityKey, IdentityKeys, KeyError, LinkKey, LinkKeys, LongTermKey, LongTermKeys, SecurityKey,
};
use crate::{AddressType, BluetoothAddress, ClassOfDevice};

/// Persistence failure
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed record
    #[error("storage record: {0}")]
    Json(#[from] serde_json::Error),
    /// Malformed key string
    #[error("storage key: {0}")]
    Key(#[from] KeyError),
}

/// On-disk form of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Address type of the device
    #[serde(rename = "type")]
    pub address_type: AddressType,
    /// Last known name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Class of device
    #[serde(default)]
    pub class: ClassOfDevice,
    /// Link key strings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linkkeys: Vec<String>,
    /// Long-term key strings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub longtermkeys: Vec<String>,
    /// Identity key string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identitykey: Option<String>,
}

impl DeviceRecord {
    /// Capture `device`
    pub fn of(device: &Device) -> Self {
        let (linkkeys, longtermkeys, identitykey) = match device.security_keys() {
            SecurityKeys::Classic(link_keys) => (
                link_keys.iter().map(LinkKey::to_key_string).collect(),
                Vec::new(),
                None,
            ),
            SecurityKeys::LowEnergy {
                long_term_keys,
                identity_key,
            } => (
                Vec::new(),
                long_term_keys
                    .iter()
                    .map(LongTermKey::to_key_string)
                    .collect(),
                identity_key.as_ref().map(IdentityKey::to_key_string),
            ),
        };

        Self {
            address_type: device.address_type(),
            name: device.name(),
            class: device.class(),
            linkkeys,
            longtermkeys,
            identitykey,
        }
    }

    /// Rebuild the device this record describes
    ///
    /// # Errors
    /// [`StoreError::Key`] if any key string is malformed.
    pub fn restore(&self, address: BluetoothAddress) -> Result<Device, StoreError> {
        let kind = self.address_type;
        let device = Device::new(address, kind);
        if let Some(name) = &self.name {
            device.set_name(name);
        }
        device.set_class(self.class);

        let mut keys = Vec::new();
        for text in &self.linkkeys {
            keys.push(SecurityKey::Link(LinkKey::from_key_string(address, kind, text)?));
        }
        for text in &self.longtermkeys {
            keys.push(SecurityKey::LongTerm(LongTermKey::from_key_string(
                address, kind, text,
            )?));
        }
        if let Some(text) = &self.identitykey {
            keys.push(SecurityKey::Identity(IdentityKey::from_key_string(
                address, kind, text,
            )?));
        }
        for key in keys {
            if let Err(e) = device.security_key(key) {
                log::warn!("[STORE] Dropping stored key of {address}: {e}");
            }
        }
        Ok(device)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ControllerRecord {
    mac: BluetoothAddress,
}

/// Devices and key lists read from storage
#[derive(Debug, Default)]
pub struct LoadedKeys {
    /// Restored devices
    pub devices: Vec<Arc<Device>>,
    /// Every stored link key
    pub link_keys: LinkKeys,
    /// Every stored long-term key
    pub long_term_keys: LongTermKeys,
    /// Every stored identity key
    pub identity_keys: IdentityKeys,
}

/// Directory of device records; a store without a directory persists nothing
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    directory: Option<PathBuf>,
}

impl KeyStore {
    /// Use `directory`, creating it if needed
    ///
    /// If it cannot be created, persistence is disabled.
    pub fn open(directory: Option<PathBuf>) -> Self {
        let directory = directory.and_then(|dir| match fs::create_dir_all(&dir) {
            Ok(()) => {
                log::info!("[STORE] Using {}", dir.display());
                Some(dir)
            }
            Err(e) => {
                log::error!("[STORE] Cannot create {}: {e}, bonds will not persist", dir.display());
                None
            }
        });
        Self { directory }
    }

    /// Whether records are written at all
    pub fn is_enabled(&self) -> bool {
        self.directory.is_some()
    }

    fn device_path(directory: &Path, address: BluetoothAddress) -> PathBuf {
        directory.join(format!("{address}{DEVICE_RECORD_SUFFIX}"))
    }

    /// Read every device record
    ///
    /// Unreadable records are skipped with a warning.
    pub fn load(&self) -> LoadedKeys {
        let mut loaded = LoadedKeys::default();
        let Some(directory) = &self.directory else {
            return loaded;
        };
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[STORE] Cannot list {}: {e}", directory.display());
                return loaded;
            }
        };

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(address) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(DEVICE_RECORD_SUFFIX))
                .and_then(|stem| stem.parse::<BluetoothAddress>().ok())
            else {
                continue;
            };

            match Self::read_device(&entry.path(), address) {
                Ok(device) => {
                    match device.security_keys() {
                        SecurityKeys::Classic(link_keys) => loaded.link_keys.extend(&link_keys),
                        SecurityKeys::LowEnergy {
                            long_term_keys,
                            identity_key,
                        } => {
                            loaded.long_term_keys.extend(&long_term_keys);
                            if let Some(key) = identity_key {
                                loaded.identity_keys.add(key);
                            }
                        }
                    }
                    log::debug!("[STORE] Loaded {address} (bonded: {})", device.is_bonded());
                    loaded.devices.push(Arc::new(device));
                }
                Err(e) => log::warn!("[STORE] Skipping record of {address}: {e}"),
            }
        }

        log::info!(
            "[STORE] Loaded {} devices, {} link keys, {} long-term keys, {} identity keys",
            loaded.devices.len(),
            loaded.link_keys.len(),
            loaded.long_term_keys.len(),
            loaded.identity_keys.len()
        );
        loaded
    }

    fn read_device(path: &Path, address: BluetoothAddress) -> Result<Device, StoreError> {
        let record: DeviceRecord = serde_json::from_slice(&fs::read(path)?)?;
        record.restore(address)
    }

    /// Write the record of `device`
    ///
    /// # Errors
    /// I/O or serialization failure.
    pub fn save(&self, device: &Device) -> Result<(), StoreError> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };
        let record = serde_json::to_vec_pretty(&DeviceRecord::of(device))?;
        write_atomic(&Self::device_path(directory, device.address()), &record)?;
        log::debug!("[STORE] Saved {}", device.address());
        Ok(())
    }

    /// Delete the record of `address`
    ///
    /// # Errors
    /// I/O failure other than the record being absent.
    pub fn forget(&self, address: BluetoothAddress) -> Result<(), StoreError> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };
        match fs::remove_file(Self::device_path(directory, address)) {
            Ok(()) => {
                log::debug!("[STORE] Forgot {address}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Adapter address pinned by a previous run
    pub fn controller(&self) -> Option<BluetoothAddress> {
        let path = self.directory.as_ref()?.join(CONTROLLER_RECORD);
        let data = fs::read(&path).ok()?;
        match serde_json::from_slice::<ControllerRecord>(&data) {
            Ok(record) => Some(record.mac),
            Err(e) => {
                log::warn!("[STORE] Ignoring {}: {e}", path.display());
                None
            }
        }
    }

    /// Pin the adapter address
    ///
    /// # Errors
    /// I/O or serialization failure.
    pub fn save_controller(&self, mac: BluetoothAddress) -> Result<(), StoreError> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };
        let record = serde_json::to_vec_pretty(&ControllerRecord { mac })?;
        write_atomic(&directory.join(CONTROLLER_RECORD), &record)?;
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("btcontrol-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::fixtures::{identity_key, link_key, long_term_key};

    const CLASSIC: BluetoothAddress = BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    const LE: BluetoothAddress = BluetoothAddress::new([0xC0, 0x11, 0x22, 0x33, 0x44, 0x66]);

    fn bonded_classic() -> Device {
        let device = Device::new(CLASSIC, AddressType::BrEdr);
        device.set_name("Headset");
        device.set_class(ClassOfDevice::from_raw(0x24_0404));
        device
            .security_key(SecurityKey::Link(link_key(CLASSIC, 0xA5)))
            .unwrap();
        device
    }

    fn bonded_le() -> Device {
        let device = Device::new(LE, AddressType::LePublic);
        for key in [
            SecurityKey::LongTerm(long_term_key(LE, true, 0x01)),
            SecurityKey::LongTerm(long_term_key(LE, false, 0x02)),
            SecurityKey::Identity(identity_key(LE, 0x03)),
        ] {
            device.security_key(key).unwrap();
        }
        device
    }

    #[test]
    fn test_record_round_trip() {
        let dir = scratch_dir("round-trip");
        let store = KeyStore::open(Some(dir.clone()));
        assert!(store.is_enabled());
        store.save(&bonded_classic()).unwrap();
        store.save(&bonded_le()).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.devices.len(), 2);
        assert_eq!(loaded.link_keys.len(), 1);
        assert_eq!(loaded.long_term_keys.len(), 2);
        assert_eq!(loaded.identity_keys.len(), 1);

        let classic = loaded
            .devices
            .iter()
            .find(|d| d.address() == CLASSIC)
            .unwrap();
        assert_eq!(classic.name().as_deref(), Some("Headset"));
        assert_eq!(classic.class(), ClassOfDevice::from_raw(0x24_0404));
        assert!(classic.is_bonded());
        assert_eq!(classic.link_keys(), bonded_classic().link_keys());

        let le = loaded.devices.iter().find(|d| d.address() == LE).unwrap();
        assert!(le.is_low_energy());
        assert!(le.is_bonded());
        assert_eq!(le.identity_key(), bonded_le().identity_key());

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_record_layout() {
        let record = serde_json::to_value(DeviceRecord::of(&bonded_classic())).unwrap();
        assert_eq!(record["type"], "bredr");
        assert_eq!(record["name"], "Headset");
        assert_eq!(record["class"], 0x24_0404);
        assert_eq!(record["linkkeys"][0].as_str().map(str::len), Some(36));
        assert!(record.get("longtermkeys").is_none());

        let record = serde_json::to_value(DeviceRecord::of(&bonded_le())).unwrap();
        assert_eq!(record["type"], "le_public");
        assert_eq!(record["longtermkeys"].as_array().map(Vec::len), Some(2));
        assert!(record["identitykey"].is_string());
    }

    #[test]
    fn test_forget_and_missing_record() {
        let dir = scratch_dir("forget");
        let store = KeyStore::open(Some(dir.clone()));
        store.save(&bonded_classic()).unwrap();
        assert!(dir.join("00:11:22:33:44:55.device.json").exists());

        store.forget(CLASSIC).unwrap();
        assert!(!dir.join("00:11:22:33:44:55.device.json").exists());
        // forgetting twice is fine
        store.forget(CLASSIC).unwrap();
        assert!(store.load().devices.is_empty());

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let dir = scratch_dir("malformed");
        let store = KeyStore::open(Some(dir.clone()));
        fs::write(dir.join("00:11:22:33:44:55.device.json"), b"{ not json").unwrap();
        fs::write(
            dir.join("00:11:22:33:44:66.device.json"),
            br#"{"type":"bredr","linkkeys":["XYZ"]}"#,
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        assert!(store.load().devices.is_empty());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_controller_record() {
        let dir = scratch_dir("controller");
        let store = KeyStore::open(Some(dir.clone()));
        assert_eq!(store.controller(), None);

        let mac = BluetoothAddress::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]);
        store.save_controller(mac).unwrap();
        assert_eq!(store.controller(), Some(mac));
        let text = fs::read_to_string(dir.join(CONTROLLER_RECORD)).unwrap();
        assert!(text.contains("\"mac\": \"00:1A:7D:DA:71:13\""));

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_disabled_store_is_inert() {
        let store = KeyStore::open(None);
        assert!(!store.is_enabled());
        assert!(store.save(&bonded_classic()).is_ok());
        assert!(store.forget(CLASSIC).is_ok());
        assert!(store.load().devices.is_empty());
        assert_eq!(store.controller(), None);
    }
}
