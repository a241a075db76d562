//! Security key material
//!
//! Classic devices bond through link keys; LE devices through long-term keys
//! plus an identity resolving key. Each key is tagged with the owning device
//! and knows its management-channel wire layout (for bulk loading into the
//! kernel) and its persisted string form.
//!
//! The persisted string is the upper-case hex of the packed key fields,
//! without the owner address: the record it lives in already names the
//! device.

use core::fmt::Write;

use crate::{AddressType, BluetoothAddress};

/// Key string decoding failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Not a hex string
    #[error("key string is not valid hex")]
    InvalidHex,
    /// Hex decoded to the wrong number of bytes
    #[error("key string holds {actual} bytes, expected {expected}")]
    InvalidLength {
        /// Bytes the key type needs
        expected: usize,
        /// Bytes found
        actual: usize,
    },
}

/// Common behaviour of the three key kinds
pub trait KeyMaterial: Clone {
    /// Size of one entry in a management bulk-load command
    const WIRE_SIZE: usize;

    /// Owning device
    fn owner(&self) -> (BluetoothAddress, AddressType);

    /// A key holding an all-zero value never authenticates anything
    fn is_valid(&self) -> bool;

    /// Whether `other` would overwrite this key rather than add to it
    fn same_slot(&self, other: &Self) -> bool;

    /// Append the management-channel entry to `out`
    fn write_wire(&self, out: &mut Vec<u8>);
}

/// Classic link key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkKey {
    /// Owning device
    pub address: BluetoothAddress,
    /// Owner address type (always [`AddressType::BrEdr`] in practice)
    pub address_type: AddressType,
    /// Link key type as reported by the controller
    pub key_type: u8,
    /// PIN length used for legacy pairing
    pub pin_length: u8,
    /// Key value
    pub value: [u8; 16],
}

impl LinkKey {
    const PACKED: usize = 18;

    /// Persisted string form
    #[must_use]
    pub fn to_key_string(&self) -> String {
        let mut packed = Vec::with_capacity(Self::PACKED);
        packed.push(self.key_type);
        packed.push(self.pin_length);
        packed.extend_from_slice(&self.value);
        to_hex(&packed)
    }

    /// Rebuild from the persisted string form
    ///
    /// # Errors
    /// Returns [`KeyError`] on malformed hex or a wrong length
    pub fn from_key_string(
        address: BluetoothAddress,
        address_type: AddressType,
        text: &str,
    ) -> Result<Self, KeyError> {
        let packed = from_hex(text, Self::PACKED)?;
        let mut value = [0u8; 16];
        value.copy_from_slice(&packed[2..18]);
        Ok(Self {
            address,
            address_type,
            key_type: packed[0],
            pin_length: packed[1],
            value,
        })
    }
}

impl KeyMaterial for LinkKey {
    const WIRE_SIZE: usize = 25;

    fn owner(&self) -> (BluetoothAddress, AddressType) {
        (self.address, self.address_type)
    }

    fn is_valid(&self) -> bool {
        self.value != [0u8; 16]
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.owner() == other.owner()
    }

    fn write_wire(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address.to_le_bytes());
        out.push(self.address_type.raw());
        out.push(self.key_type);
        out.extend_from_slice(&self.value);
        out.push(self.pin_length);
    }
}

/// LE long-term key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongTermKey {
    /// Owning device
    pub address: BluetoothAddress,
    /// Owner address type
    pub address_type: AddressType,
    /// Key type (authenticated, unauthenticated, P-256, ...)
    pub key_type: u8,
    /// Whether this key is used when we initiate encryption
    pub master: bool,
    /// Negotiated encryption key size
    pub encryption_size: u8,
    /// Encrypted diversifier
    pub ediv: u16,
    /// Random number
    pub random: u64,
    /// Key value
    pub value: [u8; 16],
}

impl LongTermKey {
    const PACKED: usize = 29;

    /// Persisted string form
    #[must_use]
    pub fn to_key_string(&self) -> String {
        let mut packed = Vec::with_capacity(Self::PACKED);
        packed.push(self.key_type);
        packed.push(u8::from(self.master));
        packed.push(self.encryption_size);
        packed.extend_from_slice(&self.ediv.to_le_bytes());
        packed.extend_from_slice(&self.random.to_le_bytes());
        packed.extend_from_slice(&self.value);
        to_hex(&packed)
    }

    /// Rebuild from the persisted string form
    ///
    /// # Errors
    /// Returns [`KeyError`] on malformed hex or a wrong length
    pub fn from_key_string(
        address: BluetoothAddress,
        address_type: AddressType,
        text: &str,
    ) -> Result<Self, KeyError> {
        let packed = from_hex(text, Self::PACKED)?;
        let mut random = [0u8; 8];
        random.copy_from_slice(&packed[5..13]);
        let mut value = [0u8; 16];
        value.copy_from_slice(&packed[13..29]);
        Ok(Self {
            address,
            address_type,
            key_type: packed[0],
            master: packed[1] != 0,
            encryption_size: packed[2],
            ediv: u16::from_le_bytes([packed[3], packed[4]]),
            random: u64::from_le_bytes(random),
            value,
        })
    }
}

impl KeyMaterial for LongTermKey {
    const WIRE_SIZE: usize = 36;

    fn owner(&self) -> (BluetoothAddress, AddressType) {
        (self.address, self.address_type)
    }

    fn is_valid(&self) -> bool {
        self.value != [0u8; 16] && (7..=16).contains(&self.encryption_size)
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.owner() == other.owner() && self.master == other.master
    }

    fn write_wire(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address.to_le_bytes());
        out.push(self.address_type.raw());
        out.push(self.key_type);
        out.push(u8::from(self.master));
        out.push(self.encryption_size);
        out.extend_from_slice(&self.ediv.to_le_bytes());
        out.extend_from_slice(&self.random.to_le_bytes());
        out.extend_from_slice(&self.value);
    }
}

/// LE identity resolving key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    /// Owning device (identity address)
    pub address: BluetoothAddress,
    /// Owner address type
    pub address_type: AddressType,
    /// Key value
    pub value: [u8; 16],
}

impl IdentityKey {
    /// Persisted string form
    #[must_use]
    pub fn to_key_string(&self) -> String {
        to_hex(&self.value)
    }

    /// Rebuild from the persisted string form
    ///
    /// # Errors
    /// Returns [`KeyError`] on malformed hex or a wrong length
    pub fn from_key_string(
        address: BluetoothAddress,
        address_type: AddressType,
        text: &str,
    ) -> Result<Self, KeyError> {
        let packed = from_hex(text, 16)?;
        let mut value = [0u8; 16];
        value.copy_from_slice(&packed);
        Ok(Self {
            address,
            address_type,
            value,
        })
    }
}

impl KeyMaterial for IdentityKey {
    const WIRE_SIZE: usize = 23;

    fn owner(&self) -> (BluetoothAddress, AddressType) {
        (self.address, self.address_type)
    }

    fn is_valid(&self) -> bool {
        self.value != [0u8; 16]
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.owner() == other.owner()
    }

    fn write_wire(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address.to_le_bytes());
        out.push(self.address_type.raw());
        out.extend_from_slice(&self.value);
    }
}

/// Any key a device may be handed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityKey {
    /// Classic link key
    Link(LinkKey),
    /// LE long-term key
    LongTerm(LongTermKey),
    /// LE identity resolving key
    Identity(IdentityKey),
}

/// Ordered key collection in which a key replaces any entry occupying the same slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyList<K> {
    keys: Vec<K>,
}

/// Link keys
pub type LinkKeys = KeyList<LinkKey>;
/// Long-term keys
pub type LongTermKeys = KeyList<LongTermKey>;
/// Identity resolving keys
pub type IdentityKeys = KeyList<IdentityKey>;

impl<K> Default for KeyList<K> {
    fn default() -> Self {
        Self { keys: Vec::new() }
    }
}

impl<K: KeyMaterial> KeyList<K> {
    /// Most entries one bulk-load frame can carry after its flag and count bytes
    pub const CAPACITY: usize = (u16::MAX as usize - 3) / K::WIRE_SIZE;

    /// Empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a valid key; invalid keys, and new slots once the list holds
    /// [`Self::CAPACITY`] entries, are refused and `false` is returned
    pub fn add(&mut self, key: K) -> bool {
        if !key.is_valid() {
            return false;
        }
        let len = self.keys.len();
        match self.keys.iter_mut().find(|existing| existing.same_slot(&key)) {
            Some(existing) => *existing = key,
            None if len >= Self::CAPACITY => {
                log::warn!("[STORE] Key list full, dropping key for {}", key.owner().0);
                return false;
            }
            None => self.keys.push(key),
        }
        true
    }

    /// Merge every valid key of `other`
    pub fn extend(&mut self, other: &Self) {
        for key in &other.keys {
            self.add(key.clone());
        }
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over the entries
    pub fn iter(&self) -> core::slice::Iter<'_, K> {
        self.keys.iter()
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Management bulk-load payload: little-endian count followed by the entries
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.keys.len() * K::WIRE_SIZE);
        let count = u16::try_from(self.keys.len()).unwrap_or(u16::MAX);
        out.extend_from_slice(&count.to_le_bytes());
        for key in &self.keys {
            key.write_wire(&mut out);
        }
        out
    }
}

impl<'a, K> IntoIterator for &'a KeyList<K> {
    type Item = &'a K;
    type IntoIter = core::slice::Iter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02X}").ok();
    }
    out
}

fn from_hex(text: &str, expected: usize) -> Result<Vec<u8>, KeyError> {
    if text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KeyError::InvalidHex);
    }
    let bytes = (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| KeyError::InvalidHex))
        .collect::<Result<Vec<u8>, KeyError>>()?;
    if bytes.len() != expected {
        return Err(KeyError::InvalidLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn link_key(address: BluetoothAddress, fill: u8) -> LinkKey {
        LinkKey {
            address,
            address_type: AddressType::BrEdr,
            key_type: 0x04,
            pin_length: 0,
            value: [fill; 16],
        }
    }

    pub(crate) fn long_term_key(address: BluetoothAddress, master: bool, fill: u8) -> LongTermKey {
        LongTermKey {
            address,
            address_type: AddressType::LePublic,
            key_type: 0x01,
            master,
            encryption_size: 16,
            ediv: 0x1234,
            random: 0x0102_0304_0506_0708,
            value: [fill; 16],
        }
    }

    pub(crate) fn identity_key(address: BluetoothAddress, fill: u8) -> IdentityKey {
        IdentityKey {
            address,
            address_type: AddressType::LePublic,
            value: [fill; 16],
        }
    }
}
