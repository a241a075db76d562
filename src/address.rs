use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::BluetoothError;

/// A Bluetooth Device Address (`BD_ADDR`) in display order (most significant byte first)
///
/// The kernel channels carry addresses little-endian; use [`BluetoothAddress::from_le_bytes`]
/// and [`BluetoothAddress::to_le_bytes`] at the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Build an address from its little-endian wire representation
    #[must_use]
    pub const fn from_le_bytes(wire: [u8; 6]) -> Self {
        Self([wire[5], wire[4], wire[3], wire[2], wire[1], wire[0]])
    }

    /// Little-endian wire representation
    #[must_use]
    pub const fn to_le_bytes(&self) -> [u8; 6] {
        let a = self.0;
        [a[5], a[4], a[3], a[2], a[1], a[0]]
    }

    /// All-zero and all-ones addresses never identify a real device
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0 != [0u8; 6] && self.0 != [0xFFu8; 6]
    }

    /// Format the address as a colon-separated hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";

        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            result.push(char::from(HEX[(byte >> 4) as usize])).ok();
            result.push(char::from(HEX[(byte & 0x0F) as usize])).ok();
        }
        result
    }

    /// Parse a Bluetooth address from a colon-separated hex string
    ///
    /// # Errors
    /// Returns [`BluetoothError::InvalidParameter`] if the string is not exactly
    /// six colon-separated hex octets
    pub fn from_hex(hex: &str) -> Result<Self, BluetoothError> {
        if hex.len() != 17 || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(BluetoothError::InvalidParameter);
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in hex.split(':').enumerate() {
            if i >= 6 || byte.len() != 2 {
                return Err(BluetoothError::InvalidParameter);
            }
            bytes[i] =
                u8::from_str_radix(byte, 16).map_err(|_| BluetoothError::InvalidParameter)?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_hex())
    }
}

impl FromStr for BluetoothAddress {
    type Err = BluetoothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 6]> for BluetoothAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; 6] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = BluetoothError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        BluetoothAddress::from_hex(hex)
    }
}

impl Serialize for BluetoothAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format_hex())
    }
}

impl<'de> Deserialize<'de> for BluetoothAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

/// Address type as the management channel encodes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AddressType {
    /// Classic BR/EDR
    #[serde(rename = "bredr")]
    BrEdr = 0x00,
    /// LE public
    LePublic = 0x01,
    /// LE random (static or resolvable)
    LeRandom = 0x02,
}

impl AddressType {
    /// Decode the management-channel encoding
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::BrEdr),
            0x01 => Some(Self::LePublic),
            0x02 => Some(Self::LeRandom),
            _ => None,
        }
    }

    /// Decode the LE controller encoding used by raw HCI events (0 public, 1 random)
    #[must_use]
    pub const fn from_le_raw(raw: u8) -> Self {
        if raw & 0x01 == 0 {
            Self::LePublic
        } else {
            Self::LeRandom
        }
    }

    /// Management-channel encoding
    #[must_use]
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// LE controller encoding, `None` for classic
    #[must_use]
    pub const fn le_raw(self) -> Option<u8> {
        match self {
            Self::BrEdr => None,
            Self::LePublic => Some(0x00),
            Self::LeRandom => Some(0x01),
        }
    }

    /// True for both LE variants
    #[must_use]
    pub const fn is_low_energy(self) -> bool {
        !matches!(self, Self::BrEdr)
    }

    /// True for classic and LE public addresses
    #[must_use]
    pub const fn is_public(self) -> bool {
        !matches!(self, Self::LeRandom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bluetooth_address_format_hex() {
        let addr = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        assert_eq!(addr.format_hex().as_str(), "12:34:56:78:9A:BC");
        assert_eq!(addr.to_string(), "12:34:56:78:9A:BC");

        let addr_mixed = BluetoothAddress::new([0x0A, 0xB1, 0x2C, 0xD3, 0x4E, 0xF5]);
        assert_eq!(addr_mixed.format_hex().as_str(), "0A:B1:2C:D3:4E:F5");
    }

    #[test]
    fn test_bluetooth_address_parse() {
        let addr: BluetoothAddress = "12:34:56:78:9a:bc".parse().unwrap();
        assert_eq!(addr.as_bytes(), &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

        assert!(BluetoothAddress::from_hex("12:34:56:78:9A").is_err());
        assert!(BluetoothAddress::from_hex("12:34:56:78:9A:BG").is_err());
        assert!(BluetoothAddress::from_hex("1234:56:78:9A:BC:").is_err());
    }

    #[test]
    fn test_bluetooth_address_wire_order() {
        let wire = [0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12];
        let addr = BluetoothAddress::from_le_bytes(wire);
        assert_eq!(addr.format_hex().as_str(), "12:34:56:78:9A:BC");
        assert_eq!(addr.to_le_bytes(), wire);
    }

    #[test]
    fn test_bluetooth_address_validity() {
        assert!(!BluetoothAddress::new([0; 6]).is_valid());
        assert!(!BluetoothAddress::new([0xFF; 6]).is_valid());
        assert!(BluetoothAddress::new([0, 0, 0, 0, 0, 1]).is_valid());
    }

    #[test]
    fn test_bluetooth_address_serde() {
        let addr = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"12:34:56:78:9A:BC\"");
        let back: BluetoothAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<BluetoothAddress>("\"nonsense\"").is_err());
    }

    #[test]
    fn test_address_type_encodings() {
        assert_eq!(AddressType::from_raw(0), Some(AddressType::BrEdr));
        assert_eq!(AddressType::from_raw(2), Some(AddressType::LeRandom));
        assert_eq!(AddressType::from_raw(3), None);
        assert_eq!(AddressType::from_le_raw(0), AddressType::LePublic);
        assert_eq!(AddressType::from_le_raw(1), AddressType::LeRandom);
        assert_eq!(AddressType::LeRandom.le_raw(), Some(1));
        assert_eq!(AddressType::BrEdr.le_raw(), None);
        assert!(AddressType::LePublic.is_low_energy());
        assert!(AddressType::LePublic.is_public());
        assert!(!AddressType::LeRandom.is_public());
        assert_eq!(
            serde_json::to_string(&AddressType::BrEdr).unwrap(),
            "\"bredr\""
        );
        assert_eq!(
            serde_json::to_string(&AddressType::LePublic).unwrap(),
            "\"le_public\""
        );
    }
}
