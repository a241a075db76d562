//! EIR / AD structure parsing
//!
//! Extended inquiry responses and LE advertising reports share one layout: a
//! sequence of `length | type | data[length - 1]` structures. A zero length
//! ends the significant part; a structure running past the end of the buffer
//! is dropped along with anything after it.

use core::fmt;

use crate::ClassOfDevice;

const AD_FLAGS: u8 = 0x01;
const AD_UUID16_INCOMPLETE: u8 = 0x02;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_UUID32_INCOMPLETE: u8 = 0x04;
const AD_UUID32_COMPLETE: u8 = 0x05;
const AD_UUID128_INCOMPLETE: u8 = 0x06;
const AD_UUID128_COMPLETE: u8 = 0x07;
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_TX_POWER: u8 = 0x0A;
const AD_CLASS_OF_DEVICE: u8 = 0x0D;

/// Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`, little-endian
const BASE_UUID: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Service identifier as advertised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uuid {
    /// 16-bit alias of the base UUID
    Short(u16),
    /// 32-bit alias of the base UUID
    Medium(u32),
    /// Full 128-bit UUID, little-endian as on the wire
    Long([u8; 16]),
}

impl Uuid {
    /// Expand to the full little-endian 128-bit form
    #[must_use]
    pub fn to_le_bytes(&self) -> [u8; 16] {
        match *self {
            Self::Short(value) => Self::Medium(u32::from(value)).to_le_bytes(),
            Self::Medium(value) => {
                let mut full = BASE_UUID;
                full[12..16].copy_from_slice(&value.to_le_bytes());
                full
            }
            Self::Long(full) => full,
        }
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut be = self.to_le_bytes();
        be.reverse();
        for (i, byte) in be.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Fields of interest extracted from an EIR/AD payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertisingData {
    /// Discoverability flags
    pub flags: Option<u8>,
    /// Complete local name
    pub complete_name: Option<String>,
    /// Shortened local name
    pub short_name: Option<String>,
    /// Class of device (classic EIR only, but LE peripherals sometimes send it)
    pub class: Option<ClassOfDevice>,
    /// Transmit power level in dBm
    pub tx_power: Option<i8>,
    /// Advertised service identifiers, in order of appearance
    pub uuids: Vec<Uuid>,
}

impl AdvertisingData {
    /// Parse a payload; never fails, malformed tails are ignored
    #[must_use]
    pub fn parse(mut data: &[u8]) -> Self {
        let mut parsed = Self::default();

        while let Some((&length, rest)) = data.split_first() {
            let length = usize::from(length);
            if length == 0 || length > rest.len() {
                break;
            }
            let (structure, tail) = rest.split_at(length);
            parsed.apply(structure[0], &structure[1..]);
            data = tail;
        }

        parsed
    }

    /// Best name available: complete, else shortened
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.complete_name
            .as_deref()
            .or(self.short_name.as_deref())
    }

    /// True when nothing useful was found
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(&mut self, ad_type: u8, value: &[u8]) {
        match ad_type {
            AD_FLAGS => self.flags = value.first().copied(),
            AD_UUID16_INCOMPLETE | AD_UUID16_COMPLETE => self.uuids.extend(
                value
                    .chunks_exact(2)
                    .map(|c| Uuid::Short(u16::from_le_bytes([c[0], c[1]]))),
            ),
            AD_UUID32_INCOMPLETE | AD_UUID32_COMPLETE => {
                self.uuids.extend(
                    value
                        .chunks_exact(4)
                        .map(|c| Uuid::Medium(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))),
                );
            }
            AD_UUID128_INCOMPLETE | AD_UUID128_COMPLETE => {
                for chunk in value.chunks_exact(16) {
                    let mut full = [0u8; 16];
                    full.copy_from_slice(chunk);
                    self.uuids.push(Uuid::Long(full));
                }
            }
            AD_SHORT_NAME => self.short_name = decode_name(value),
            AD_COMPLETE_NAME => self.complete_name = decode_name(value),
            AD_TX_POWER => self.tx_power = value.first().map(|b| i8::from_le_bytes([*b])),
            AD_CLASS_OF_DEVICE => {
                if let [a, b, c, ..] = value {
                    self.class = Some(ClassOfDevice::from_le_bytes([*a, *b, *c]));
                }
            }
            _ => log::trace!("[EIR] skipping AD type 0x{ad_type:02X}"),
        }
    }
}

fn decode_name(value: &[u8]) -> Option<String> {
    let end = value.iter().position(|b| *b == 0).unwrap_or(value.len());
    let name = String::from_utf8_lossy(&value[..end]).into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_and_uuids() {
        let data = [
            0x02, 0x01, 0x06, // flags
            0x05, 0x09, b'R', b'C', b'U', b'1', // complete name
            0x05, 0x03, 0x12, 0x18, 0x0F, 0x18, // 16-bit UUIDs 0x1812, 0x180F
        ];
        let parsed = AdvertisingData::parse(&data);
        assert_eq!(parsed.flags, Some(0x06));
        assert_eq!(parsed.name(), Some("RCU1"));
        assert_eq!(parsed.uuids, vec![Uuid::Short(0x1812), Uuid::Short(0x180F)]);
    }

    #[test]
    fn test_complete_name_wins_over_short() {
        let data = [
            0x03, 0x08, b'R', b'C', // short
            0x07, 0x09, b'R', b'e', b'm', b'o', b't', b'e', // complete
        ];
        let parsed = AdvertisingData::parse(&data);
        assert_eq!(parsed.short_name.as_deref(), Some("RC"));
        assert_eq!(parsed.name(), Some("Remote"));
    }

    #[test]
    fn test_class_and_tx_power() {
        let data = [0x04, 0x0D, 0x0C, 0x05, 0x00, 0x02, 0x0A, 0xF6];
        let parsed = AdvertisingData::parse(&data);
        assert_eq!(parsed.class, Some(ClassOfDevice::from_raw(0x00_050C)));
        assert_eq!(parsed.tx_power, Some(-10));
    }

    #[test]
    fn test_truncated_structure_is_dropped() {
        // second structure claims 9 bytes but only 2 follow
        let data = [0x02, 0x01, 0x06, 0x09, 0x09, b'X', b'Y'];
        let parsed = AdvertisingData::parse(&data);
        assert_eq!(parsed.flags, Some(0x06));
        assert_eq!(parsed.name(), None);
    }

    #[test]
    fn test_zero_length_terminates_padding() {
        let mut eir = [0u8; 240];
        eir[..4].copy_from_slice(&[0x03, 0x09, b'H', b'i']);
        let parsed = AdvertisingData::parse(&eir);
        assert_eq!(parsed.name(), Some("Hi"));
        assert!(AdvertisingData::parse(&[0u8; 32]).is_empty());
    }

    #[test]
    fn test_uuid_display() {
        assert_eq!(
            Uuid::Short(0x180F).to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        let long = Uuid::Long([
            0x10, 0x0F, 0x0E, 0x0D, 0x0C, 0x0B, 0x0A, 0x09, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03,
            0x02, 0x01,
        ]);
        assert_eq!(long.to_string(), "01020304-0506-0708-090a-0b0c0d0e0f10");
    }
}
