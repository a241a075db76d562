//! Class of Device (`CoD`)
//!
//! The 24-bit field packs, from the most significant bit down:
//! - Major Service Classes (bits 23-13)
//! - Major Device Class (bits 12-8)
//! - Minor Device Class (bits 7-2)
//! - Format Type (bits 1-0, always 0b00)
//!
//! It reaches the controller three ways: inquiry results, the class EIR/AD
//! structure, and persisted device records. The adapter's own class is
//! configured from the major/minor pair.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Class of Device indicating device type and offered services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassOfDevice {
    raw: u32,
}

impl ClassOfDevice {
    /// Create a `ClassOfDevice` from raw 24-bit value
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self {
            raw: raw & 0xFF_FFFF,
        }
    }

    /// Compose a class from its major and minor device class, without service bits
    #[must_use]
    pub const fn from_parts(major: u8, minor: u8) -> Self {
        Self::from_raw((((major & 0x1F) as u32) << 8) | (((minor & 0x3F) as u32) << 2))
    }

    /// Decode the 3-byte little-endian wire form
    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; 3]) -> Self {
        Self::from_raw(bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16)
    }

    /// 3-byte little-endian wire form
    #[must_use]
    pub const fn to_le_bytes(&self) -> [u8; 3] {
        [
            (self.raw & 0xFF) as u8,
            ((self.raw >> 8) & 0xFF) as u8,
            ((self.raw >> 16) & 0xFF) as u8,
        ]
    }

    /// Get the raw 24-bit value
    #[must_use]
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// Get the Major Device Class (bits 12-8)
    #[must_use]
    pub const fn major_device_class(&self) -> MajorDeviceClass {
        MajorDeviceClass::from_raw(((self.raw >> 8) & 0x1F) as u8)
    }

    /// Get the Minor Device Class (bits 7-2)
    #[must_use]
    pub const fn minor_device_class(&self) -> u8 {
        ((self.raw >> 2) & 0x3F) as u8
    }

    /// Get the Major Service Classes (bits 23-13)
    #[must_use]
    pub const fn major_service_classes(&self) -> u16 {
        ((self.raw >> 13) & 0x7FF) as u16
    }

    /// Whether a major service class bit is set
    #[must_use]
    pub const fn has_service(&self, service: ServiceClass) -> bool {
        self.major_service_classes() & (service as u16) != 0
    }
}

impl fmt::Display for ClassOfDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (minor 0x{:02X})",
            self.major_device_class().description(),
            self.minor_device_class()
        )?;
        let mut first = true;
        for service in ServiceClass::ALL {
            if self.has_service(service) {
                f.write_str(if first { " - Services: " } else { ", " })?;
                f.write_str(service.description())?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Major Device Class enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorDeviceClass {
    /// Miscellaneous devices
    Miscellaneous,
    /// Computer devices (desktop, server, laptop, etc.)
    Computer,
    /// Phone devices (cellular, cordless, smartphone, etc.)
    Phone,
    /// LAN/Network Access Point devices
    LanNetworkAccessPoint,
    /// Audio/Video devices (headphones, speakers, microphones, etc.)
    AudioVideo,
    /// Peripheral devices (keyboard, mouse, remote control, etc.)
    Peripheral,
    /// Imaging devices (display, camera, scanner, printer)
    Imaging,
    /// Wearable devices
    Wearable,
    /// Toy devices
    Toy,
    /// Health devices
    Health,
    /// Uncategorized devices
    Uncategorized,
    /// Reserved or unknown device class
    Reserved(u8),
}

impl MajorDeviceClass {
    /// Create `MajorDeviceClass` from raw 5-bit value
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Self::Miscellaneous,
            0x01 => Self::Computer,
            0x02 => Self::Phone,
            0x03 => Self::LanNetworkAccessPoint,
            0x04 => Self::AudioVideo,
            0x05 => Self::Peripheral,
            0x06 => Self::Imaging,
            0x07 => Self::Wearable,
            0x08 => Self::Toy,
            0x09 => Self::Health,
            0x1F => Self::Uncategorized,
            other => Self::Reserved(other),
        }
    }

    /// Raw 5-bit value
    #[must_use]
    pub const fn raw(&self) -> u8 {
        match self {
            Self::Miscellaneous => 0x00,
            Self::Computer => 0x01,
            Self::Phone => 0x02,
            Self::LanNetworkAccessPoint => 0x03,
            Self::AudioVideo => 0x04,
            Self::Peripheral => 0x05,
            Self::Imaging => 0x06,
            Self::Wearable => 0x07,
            Self::Toy => 0x08,
            Self::Health => 0x09,
            Self::Uncategorized => 0x1F,
            Self::Reserved(other) => *other & 0x1F,
        }
    }

    /// Get human-readable description
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Miscellaneous => "Miscellaneous",
            Self::Computer => "Computer",
            Self::Phone => "Phone",
            Self::LanNetworkAccessPoint => "LAN/Network Access Point",
            Self::AudioVideo => "Audio/Video",
            Self::Peripheral => "Peripheral",
            Self::Imaging => "Imaging",
            Self::Wearable => "Wearable",
            Self::Toy => "Toy",
            Self::Health => "Health",
            Self::Uncategorized => "Uncategorized",
            Self::Reserved(_) => "Reserved",
        }
    }
}

/// Major Service Class bits, relative to bit 13 of the class field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ServiceClass {
    /// Limited Discoverable Mode
    LimitedDiscoverable = 0x001,
    /// LE Audio
    LeAudio = 0x002,
    /// Positioning (location identification)
    Positioning = 0x008,
    /// Networking (LAN, ad hoc)
    Networking = 0x010,
    /// Rendering (printing, speakers)
    Rendering = 0x020,
    /// Capturing (scanner, microphone)
    Capturing = 0x040,
    /// Object Transfer
    ObjectTransfer = 0x080,
    /// Audio (speaker, microphone, headset service)
    Audio = 0x100,
    /// Telephony (cordless telephony, modem, headset service)
    Telephony = 0x200,
    /// Information (web server, WAP server)
    Information = 0x400,
}

impl ServiceClass {
    const ALL: [Self; 10] = [
        Self::LimitedDiscoverable,
        Self::LeAudio,
        Self::Positioning,
        Self::Networking,
        Self::Rendering,
        Self::Capturing,
        Self::ObjectTransfer,
        Self::Audio,
        Self::Telephony,
        Self::Information,
    ];

    /// Get human-readable description
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::LimitedDiscoverable => "Limited Discoverable",
            Self::LeAudio => "LE Audio",
            Self::Positioning => "Positioning",
            Self::Networking => "Networking",
            Self::Rendering => "Rendering",
            Self::Capturing => "Capturing",
            Self::ObjectTransfer => "Object Transfer",
            Self::Audio => "Audio",
            Self::Telephony => "Telephony",
            Self::Information => "Information",
        }
    }
}
