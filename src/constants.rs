//! `btcontrol` constants
//!
//! Limits, timeouts and default parameters shared by the channel wrappers,
//! the dispatcher and the job processors.

use embassy_time::Duration;

/// Upper bound for a single command exchange on either kernel channel
pub const MAX_ACTION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Extra time granted to a classic inquiry beyond its nominal length
pub const INQUIRY_GRACE: Duration = Duration::from_secs(2);

/// Default scan duration in seconds
pub const DEFAULT_SCAN_DURATION: u16 = 10;

/// Number of job processors started by [`crate::processor::run`]
pub const JOB_WORKERS: usize = 3;

/// Capacity of the background job queue
pub const JOB_QUEUE_DEPTH: usize = 32;

/// Read buffer size for the raw event channel (H4 type + header + 255 bytes)
pub const HCI_BUFFER_SIZE: usize = 258;

/// Read buffer size for the management channel
pub const MGMT_BUFFER_SIZE: usize = 1024;

/// Connection handles are 12 bits wide on the wire
pub const HANDLE_MASK: u16 = 0x0FFF;

/// Management index meaning "not bound to a controller"
pub const MGMT_INDEX_NONE: u16 = 0xFFFF;

/// Maximum device name length in bytes (HCI and management)
pub const MAX_NAME_LENGTH: usize = 248;

/// Maximum short name length in bytes, excluding the terminator
pub const MAX_SHORT_NAME_LENGTH: usize = 10;

/// Name reported for devices that have not told us theirs
pub const UNKNOWN_NAME: &str = "[unknown]";

/// Size of the remote feature mask
pub const FEATURES_LENGTH: usize = 8;

/// Extended inquiry response block carried by each inquiry record
pub const EIR_LENGTH: usize = 240;

/// General Inquiry Access Code, little-endian
pub const GIAC: [u8; 3] = [0x33, 0x8B, 0x9E];

/// Limited Inquiry Access Code, little-endian
pub const LIAC: [u8; 3] = [0x00, 0x8B, 0x9E];

/// Longest inquiry the controller accepts, in 1.28 s units
pub const MAX_INQUIRY_LENGTH: u8 = 0x30;

/// Unlimited number of inquiry responses
pub const UNLIMITED_RESPONSES: u8 = 0;

/// Packet types offered on classic connect (DM1, DM3, DM5, DH1, DH3, DH5)
pub const DEFAULT_PACKET_TYPES: u16 = 0xCC18;

/// Page scan repetition mode R2
pub const PAGE_SCAN_REPETITION_MODE_R2: u8 = 0x02;

/// Allow role switch during connection
pub const ALLOW_ROLE_SWITCH: u8 = 0x01;

/// LE scan interval and window (0.625 ms units)
pub const LE_SCAN_INTERVAL: u16 = 0x0010;
/// LE scan window (0.625 ms units)
pub const LE_SCAN_WINDOW: u16 = 0x0010;

/// LE create-connection scan interval and window (0.625 ms units)
pub const LE_CONNECT_SCAN_INTERVAL: u16 = 0x0004;
/// LE connection interval (1.25 ms units)
pub const LE_CONNECTION_INTERVAL: u16 = 0x000F;
/// LE supervision timeout (10 ms units)
pub const LE_SUPERVISION_TIMEOUT: u16 = 0x0C80;
/// LE minimum/maximum connection event length
pub const LE_CE_LENGTH: u16 = 0x0001;

/// Disconnect reason: remote user terminated connection
pub const REASON_REMOTE_USER_TERMINATED: u8 = 0x13;

/// File name suffix of persisted device records
pub const DEVICE_RECORD_SUFFIX: &str = ".device.json";

/// File name of the persisted controller record
pub const CONTROLLER_RECORD: &str = "controller.json";
