//! Adapter administration over the management channel
//!
//! The [`Administrator`] owns the management channel of one controller index.
//! It powers the adapter, toggles its features, injects stored keys and
//! drives pairing. Every call except [`Administrator::pair`] is a
//! request/response exchange bounded by `MAX_ACTION_TIMEOUT`.

pub mod command;
pub mod event;

use core::fmt;
use core::sync::atomic::{AtomicU16, Ordering};

use serde::Serialize;

use crate::codec::{Reader, printable_name};
use crate::constants::{MAX_NAME_LENGTH, MAX_SHORT_NAME_LENGTH, MGMT_INDEX_NONE};
use crate::exchange::CommandExchange;
use crate::keys::{IdentityKeys, LinkKeys, LongTermKeys};
use crate::transport::Transport;
use crate::{AddressType, BluetoothAddress, BluetoothError, ClassOfDevice};

pub use command::{AutoConnectMode, Capability, MgmtCommand, opcode};
pub use event::{MgmtEvent, MgmtFrame};

/// Management status codes the controller reacts to
pub mod status {
    /// Success
    pub const SUCCESS: u8 = 0x00;
    /// Already connected
    pub const ALREADY_CONNECTED: u8 = 0x09;
    /// Busy
    pub const BUSY: u8 = 0x0A;
    /// Not supported
    pub const NOT_SUPPORTED: u8 = 0x0C;
    /// Not powered
    pub const NOT_POWERED: u8 = 0x0F;
    /// Invalid index
    pub const INVALID_INDEX: u8 = 0x11;
    /// RF killed
    pub const RFKILLED: u8 = 0x12;
    /// Already paired
    pub const ALREADY_PAIRED: u8 = 0x13;
}

/// Map a non-zero management status onto the error vocabulary
#[must_use]
pub fn status_error(opcode: u16, code: u8) -> BluetoothError {
    match code {
        status::ALREADY_CONNECTED | status::ALREADY_PAIRED => BluetoothError::AlreadyDone,
        status::BUSY => BluetoothError::InProgress,
        status::NOT_SUPPORTED | status::NOT_POWERED | status::INVALID_INDEX | status::RFKILLED => {
            BluetoothError::Unavailable
        }
        status => BluetoothError::CommandFailed { opcode, status },
    }
}

/// Adapter settings bitset (current or supported)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Settings(pub u32);

macro_rules! settings_bits {
    ($($(#[$doc:meta])* $name:ident = $bit:expr, $label:literal;)*) => {
        impl Settings {
            $(
                $(#[$doc])*
                #[must_use]
                pub const fn $name(&self) -> bool {
                    self.0 & (1 << $bit) != 0
                }
            )*

            /// Every named setting with its state
            #[must_use]
            pub fn named(&self) -> Vec<(&'static str, bool)> {
                vec![$(($label, self.$name())),*]
            }
        }
    };
}

settings_bits! {
    /// Powered
    powered = 0, "powered";
    /// Connectable
    connectable = 1, "connectable";
    /// Fast connectable
    fast_connectable = 2, "fast_connectable";
    /// Discoverable
    discoverable = 3, "discoverable";
    /// Bondable
    bondable = 4, "bondable";
    /// Link level security
    link_security = 5, "link_security";
    /// Secure simple pairing
    simple_pairing = 6, "simple_pairing";
    /// BR/EDR
    bredr = 7, "bredr";
    /// High speed
    high_speed = 8, "high_speed";
    /// Low energy
    low_energy = 9, "low_energy";
    /// Advertising
    advertising = 10, "advertising";
    /// Secure connections
    secure_connection = 11, "secure_connection";
    /// Debug keys
    debug_keys = 12, "debug_keys";
    /// Privacy
    privacy = 13, "privacy";
    /// Needs configuration
    configuration = 14, "configuration";
    /// Static address
    static_address = 15, "static_address";
}

/// Controller information returned by Read Controller Information
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AdapterInfo {
    /// Controller index
    pub index: u16,
    /// Local address
    pub address: BluetoothAddress,
    /// Bluetooth version
    pub version: u8,
    /// Manufacturer id
    pub manufacturer: u16,
    /// Settings the controller supports
    pub supported: Settings,
    /// Settings currently enabled
    pub current: Settings,
    /// Device class
    pub class: ClassOfDevice,
    /// Full local name
    pub name: String,
    /// Short local name
    pub short_name: String,
}

impl AdapterInfo {
    fn decode(index: u16, data: &[u8]) -> Result<Self, BluetoothError> {
        let mut r = Reader::new(data);
        Ok(Self {
            index,
            address: r.address()?,
            version: r.u8()?,
            manufacturer: r.u16()?,
            supported: Settings(r.u32()?),
            current: Settings(r.u32()?),
            class: r.class()?,
            name: printable_name(r.bytes(MAX_NAME_LENGTH + 1)?).unwrap_or_default(),
            short_name: printable_name(r.bytes(MAX_SHORT_NAME_LENGTH + 1)?).unwrap_or_default(),
        })
    }
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hci{} {} v{} mfr 0x{:04X} \"{}\"",
            self.index, self.address, self.version, self.manufacturer, self.name
        )
    }
}

/// Completion carried back from the management read loop
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    status: u8,
    data: Vec<u8>,
}

/// Management channel client for one controller index
pub struct Administrator<T: Transport> {
    transport: T,
    index: AtomicU16,
    exchange: CommandExchange<Completion>,
}

impl<T: Transport> Administrator<T> {
    /// Wrap a management transport; the administrator starts closed
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            index: AtomicU16::new(MGMT_INDEX_NONE),
            exchange: CommandExchange::new(),
        }
    }

    /// Bind to controller `index`
    ///
    /// # Errors
    /// [`BluetoothError::InvalidParameter`] for the reserved "no index" value.
    pub fn open(&self, index: u16) -> Result<(), BluetoothError> {
        if index == MGMT_INDEX_NONE {
            return Err(BluetoothError::InvalidParameter);
        }
        self.index.store(index, Ordering::Release);
        log::debug!("[MGMT] Opened controller index {index}");
        Ok(())
    }

    /// Release the controller index
    pub fn close(&self) {
        self.index.store(MGMT_INDEX_NONE, Ordering::Release);
    }

    /// Whether a controller index is bound
    pub fn is_open(&self) -> bool {
        self.index() != MGMT_INDEX_NONE
    }

    /// Bound controller index, `MGMT_INDEX_NONE` when closed
    pub fn index(&self) -> u16 {
        self.index.load(Ordering::Acquire)
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    /// Route a Command Complete / Command Status to the waiting exchange
    pub(crate) fn complete(&self, opcode: u16, status: u8, data: Vec<u8>) -> bool {
        self.exchange.complete(opcode, Completion { status, data })
    }

    fn checked_index(&self) -> Result<u16, BluetoothError> {
        match self.index() {
            MGMT_INDEX_NONE => Err(BluetoothError::ChannelClosed),
            index => Ok(index),
        }
    }

    async fn execute(&self, command: MgmtCommand) -> Result<Vec<u8>, BluetoothError> {
        let opcode = command.opcode();
        let completion = self
            .exchange
            .exchange(&self.transport, opcode, &command.encode())
            .await?;

        match completion.status {
            status::SUCCESS => Ok(completion.data),
            code => {
                log::debug!("[MGMT] Command 0x{opcode:04X} failed with status 0x{code:02X}");
                Err(status_error(opcode, code))
            }
        }
    }

    async fn toggle(&self, opcode: u16, enable: bool) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::mode(opcode, index, enable))
            .await
            .map(drop)
    }

    /// Power the adapter on or off
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn power(&self, enable: bool) -> Result<(), BluetoothError> {
        self.toggle(opcode::SET_POWERED, enable).await
    }

    /// Secure simple pairing
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn simple_pairing(&self, enable: bool) -> Result<(), BluetoothError> {
        self.toggle(opcode::SET_SSP, enable).await
    }

    /// Link level security
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn secure_link(&self, enable: bool) -> Result<(), BluetoothError> {
        self.toggle(opcode::SET_LINK_SECURITY, enable).await
    }

    /// Accept incoming connections
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn connectable(&self, enable: bool) -> Result<(), BluetoothError> {
        self.toggle(opcode::SET_CONNECTABLE, enable).await
    }

    /// Allow bonding
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn bondable(&self, enable: bool) -> Result<(), BluetoothError> {
        self.toggle(opcode::SET_BONDABLE, enable).await
    }

    /// Low energy support
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn low_energy(&self, enable: bool) -> Result<(), BluetoothError> {
        self.toggle(opcode::SET_LE, enable).await
    }

    /// Secure connections
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn secure_connection(&self, enable: bool) -> Result<(), BluetoothError> {
        self.toggle(opcode::SET_SECURE_CONN, enable).await
    }

    /// LE privacy mode, with the local IRK when enabling
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn privacy(&self, mode: u8, irk: Option<&[u8; 16]>) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::privacy(index, mode, irk))
            .await
            .map(drop)
    }

    /// Set the short and full local name
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn name(&self, short_name: &str, name: &str) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::local_name(index, short_name, name))
            .await
            .map(drop)
    }

    /// Set the major and minor device class
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn device_class(&self, major: u8, minor: u8) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::device_class(index, major, minor))
            .await
            .map(drop)
    }

    /// Override the public address; only accepted while powered off
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn public_address(&self, address: BluetoothAddress) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::public_address(index, address))
            .await
            .map(drop)
    }

    /// Replace the kernel link key cache
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn load_link_keys(&self, keys: &LinkKeys) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::load_link_keys(index, keys))
            .await
            .map(drop)
    }

    /// Replace the kernel long term key cache
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn load_long_term_keys(&self, keys: &LongTermKeys) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::load_keys(opcode::LOAD_LONG_TERM_KEYS, index, keys))
            .await
            .map(drop)
    }

    /// Replace the kernel identity resolving key cache
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn load_identity_keys(&self, keys: &IdentityKeys) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::load_keys(opcode::LOAD_IRKS, index, keys))
            .await
            .map(drop)
    }

    /// Start pairing without waiting for the outcome
    ///
    /// The kernel answers with a Pair Device command complete once pairing
    /// finishes, which the dispatcher routes to the pairing device.
    ///
    /// # Errors
    /// [`BluetoothError::ChannelClosed`] or a transport error.
    pub async fn pair(
        &self,
        address: BluetoothAddress,
        kind: AddressType,
        capability: Capability,
    ) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        let command = MgmtCommand::pair(index, address, kind, capability);
        self.transport
            .write(&command.encode())
            .await
            .map_err(|e| BluetoothError::Transport(format!("{e:?}")))
    }

    /// Cancel an ongoing pairing
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn pair_abort(
        &self,
        address: BluetoothAddress,
        kind: AddressType,
    ) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::address(
            opcode::CANCEL_PAIR_DEVICE,
            index,
            address,
            kind,
        ))
        .await
        .map(drop)
    }

    /// Drop the bond and disconnect
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn unpair(
        &self,
        address: BluetoothAddress,
        kind: AddressType,
    ) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::unpair(index, address, kind))
            .await
            .map(drop)
    }

    /// Add a device to the auto-connect whitelist
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn add_device(
        &self,
        address: BluetoothAddress,
        kind: AddressType,
        mode: AutoConnectMode,
    ) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::add_device(index, address, kind, mode))
            .await
            .map(drop)
    }

    /// Remove a device from the auto-connect whitelist
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn remove_device(
        &self,
        address: BluetoothAddress,
        kind: AddressType,
    ) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        self.execute(MgmtCommand::address(
            opcode::REMOVE_DEVICE,
            index,
            address,
            kind,
        ))
        .await
        .map(drop)
    }

    /// Answer a PIN code request; `None` rejects it
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn user_pin_code_reply(
        &self,
        address: BluetoothAddress,
        kind: AddressType,
        pin: Option<&str>,
    ) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        let command = match pin {
            Some(pin) => MgmtCommand::pin_code(index, address, kind, pin),
            None => MgmtCommand::address(opcode::PIN_CODE_NEG_REPLY, index, address, kind),
        };
        self.execute(command).await.map(drop)
    }

    /// Answer a passkey request; `None` rejects it
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn user_passkey_reply(
        &self,
        address: BluetoothAddress,
        kind: AddressType,
        passkey: Option<u32>,
    ) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        let command = match passkey {
            Some(passkey) => MgmtCommand::passkey(index, address, kind, passkey),
            None => MgmtCommand::address(opcode::USER_PASSKEY_NEG_REPLY, index, address, kind),
        };
        self.execute(command).await.map(drop)
    }

    /// Accept or reject a numeric comparison
    ///
    /// # Errors
    /// Channel, timeout or status errors.
    pub async fn user_passkey_confirm_reply(
        &self,
        address: BluetoothAddress,
        kind: AddressType,
        accept: bool,
    ) -> Result<(), BluetoothError> {
        let index = self.checked_index()?;
        let opcode = if accept {
            opcode::USER_CONFIRM_REPLY
        } else {
            opcode::USER_CONFIRM_NEG_REPLY
        };
        self.execute(MgmtCommand::address(opcode, index, address, kind))
            .await
            .map(drop)
    }

    /// Read the controller information
    ///
    /// # Errors
    /// Channel, timeout or status errors, or a malformed response.
    pub async fn settings(&self) -> Result<AdapterInfo, BluetoothError> {
        let index = self.checked_index()?;
        let data = self
            .execute(MgmtCommand::new(opcode::READ_INFO, index, Vec::new()))
            .await?;
        AdapterInfo::decode(index, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, pump_mgmt, read_info};
    use embassy_futures::block_on;
    use embassy_futures::select::{Either, select};

    fn run<F: core::future::Future>(admin: &Administrator<MockTransport>, body: F) -> F::Output {
        match block_on(select(body, pump_mgmt(admin))) {
            Either::First(output) => output,
            Either::Second(never) => match never {},
        }
    }

    #[test]
    fn test_commands_require_open_index() {
        let admin = Administrator::new(MockTransport::mgmt());
        assert!(!admin.is_open());
        assert_eq!(
            run(&admin, admin.power(true)),
            Err(BluetoothError::ChannelClosed)
        );
        assert_eq!(admin.open(MGMT_INDEX_NONE), Err(BluetoothError::InvalidParameter));
    }

    #[test]
    fn test_power_sends_frame_for_bound_index() {
        let admin = Administrator::new(MockTransport::mgmt());
        admin.open(1).unwrap();

        assert_eq!(run(&admin, admin.power(true)), Ok(()));
        let written = admin.transport().written();
        assert_eq!(written, vec![vec![0x05, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01]]);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_error(opcode::PAIR_DEVICE, status::ALREADY_PAIRED), BluetoothError::AlreadyDone);
        assert_eq!(status_error(opcode::SET_POWERED, status::BUSY), BluetoothError::InProgress);
        assert_eq!(status_error(opcode::SET_POWERED, status::RFKILLED), BluetoothError::Unavailable);
        assert_eq!(
            status_error(opcode::SET_LE, 0x03),
            BluetoothError::CommandFailed {
                opcode: opcode::SET_LE,
                status: 0x03
            }
        );
    }

    #[test]
    fn test_failing_command_surfaces_status() {
        let admin = Administrator::new(MockTransport::mgmt_failing(opcode::SET_SSP, status::NOT_SUPPORTED));
        admin.open(0).unwrap();

        assert_eq!(run(&admin, admin.power(false)), Ok(()));
        assert_eq!(
            run(&admin, admin.simple_pairing(true)),
            Err(BluetoothError::Unavailable)
        );
    }

    #[test]
    fn test_pair_does_not_wait() {
        let admin = Administrator::new(MockTransport::silent());
        admin.open(0).unwrap();
        let address = BluetoothAddress::new([1, 2, 3, 4, 5, 6]);

        let result = block_on(admin.pair(address, AddressType::BrEdr, Capability::DisplayYesNo));
        assert_eq!(result, Ok(()));
        let written = admin.transport().written();
        assert_eq!(written[0][..2], opcode::PAIR_DEVICE.to_le_bytes());
        assert_eq!(written[0][13], Capability::DisplayYesNo as u8);
    }

    #[test]
    fn test_settings_decodes_read_info() {
        let admin = Administrator::new(MockTransport::mgmt());
        admin.open(0).unwrap();

        let info = run(&admin, admin.settings()).unwrap();
        let expected = read_info();
        assert_eq!(info.address, expected.address);
        assert_eq!(info.name, expected.name);
        assert_eq!(info.short_name, expected.short_name);
        assert!(info.current.powered());
        assert!(info.supported.low_energy());
        assert!(!info.current.privacy());
    }

    #[test]
    fn test_settings_named() {
        let settings = Settings(0b10_0000_0001);
        let named = settings.named();
        assert_eq!(named.len(), 16);
        assert!(named.contains(&("powered", true)));
        assert!(named.contains(&("low_energy", true)));
        assert!(named.contains(&("bondable", false)));
    }
}
