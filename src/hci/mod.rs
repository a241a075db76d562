//! Raw HCI event channel
//!
//! The controller reads link-controller events from this channel and issues a
//! small set of commands on it: inquiry, connection setup and teardown,
//! remote name requests and LE scanning. Pairing and key management go over
//! the management channel instead (see [`crate::mgmt`]).

pub mod advertising;
pub mod command;
pub mod event;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::BluetoothError;
use crate::exchange::CommandExchange;
use crate::transport::Transport;

pub use advertising::{AdvertisingData, Uuid};
pub use command::HciCommand;
pub use event::{AdvertisingReport, HciEvent, InquiryResponse};

/// Raw channel wrapper: command exchange plus open/closed state
pub struct HciChannel<T: Transport> {
    transport: T,
    open: AtomicBool,
    exchange: CommandExchange<u8>,
}

impl<T: Transport> HciChannel<T> {
    /// Wrap a transport; the channel starts closed
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            open: AtomicBool::new(false),
            exchange: CommandExchange::new(),
        }
    }

    /// Start accepting events and commands
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Stop accepting events and commands
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether the channel is open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a command and wait for its Command Status or Command Complete
    ///
    /// Commands that complete asynchronously (connect, inquiry, remote name)
    /// return as soon as the controller accepted them.
    ///
    /// # Errors
    /// [`BluetoothError::ChannelClosed`] when closed, a transport or timeout error,
    /// or [`BluetoothError::CommandFailed`] carrying a non-zero controller status.
    pub async fn execute(&self, command: &HciCommand) -> Result<(), BluetoothError> {
        if !self.is_open() {
            return Err(BluetoothError::ChannelClosed);
        }

        let opcode = command.opcode();
        let status = self
            .exchange
            .exchange(&self.transport, opcode, &command.encode())
            .await?;

        match status {
            0x00 => Ok(()),
            // ACL connection already exists
            0x0B => Err(BluetoothError::AlreadyDone),
            status => Err(BluetoothError::CommandFailed { opcode, status }),
        }
    }

    /// Route a command completion to a waiting [`HciChannel::execute`]
    pub(crate) fn complete(&self, opcode: u16, status: u8) -> bool {
        self.exchange.complete(opcode, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use embassy_futures::block_on;
    use embassy_futures::join::join;

    #[test]
    fn test_execute_requires_open_channel() {
        let channel = HciChannel::new(MockTransport::silent());
        let result = block_on(channel.execute(&HciCommand::inquiry_cancel()));
        assert_eq!(result, Err(BluetoothError::ChannelClosed));
        assert!(channel.transport().written().is_empty());
    }

    #[test]
    fn test_execute_matches_completion_by_opcode() {
        let channel = HciChannel::new(MockTransport::silent());
        channel.open();

        let (result, ()) = block_on(join(
            channel.execute(&HciCommand::disconnect(0x0040, 0x13)),
            async {
                // completion for an unrelated opcode is not consumed
                while channel.transport().written().is_empty() {
                    embassy_futures::yield_now().await;
                }
                assert!(!channel.complete(command::opcode::INQUIRY, 0));
                assert!(channel.complete(command::opcode::DISCONNECT, 0x0C));
            },
        ));

        assert_eq!(
            result,
            Err(BluetoothError::CommandFailed {
                opcode: command::opcode::DISCONNECT,
                status: 0x0C
            })
        );
        let written = channel.transport().written();
        assert_eq!(written[0][..3], [0x01, 0x06, 0x04]);
    }
}
