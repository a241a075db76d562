//! Kernel channel transport abstraction
//!
//! The controller talks to two kernel channels: the raw HCI event channel and
//! the management channel. Each is handed in as a [`Transport`] that moves
//! whole frames. On Linux these are `AF_BLUETOOTH` sockets bound to
//! `HCI_CHANNEL_RAW` and `HCI_CHANNEL_CONTROL`; tests substitute an in-memory
//! double.

use core::fmt::Debug;

/// Frame-oriented kernel channel
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Transport-specific failure
    type Error: Debug;

    /// Wait for the next complete frame and copy it into `rx`, returning its length
    async fn read(&self, rx: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write one complete frame
    async fn write(&self, frame: &[u8]) -> Result<(), Self::Error>;
}
