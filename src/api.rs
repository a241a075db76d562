//! Caller-facing result vocabulary
//!
//! Hosts that expose the controller over another interface (a CLI, an RPC
//! layer) usually only need to say whether a call worked and, if not, in
//! which broad way it failed. [`Status`] is that fixed vocabulary:
//!
//! ```rust
//! use btcontrol::BluetoothError;
//! use btcontrol::api::Status;
//!
//! let result: Result<(), BluetoothError> = Err(BluetoothError::AlreadyDone);
//! assert_eq!(Status::of(&result), Status::AlreadyDone);
//! ```

use core::fmt;

use serde::Serialize;

use crate::BluetoothError;

/// Outcome of a controller call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The call did what was asked
    Success,
    /// Another action is running on the device or adapter
    InProgress,
    /// Nothing to do
    AlreadyDone,
    /// No such device
    UnknownDevice,
    /// Adapter off, channel closed or feature missing
    Unavailable,
    /// Anything else
    GeneralFailure,
}

impl Status {
    /// Status of `result`
    #[must_use]
    pub fn of<T>(result: &Result<T, BluetoothError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::from(e),
        }
    }

    /// Whether this is [`Status::Success`]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<&BluetoothError> for Status {
    fn from(error: &BluetoothError) -> Self {
        match error {
            BluetoothError::InProgress => Self::InProgress,
            BluetoothError::AlreadyDone => Self::AlreadyDone,
            BluetoothError::UnknownDevice(_) => Self::UnknownDevice,
            BluetoothError::Unavailable | BluetoothError::ChannelClosed => Self::Unavailable,
            BluetoothError::BringUp { source, .. } => Self::from(source.as_ref()),
            _ => Self::GeneralFailure,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::InProgress => "in progress",
            Self::AlreadyDone => "already done",
            Self::UnknownDevice => "unknown device",
            Self::Unavailable => "unavailable",
            Self::GeneralFailure => "general failure",
        };
        f.write_str(text)
    }
}
