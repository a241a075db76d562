//! Deferred work
//!
//! Read loops never wait on a kernel exchange. Anything an event triggers
//! that needs one, or that calls into user code, is queued here and picked
//! up by a job processor.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::constants::JOB_QUEUE_DEPTH;
use crate::device::Device;
use crate::{BluetoothError, ScanRequest};

/// User input the peer is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRequest {
    /// Legacy PIN code
    PinCode,
    /// Six digit passkey
    Passkey,
    /// Numeric comparison of the given value
    PasskeyConfirm(u32),
}

/// Answer to a [`UserRequest`]; `None` / `false` rejects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserReply {
    /// PIN code
    PinCode(Option<String>),
    /// Passkey
    Passkey(Option<u32>),
    /// Numeric comparison verdict
    Confirm(bool),
}

/// Unit of deferred work
#[derive(Debug, Clone)]
pub enum Job {
    /// Run a scan to completion
    Scan(ScanRequest),
    /// Notify observers and the device callback that a device changed
    Update(Arc<Device>),
    /// Add the device to, or remove it from, the auto-connect whitelist
    AutoConnect {
        /// Target
        device: Arc<Device>,
        /// Add (`true`) or remove
        enable: bool,
    },
    /// Ask the peer for its name
    RemoteName(Arc<Device>),
    /// Hand a pairing prompt to the device callback
    UserRequest {
        /// Device being paired
        device: Arc<Device>,
        /// Prompt
        request: UserRequest,
    },
    /// Send a pairing answer to the kernel
    UserReply {
        /// Device being paired
        device: Arc<Device>,
        /// Answer
        reply: UserReply,
    },
}

/// Bounded multi-producer, multi-consumer job queue
pub struct JobQueue {
    channel: Channel<CriticalSectionRawMutex, Job, JOB_QUEUE_DEPTH>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Queue `job` without waiting
    ///
    /// # Errors
    /// [`BluetoothError::QueueFull`] when every slot is taken; the job is dropped.
    pub fn submit(&self, job: Job) -> Result<(), BluetoothError> {
        self.channel.try_send(job).map_err(|e| {
            let embassy_sync::channel::TrySendError::Full(job) = e;
            log::warn!("[JOBS] Queue full, dropping {job:?}");
            BluetoothError::QueueFull
        })
    }

    /// Queue an update for `device` unless one is already pending
    pub fn schedule_update(&self, device: &Arc<Device>) {
        if device.schedule_update() && self.submit(Job::Update(device.clone())).is_err() {
            device.update_delivered();
        }
    }

    /// Wait for the next job
    pub async fn next(&self) -> Job {
        self.channel.receive().await
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}
