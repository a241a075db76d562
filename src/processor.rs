//! Processor Tasks - raw event, management event and job processing
//!
//! Two read loops decode frames from the kernel channels and hand them to the
//! dispatcher. Neither ever waits on a command exchange: the exchange is
//! completed *by* the read loop, so waiting there would deadlock. Work that
//! needs an exchange, or calls into user code, goes through the job queue and
//! is run by a small pool of job processors.
//!
//! # Usage
//!
//! [`run`] never returns; poll it next to the code using the controller:
//!
//! ```rust,ignore
//! use embassy_futures::select::select;
//!
//! let control = BluetoothControl::new(options, raw_socket, mgmt_socket);
//! select(btcontrol::processor::run(&control), app(&control)).await;
//! ```
//!
//! # Architecture
//!
//! * **HCI Event Processor**: raw channel frames, dropped while the channel is closed
//! * **Management Event Processor**: management frames, including command completions
//! * **Job Processors**: `JOB_WORKERS` consumers of the shared job queue

use embassy_futures::select::{Either3, select_array, select3};

use crate::constants::{HCI_BUFFER_SIZE, JOB_WORKERS, MGMT_BUFFER_SIZE};
use crate::control::BluetoothControl;
use crate::hci::HciEvent;
use crate::mgmt::MgmtFrame;
use crate::transport::Transport;

async fn hci_event_processor<H: Transport, M: Transport>(control: &BluetoothControl<H, M>) -> ! {
    let mut read_buffer = [0u8; HCI_BUFFER_SIZE];

    loop {
        let len = match control.hci.transport().read(&mut read_buffer).await {
            Ok(len) => len,
            Err(e) => {
                log::error!("[PROCESSOR] HCI read error: {e:?}");
                continue;
            }
        };
        if !control.hci.is_open() {
            log::trace!("[PROCESSOR] Raw channel closed, dropping {len} bytes");
            continue;
        }

        match HciEvent::decode(&read_buffer[..len]) {
            Ok(event) => control.dispatch_hci(event),
            Err(e) => log::warn!("[PROCESSOR] Undecodable HCI frame: {e}"),
        }
    }
}

async fn mgmt_event_processor<H: Transport, M: Transport>(control: &BluetoothControl<H, M>) -> ! {
    let mut read_buffer = [0u8; MGMT_BUFFER_SIZE];

    loop {
        let len = match control.administrator.transport().read(&mut read_buffer).await {
            Ok(len) => len,
            Err(e) => {
                log::error!("[PROCESSOR] Management read error: {e:?}");
                continue;
            }
        };

        match MgmtFrame::decode(&read_buffer[..len]) {
            Ok(frame) => control.dispatch_mgmt(frame),
            Err(e) => log::warn!("[PROCESSOR] Undecodable management frame: {e}"),
        }
    }
}

async fn job_processor<H: Transport, M: Transport>(control: &BluetoothControl<H, M>) -> ! {
    loop {
        let job = control.jobs.next().await;
        log::debug!("[PROCESSOR] Job: {job:?}");
        control.process_job(job).await;
    }
}

/// Run the read loops and job processors for `control`
pub async fn run<H: Transport, M: Transport>(control: &BluetoothControl<H, M>) -> ! {
    let workers = core::array::from_fn::<_, JOB_WORKERS, _>(|_| job_processor(control));

    match select3(
        hci_event_processor(control),
        mgmt_event_processor(control),
        select_array(workers),
    )
    .await
    {
        Either3::First(never) | Either3::Second(never) | Either3::Third((never, _)) => never,
    }
}
