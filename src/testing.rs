//! In-memory kernel channel double for tests

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_futures::block_on;
use embassy_futures::select::{Either, select};
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer, with_timeout};

use crate::hci::event::{EVENT_PACKET, code as hci_code};
use crate::mgmt::event::code as mgmt_code;
use crate::mgmt::{AdapterInfo, Administrator, MgmtEvent, MgmtFrame, Settings, opcode};
use crate::transport::Transport;
use crate::{BluetoothAddress, BluetoothControl, BluetoothControlOptions, ClassOfDevice, processor};

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

#[derive(Debug)]
pub(crate) struct MockError;

/// Transport that records writes and answers them through a responder
pub(crate) struct MockTransport {
    inbound: Channel<CriticalSectionRawMutex, Vec<u8>, 64>,
    written: BlockingMutex<CriticalSectionRawMutex, RefCell<Vec<Vec<u8>>>>,
    responder: Option<Responder>,
}

impl MockTransport {
    fn with(responder: Option<Responder>) -> Self {
        Self {
            inbound: Channel::new(),
            written: BlockingMutex::new(RefCell::new(Vec::new())),
            responder,
        }
    }

    /// Never answers anything
    pub(crate) fn silent() -> Self {
        Self::with(None)
    }

    /// Management channel answering every command with success
    pub(crate) fn mgmt() -> Self {
        Self::with(Some(Box::new(|frame| mgmt_reply(frame, None))))
    }

    /// Management channel failing `failing` with `status`
    pub(crate) fn mgmt_failing(failing: u16, status: u8) -> Self {
        Self::with(Some(Box::new(move |frame| {
            mgmt_reply(frame, Some((failing, status)))
        })))
    }

    /// Raw channel accepting every command
    pub(crate) fn hci() -> Self {
        Self::with(Some(Box::new(|frame| hci_reply(frame, None))))
    }

    /// Raw channel rejecting `failing` with `status`
    pub(crate) fn hci_failing(failing: u16, status: u8) -> Self {
        Self::with(Some(Box::new(move |frame| {
            hci_reply(frame, Some((failing, status)))
        })))
    }

    /// Queue an inbound frame
    pub(crate) fn inject(&self, frame: Vec<u8>) {
        if self.inbound.try_send(frame).is_err() {
            panic!("mock inbound queue full");
        }
    }

    /// Every frame written so far
    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock(|written| written.borrow().clone())
    }

    /// Opcodes of the management frames written so far
    pub(crate) fn mgmt_opcodes(&self) -> Vec<u16> {
        self.written()
            .iter()
            .map(|frame| u16::from_le_bytes([frame[0], frame[1]]))
            .collect()
    }

    /// Opcodes of the HCI command packets written so far
    pub(crate) fn hci_opcodes(&self) -> Vec<u16> {
        self.written()
            .iter()
            .map(|frame| u16::from_le_bytes([frame[1], frame[2]]))
            .collect()
    }
}

impl Transport for MockTransport {
    type Error = MockError;

    async fn read(&self, rx: &mut [u8]) -> Result<usize, Self::Error> {
        let frame = self.inbound.receive().await;
        let len = frame.len().min(rx.len());
        rx[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }

    async fn write(&self, frame: &[u8]) -> Result<(), Self::Error> {
        self.written
            .lock(|written| written.borrow_mut().push(frame.to_vec()));
        if let Some(responder) = &self.responder {
            for reply in responder(frame) {
                self.inject(reply);
            }
        }
        Ok(())
    }
}

/// Adapter reported by the management double
pub(crate) fn read_info() -> AdapterInfo {
    AdapterInfo {
        index: 0,
        address: BluetoothAddress::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]),
        version: 9,
        manufacturer: 0x000F,
        supported: Settings(0x0000_3FFF),
        current: Settings(0x0000_02D1),
        class: ClassOfDevice::from_raw(0x0C_0100),
        name: "Test Adapter".to_owned(),
        short_name: "test".to_owned(),
    }
}

fn read_info_data() -> Vec<u8> {
    let info = read_info();
    let mut data = info.address.to_le_bytes().to_vec();
    data.push(info.version);
    data.extend_from_slice(&info.manufacturer.to_le_bytes());
    data.extend_from_slice(&info.supported.0.to_le_bytes());
    data.extend_from_slice(&info.current.0.to_le_bytes());
    data.extend_from_slice(&info.class.to_le_bytes());
    let mut name = [0u8; 249];
    name[..info.name.len()].copy_from_slice(info.name.as_bytes());
    data.extend_from_slice(&name);
    let mut short = [0u8; 11];
    short[..info.short_name.len()].copy_from_slice(info.short_name.as_bytes());
    data.extend_from_slice(&short);
    data
}

fn mgmt_reply(frame: &[u8], failing: Option<(u16, u8)>) -> Vec<Vec<u8>> {
    let command = u16::from_le_bytes([frame[0], frame[1]]);
    let index = u16::from_le_bytes([frame[2], frame[3]]);
    // pairing completes only when a test says so
    if command == opcode::PAIR_DEVICE {
        return Vec::new();
    }

    let mut params = command.to_le_bytes().to_vec();
    match failing {
        Some((failing, status)) if failing == command => {
            params.push(status);
            return vec![crate::mgmt::event::frame(mgmt_code::COMMAND_STATUS, index, &params)];
        }
        _ => params.push(0),
    }
    if command == opcode::READ_INFO {
        params.extend(read_info_data());
    }
    vec![crate::mgmt::event::frame(mgmt_code::COMMAND_COMPLETE, index, &params)]
}

fn hci_reply(frame: &[u8], failing: Option<(u16, u8)>) -> Vec<Vec<u8>> {
    let command = u16::from_le_bytes([frame[1], frame[2]]);
    let status = match failing {
        Some((failing, status)) if failing == command => status,
        _ => 0,
    };
    let [lo, hi] = command.to_le_bytes();
    vec![vec![EVENT_PACKET, hci_code::COMMAND_STATUS, 4, status, 1, lo, hi]]
}

/// Read loop feeding command completions to `admin`, for tests without processors
pub(crate) async fn pump_mgmt(admin: &Administrator<MockTransport>) -> ! {
    let mut rx = [0u8; crate::constants::MGMT_BUFFER_SIZE];
    loop {
        let Ok(len) = admin.transport().read(&mut rx).await else {
            continue;
        };
        match MgmtFrame::decode(&rx[..len]).map(|frame| frame.event) {
            Ok(MgmtEvent::CommandComplete {
                opcode,
                status,
                data,
            }) => {
                admin.complete(opcode, status, data);
            }
            Ok(MgmtEvent::CommandStatus { opcode, status }) => {
                admin.complete(opcode, status, Vec::new());
            }
            _ => {}
        }
    }
}

/// Controller over answering doubles for both channels
pub(crate) fn harness(
    options: BluetoothControlOptions,
) -> BluetoothControl<MockTransport, MockTransport> {
    BluetoothControl::new(options, MockTransport::hci(), MockTransport::mgmt())
}

/// Run `body` to completion while the processors serve `control`
pub(crate) fn drive<F: Future>(
    control: &BluetoothControl<MockTransport, MockTransport>,
    body: F,
) -> F::Output {
    match block_on(select(body, processor::run(control))) {
        Either::First(output) => output,
        Either::Second(never) => never,
    }
}

/// Wait until `condition` holds; fails the test after a second
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    let polled = with_timeout(Duration::from_secs(1), async {
        while !condition() {
            Timer::after_millis(1).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met within a second");
}
