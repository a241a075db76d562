//! Request/response pairing for kernel command channels
//!
//! Only one command is outstanding per channel. The read loop hands every
//! command-complete/status it decodes to [`CommandExchange::complete`], which
//! wakes the waiting caller when the opcode matches.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::with_timeout;

use crate::BluetoothError;
use crate::constants::MAX_ACTION_TIMEOUT;
use crate::transport::Transport;

pub(crate) struct CommandExchange<R> {
    lock: Mutex<CriticalSectionRawMutex, ()>,
    pending: BlockingMutex<CriticalSectionRawMutex, Cell<Option<u16>>>,
    response: Signal<CriticalSectionRawMutex, R>,
}

impl<R: Send> CommandExchange<R> {
    pub(crate) const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            pending: BlockingMutex::new(Cell::new(None)),
            response: Signal::new(),
        }
    }

    /// Write `frame` and wait for the completion carrying `opcode`
    pub(crate) async fn exchange<T: Transport>(
        &self,
        transport: &T,
        opcode: u16,
        frame: &[u8],
    ) -> Result<R, BluetoothError> {
        let _serialized = self.lock.lock().await;

        self.response.reset();
        self.pending.lock(|pending| pending.set(Some(opcode)));

        let result = match transport.write(frame).await {
            Ok(()) => with_timeout(MAX_ACTION_TIMEOUT, self.response.wait())
                .await
                .map_err(|_| BluetoothError::Timeout(opcode)),
            Err(e) => Err(BluetoothError::Transport(format!("{e:?}"))),
        };

        self.pending.lock(|pending| pending.set(None));
        result
    }

    /// Deliver a completion; returns `false` when nobody waits for `opcode`
    pub(crate) fn complete(&self, opcode: u16, response: R) -> bool {
        let matched = self.pending.lock(|pending| {
            if pending.get() == Some(opcode) {
                pending.set(None);
                true
            } else {
                false
            }
        });
        if matched {
            self.response.signal(response);
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::{Duration, Instant, Timer};

    const OPCODE: u16 = 0x0005;

    #[test]
    fn test_unanswered_command_times_out() {
        let exchange = CommandExchange::<u8>::new();
        let transport = MockTransport::silent();
        let started = Instant::now();

        let result = block_on(exchange.exchange(&transport, OPCODE, &[0x05, 0x00]));

        assert_eq!(result, Err(BluetoothError::Timeout(OPCODE)));
        assert!(started.elapsed() >= MAX_ACTION_TIMEOUT);
        assert_eq!(transport.written(), vec![vec![0x05, 0x00]]);
        assert!(!exchange.complete(OPCODE, 1));
    }

    #[test]
    fn test_completion_matches_opcode() {
        let exchange = CommandExchange::<u8>::new();
        let transport = MockTransport::silent();
        assert!(!exchange.complete(OPCODE, 1));

        let (result, ()) = block_on(join(
            exchange.exchange(&transport, OPCODE, &[0x05, 0x00]),
            async {
                while !exchange.complete(OPCODE, 7) {
                    assert!(!exchange.complete(OPCODE + 1, 9));
                    Timer::after(Duration::from_millis(1)).await;
                }
            },
        ));

        assert_eq!(result, Ok(7));
    }
}
