//! A scripted in-memory L2CAP channel for engine tests.
//!
//! Every write is recorded and handed to a responder closure whose returned
//! buffers become the next reads. Tests can also inject server-initiated
//! PDUs (notifications, indications) directly.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::api::BdAddr;
use crate::gatt::l2cap::{ChannelState, L2capChannel};
use crate::{Error, Result};

pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

struct Inner {
    state: Mutex<ChannelState>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    available: Condvar,
    written: Mutex<Vec<Vec<u8>>>,
    events: Mutex<Vec<String>>,
    responder: Mutex<Responder>,
}

#[derive(Clone)]
pub struct MockChannel {
    inner: Arc<Inner>,
    device: BdAddr,
}

impl MockChannel {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        MockChannel {
            inner: Arc::new(Inner {
                state: Mutex::new(ChannelState::Disconnected),
                inbound: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                written: Mutex::new(Vec::new()),
                events: Mutex::new(Vec::new()),
                responder: Mutex::new(Box::new(responder)),
            }),
            device: "11:22:33:44:55:66".parse().unwrap(),
        }
    }

    /// Queues a server-initiated PDU for the next read.
    pub fn push_inbound(&self, pdu: Vec<u8>) {
        self.inner.inbound.lock().unwrap().push_back(pdu);
        self.inner.available.notify_all();
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.written.lock().unwrap().clone()
    }

    /// Interleaved record of writes (`write:0x..`) and test-pushed markers,
    /// for ordering assertions.
    pub fn events(&self) -> Vec<String> {
        self.inner.events.lock().unwrap().clone()
    }

    pub fn push_event(&self, event: impl Into<String>) {
        self.inner.events.lock().unwrap().push(event.into());
    }

    /// Drops the channel into `Disconnected` without going through the
    /// engine, to provoke state mismatches.
    pub fn force_close(&self) {
        *self.inner.state.lock().unwrap() = ChannelState::Disconnected;
        self.inner.available.notify_all();
    }
}

impl L2capChannel for MockChannel {
    fn connect(&self) -> Result<ChannelState> {
        let mut state = self.inner.state.lock().unwrap();
        *state = ChannelState::Connected;
        Ok(*state)
    }

    fn disconnect(&self) {
        *self.inner.state.lock().unwrap() = ChannelState::Disconnected;
        self.inner.available.notify_all();
    }

    fn is_open(&self) -> bool {
        *self.inner.state.lock().unwrap() == ChannelState::Connected
    }

    fn state(&self) -> ChannelState {
        *self.inner.state.lock().unwrap()
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut queue = self.inner.inbound.lock().unwrap();
        if queue.is_empty() {
            if !self.is_open() {
                return Err(Error::Transport("channel closed".into()));
            }
            queue = self.inner.available.wait_timeout(queue, timeout).unwrap().0;
        }
        match queue.pop_front() {
            Some(pdu) => {
                buf[..pdu.len()].copy_from_slice(&pdu);
                Ok(pdu.len())
            }
            None if !self.is_open() => Err(Error::Transport("channel closed".into())),
            None => Err(Error::TimedOut),
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::Transport("channel closed".into()));
        }
        self.inner
            .events
            .lock()
            .unwrap()
            .push(format!("write:0x{:02x}", data[0]));
        self.inner.written.lock().unwrap().push(data.to_vec());
        let mut responder = self.inner.responder.lock().unwrap();
        let responses = (*responder)(data);
        drop(responder);
        if !responses.is_empty() {
            let mut queue = self.inner.inbound.lock().unwrap();
            queue.extend(responses);
            self.inner.available.notify_all();
        }
        Ok(data.len())
    }

    fn device(&self) -> BdAddr {
        self.device
    }
}
