//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::TransportLink;

/// One scripted read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRead {
    Bytes(Vec<u8>),
    /// The read times out.
    Timeout,
}

impl From<&[u8]> for MockRead {
    fn from(bytes: &[u8]) -> Self {
        MockRead::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for MockRead {
    fn from(bytes: Vec<u8>) -> Self {
        MockRead::Bytes(bytes)
    }
}

impl From<&str> for MockRead {
    fn from(text: &str) -> Self {
        MockRead::Bytes(text.as_bytes().to_vec())
    }
}

/// Mock transport for unit testing protocol logic.
///
/// Clones share state, so a test can hand one clone to the code under test
/// and inspect writes through another.
#[derive(Clone)]
pub struct MockTransport {
    /// Reads pending on the IN endpoint.
    inbox: Arc<Mutex<VecDeque<MockRead>>>,
    /// Replies released into the inbox, one script per send.
    scripts: Arc<Mutex<VecDeque<Vec<MockRead>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Number of upcoming sends that fail.
    failing_sends: Arc<Mutex<usize>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            failing_sends: Arc::new(Mutex::new(0)),
            connected: Arc::new(Mutex::new(true)),
            vid: 0x18D1,
            pid: 0x4EE0,
        }
    }

    /// Queue bytes that are already waiting before the next command.
    pub fn queue_stale(&self, bytes: &[u8]) {
        self.inbox
            .lock()
            .unwrap()
            .push_back(MockRead::Bytes(bytes.to_vec()));
    }

    /// Script the reads released by the next successful send.
    pub fn expect_send<I, R>(&self, reads: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<MockRead>,
    {
        self.scripts
            .lock()
            .unwrap()
            .push_back(reads.into_iter().map(Into::into).collect());
    }

    /// Make the next `count` sends fail.
    pub fn fail_sends(&self, count: usize) {
        *self.failing_sends.lock().unwrap() = count;
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes decoded as command strings.
    pub fn sent_commands(&self) -> Vec<String> {
        self.get_writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.inbox.lock().unwrap().len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportLink for MockTransport {
    fn send(&mut self, data: &[u8]) -> bool {
        if !*self.connected.lock().unwrap() {
            return false;
        }
        {
            let mut failing = self.failing_sends.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return false;
            }
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        if let Some(script) = self.scripts.lock().unwrap().pop_front() {
            self.inbox.lock().unwrap().extend(script);
        }
        true
    }

    fn receive(&mut self, max_len: usize, _timeout: Duration) -> Option<Vec<u8>> {
        if !*self.connected.lock().unwrap() {
            return None;
        }
        let mut inbox = self.inbox.lock().unwrap();
        match inbox.pop_front()? {
            MockRead::Timeout => None,
            MockRead::Bytes(mut bytes) => {
                // Oversized transfers are handed out across several reads.
                if bytes.len() > max_len {
                    let rest = bytes.split_off(max_len);
                    inbox.push_front(MockRead::Bytes(rest));
                }
                Some(bytes)
            }
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
