//! Recording fakes for the transport handles, used by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use peershare_core::transport::{DataChannel, MediaCall, MediaStream, TransportError};

#[derive(Debug)]
pub struct FakeChannel {
    remote: String,
    open: AtomicBool,
    closes: AtomicUsize,
    pub sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new(remote: &str) -> Arc<Self> {
        Arc::new(Self {
            remote: remote.to_string(),
            open: AtomicBool::new(true),
            closes: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl DataChannel for FakeChannel {
    fn remote_id(&self) -> &str {
        &self.remote
    }

    fn send(&self, payload: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        self.sent.lock().unwrap().push(payload.to_string());
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct FakeCall {
    remote: String,
    open: AtomicBool,
    pub answered_with: Mutex<Option<MediaStream>>,
}

impl FakeCall {
    pub fn new(remote: &str) -> Arc<Self> {
        Arc::new(Self {
            remote: remote.to_string(),
            open: AtomicBool::new(true),
            answered_with: Mutex::new(None),
        })
    }
}

impl MediaCall for FakeCall {
    fn remote_id(&self) -> &str {
        &self.remote
    }

    fn answer(&self, stream: MediaStream) -> Result<(), TransportError> {
        *self.answered_with.lock().unwrap() = Some(stream);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
