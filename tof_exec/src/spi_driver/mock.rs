//! Scripted SPI bus for exercising the driver without hardware.
//!
//! Responses are queued with [`MockSpi::inject_response`] and handed out one per transfer. A
//! transfer with nothing queued reads back all zeros, which is what an unpowered board looks like.
//! Every outgoing buffer is recorded and can be inspected with [`MockSpi::written`].

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use embedded_hal::blocking::spi::{Transfer, Write};

/// Cloneable handle to a shared scripted bus, so that a test can keep one handle while the
/// driver owns another.
#[derive(Clone, Default)]
pub struct MockSpi {
    inner: Arc<Mutex<MockSpiInner>>,
}

#[derive(Default)]
struct MockSpiInner {
    responses: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    fail_next: bool,
}

#[derive(Debug)]
pub enum MockSpiError {
    Disconnected,
}

impl MockSpi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the bytes the board will clock out on a future transfer.
    pub fn inject_response(&self, data: &[u8]) {
        self.lock().responses.push_back(data.to_vec());
    }

    /// Make the next exchange fail.
    pub fn fail_next(&self) {
        self.lock().fail_next = true;
    }

    /// Everything sent on the bus so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Number of responses which have not been consumed yet.
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockSpiInner> {
        // A panicking test thread poisons the lock, the data is still fine to inspect
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Transfer<u8> for MockSpi {
    type Error = MockSpiError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        let mut inner = self.lock();

        if inner.fail_next {
            inner.fail_next = false;
            return Err(MockSpiError::Disconnected);
        }

        inner.written.push(words.to_vec());

        let response = inner.responses.pop_front().unwrap_or_default();
        for (i, w) in words.iter_mut().enumerate() {
            *w = response.get(i).copied().unwrap_or(0);
        }

        Ok(words)
    }
}

impl Write<u8> for MockSpi {
    type Error = MockSpiError;

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut inner = self.lock();

        if inner.fail_next {
            inner.fail_next = false;
            return Err(MockSpiError::Disconnected);
        }

        inner.written.push(words.to_vec());
        Ok(())
    }
}
