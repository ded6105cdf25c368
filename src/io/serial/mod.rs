// src/io/serial/mod.rs
//
// UARTs behind the serial bridge channels.
//
// Each port gets a blocking reader that copies received bytes into the
// channel's ring; writes go through a `SerialSink`.

mod port;
pub(crate) mod utils;

pub use port::{open_port, SerialPortSink};
pub use utils::Parity;

use std::sync::{Arc, Mutex, MutexGuard};

use super::IoError;

/// Output side of a bridged UART
pub trait SerialSink: Send {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), IoError>;
}

/// Sink that collects written bytes in memory. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    written: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<u8>> {
        self.written.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.buffer().clone()
    }
}

impl SerialSink for MemorySink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.buffer().extend_from_slice(data);
        Ok(())
    }
}
