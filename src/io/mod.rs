// src/io/mod.rs
//
// Byte-level I/O for the bridge: rings shared between producers and the poll
// loop, TCP channels, serial ports, and the typed error they report.

mod error;
pub mod ring;
pub mod serial;
pub mod tcp;

pub use error::IoError;
pub use ring::RingBuffer;
pub use tcp::{ChannelLink, LinkEvent, LinkEvents};
