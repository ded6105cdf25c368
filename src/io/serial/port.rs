// src/io/serial/port.rs
//
// Opening a UART with the serialport crate and pumping its input into a ring.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serialport::SerialPort;
use tokio::task::JoinHandle;

use super::utils::{to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits};
use super::SerialSink;
use crate::io::ring::RingBuffer;
use crate::io::IoError;
use crate::settings::SerialSettings;

/// Read timeout; bounds how long the reader takes to notice a stop request
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Write half of an open UART
pub struct SerialPortSink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialSink for SerialPortSink {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.port
            .write_all(data)
            .and_then(|_| self.port.flush())
            .map_err(|e| IoError::write(&self.name, e.to_string()))
    }
}

/// Open the UART for a bridge channel and start its reader.
///
/// Received bytes go into `ring`; bytes that do not fit are dropped. The
/// reader runs on the blocking pool until `stop` is set or the port fails.
pub fn open_port(
    settings: &SerialSettings,
    ring: Arc<RingBuffer>,
    stop: Arc<AtomicBool>,
) -> Result<(SerialPortSink, JoinHandle<()>), IoError> {
    let name = format!("serial{}({})", settings.number, settings.path);

    let port = serialport::new(&settings.path, settings.baud_rate)
        .data_bits(to_serialport_data_bits(settings.data_bits))
        .parity(to_serialport_parity(settings.parity))
        .stop_bits(to_serialport_stop_bits(settings.stop_bits))
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| IoError::connection(&name, e.to_string()))?;

    let reader = port
        .try_clone()
        .map_err(|e| IoError::connection(&name, format!("clone port: {}", e)))?;

    tlog!(
        "[serial] {} open ({} baud, {}{:?}{})",
        name,
        settings.baud_rate,
        settings.data_bits,
        settings.parity,
        settings.stop_bits
    );

    let reader_name = name.clone();
    let handle = tokio::task::spawn_blocking(move || {
        run_reader(reader_name, reader, ring, stop);
    });

    Ok((SerialPortSink { name, port }, handle))
}

fn run_reader(name: String, mut port: Box<dyn SerialPort>, ring: Arc<RingBuffer>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; 256];

    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                let accepted = ring.write_slice(&buf[..n]);
                if accepted < n {
                    dlog!("[serial] {} ring full, dropped {} bytes", name, n - accepted);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                tlog!("[serial] {} read error: {}", name, e);
                break;
            }
        }
    }

    tlog!("[serial] {} reader stopped", name);
}
