// src/serial_bridge.rs
//
// Transparent serial <-> TCP tunnels, one per bridged UART.

use std::sync::Arc;

use crate::io::serial::SerialSink;
use crate::io::{ChannelLink, RingBuffer};

/// Serial side of the bridge channels as seen from the poll loop
pub trait SerialDataReceiver: Send {
    /// Bytes arrived on bridge channel `port`'s TCP connection
    fn serial_data_received(&mut self, port: u8, data: &[u8]);

    /// Push pending UART input out to TCP. Returns the bytes drained.
    fn forward_serial_to_tcp(&mut self) -> usize {
        0
    }
}

/// One bridged UART
pub struct SerialChannel {
    pub number: u8,
    /// Bytes read from the UART
    pub serial_rx: Arc<RingBuffer>,
    pub sink: Box<dyn SerialSink>,
    pub link: ChannelLink,
}

#[derive(Default)]
pub struct SerialBridge {
    channels: Vec<SerialChannel>,
}

impl SerialBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&mut self, channel: SerialChannel) {
        tlog!("[bridge:{}] Channel added ({})", channel.number, channel.link.name());
        self.channels.push(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl SerialDataReceiver for SerialBridge {
    fn serial_data_received(&mut self, port: u8, data: &[u8]) {
        let Some(channel) = self.channels.iter_mut().find(|c| c.number == port) else {
            tlog!("[bridge:{}] No such serial port, dropped {} bytes", port, data.len());
            return;
        };
        if let Err(e) = channel.sink.write_bytes(data) {
            tlog!("[bridge:{}] {}", port, e);
        }
    }

    /// Send everything read from each UART to its TCP client.
    ///
    /// Bytes are dropped when no client is connected. Returns the number of
    /// bytes drained from the rings.
    fn forward_serial_to_tcp(&mut self) -> usize {
        let mut total = 0;
        for channel in &self.channels {
            let data = channel.serial_rx.drain();
            if data.is_empty() {
                continue;
            }
            total += data.len();
            if !channel.link.send(&data) {
                dlog!("[bridge:{}] No client, dropped {} bytes", channel.number, data.len());
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::serial::MemorySink;
    use crate::io::LinkEvent;

    #[test]
    fn test_serial_to_tcp_when_connected() {
        let ring = Arc::new(RingBuffer::new(32));
        let (link, mut events) = ChannelLink::detached("serial1");
        let mut bridge = SerialBridge::new();
        bridge.add_channel(SerialChannel {
            number: 1,
            serial_rx: ring.clone(),
            sink: Box::new(MemorySink::new()),
            link: link.clone(),
        });

        ring.write_slice(b"dropped");
        assert_eq!(bridge.forward_serial_to_tcp(), 7);
        assert!(events.try_recv().is_err());

        link.set_connected(true);
        ring.write_slice(b"abc");
        assert_eq!(bridge.forward_serial_to_tcp(), 3);
        match events.try_recv() {
            Ok(LinkEvent::Data(bytes)) => assert_eq!(bytes, b"abc".to_vec()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(bridge.forward_serial_to_tcp(), 0);
    }

    #[test]
    fn test_tcp_to_serial_by_port() {
        let sink1 = MemorySink::new();
        let sink3 = MemorySink::new();
        let mut bridge = SerialBridge::new();
        for (number, sink) in [(1, sink1.clone()), (3, sink3.clone())] {
            bridge.add_channel(SerialChannel {
                number,
                serial_rx: Arc::new(RingBuffer::new(8)),
                sink: Box::new(sink),
                link: ChannelLink::detached("serial").0,
            });
        }

        bridge.serial_data_received(3, b"xyz");
        bridge.serial_data_received(2, b"lost");
        assert_eq!(sink3.written(), b"xyz".to_vec());
        assert!(sink1.written().is_empty());
        assert_eq!(bridge.channel_count(), 2);
    }
}
