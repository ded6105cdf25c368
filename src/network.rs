// src/network.rs
//
// Network side of the poll loop: the command channel plus the TCP half of
// every serial bridge channel. The packet handler and the serial receiver are
// injected at construction.

use std::sync::Arc;

use crate::command::CommandChannel;
use crate::io::RingBuffer;
use crate::router::PacketHandler;
use crate::serial_bridge::SerialDataReceiver;

/// TCP-to-serial direction of one bridge channel
pub struct BridgeInbound {
    pub port: u8,
    /// Bytes received from the channel's TCP client
    pub tcp_rx: Arc<RingBuffer>,
}

pub struct NetworkInterface<H: PacketHandler, S: SerialDataReceiver> {
    command: CommandChannel,
    handler: H,
    inbound: Vec<BridgeInbound>,
    serial: S,
}

impl<H: PacketHandler, S: SerialDataReceiver> NetworkInterface<H, S> {
    pub fn new(command: CommandChannel, handler: H, serial: S) -> Self {
        Self {
            command,
            handler,
            inbound: Vec::new(),
            serial,
        }
    }

    pub fn add_bridge(&mut self, inbound: BridgeInbound) {
        self.inbound.push(inbound);
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    pub fn command(&self) -> &CommandChannel {
        &self.command
    }

    /// Service the command channel and the bridge inbound rings once.
    ///
    /// Returns `true` if there was anything to do.
    pub fn poll(&mut self) -> bool {
        let mut busy = self.command.poll(&mut self.handler) > 0;

        for inbound in &self.inbound {
            let data = inbound.tcp_rx.drain();
            if data.is_empty() {
                continue;
            }
            busy = true;
            self.serial.serial_data_received(inbound.port, &data);
        }
        busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ChannelLink;
    use crate::protocol::Frame;
    use crate::router::Dispatch;

    struct NullHandler;

    impl PacketHandler for NullHandler {
        fn handle_packet(&mut self, _frame: &Frame) -> Dispatch {
            Dispatch::NoReply
        }
    }

    #[derive(Default)]
    struct Collector {
        received: Vec<(u8, Vec<u8>)>,
    }

    impl SerialDataReceiver for Collector {
        fn serial_data_received(&mut self, port: u8, data: &[u8]) {
            self.received.push((port, data.to_vec()));
        }
    }

    #[test]
    fn test_inbound_bytes_reach_receiver() {
        let command = CommandChannel::new(
            Arc::new(RingBuffer::new(16)),
            ChannelLink::detached("command").0,
            254,
            true,
        );
        let mut net = NetworkInterface::new(command, NullHandler, Collector::default());

        let port2 = Arc::new(RingBuffer::new(16));
        net.add_bridge(BridgeInbound {
            port: 2,
            tcp_rx: port2.clone(),
        });

        assert!(!net.poll());
        port2.write_slice(b"AT\r");
        assert!(net.poll());
        assert_eq!(net.serial_mut().received, vec![(2, b"AT\r".to_vec())]);
    }
}
