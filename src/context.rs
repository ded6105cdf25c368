// src/context.rs
//
// Owner of the whole bridge state and its poll loop.
//
// The loop runs on a blocking thread so handshake waits on the bus never hold
// up the TCP and serial tasks feeding the rings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::network::NetworkInterface;
use crate::router::PacketHandler;
use crate::serial_bridge::SerialDataReceiver;

/// Sleep between passes when nothing happened
const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub struct BridgeContext<H: PacketHandler, S: SerialDataReceiver> {
    network: NetworkInterface<H, S>,
    stop: Arc<AtomicBool>,
}

impl<H, S> BridgeContext<H, S>
where
    H: PacketHandler + 'static,
    S: SerialDataReceiver + 'static,
{
    pub fn new(network: NetworkInterface<H, S>, stop: Arc<AtomicBool>) -> Self {
        Self { network, stop }
    }

    pub fn network_mut(&mut self) -> &mut NetworkInterface<H, S> {
        &mut self.network
    }

    /// One pass: outputs, command and inbound bridge traffic, outbound serial
    /// traffic, then background work. Returns `true` if any traffic moved.
    pub fn poll_once(&mut self) -> bool {
        self.network.handler_mut().refresh();
        let mut busy = self.network.poll();
        busy |= self.network.serial_mut().forward_serial_to_tcp() > 0;
        self.network.handler_mut().poll_background();
        busy
    }

    /// Poll until the stop flag is set.
    pub fn run(mut self) {
        tlog!("[context] Poll loop started");
        while !self.stop.load(Ordering::SeqCst) {
            if !self.poll_once() {
                std::thread::sleep(IDLE_SLEEP);
            }
        }
        tlog!("[context] Poll loop stopped");
    }

    /// Run the poll loop on the blocking pool.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run())
    }
}
