// src/lib.rs
//
// propbridge: TCP bridge to a handshake-bus motor controller and to serial
// peripherals tunneled over TCP.

#[macro_use]
pub mod logging;

pub mod board;
pub mod bus;
pub mod checksums;
pub mod command;
pub mod context;
pub mod io;
pub mod network;
pub mod protocol;
pub mod router;
pub mod serial_bridge;
pub mod settings;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use board::{LocalBoard, MemoryIoExpander};
use bus::{BusTransport, SimulatedController};
use command::CommandChannel;
use context::BridgeContext;
use io::serial::open_port;
use io::{tcp, IoError, RingBuffer};
use network::{BridgeInbound, NetworkInterface};
use router::PacketRouter;
use serial_bridge::{SerialBridge, SerialChannel};
use settings::BridgeSettings;

/// Staging ring between the command channel's TCP readers and the poll loop
const COMMAND_RING_CAPACITY: usize = 1024;

// ============================================================================
// Startup
// ============================================================================

fn bus_lines(settings: &BridgeSettings) -> Result<SimulatedController, IoError> {
    match settings.bus.backend.as_str() {
        "simulated" => Ok(SimulatedController::new()),
        other => Err(IoError::configuration(
            "bus",
            format!("backend '{}' is not available", other),
        )),
    }
}

/// Build the bridge from `settings` and run it until Ctrl-C.
pub async fn run(settings: BridgeSettings) -> Result<(), IoError> {
    logging::set_debug(settings.logging.debug);
    if let Some(dir) = &settings.logging.log_dir {
        logging::init_file_logging(dir).map_err(|e| IoError::configuration("logging", e))?;
    }
    settings.validate()?;

    let stop = Arc::new(AtomicBool::new(false));

    // Motor controller and local board
    let bus = BusTransport::new(bus_lines(&settings)?, settings.bus_config());
    let board = LocalBoard::new(MemoryIoExpander::new(), settings.board_config());
    let mut router = PacketRouter::new(bus, board);
    tlog!(
        "[main] Bus backend '{}' and board I/O are simulated; controller replies and inputs are not from hardware",
        settings.bus.backend
    );

    if settings.board.startup_check {
        tlog!("[main] Checking motor controller");
        let (checked, result) = tokio::task::spawn_blocking(move || {
            let result = router.startup_check();
            (router, result)
        })
        .await
        .map_err(|e| IoError::protocol("motor controller", format!("startup check: {}", e)))?;
        result?;
        router = checked;
    }

    // Command channel
    let network_settings = &settings.network;
    let command_ring = Arc::new(RingBuffer::new(COMMAND_RING_CAPACITY));
    let (command_link, _) = tcp::open_channel(
        network_settings.socket_addr(network_settings.command_port),
        "command",
        command_ring.clone(),
        stop.clone(),
    )
    .await?;
    let command = CommandChannel::new(
        command_ring,
        command_link,
        network_settings.max_frame_len,
        network_settings.unreachable_reply,
    );

    // Serial bridge channels
    let mut bridge = SerialBridge::new();
    let mut inbound = Vec::new();
    for serial in &settings.serial {
        let serial_rx = Arc::new(RingBuffer::new(serial.ring_capacity));
        let (sink, _reader) = open_port(serial, serial_rx.clone(), stop.clone())?;

        let tcp_rx = Arc::new(RingBuffer::new(serial.ring_capacity));
        let (link, _) = tcp::open_channel(
            network_settings.socket_addr(serial.tcp_port()),
            &format!("serial{}", serial.number),
            tcp_rx.clone(),
            stop.clone(),
        )
        .await?;

        bridge.add_channel(SerialChannel {
            number: serial.number,
            serial_rx,
            sink: Box::new(sink),
            link,
        });
        inbound.push(BridgeInbound {
            port: serial.number,
            tcp_rx,
        });
    }

    let mut network = NetworkInterface::new(command, router, bridge);
    for channel in inbound {
        network.add_bridge(channel);
    }

    let poll_loop = BridgeContext::new(network, stop.clone()).spawn();
    tlog!("[main] Running");

    let signal = tokio::signal::ctrl_c().await;
    stop.store(true, Ordering::SeqCst);
    if let Err(e) = signal {
        tlog!("[main] Signal handler failed: {}", e);
    }
    tlog!("[main] Shutting down");

    if let Err(e) = poll_loop.await {
        tlog!("[main] Poll loop ended abnormally: {}", e);
    }
    logging::stop_file_logging();
    Ok(())
}
