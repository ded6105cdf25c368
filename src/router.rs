// src/router.rs
//
// Routes validated command frames by node address: node 1 frames go to the
// motor controller verbatim, node 3 frames run on the local board.

use crate::board::{IoExpander, LocalBoard, REPLY_ERROR};
use crate::bus::{BusLines, BusTransport, MotorCommand};
use crate::io::IoError;
use crate::protocol::{
    build_data_reply, build_value_reply, Frame, NODE_LOCAL_BOARD, NODE_MOTOR_CONTROLLER,
};

/// Outcome of handling one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Bytes to send back on the command channel
    Reply(Vec<u8>),
    NoReply,
    /// The motor controller did not answer
    Unreachable,
}

/// Consumer of validated command frames
pub trait PacketHandler: Send {
    fn handle_packet(&mut self, frame: &Frame) -> Dispatch;

    /// Work done once per poll pass before any frames are handled
    fn refresh(&mut self) {}

    /// Work done once per poll pass after the channels are serviced
    fn poll_background(&mut self) {}
}

pub struct PacketRouter<L: BusLines, X: IoExpander> {
    bus: BusTransport<L>,
    board: LocalBoard<X>,
}

impl<L: BusLines, X: IoExpander> PacketRouter<L, X> {
    pub fn new(bus: BusTransport<L>, board: LocalBoard<X>) -> Self {
        Self { bus, board }
    }

    pub fn bus(&self) -> &BusTransport<L> {
        &self.bus
    }

    pub fn board(&self) -> &LocalBoard<X> {
        &self.board
    }

    /// Ask the motor controller for its version.
    ///
    /// No reply, or a zero version, means the controller is not usable.
    pub fn startup_check(&mut self) -> Result<i32, IoError> {
        match self.bus.send_command(MotorCommand::GetVersionInfo, 1, None) {
            Some(version) if version != 0 => {
                tlog!("[router] Motor controller version {:#x}", version);
                Ok(version)
            }
            Some(_) => Err(IoError::unreachable("motor controller", "reported version 0")),
            None => Err(IoError::unreachable("motor controller", "no reply to version query")),
        }
    }

    fn forward_to_controller(&mut self, frame: &Frame) -> Dispatch {
        let reply = self.bus.transceive(&frame.bytes);
        if reply.is_empty() {
            return Dispatch::Unreachable;
        }
        Dispatch::Reply(build_data_reply(&reply, self.bus.config().max_reply_len))
    }

    fn run_local(&mut self, frame: &Frame) -> Dispatch {
        let Some(command) = frame.command() else {
            return Dispatch::Reply(build_value_reply(REPLY_ERROR));
        };
        match self.board.handle_command(command, frame.parameter()) {
            Some(value) => Dispatch::Reply(build_value_reply(value)),
            None => Dispatch::NoReply,
        }
    }
}

impl<L: BusLines, X: IoExpander> PacketHandler for PacketRouter<L, X> {
    fn handle_packet(&mut self, frame: &Frame) -> Dispatch {
        match frame.node_address {
            NODE_MOTOR_CONTROLLER => self.forward_to_controller(frame),
            NODE_LOCAL_BOARD => self.run_local(frame),
            other => {
                tlog!("[router] Dropping frame for unknown node {}", other);
                Dispatch::NoReply
            }
        }
    }

    fn refresh(&mut self) {
        self.board.refresh_outputs();
    }

    fn poll_background(&mut self) {
        self.board.poll(&mut self.bus);
    }
}
