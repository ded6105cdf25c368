// src/protocol/reply.rs
//
// Builders for the frames the bridge emits: value replies on the command
// channel, relayed data replies, and command frames for the motor controller.

use super::base128;
use super::{ETX, MAX_BUS_COMMAND_LEN, STX};
use crate::checksums::frame_checksum;

/// Address byte used on the handshake bus (the controller's node number, no offset)
pub const BUS_ADDRESS: u8 = 1;

/// Command awaiting a reply from the motor controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    /// Base command code (see `MotorCommand`)
    pub command: u8,
    /// Axis, 1-based
    pub axis: u8,
    pub parameter: Option<i32>,
}

impl PendingCommand {
    pub fn new(command: u8, axis: u8, parameter: Option<i32>) -> Self {
        Self {
            command,
            axis,
            parameter,
        }
    }

    /// Command byte on the wire
    pub fn wire_command(&self) -> u8 {
        self.command.wrapping_add(self.axis).wrapping_sub(1)
    }
}

/// `STX, encode(value), checksum, ETX`
pub fn build_value_reply(value: i32) -> Vec<u8> {
    let encoded = base128::encode(value);
    let mut reply = Vec::with_capacity(base128::ENCODED_LEN + 3);
    reply.push(STX);
    reply.extend_from_slice(&encoded);
    reply.push(frame_checksum(&encoded));
    reply.push(ETX);
    reply
}

/// Raw passthrough of `data`, bounded by `max_len`.
pub fn build_data_reply(data: &[u8], max_len: usize) -> Vec<u8> {
    data[..data.len().min(max_len)].to_vec()
}

/// Frame a command for the motor controller.
pub fn build_command_frame(pending: &PendingCommand) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + base128::ENCODED_LEN);
    body.push(BUS_ADDRESS);
    body.push(pending.wire_command());
    if let Some(value) = pending.parameter {
        body.extend_from_slice(&base128::encode(value));
    }

    let mut frame = Vec::with_capacity(MAX_BUS_COMMAND_LEN);
    frame.push(STX);
    frame.extend_from_slice(&body);
    frame.push(frame_checksum(&body));
    frame.push(ETX);
    frame
}
