// src/protocol/mod.rs
//
// STX/ETX framed packet protocol shared by the command channel and the
// handshake bus.
//
// Frame format:
//   [STX 0x02][address][command][payload...][checksum][ETX 0x03]
//
// checksum = XOR(address..payload) | 0x80
// address  = node + 10

pub mod base128;
pub mod framer;
pub mod reply;

pub use framer::{validate, Frame, FrameAccumulator, FrameError};
pub use reply::{build_command_frame, build_data_reply, build_value_reply, PendingCommand};

/// Start-of-text frame delimiter
pub const STX: u8 = 0x02;
/// End-of-text frame delimiter
pub const ETX: u8 = 0x03;

/// Offset added to a node number to form the address byte
pub const ADDRESS_OFFSET: i32 = 10;

/// Node address of the motor controller on the handshake bus
pub const NODE_MOTOR_CONTROLLER: i32 = 1;
/// Node address of the bridge board itself
pub const NODE_LOCAL_BOARD: i32 = 3;

/// Index of the command byte within a frame
pub const COMMAND_INDEX: usize = 2;
/// Index of the first base-128 parameter byte within a frame
pub const PARAMETER_INDEX: usize = 3;

/// Largest frame buffered on the command channel
pub const MAX_COMMAND_FRAME_LEN: usize = 254;
/// Largest reply accepted from the motor controller
pub const MAX_BUS_REPLY_LEN: usize = 254;
/// Longest frame sent to the motor controller (STX, addr, cmd, 5 value, chk, ETX)
pub const MAX_BUS_COMMAND_LEN: usize = 10;
