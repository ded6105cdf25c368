// src/bus/mod.rs
//
// Synchronous byte-at-a-time handshake bus to the motor controller.
//
// Lines:
//   data bus  8 bits, driven by whichever side is sending
//   TCLK      our clock/ack line (output)
//   RCLK      peer clock/ack line (input), high = idle/ready
//
// Sending a byte:    drive data, TCLK low, wait RCLK low, TCLK high, wait RCLK high
// Receiving a byte:  wait RCLK low, sample data, TCLK low, wait RCLK high, TCLK high

use std::fmt;

pub mod sim;
pub mod transport;

pub use sim::{SimBehavior, SimulatedController};
pub use transport::{BusConfig, BusTransport};

// =============================================================================
// Lines
// =============================================================================

/// Direction of the shared data bus from our side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDirection {
    Input,
    Output,
}

/// Physical lines of the handshake bus.
///
/// Implemented by GPIO backends and by `SimulatedController`.
pub trait BusLines: Send {
    fn set_direction(&mut self, direction: BusDirection);
    /// Drive the data bus (only meaningful while the direction is `Output`)
    fn write_data(&mut self, byte: u8);
    /// Sample the data bus
    fn read_data(&mut self) -> u8;
    /// Peer clock/ack line (RCLK)
    fn peer_signal(&mut self) -> bool;
    /// Our clock/ack line (TCLK)
    fn set_clock(&mut self, high: bool);
}

// =============================================================================
// State and errors
// =============================================================================

/// Handshake state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Idle,
    CheckReady,
    SendByte,
    WaitAck,
    NextByte,
    Receiving,
    Done,
    TimedOut,
}

/// Handshake wait that can time out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Peer pulls RCLK low after we clock a byte out
    PeerAck,
    /// Peer releases RCLK after we raise TCLK
    PeerRelease,
    /// Peer starts a reply
    ReplyStart,
    /// Peer releases RCLK after we ack a reply byte
    ReplyRelease,
    /// Peer presents the next reply byte
    NextReplyByte,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeStep::PeerAck => "peer ack",
            HandshakeStep::PeerRelease => "peer release",
            HandshakeStep::ReplyStart => "reply start",
            HandshakeStep::ReplyRelease => "reply release",
            HandshakeStep::NextReplyByte => "next reply byte",
        };
        f.write_str(name)
    }
}

/// A failed send or receive half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// RCLK was low when a send began
    PeerNotReady,
    Timeout(HandshakeStep),
    /// Reply exceeded the reply buffer
    ReplyOverflow,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::PeerNotReady => write!(f, "peer not ready"),
            BusError::Timeout(step) => write!(f, "timeout waiting for {}", step),
            BusError::ReplyOverflow => write!(f, "reply overflow"),
        }
    }
}

// =============================================================================
// Motor controller commands
// =============================================================================

/// Motor controller command codes.
///
/// The wire command byte is `code + axis - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MotorCommand {
    HomeAxis = 4,
    MoveAbs = 8,
    MoveInc = 12,
    StopAxis = 16,
    IsAxisBusy = 20,
    GetEncoderPosition = 24,
    GetLogicalPosition = 28,
    SetStartSpeed = 32,
    SetDriveSpeed = 36,
    SetHomeSpeed = 40,
    SetAccelerationRate = 44,
    SetMotorDirection = 48,
    SetEncoderDirection = 52,
    GetInitialSpeed = 56,
    GetDriveSpeed = 60,
    GetHomeSpeed = 64,
    GetAccelerationRate = 68,
    GetMotorDirection = 72,
    GetEncoderDirection = 76,
    SetEncoderPosition = 80,
    SetLogicalPosition = 84,
    LineMoveAbs = 88,
    LineMoveInc = 92,
    QueryHomeInput = 96,
    QueryHomeStatus = 100,
    SwitchAuxOutput = 104,
    SetHomeTimeout = 108,
    SetHomeOffsetSpeed = 112,
    SetHomeChangeDirectionDelay = 116,
    ToggleEnableLine = 120,
    GetEstopState = 200,
    ClearEstopState = 204,
    QueryResetFlag = 208,
    ClearResetFlag = 212,
    GetVersionInfo = 216,
    MoveContinuous = 220,
    SlowStop = 224,
}

impl MotorCommand {
    const ALL: [MotorCommand; 37] = [
        MotorCommand::HomeAxis,
        MotorCommand::MoveAbs,
        MotorCommand::MoveInc,
        MotorCommand::StopAxis,
        MotorCommand::IsAxisBusy,
        MotorCommand::GetEncoderPosition,
        MotorCommand::GetLogicalPosition,
        MotorCommand::SetStartSpeed,
        MotorCommand::SetDriveSpeed,
        MotorCommand::SetHomeSpeed,
        MotorCommand::SetAccelerationRate,
        MotorCommand::SetMotorDirection,
        MotorCommand::SetEncoderDirection,
        MotorCommand::GetInitialSpeed,
        MotorCommand::GetDriveSpeed,
        MotorCommand::GetHomeSpeed,
        MotorCommand::GetAccelerationRate,
        MotorCommand::GetMotorDirection,
        MotorCommand::GetEncoderDirection,
        MotorCommand::SetEncoderPosition,
        MotorCommand::SetLogicalPosition,
        MotorCommand::LineMoveAbs,
        MotorCommand::LineMoveInc,
        MotorCommand::QueryHomeInput,
        MotorCommand::QueryHomeStatus,
        MotorCommand::SwitchAuxOutput,
        MotorCommand::SetHomeTimeout,
        MotorCommand::SetHomeOffsetSpeed,
        MotorCommand::SetHomeChangeDirectionDelay,
        MotorCommand::ToggleEnableLine,
        MotorCommand::GetEstopState,
        MotorCommand::ClearEstopState,
        MotorCommand::QueryResetFlag,
        MotorCommand::ClearResetFlag,
        MotorCommand::GetVersionInfo,
        MotorCommand::MoveContinuous,
        MotorCommand::SlowStop,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Split a wire command byte into command and 1-based axis.
    ///
    /// Codes are spaced by 4, so the low two bits carry the axis.
    pub fn from_wire(wire: u8) -> Option<(Self, u8)> {
        let axis = (wire & 0x03) + 1;
        Self::from_code(wire & !0x03).map(|c| (c, axis))
    }

    /// Command answers with a value rather than an acknowledgement
    pub fn is_query(self) -> bool {
        matches!(
            self,
            MotorCommand::IsAxisBusy
                | MotorCommand::GetEncoderPosition
                | MotorCommand::GetLogicalPosition
                | MotorCommand::GetInitialSpeed
                | MotorCommand::GetDriveSpeed
                | MotorCommand::GetHomeSpeed
                | MotorCommand::GetAccelerationRate
                | MotorCommand::GetMotorDirection
                | MotorCommand::GetEncoderDirection
                | MotorCommand::QueryHomeInput
                | MotorCommand::QueryHomeStatus
                | MotorCommand::GetEstopState
                | MotorCommand::QueryResetFlag
                | MotorCommand::GetVersionInfo
        )
    }

    /// Setter whose value this query reads back
    pub fn setter(self) -> Option<MotorCommand> {
        match self {
            MotorCommand::GetEncoderPosition => Some(MotorCommand::SetEncoderPosition),
            MotorCommand::GetLogicalPosition => Some(MotorCommand::SetLogicalPosition),
            MotorCommand::GetInitialSpeed => Some(MotorCommand::SetStartSpeed),
            MotorCommand::GetDriveSpeed => Some(MotorCommand::SetDriveSpeed),
            MotorCommand::GetHomeSpeed => Some(MotorCommand::SetHomeSpeed),
            MotorCommand::GetAccelerationRate => Some(MotorCommand::SetAccelerationRate),
            MotorCommand::GetMotorDirection => Some(MotorCommand::SetMotorDirection),
            MotorCommand::GetEncoderDirection => Some(MotorCommand::SetEncoderDirection),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_multiples_of_four() {
        for cmd in MotorCommand::ALL {
            assert_eq!(cmd.code() % 4, 0, "{:?}", cmd);
            assert_eq!(MotorCommand::from_code(cmd.code()), Some(cmd));
        }
        assert_eq!(MotorCommand::GetVersionInfo.code(), 216);
        assert_eq!(MotorCommand::from_code(13), None);
    }

    #[test]
    fn test_from_wire_splits_axis() {
        assert_eq!(MotorCommand::from_wire(12), Some((MotorCommand::MoveInc, 1)));
        assert_eq!(MotorCommand::from_wire(13), Some((MotorCommand::MoveInc, 2)));
        assert_eq!(MotorCommand::from_wire(23), Some((MotorCommand::IsAxisBusy, 4)));
        assert_eq!(MotorCommand::from_wire(0), None);
    }

    #[test]
    fn test_query_setters_are_not_queries() {
        for cmd in MotorCommand::ALL {
            if let Some(setter) = cmd.setter() {
                assert!(cmd.is_query());
                assert!(!setter.is_query());
            }
        }
    }

    #[test]
    fn test_bus_error_display() {
        assert_eq!(
            BusError::Timeout(HandshakeStep::PeerAck).to_string(),
            "timeout waiting for peer ack"
        );
    }
}
