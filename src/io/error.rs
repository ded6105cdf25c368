// src/io/error.rs
//
// Typed I/O error shared by the TCP listeners, serial ports, bus transport and
// startup code.

use std::fmt;

/// I/O error carrying the device or channel it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    /// Failed to bind, accept or open a device
    Connection { device: String, message: String },
    /// An operation did not complete in time
    Timeout { device: String, operation: String },
    /// The peer spoke the protocol wrongly
    Protocol { device: String, message: String },
    Read { device: String, message: String },
    Write { device: String, message: String },
    /// Invalid or unreadable configuration
    Configuration { device: String, message: String },
    /// The device did not answer at all
    DeviceUnreachable { device: String, message: String },
}

impl IoError {
    pub fn connection(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn timeout(device: impl Into<String>, operation: impl Into<String>) -> Self {
        IoError::Timeout {
            device: device.into(),
            operation: operation.into(),
        }
    }

    pub fn protocol(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Protocol {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn read(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn write(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn configuration(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Configuration {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn unreachable(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::DeviceUnreachable {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Device or channel name the error belongs to
    pub fn device(&self) -> &str {
        match self {
            IoError::Connection { device, .. }
            | IoError::Timeout { device, .. }
            | IoError::Protocol { device, .. }
            | IoError::Read { device, .. }
            | IoError::Write { device, .. }
            | IoError::Configuration { device, .. }
            | IoError::DeviceUnreachable { device, .. } => device,
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Connection { device, message } => {
                write!(f, "{}: connection failed: {}", device, message)
            }
            IoError::Timeout { device, operation } => {
                write!(f, "{}: timed out during {}", device, operation)
            }
            IoError::Protocol { device, message } => {
                write!(f, "{}: protocol error: {}", device, message)
            }
            IoError::Read { device, message } => write!(f, "{}: read failed: {}", device, message),
            IoError::Write { device, message } => {
                write!(f, "{}: write failed: {}", device, message)
            }
            IoError::Configuration { device, message } => {
                write!(f, "{}: invalid configuration: {}", device, message)
            }
            IoError::DeviceUnreachable { device, message } => {
                write!(f, "{}: device unreachable: {}", device, message)
            }
        }
    }
}

impl std::error::Error for IoError {}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
