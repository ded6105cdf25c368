// src/settings.rs
//
// Bridge configuration: TOML file with defaults for every key, plus the
// key=value config file format used by earlier deployments.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::board::BoardConfig;
use crate::bus::BusConfig;
use crate::io::serial::Parity;
use crate::io::IoError;
use crate::protocol::{MAX_BUS_REPLY_LEN, MAX_COMMAND_FRAME_LEN};

const SETTINGS_DEVICE: &str = "settings";

/// Bus backends that can be selected in `[bus] backend`
pub const BUS_BACKENDS: &[&str] = &["simulated"];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NetworkSettings {
    /// Bind address
    #[serde(default = "default_ip")]
    pub ip: [u8; 4],
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    /// Command channel frame buffer capacity
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Answer -1 when the motor controller does not reply
    #[serde(default = "default_true")]
    pub unreachable_reply: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BusSettings {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_max_reply_len")]
    pub max_reply_len: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BoardSettings {
    /// Query the controller's version at startup and refuse to run without a reply
    #[serde(default = "default_true")]
    pub startup_check: bool,
    #[serde(default = "default_input_poll_ms")]
    pub input_poll_ms: u64,
    #[serde(default = "default_watched_input_bit")]
    pub watched_input_bit: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SerialSettings {
    /// Bridge channel number (1-3)
    pub number: u8,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// TCP port; 10000 + number when unset
    #[serde(default)]
    pub tcp_port: Option<u16>,
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct LoggingSettings {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BridgeSettings {
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub board: BoardSettings,
    #[serde(default)]
    pub serial: Vec<SerialSettings>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_ip() -> [u8; 4] {
    [0, 0, 0, 0]
}
fn default_command_port() -> u16 {
    23
}
fn default_max_frame_len() -> usize {
    MAX_COMMAND_FRAME_LEN
}
fn default_true() -> bool {
    true
}
fn default_backend() -> String {
    "simulated".to_string()
}
fn default_step_timeout_ms() -> u64 {
    1000
}
fn default_attempts() -> u32 {
    3
}
fn default_max_reply_len() -> usize {
    MAX_BUS_REPLY_LEN
}
fn default_input_poll_ms() -> u64 {
    10
}
fn default_watched_input_bit() -> u8 {
    5
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_ring_capacity() -> usize {
    1024
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            command_port: default_command_port(),
            max_frame_len: default_max_frame_len(),
            unreachable_reply: true,
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            step_timeout_ms: default_step_timeout_ms(),
            attempts: default_attempts(),
            max_reply_len: default_max_reply_len(),
        }
    }
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            startup_check: true,
            input_poll_ms: default_input_poll_ms(),
            watched_input_bit: default_watched_input_bit(),
        }
    }
}

impl NetworkSettings {
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        let [a, b, c, d] = self.ip;
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), port)
    }
}

impl SerialSettings {
    /// Defaults for bridge channel `number`
    pub fn for_port(number: u8) -> Self {
        Self {
            number,
            path: format!("/dev/ttyS{}", number.saturating_sub(1)),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
            tcp_port: None,
            ring_capacity: default_ring_capacity(),
        }
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_port.unwrap_or(10000 + self.number as u16)
    }
}

impl BridgeSettings {
    /// Load and validate a TOML settings file.
    pub fn load(path: &Path) -> Result<Self, IoError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IoError::configuration(SETTINGS_DEVICE, format!("read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, IoError> {
        let settings: BridgeSettings = toml::from_str(text)
            .map_err(|e| IoError::configuration(SETTINGS_DEVICE, e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), IoError> {
        if !BUS_BACKENDS.contains(&self.bus.backend.as_str()) {
            return Err(IoError::configuration(
                SETTINGS_DEVICE,
                format!(
                    "unknown bus backend '{}' (expected one of: {})",
                    self.bus.backend,
                    BUS_BACKENDS.join(", ")
                ),
            ));
        }
        if self.bus.attempts == 0 {
            return Err(IoError::configuration(SETTINGS_DEVICE, "bus.attempts must be at least 1"));
        }
        if self.network.max_frame_len < 3 {
            return Err(IoError::configuration(
                SETTINGS_DEVICE,
                "network.max_frame_len is too small to hold a frame",
            ));
        }
        if self.board.watched_input_bit > 7 {
            return Err(IoError::configuration(
                SETTINGS_DEVICE,
                "board.watched_input_bit must be 0-7",
            ));
        }

        let mut numbers = HashSet::new();
        let mut ports = HashSet::from([self.network.command_port]);
        for serial in &self.serial {
            if !numbers.insert(serial.number) {
                return Err(IoError::configuration(
                    SETTINGS_DEVICE,
                    format!("serial port {} configured twice", serial.number),
                ));
            }
            if !ports.insert(serial.tcp_port()) {
                return Err(IoError::configuration(
                    SETTINGS_DEVICE,
                    format!("TCP port {} used more than once", serial.tcp_port()),
                ));
            }
            if serial.ring_capacity == 0 {
                return Err(IoError::configuration(
                    SETTINGS_DEVICE,
                    format!("serial port {} ring_capacity must be non-zero", serial.number),
                ));
            }
        }
        Ok(())
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            step_timeout: Duration::from_millis(self.bus.step_timeout_ms),
            attempts: self.bus.attempts,
            max_reply_len: self.bus.max_reply_len,
        }
    }

    pub fn board_config(&self) -> BoardConfig {
        BoardConfig {
            input_poll: Duration::from_millis(self.board.input_poll_ms),
            watched_input_bit: self.board.watched_input_bit,
        }
    }

    fn serial_entry(&mut self, number: u8) -> &mut SerialSettings {
        let index = match self.serial.iter().position(|s| s.number == number) {
            Some(index) => index,
            None => {
                self.serial.push(SerialSettings::for_port(number));
                self.serial.len() - 1
            }
        };
        &mut self.serial[index]
    }

    /// Read a legacy key=value config file over these settings.
    pub fn load_legacy_config(&mut self, path: &Path) -> Result<(), IoError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IoError::configuration(SETTINGS_DEVICE, format!("read {}: {}", path.display(), e))
        })?;
        self.apply_legacy_config(&text)
    }

    /// Apply legacy `key=value` settings.
    ///
    /// Reads `IP1`..`IP4` and, for ports 1-3, `Serial{n}Baud` and the format
    /// keys `Serial{n}DataBits`, `Serial{n}Parity`, `Serial{n}StopBits`. The
    /// format keys only take effect when all three are present.
    pub fn apply_legacy_config(&mut self, text: &str) -> Result<(), IoError> {
        let values = parse_key_values(text);
        let get = |key: &str| values.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        for (i, key) in ["IP1", "IP2", "IP3", "IP4"].iter().enumerate() {
            if let Some(value) = get(key) {
                self.network.ip[i] = parse_number(key, value)?;
            }
        }

        for n in 1..=3u8 {
            let baud_key = format!("Serial{}Baud", n);
            if let Some(value) = get(&baud_key) {
                let baud = parse_number(&baud_key, value)?;
                self.serial_entry(n).baud_rate = baud;
            }

            let data_key = format!("Serial{}DataBits", n);
            let parity_key = format!("Serial{}Parity", n);
            let stop_key = format!("Serial{}StopBits", n);
            let (Some(data), Some(parity), Some(stop)) =
                (get(&data_key), get(&parity_key), get(&stop_key))
            else {
                continue;
            };

            let data_bits = parse_number(&data_key, data)?;
            let stop_bits = parse_number(&stop_key, stop)?;
            let parity = Parity::from_name(parity).unwrap_or(Parity::None);

            let entry = self.serial_entry(n);
            entry.data_bits = data_bits;
            entry.parity = parity;
            entry.stop_bits = stop_bits;
        }

        self.validate()
    }
}

/// `key=value` lines; blank lines and `#` comments skipped.
fn parse_key_values(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, IoError> {
    value.parse().map_err(|_| {
        IoError::configuration(SETTINGS_DEVICE, format!("invalid value '{}' for {}", value, key))
    })
}
