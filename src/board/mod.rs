// src/board/mod.rs
//
// The bridge board itself (node 3): digital outputs, two input banks, vibrate
// control for the first two axes, and the input-change timer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

mod monitor;
mod vibrate;

pub use monitor::InputMonitor;
pub use vibrate::Vibrate;

use crate::bus::{BusLines, BusTransport};

// =============================================================================
// Command codes
// =============================================================================

pub const CMD_CHANGE_IP: u8 = 1;
pub const CMD_SET_OUTPUTS: u8 = 32;
pub const CMD_READ_INPUTS: u8 = 228;
pub const CMD_SET_OUTPUT_BIT: u8 = 229;
pub const CMD_CLEAR_OUTPUT_BIT: u8 = 230;
pub const CMD_START_VIBRATE_AXIS1: u8 = 231;
pub const CMD_START_VIBRATE_AXIS2: u8 = 232;
pub const CMD_STOP_VIBRATE_AXIS1: u8 = 233;
pub const CMD_STOP_VIBRATE_AXIS2: u8 = 234;
pub const CMD_INPUT_CHANGED_MS: u8 = 235;

/// Reply for unknown commands and bad parameters
pub const REPLY_ERROR: i32 = -1;
pub const REPLY_OK: i32 = 1;

// =============================================================================
// I/O expander
// =============================================================================

/// Latched outputs and input banks behind the board's expander chips
pub trait IoExpander: Send {
    fn write_outputs(&mut self, value: u8);
    /// Read input bank 0 or 1
    fn read_inputs(&mut self, bank: u8) -> u8;
}

#[derive(Debug, Default)]
struct MemoryPins {
    outputs: u8,
    inputs: [u8; 2],
    writes: usize,
}

/// In-memory expander. Clones share the same pins.
#[derive(Debug, Clone, Default)]
pub struct MemoryIoExpander {
    pins: Arc<Mutex<MemoryPins>>,
}

impl MemoryIoExpander {
    pub fn new() -> Self {
        Self::default()
    }

    fn pins(&self) -> MutexGuard<'_, MemoryPins> {
        self.pins.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last value written to the outputs
    pub fn outputs(&self) -> u8 {
        self.pins().outputs
    }

    pub fn output_writes(&self) -> usize {
        self.pins().writes
    }

    pub fn set_inputs(&self, bank: u8, value: u8) {
        if let Some(slot) = self.pins().inputs.get_mut(bank as usize) {
            *slot = value;
        }
    }
}

impl IoExpander for MemoryIoExpander {
    fn write_outputs(&mut self, value: u8) {
        let mut pins = self.pins();
        pins.outputs = value;
        pins.writes += 1;
    }

    fn read_inputs(&mut self, bank: u8) -> u8 {
        self.pins().inputs.get(bank as usize).copied().unwrap_or(0)
    }
}

// =============================================================================
// Board
// =============================================================================

/// Local board settings
#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub input_poll: Duration,
    pub watched_input_bit: u8,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            input_poll: Duration::from_millis(10),
            watched_input_bit: 5,
        }
    }
}

pub struct LocalBoard<X: IoExpander> {
    expander: X,
    outputs: u8,
    vibrate: [Vibrate; 2],
    monitor: InputMonitor,
}

impl<X: IoExpander> LocalBoard<X> {
    pub fn new(expander: X, config: BoardConfig) -> Self {
        Self {
            expander,
            outputs: 0,
            vibrate: [Vibrate::default(), Vibrate::default()],
            monitor: InputMonitor::new(config.watched_input_bit, config.input_poll),
        }
    }

    pub fn outputs(&self) -> u8 {
        self.outputs
    }

    pub fn vibrate(&self, axis: u8) -> Option<&Vibrate> {
        self.vibrate.get(axis.checked_sub(1)? as usize)
    }

    /// Push the output byte to the expander.
    pub fn refresh_outputs(&mut self) {
        self.expander.write_outputs(self.outputs);
    }

    /// Run a node-3 command. `None` means the command has no reply.
    pub fn handle_command(&mut self, command: u8, parameter: Option<i32>) -> Option<i32> {
        self.handle_command_at(command, parameter, Instant::now())
    }

    fn handle_command_at(&mut self, command: u8, parameter: Option<i32>, now: Instant) -> Option<i32> {
        let reply = match command {
            // Address changes are not supported; the command is accepted silently
            CMD_CHANGE_IP => return None,
            CMD_SET_OUTPUTS => match parameter {
                Some(value) => {
                    self.outputs = value as u8;
                    REPLY_OK
                }
                None => REPLY_ERROR,
            },
            CMD_READ_INPUTS => {
                let bank0 = self.expander.read_inputs(0) as i32;
                let bank1 = self.expander.read_inputs(1) as i32;
                bank0 + (bank1 << 8)
            }
            CMD_SET_OUTPUT_BIT | CMD_CLEAR_OUTPUT_BIT => {
                match parameter.and_then(output_bit) {
                    Some(bit) if command == CMD_SET_OUTPUT_BIT => {
                        self.outputs |= 1 << bit;
                        REPLY_OK
                    }
                    Some(bit) => {
                        self.outputs &= !(1 << bit);
                        REPLY_OK
                    }
                    None => REPLY_ERROR,
                }
            }
            CMD_START_VIBRATE_AXIS1 | CMD_START_VIBRATE_AXIS2 => match parameter {
                Some(distance) => {
                    let axis = (command - CMD_START_VIBRATE_AXIS1) as usize;
                    self.vibrate[axis].start(distance);
                    tlog!("[board] Vibrate axis {} started, distance {}", axis + 1, distance);
                    REPLY_OK
                }
                None => REPLY_ERROR,
            },
            CMD_STOP_VIBRATE_AXIS1 | CMD_STOP_VIBRATE_AXIS2 => {
                let axis = (command - CMD_STOP_VIBRATE_AXIS1) as usize;
                self.vibrate[axis].stop();
                tlog!("[board] Vibrate axis {} stopped", axis + 1);
                REPLY_OK
            }
            CMD_INPUT_CHANGED_MS => self.monitor.elapsed_ms(now),
            other => {
                tlog!("[board] Unknown command {}", other);
                REPLY_ERROR
            }
        };
        Some(reply)
    }

    /// Background work between commands: input sampling and vibrate moves.
    pub fn poll<L: BusLines>(&mut self, bus: &mut BusTransport<L>) {
        let now = Instant::now();
        if self.monitor.due(now) {
            let bank0 = self.expander.read_inputs(0);
            if self.monitor.sample(bank0, now) {
                dlog!("[board] Watched input changed, bank0={:#04x}", bank0);
            }
        }

        for (i, vibrate) in self.vibrate.iter_mut().enumerate() {
            vibrate.poll(i as u8 + 1, bus);
        }
    }
}

/// Output bit addressed by a 1-based output number counted from the top bit.
fn output_bit(number: i32) -> Option<u32> {
    match 8i32.checked_sub(number)? {
        bit @ 0..=7 => Some(bit as u32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, MotorCommand, SimulatedController};

    fn board() -> (LocalBoard<MemoryIoExpander>, MemoryIoExpander) {
        let pins = MemoryIoExpander::new();
        (LocalBoard::new(pins.clone(), BoardConfig::default()), pins)
    }

    #[test]
    fn test_set_outputs_then_refresh() {
        let (mut board, pins) = board();
        assert_eq!(board.handle_command(CMD_SET_OUTPUTS, Some(5)), Some(1));
        assert_eq!(board.outputs(), 5);
        assert_eq!(pins.outputs(), 0);
        board.refresh_outputs();
        assert_eq!(pins.outputs(), 5);
    }

    #[test]
    fn test_set_outputs_truncates_to_byte() {
        let (mut board, _) = board();
        board.handle_command(CMD_SET_OUTPUTS, Some(0x1FF));
        assert_eq!(board.outputs(), 0xFF);
    }

    #[test]
    fn test_read_inputs_combines_banks() {
        let (mut board, pins) = board();
        pins.set_inputs(0, 0x12);
        pins.set_inputs(1, 0x34);
        assert_eq!(board.handle_command(CMD_READ_INPUTS, None), Some(0x3412));
    }

    #[test]
    fn test_output_bits_counted_from_top() {
        let (mut board, _) = board();
        assert_eq!(board.handle_command(CMD_SET_OUTPUT_BIT, Some(1)), Some(1));
        assert_eq!(board.outputs(), 0x80);
        assert_eq!(board.handle_command(CMD_SET_OUTPUT_BIT, Some(8)), Some(1));
        assert_eq!(board.outputs(), 0x81);
        assert_eq!(board.handle_command(CMD_CLEAR_OUTPUT_BIT, Some(1)), Some(1));
        assert_eq!(board.outputs(), 0x01);
    }

    #[test]
    fn test_output_bit_out_of_range() {
        let (mut board, _) = board();
        assert_eq!(board.handle_command(CMD_SET_OUTPUT_BIT, Some(0)), Some(-1));
        assert_eq!(board.handle_command(CMD_SET_OUTPUT_BIT, Some(9)), Some(-1));
        assert_eq!(board.handle_command(CMD_CLEAR_OUTPUT_BIT, None), Some(-1));
        assert_eq!(board.outputs(), 0);
    }

    #[test]
    fn test_change_ip_has_no_reply() {
        let (mut board, _) = board();
        assert_eq!(board.handle_command(CMD_CHANGE_IP, Some(1)), None);
    }

    #[test]
    fn test_unknown_command() {
        let (mut board, _) = board();
        assert_eq!(board.handle_command(99, Some(1)), Some(-1));
        assert_eq!(board.handle_command(CMD_SET_OUTPUTS, None), Some(-1));
    }

    #[test]
    fn test_vibrate_start_stop() {
        let (mut board, _) = board();
        assert_eq!(board.handle_command(CMD_START_VIBRATE_AXIS2, Some(40)), Some(1));
        assert!(board.vibrate(2).is_some_and(|v| v.is_enabled()));
        assert!(!board.vibrate(1).is_some_and(|v| v.is_enabled()));
        assert_eq!(board.handle_command(CMD_STOP_VIBRATE_AXIS2, None), Some(1));
        assert!(!board.vibrate(2).is_some_and(|v| v.is_enabled()));
        assert!(board.vibrate(0).is_none());
    }

    #[test]
    fn test_input_changed_elapsed() {
        let (mut board, _) = board();
        let later = Instant::now() + Duration::from_millis(500);
        let elapsed = board.handle_command_at(CMD_INPUT_CHANGED_MS, None, later);
        assert!(elapsed.is_some_and(|ms| ms >= 500));
    }

    #[test]
    fn test_poll_drives_vibrate() {
        let (mut board, _) = board();
        let sim = SimulatedController::new();
        let mut bus = BusTransport::new(
            sim.clone(),
            BusConfig {
                step_timeout: Duration::from_millis(5),
                ..BusConfig::default()
            },
        );
        board.handle_command(CMD_START_VIBRATE_AXIS1, Some(30));
        board.poll(&mut bus);
        board.poll(&mut bus);

        let moves: Vec<_> = sim
            .command_log()
            .into_iter()
            .filter(|(cmd, _, _)| *cmd == MotorCommand::MoveInc)
            .collect();
        assert_eq!(
            moves,
            vec![
                (MotorCommand::MoveInc, 1, Some(30)),
                (MotorCommand::MoveInc, 1, Some(-30))
            ]
        );
    }
}
