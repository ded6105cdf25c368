// src/bus/sim.rs
//
// Software model of the motor controller's side of the handshake bus.
//
// Used as the "simulated" bus backend and by tests. Handles are cheap clones
// sharing one controller, so a test can keep a handle after giving another to
// the transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BusDirection, BusLines, MotorCommand};
use crate::checksums::frame_checksum;
use crate::protocol::{build_value_reply, validate, ETX, STX};

/// Longest frame the model will buffer before discarding it as noise
const MAX_RX_FRAME: usize = 64;

/// Fault injection for the simulated controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBehavior {
    Normal,
    /// Never acknowledges a byte
    NeverAck,
    /// Holds RCLK low as if busy
    NotReady,
    /// Replies with a bad checksum
    CorruptReply,
    /// Accepts frames but never replies
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Listening,
    ReplyArmed(Vec<u8>),
    Replying { reply: Vec<u8>, index: usize },
}

#[derive(Debug)]
struct SimState {
    behavior: SimBehavior,
    mode: Mode,
    /// RCLK level
    signal: bool,
    /// Last TCLK level seen
    clock_high: bool,
    host_direction: BusDirection,
    host_data: u8,
    /// Byte latched on the last falling edge, released on the next rising edge
    latched: Option<u8>,
    rx: Vec<u8>,
    falling_edges: usize,
    received: Vec<Vec<u8>>,
    commands: Vec<(MotorCommand, u8, Option<i32>)>,
    registers: HashMap<(MotorCommand, u8), i32>,
    busy: HashMap<u8, u32>,
    busy_polls_per_move: u32,
    version: i32,
}

/// Simulated motor controller implementing `BusLines`
#[derive(Debug, Clone)]
pub struct SimulatedController {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    pub fn new() -> Self {
        Self::with_behavior(SimBehavior::Normal)
    }

    pub fn with_behavior(behavior: SimBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                behavior,
                mode: Mode::Listening,
                signal: true,
                clock_high: true,
                host_direction: BusDirection::Input,
                host_data: 0,
                latched: None,
                rx: Vec::new(),
                falling_edges: 0,
                received: Vec::new(),
                commands: Vec::new(),
                registers: HashMap::new(),
                busy: HashMap::new(),
                busy_polls_per_move: 0,
                version: 0x0100,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_behavior(&self, behavior: SimBehavior) {
        self.lock().behavior = behavior;
    }

    /// Value returned for `GetVersionInfo`
    pub fn set_version(&self, version: i32) {
        self.lock().version = version;
    }

    /// Number of `IsAxisBusy` polls that report busy after each move
    pub fn set_busy_polls(&self, polls: u32) {
        self.lock().busy_polls_per_move = polls;
    }

    /// Every complete frame received, in order
    pub fn received_frames(&self) -> Vec<Vec<u8>> {
        self.lock().received.clone()
    }

    /// Decoded commands, in order
    pub fn command_log(&self) -> Vec<(MotorCommand, u8, Option<i32>)> {
        self.lock().commands.clone()
    }

    pub fn register(&self, command: MotorCommand, axis: u8) -> i32 {
        self.lock().registers.get(&(command, axis)).copied().unwrap_or(0)
    }

    pub fn falling_edges(&self) -> usize {
        self.lock().falling_edges
    }

    pub fn clock_high(&self) -> bool {
        self.lock().clock_high
    }

    pub fn host_direction(&self) -> BusDirection {
        self.lock().host_direction
    }
}

impl SimState {
    fn on_clock(&mut self, high: bool) {
        let falling = self.clock_high && !high;
        let rising = !self.clock_high && high;
        self.clock_high = high;
        if falling {
            self.falling_edges += 1;
        }

        match std::mem::replace(&mut self.mode, Mode::Listening) {
            Mode::Listening => {
                if falling && self.behavior != SimBehavior::NeverAck {
                    self.latched = Some(self.host_data);
                    self.signal = false;
                } else if rising {
                    if let Some(byte) = self.latched.take() {
                        self.signal = true;
                        self.accept_byte(byte);
                    }
                }
            }
            Mode::ReplyArmed(reply) => {
                if high {
                    self.signal = false;
                    self.mode = Mode::Replying { reply, index: 0 };
                } else {
                    self.mode = Mode::ReplyArmed(reply);
                }
            }
            Mode::Replying { reply, mut index } => {
                if falling {
                    self.signal = true;
                    index += 1;
                    self.mode = Mode::Replying { reply, index };
                } else if rising && index < reply.len() {
                    self.signal = false;
                    self.mode = Mode::Replying { reply, index };
                } else if rising {
                    self.signal = true;
                } else {
                    self.mode = Mode::Replying { reply, index };
                }
            }
        }
    }

    fn accept_byte(&mut self, byte: u8) {
        if byte == STX {
            self.rx.clear();
        }
        self.rx.push(byte);
        if self.rx.len() > MAX_RX_FRAME {
            self.rx.clear();
            return;
        }
        if byte != ETX || self.rx.first() != Some(&STX) {
            return;
        }

        let frame = std::mem::take(&mut self.rx);
        self.received.push(frame.clone());

        let Some(mut reply) = self.respond(&frame) else {
            return;
        };
        match self.behavior {
            SimBehavior::Silent => {}
            SimBehavior::CorruptReply => {
                let chk = reply.len() - 2;
                reply[chk] ^= 0x01;
                self.mode = Mode::ReplyArmed(reply);
            }
            _ => self.mode = Mode::ReplyArmed(reply),
        }
    }

    /// Execute a frame against the controller model.
    fn respond(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        let frame = validate(bytes).ok()?;
        let wire = frame.command()?;
        let parameter = frame.parameter();

        let Some((command, axis)) = MotorCommand::from_wire(wire) else {
            return Some(ack_frame(b'0'));
        };
        self.commands.push((command, axis, parameter));

        let value = match command {
            MotorCommand::GetVersionInfo => Some(self.version),
            MotorCommand::IsAxisBusy => {
                let remaining = self.busy.entry(axis).or_insert(0);
                if *remaining > 0 {
                    *remaining -= 1;
                    Some(1)
                } else {
                    Some(0)
                }
            }
            MotorCommand::MoveAbs | MotorCommand::MoveInc => {
                let distance = parameter.unwrap_or(0);
                for reg in [MotorCommand::SetLogicalPosition, MotorCommand::SetEncoderPosition] {
                    let pos = self.registers.entry((reg, axis)).or_insert(0);
                    *pos = if command == MotorCommand::MoveAbs {
                        distance
                    } else {
                        pos.wrapping_add(distance)
                    };
                }
                self.busy.insert(axis, self.busy_polls_per_move);
                None
            }
            query if query.is_query() => Some(
                query
                    .setter()
                    .and_then(|setter| self.registers.get(&(setter, axis)).copied())
                    .unwrap_or(0),
            ),
            setter => {
                if let Some(value) = parameter {
                    self.registers.insert((setter, axis), value);
                }
                None
            }
        };

        Some(match value {
            Some(v) => build_value_reply(v),
            None => ack_frame(b'1'),
        })
    }
}

/// `STX, code, checksum, ETX`
fn ack_frame(code: u8) -> Vec<u8> {
    vec![STX, code, frame_checksum(&[code]), ETX]
}

impl BusLines for SimulatedController {
    fn set_direction(&mut self, direction: BusDirection) {
        self.lock().host_direction = direction;
    }

    fn write_data(&mut self, byte: u8) {
        self.lock().host_data = byte;
    }

    fn read_data(&mut self) -> u8 {
        let state = self.lock();
        match &state.mode {
            Mode::Replying { reply, index } => reply.get(*index).copied().unwrap_or(0xFF),
            _ => 0xFF,
        }
    }

    fn peer_signal(&mut self) -> bool {
        let state = self.lock();
        if state.behavior == SimBehavior::NotReady {
            return false;
        }
        state.signal
    }

    fn set_clock(&mut self, high: bool) {
        self.lock().on_clock(high);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_command_frame, PendingCommand};

    /// Drive one byte out the way the transport does
    fn clock_out(sim: &mut SimulatedController, byte: u8) {
        sim.write_data(byte);
        sim.set_clock(false);
        assert!(!sim.peer_signal(), "byte {:#04x} not acked", byte);
        sim.set_clock(true);
        assert!(sim.peer_signal());
    }

    #[test]
    fn test_ack_frame_validates() {
        assert!(validate(&ack_frame(b'1')).is_ok());
    }

    #[test]
    fn test_frame_latched_and_reply_clocked_out() {
        let mut sim = SimulatedController::new();
        sim.set_version(7);
        let frame = build_command_frame(&PendingCommand::new(216, 1, None));
        for &b in &frame {
            clock_out(&mut sim, b);
        }
        assert_eq!(sim.received_frames(), vec![frame]);

        // Reply half
        sim.set_clock(true);
        let mut reply = Vec::new();
        loop {
            assert!(!sim.peer_signal());
            let b = sim.read_data();
            reply.push(b);
            sim.set_clock(false);
            assert!(sim.peer_signal());
            sim.set_clock(true);
            if b == ETX {
                break;
            }
        }
        assert_eq!(reply, build_value_reply(7));
        assert!(sim.peer_signal());
    }

    #[test]
    fn test_setter_then_query() {
        let mut sim = SimulatedController::new();
        let mut state = sim.lock();
        state.respond(&build_command_frame(&PendingCommand::new(36, 2, Some(4000))));
        let reply = state.respond(&build_command_frame(&PendingCommand::new(60, 2, None)));
        drop(state);
        assert_eq!(reply, Some(build_value_reply(4000)));
        assert_eq!(sim.register(MotorCommand::SetDriveSpeed, 2), 4000);
        assert_eq!(sim.command_log().len(), 2);
        sim.set_direction(BusDirection::Output);
        assert_eq!(sim.host_direction(), BusDirection::Output);
    }

    #[test]
    fn test_busy_polls_after_move() {
        let sim = SimulatedController::new();
        sim.set_busy_polls(2);
        let mut state = sim.lock();
        state.respond(&build_command_frame(&PendingCommand::new(12, 1, Some(100))));
        let busy = build_command_frame(&PendingCommand::new(20, 1, None));
        assert_eq!(state.respond(&busy), Some(build_value_reply(1)));
        assert_eq!(state.respond(&busy), Some(build_value_reply(1)));
        assert_eq!(state.respond(&busy), Some(build_value_reply(0)));
    }

    #[test]
    fn test_unknown_command_nacks() {
        let sim = SimulatedController::new();
        let reply = sim.lock().respond(&[STX, 1, 0xF1, 0xF0 | 0x80, ETX]);
        assert_eq!(reply, Some(ack_frame(b'0')));
    }
}
