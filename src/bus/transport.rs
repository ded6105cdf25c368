// src/bus/transport.rs
//
// Handshake transport: frame send, reply receive, retries and command helpers.
//
// Every wait is bounded by the step timeout. Any failure restores the lines
// (clock high, data bus input) and returns the state machine to Idle.

use std::time::{Duration, Instant};

use super::{BusDirection, BusError, BusLines, BusState, HandshakeStep, MotorCommand};
use crate::protocol::{base128, build_command_frame, validate, PendingCommand, ETX, MAX_BUS_REPLY_LEN};

/// Transport tuning
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Upper bound for every handshake wait
    pub step_timeout: Duration,
    /// Full send+receive cycles per `transceive`
    pub attempts: u32,
    /// Longest reply accepted
    pub max_reply_len: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_millis(1000),
            attempts: 3,
            max_reply_len: MAX_BUS_REPLY_LEN,
        }
    }
}

/// Master side of the handshake bus
pub struct BusTransport<L: BusLines> {
    lines: L,
    config: BusConfig,
    state: BusState,
}

impl<L: BusLines> BusTransport<L> {
    /// Take ownership of the lines and park them idle.
    pub fn new(mut lines: L, config: BusConfig) -> Self {
        lines.set_direction(BusDirection::Input);
        lines.set_clock(true);
        Self {
            lines,
            config,
            state: BusState::Idle,
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn lines(&self) -> &L {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut L {
        &mut self.lines
    }

    // =========================================================================
    // Handshake halves
    // =========================================================================

    /// Wait until RCLK reads `level`.
    fn wait_for_peer(&mut self, level: bool, step: HandshakeStep) -> Result<(), BusError> {
        let deadline = Instant::now() + self.config.step_timeout;
        loop {
            if self.lines.peer_signal() == level {
                return Ok(());
            }
            if Instant::now() >= deadline {
                self.state = BusState::TimedOut;
                return Err(BusError::Timeout(step));
            }
            std::thread::yield_now();
        }
    }

    /// Restore idle line levels after a failure.
    fn abort(&mut self) {
        self.lines.set_clock(true);
        self.lines.set_direction(BusDirection::Input);
        self.state = BusState::Idle;
    }

    /// Clock a frame out to the peer, one byte per handshake.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), BusError> {
        let result = self.send_bytes(frame);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn send_bytes(&mut self, frame: &[u8]) -> Result<(), BusError> {
        self.state = BusState::CheckReady;
        if !self.lines.peer_signal() {
            return Err(BusError::PeerNotReady);
        }

        self.lines.set_direction(BusDirection::Output);
        for &byte in frame {
            self.state = BusState::SendByte;
            self.lines.write_data(byte);
            self.lines.set_clock(false);

            self.state = BusState::WaitAck;
            self.wait_for_peer(false, HandshakeStep::PeerAck)?;
            self.lines.set_clock(true);
            self.wait_for_peer(true, HandshakeStep::PeerRelease)?;

            self.state = BusState::NextByte;
        }
        self.lines.set_direction(BusDirection::Input);
        self.state = BusState::Done;
        Ok(())
    }

    /// Clock a reply in from the peer, up to and including its ETX.
    pub fn receive(&mut self) -> Result<Vec<u8>, BusError> {
        let result = self.receive_bytes();
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn receive_bytes(&mut self) -> Result<Vec<u8>, BusError> {
        self.state = BusState::Receiving;
        self.lines.set_direction(BusDirection::Input);
        self.lines.set_clock(true);
        self.wait_for_peer(false, HandshakeStep::ReplyStart)?;

        let mut reply = Vec::new();
        loop {
            let byte = self.lines.read_data();
            if reply.len() >= self.config.max_reply_len {
                return Err(BusError::ReplyOverflow);
            }
            reply.push(byte);

            self.lines.set_clock(false);
            self.wait_for_peer(true, HandshakeStep::ReplyRelease)?;
            self.lines.set_clock(true);

            if byte == ETX {
                break;
            }
            self.wait_for_peer(false, HandshakeStep::NextReplyByte)?;
        }

        self.state = BusState::Done;
        Ok(reply)
    }

    // =========================================================================
    // Request/reply
    // =========================================================================

    /// Send a frame and collect the peer's reply, retrying failed cycles.
    ///
    /// A cycle fails on a send error, a receive error, an empty reply or a
    /// reply whose checksum does not validate. Returns an empty vector when
    /// every attempt failed.
    pub fn transceive(&mut self, frame: &[u8]) -> Vec<u8> {
        dlog!("[bus] -> {}", hex::encode(frame));

        for attempt in 1..=self.config.attempts {
            if let Err(e) = self.send(frame) {
                dlog!("[bus] attempt {}: send failed: {}", attempt, e);
                continue;
            }

            let reply = match self.receive() {
                Ok(reply) => reply,
                Err(e) => {
                    dlog!("[bus] attempt {}: receive failed: {}", attempt, e);
                    continue;
                }
            };

            if reply.is_empty() {
                dlog!("[bus] attempt {}: empty reply", attempt);
                continue;
            }
            if let Err(e) = validate(&reply) {
                dlog!("[bus] attempt {}: invalid reply {}: {}", attempt, hex::encode(&reply), e);
                continue;
            }

            dlog!("[bus] <- {}", hex::encode(&reply));
            return reply;
        }

        tlog!(
            "[bus] No reply after {} attempts to {}",
            self.config.attempts,
            hex::encode(frame)
        );
        self.state = BusState::Idle;
        Vec::new()
    }

    /// Run one motor controller command and interpret its reply.
    ///
    /// Long replies carry a base-128 value at offset 1; short ones carry an
    /// acknowledgement byte (`'1'`, `'0'` or a raw code). `None` means the
    /// controller did not answer.
    pub fn send_command(
        &mut self,
        command: MotorCommand,
        axis: u8,
        parameter: Option<i32>,
    ) -> Option<i32> {
        let pending = PendingCommand::new(command.code(), axis, parameter);
        let reply = self.transceive(&build_command_frame(&pending));
        interpret_reply(&reply)
    }
}

/// Decode a controller reply into a value.
pub fn interpret_reply(reply: &[u8]) -> Option<i32> {
    match reply.len() {
        0 => None,
        len if len > base128::ENCODED_LEN => base128::decode_at(reply, 1),
        _ => reply.get(1).map(|&b| match b {
            b'1' => 1,
            b'0' => 0,
            other => other as i32,
        }),
    }
}
