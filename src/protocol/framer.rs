// src/protocol/framer.rs
//
// STX/ETX frame extraction and checksum validation.
//
// The validator is stateless: it looks at a byte slice and reports the first
// complete frame it finds. `FrameAccumulator` adds the buffering the command
// channel needs when frames arrive split across TCP reads.

use std::fmt;
use std::ops::Range;

use super::base128;
use super::{ADDRESS_OFFSET, COMMAND_INDEX, ETX, MAX_COMMAND_FRAME_LEN, PARAMETER_INDEX, STX};
use crate::checksums::validate_frame_checksum;

// =============================================================================
// Types
// =============================================================================

/// Why a buffer did not yield a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// No STX..ETX span yet
    NeedMoreData,
    /// A complete span was found but its checksum is wrong.
    /// `end` is the buffer index of the span's ETX.
    ChecksumMismatch { end: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::NeedMoreData => write!(f, "incomplete frame"),
            FrameError::ChecksumMismatch { end } => {
                write!(f, "checksum mismatch in frame ending at {}", end)
            }
        }
    }
}

/// A validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination node (`address byte - 10`)
    pub node_address: i32,
    /// Frame bytes, STX through ETX inclusive
    pub bytes: Vec<u8>,
    /// Position of the frame within the buffer it was found in
    pub span: Range<usize>,
}

impl Frame {
    /// Command byte, if the frame is long enough to carry one.
    pub fn command(&self) -> Option<u8> {
        // Needs STX, address, command, checksum, ETX
        if self.bytes.len() < COMMAND_INDEX + 3 {
            return None;
        }
        self.bytes.get(COMMAND_INDEX).copied()
    }

    /// Base-128 parameter following the command byte, if present.
    pub fn parameter(&self) -> Option<i32> {
        let payload_end = self.bytes.len().checked_sub(2)?;
        if payload_end < PARAMETER_INDEX + base128::ENCODED_LEN {
            return None;
        }
        base128::decode_at(&self.bytes[..payload_end], PARAMETER_INDEX)
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Find and check the first complete frame in `buffer`.
///
/// The scan stops at the first ETX preceded by an STX; the frame starts at the
/// last STX before it, so stray STX bytes ahead of a real frame are skipped.
/// An ETX with no STX before it is ignored.
pub fn validate(buffer: &[u8]) -> Result<Frame, FrameError> {
    let mut last_stx: Option<usize> = None;

    for (i, &byte) in buffer.iter().enumerate() {
        match byte {
            STX => last_stx = Some(i),
            ETX => {
                let Some(start) = last_stx else {
                    continue;
                };
                let span = start..i + 1;
                let bytes = &buffer[span.clone()];
                if !validate_frame_checksum(bytes) {
                    return Err(FrameError::ChecksumMismatch { end: i });
                }
                return Ok(Frame {
                    node_address: bytes[1] as i32 - ADDRESS_OFFSET,
                    bytes: bytes.to_vec(),
                    span,
                });
            }
            _ => {}
        }
    }

    Err(FrameError::NeedMoreData)
}

// =============================================================================
// Accumulator
// =============================================================================

/// Buffers bytes until a complete frame is available.
///
/// Holds at most `capacity` bytes. Every span the validator reports, good or
/// bad, is consumed through its ETX; bytes after it stay buffered.
#[derive(Debug)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
    capacity: usize,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new(MAX_COMMAND_FRAME_LEN)
    }
}

impl FrameAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a chunk.
    ///
    /// When the chunk does not fit, the stale contents are dropped and the
    /// chunk (truncated to capacity) is kept. Returns the number of bytes
    /// discarded.
    pub fn push(&mut self, chunk: &[u8]) -> usize {
        if self.buffer.len() + chunk.len() <= self.capacity {
            self.buffer.extend_from_slice(chunk);
            return 0;
        }

        let kept = chunk.len().min(self.capacity);
        let discarded = self.buffer.len() + chunk.len() - kept;
        self.buffer.clear();
        self.buffer.extend_from_slice(&chunk[..kept]);
        discarded
    }

    /// Take the next frame out of the buffer.
    ///
    /// Returns `None` while no complete span is buffered.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        match validate(&self.buffer) {
            Ok(frame) => {
                self.buffer.drain(..frame.span.end);
                Some(Ok(frame))
            }
            Err(FrameError::ChecksumMismatch { end }) => {
                self.buffer.drain(..=end);
                Some(Err(FrameError::ChecksumMismatch { end }))
            }
            Err(FrameError::NeedMoreData) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can be pushed without discarding anything
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
