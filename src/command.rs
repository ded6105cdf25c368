// src/command.rs
//
// Command channel: bytes from the TCP reader are staged in a ring, framed by
// the accumulator and handed to the packet handler one frame at a time, in
// arrival order. Replies go back on the channel's current connection.

use std::sync::Arc;

use crate::io::{ChannelLink, RingBuffer};
use crate::protocol::{build_value_reply, FrameAccumulator, FrameError};
use crate::router::{Dispatch, PacketHandler};

/// Value sent when the motor controller does not answer
const UNREACHABLE_REPLY: i32 = -1;

pub struct CommandChannel {
    rx: Arc<RingBuffer>,
    link: ChannelLink,
    accumulator: FrameAccumulator,
    unreachable_reply: bool,
}

impl CommandChannel {
    pub fn new(rx: Arc<RingBuffer>, link: ChannelLink, max_frame_len: usize, unreachable_reply: bool) -> Self {
        Self {
            rx,
            link,
            accumulator: FrameAccumulator::new(max_frame_len),
            unreachable_reply,
        }
    }

    pub fn link(&self) -> &ChannelLink {
        &self.link
    }

    /// Process everything received since the last call.
    ///
    /// The backlog is fed to the accumulator no faster than it has room for,
    /// so only a single unterminated span longer than the frame limit is ever
    /// discarded. Returns the number of frames handled (valid or not).
    pub fn poll<H: PacketHandler>(&mut self, handler: &mut H) -> usize {
        let incoming = self.rx.drain();
        let mut pending = incoming.as_slice();
        let mut handled = self.handle_buffered(handler);

        while !pending.is_empty() {
            let room = self.accumulator.remaining();
            let take = if room > 0 {
                room.min(pending.len())
            } else {
                pending.len().min(self.accumulator.capacity())
            };
            let discarded = self.accumulator.push(&pending[..take]);
            if discarded > 0 {
                tlog!("[command] Frame buffer overflow, discarded {} bytes", discarded);
            }
            pending = &pending[take..];
            handled += self.handle_buffered(handler);
        }
        handled
    }

    /// Hand every complete frame in the accumulator to `handler`.
    fn handle_buffered<H: PacketHandler>(&mut self, handler: &mut H) -> usize {
        let mut handled = 0;
        while let Some(result) = self.accumulator.next_frame() {
            handled += 1;
            let frame = match result {
                Ok(frame) => frame,
                Err(FrameError::ChecksumMismatch { .. }) => {
                    tlog!("[command] Checksum mismatch, frame dropped");
                    continue;
                }
                Err(FrameError::NeedMoreData) => break,
            };

            dlog!(
                "[command] <- node {} {}",
                frame.node_address,
                hex::encode(&frame.bytes)
            );

            match handler.handle_packet(&frame) {
                Dispatch::Reply(reply) => self.send(&reply),
                Dispatch::NoReply => {}
                Dispatch::Unreachable => {
                    tlog!("[command] Motor controller did not reply");
                    if self.unreachable_reply {
                        self.send(&build_value_reply(UNREACHABLE_REPLY));
                    }
                }
            }
        }
        handled
    }

    fn send(&self, reply: &[u8]) {
        dlog!("[command] -> {}", hex::encode(reply));
        if !self.link.send(reply) {
            dlog!("[command] No client connected, reply dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::frame_checksum;
    use crate::io::{LinkEvent, LinkEvents};
    use crate::protocol::{base128, Frame, ETX, STX};

    /// Handler that records frames and answers with a fixed dispatch
    struct Recorder {
        frames: Vec<Frame>,
        answer: Dispatch,
    }

    impl PacketHandler for Recorder {
        fn handle_packet(&mut self, frame: &Frame) -> Dispatch {
            self.frames.push(frame.clone());
            self.answer.clone()
        }
    }

    fn setup(unreachable_reply: bool) -> (CommandChannel, Arc<RingBuffer>, LinkEvents) {
        let ring = Arc::new(RingBuffer::new(256));
        let (link, events) = ChannelLink::detached("command");
        link.set_connected(true);
        (CommandChannel::new(ring.clone(), link, 254, unreachable_reply), ring, events)
    }

    fn make_frame(node: u8, command: u8, param: i32) -> Vec<u8> {
        let mut body = vec![node + 10, command];
        body.extend_from_slice(&base128::encode(param));
        let mut bytes = vec![STX];
        bytes.extend_from_slice(&body);
        bytes.push(frame_checksum(&body));
        bytes.push(ETX);
        bytes
    }

    fn sent(events: &mut LinkEvents) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let LinkEvent::Data(bytes) = event {
                out.push(bytes);
            }
        }
        out
    }

    #[test]
    fn test_frames_handled_in_order() {
        let (mut channel, ring, mut events) = setup(true);
        let mut handler = Recorder {
            frames: Vec::new(),
            answer: Dispatch::Reply(vec![0xAA]),
        };

        let a = make_frame(3, 32, 1);
        let b = make_frame(3, 32, 2);
        ring.write_slice(&a);
        ring.write_slice(&b);

        assert_eq!(channel.poll(&mut handler), 2);
        let params: Vec<_> = handler.frames.iter().map(|f| f.parameter()).collect();
        assert_eq!(params, vec![Some(1), Some(2)]);
        assert_eq!(sent(&mut events), vec![vec![0xAA], vec![0xAA]]);
    }

    #[test]
    fn test_split_frame_across_polls() {
        let (mut channel, ring, _events) = setup(true);
        let mut handler = Recorder {
            frames: Vec::new(),
            answer: Dispatch::NoReply,
        };
        let f = make_frame(3, 228, 0);

        ring.write_slice(&f[..5]);
        assert_eq!(channel.poll(&mut handler), 0);
        ring.write_slice(&f[5..]);
        assert_eq!(channel.poll(&mut handler), 1);
        assert_eq!(handler.frames[0].bytes, f);
    }

    #[test]
    fn test_bad_checksum_dropped_without_reply() {
        let (mut channel, ring, mut events) = setup(true);
        let mut handler = Recorder {
            frames: Vec::new(),
            answer: Dispatch::Reply(vec![1]),
        };
        let mut f = make_frame(3, 32, 5);
        f[3] ^= 0x01;
        ring.write_slice(&f);

        assert_eq!(channel.poll(&mut handler), 1);
        assert!(handler.frames.is_empty());
        assert!(sent(&mut events).is_empty());
    }

    #[test]
    fn test_backlog_larger_than_frame_limit() {
        let ring = Arc::new(RingBuffer::new(1024));
        let (link, _events) = ChannelLink::detached("command");
        let mut channel = CommandChannel::new(ring.clone(), link, 254, true);
        let mut handler = Recorder {
            frames: Vec::new(),
            answer: Dispatch::NoReply,
        };

        for value in 0..30 {
            let frame = make_frame(3, 32, value);
            assert_eq!(frame.len(), 10);
            ring.write_slice(&frame);
        }
        assert_eq!(ring.len(), 300);

        assert_eq!(channel.poll(&mut handler), 30);
        let params: Vec<_> = handler.frames.iter().filter_map(|f| f.parameter()).collect();
        assert_eq!(params, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_backlog_keeps_split_tail() {
        let ring = Arc::new(RingBuffer::new(1024));
        let (link, _events) = ChannelLink::detached("command");
        let mut channel = CommandChannel::new(ring.clone(), link, 254, true);
        let mut handler = Recorder {
            frames: Vec::new(),
            answer: Dispatch::NoReply,
        };

        let mut backlog = Vec::new();
        for value in 0..40 {
            backlog.extend_from_slice(&make_frame(3, 32, value));
        }
        let last = make_frame(3, 32, 40);
        backlog.extend_from_slice(&last[..4]);
        ring.write_slice(&backlog);

        assert_eq!(channel.poll(&mut handler), 40);
        ring.write_slice(&last[4..]);
        assert_eq!(channel.poll(&mut handler), 1);
        assert_eq!(handler.frames.last().and_then(|f| f.parameter()), Some(40));
    }

    #[test]
    fn test_oversized_span_discarded() {
        let ring = Arc::new(RingBuffer::new(1024));
        let (link, _events) = ChannelLink::detached("command");
        let mut channel = CommandChannel::new(ring.clone(), link, 254, true);
        let mut handler = Recorder {
            frames: Vec::new(),
            answer: Dispatch::NoReply,
        };

        // Unterminated run longer than the frame limit, then a good frame
        let mut backlog = vec![STX];
        backlog.extend(std::iter::repeat(0x41).take(400));
        backlog.extend_from_slice(&make_frame(3, 32, 7));
        ring.write_slice(&backlog);

        assert_eq!(channel.poll(&mut handler), 1);
        assert_eq!(handler.frames[0].parameter(), Some(7));
    }

    #[test]
    fn test_unreachable_reply() {
        let (mut channel, ring, mut events) = setup(true);
        let mut handler = Recorder {
            frames: Vec::new(),
            answer: Dispatch::Unreachable,
        };
        ring.write_slice(&make_frame(1, 20, 0));
        channel.poll(&mut handler);
        assert_eq!(sent(&mut events), vec![build_value_reply(-1)]);
    }

    #[test]
    fn test_unreachable_reply_disabled() {
        let (mut channel, ring, mut events) = setup(false);
        let mut handler = Recorder {
            frames: Vec::new(),
            answer: Dispatch::Unreachable,
        };
        ring.write_slice(&make_frame(1, 20, 0));
        channel.poll(&mut handler);
        assert!(sent(&mut events).is_empty());
    }
}
