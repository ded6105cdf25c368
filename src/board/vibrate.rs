// src/board/vibrate.rs
//
// Back-and-forth motion on an axis: whenever the axis is idle, move by the
// configured distance, alternating direction.

use crate::bus::{BusLines, BusTransport, MotorCommand};

#[derive(Debug, Clone, Default)]
pub struct Vibrate {
    enabled: bool,
    distance: i32,
    /// Next move goes in the negative direction
    reverse: bool,
}

impl Vibrate {
    pub fn start(&mut self, distance: i32) {
        self.enabled = true;
        self.distance = distance;
        self.reverse = false;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Distance for the next move, flipping direction for the one after.
    fn next_distance(&mut self) -> i32 {
        let d = if self.reverse {
            self.distance.wrapping_neg()
        } else {
            self.distance
        };
        self.reverse = !self.reverse;
        d
    }

    /// One poll step for `axis`. Returns the move issued, if any.
    pub fn poll<L: BusLines>(&mut self, axis: u8, bus: &mut BusTransport<L>) -> Option<i32> {
        if !self.enabled {
            return None;
        }
        if bus.send_command(MotorCommand::IsAxisBusy, axis, None) != Some(0) {
            return None;
        }
        let distance = self.next_distance();
        dlog!("[board] vibrate axis {} move {}", axis, distance);
        bus.send_command(MotorCommand::MoveInc, axis, Some(distance));
        Some(distance)
    }
}
