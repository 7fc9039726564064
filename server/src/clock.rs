//! The shared tick counter.

use shared::Tick;

/// Current tick plus the ceiling peers may simulate up to.
///
/// One per running session; reset when a session starts or stops.
#[derive(Debug, Clone)]
pub struct FrameClock {
    current: Tick,
    look_ahead: Tick,
}

impl FrameClock {
    pub fn new(look_ahead: Tick) -> Self {
        Self {
            current: 0,
            look_ahead,
        }
    }

    /// Advances by exactly one simulation step and returns the new tick.
    pub fn tick(&mut self) -> Tick {
        self.current += 1;
        self.current
    }

    pub fn current(&self) -> Tick {
        self.current
    }

    /// The furthest tick any peer may simulate right now.
    pub fn ceiling(&self) -> Tick {
        self.current + self.look_ahead
    }

    /// First tick a command accepted now may run at.
    pub fn next_schedulable(&self) -> Tick {
        self.ceiling() + 1
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}
