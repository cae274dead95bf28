//! Edge latch for polled confirmation buttons.
//!
//! A press counts once, only after a release has been observed, and stays
//! latched until consumed. Polling faster or slower than the press duration
//! neither loses nor duplicates presses.

use filler_traits::ConfirmButton;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonLevel {
    Released,
    Pressed,
}

#[derive(Debug, Clone)]
pub struct EdgeLatch {
    level: ButtonLevel,
    latched: bool,
}

impl Default for EdgeLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeLatch {
    /// Starts as if held, so a button pressed at power-up needs a release first.
    pub fn new() -> Self {
        Self {
            level: ButtonLevel::Pressed,
            latched: false,
        }
    }

    /// Feed one raw poll (`true` = pressed).
    pub fn feed(&mut self, raw: bool) {
        match (self.level, raw) {
            (ButtonLevel::Released, true) => {
                self.level = ButtonLevel::Pressed;
                self.latched = true;
            }
            (ButtonLevel::Pressed, false) => self.level = ButtonLevel::Released,
            _ => {}
        }
    }

    /// Consume the latched edge, if any.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.latched)
    }

    pub fn level(&self) -> ButtonLevel {
        self.level
    }
}

/// `ConfirmButton` over a raw level reader.
pub struct LatchedButton<F: FnMut() -> bool> {
    read_raw: F,
    latch: EdgeLatch,
}

impl<F: FnMut() -> bool> LatchedButton<F> {
    pub fn new(read_raw: F) -> Self {
        Self {
            read_raw,
            latch: EdgeLatch::new(),
        }
    }

    /// Sample the raw input without consuming; lets a fast poller feed the
    /// latch between control ticks.
    pub fn poll(&mut self) {
        let raw = (self.read_raw)();
        self.latch.feed(raw);
    }
}

impl<F: FnMut() -> bool> ConfirmButton for LatchedButton<F> {
    fn pressed_edge(&mut self) -> bool {
        self.poll();
        self.latch.take()
    }
}
