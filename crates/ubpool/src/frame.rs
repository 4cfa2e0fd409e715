/// Monotonic frame counter, advanced exactly once per rendered frame.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    frame: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.frame
    }

    /// Advance to the next frame and return its number.
    pub fn advance(&mut self) -> u64 {
        self.frame += 1;
        self.frame
    }

    /// Ring slot owned by the current frame in a ring of `safe_frames` slots.
    pub fn slot(&self, safe_frames: usize) -> usize {
        (self.frame % safe_frames as u64) as usize
    }
}
