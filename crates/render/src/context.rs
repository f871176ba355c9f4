use chrono::{DateTime, Local};
use std::time::Duration;

/// Inputs to a render besides the theme and sensor values. Rendering is a
/// pure function of these, the theme and the registry snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderContext {
    /// Wall-clock time shown by clock elements
    pub now: DateTime<Local>,
    /// Time since the scheduler started; drives animations
    pub elapsed: Duration,
}

impl RenderContext {
    pub fn new(now: DateTime<Local>, elapsed: Duration) -> Self {
        Self { now, elapsed }
    }

    pub fn now(elapsed: Duration) -> Self {
        Self::new(Local::now(), elapsed)
    }
}
