//! Detects system sleep/wake by comparing wall-clock and monotonic time.
//!
//! The monotonic clock does not advance while the machine is suspended, the
//! wall clock does. A tick whose wall-clock elapsed time exceeds the
//! monotonic elapsed time by more than the threshold followed a resume.

use std::time::{Duration, Instant, SystemTime};

#[derive(Debug)]
pub struct ResumeDetector {
    threshold: Duration,
    last_wall: SystemTime,
    last_mono: Instant,
}

impl ResumeDetector {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_wall: SystemTime::now(),
            last_mono: Instant::now(),
        }
    }

    /// Sample both clocks; true if a suspend happened since the last call
    pub fn check(&mut self) -> bool {
        let now_wall = SystemTime::now();
        let now_mono = Instant::now();
        // A wall clock stepped backwards is not a resume
        let wall = now_wall.duration_since(self.last_wall).unwrap_or_default();
        let mono = now_mono.duration_since(self.last_mono);
        self.last_wall = now_wall;
        self.last_mono = now_mono;
        gap_exceeds(wall, mono, self.threshold)
    }
}

/// Wall-clock elapsed time ran ahead of monotonic time by more than `threshold`
pub fn gap_exceeds(wall: Duration, mono: Duration, threshold: Duration) -> bool {
    wall.saturating_sub(mono) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_detection() {
        let threshold = Duration::from_secs(5);
        assert!(!gap_exceeds(Duration::from_secs(1), Duration::from_secs(1), threshold));
        assert!(!gap_exceeds(Duration::from_secs(5), Duration::from_secs(1), threshold));
        assert!(gap_exceeds(Duration::from_secs(600), Duration::from_secs(1), threshold));
        // monotonic ahead of wall clock (NTP slew) is never a resume
        assert!(!gap_exceeds(Duration::from_secs(1), Duration::from_secs(9), threshold));
    }

    #[test]
    fn test_no_resume_on_back_to_back_checks() {
        let mut detector = ResumeDetector::new(Duration::from_secs(5));
        assert!(!detector.check());
        assert!(!detector.check());
    }
}
