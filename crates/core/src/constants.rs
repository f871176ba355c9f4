//! Shared constants for the engine

use std::time::Duration;

/// Default sensor polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of samples in the rolling smoothing window per metric
pub const SMOOTHING_WINDOW: usize = 5;

/// Samples kept per metric for chart elements
pub const CHART_HISTORY_LEN: usize = 100;

/// Default render cadence in frames per second
pub const DEFAULT_TARGET_FPS: u32 = 10;

/// Upper bound for the render cadence
pub const MAX_TARGET_FPS: u32 = 60;

/// How long the helper process may take to report ready
pub const HELPER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for a response to a single helper command
pub const HELPER_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time the helper gets to exit after `quit` before it is killed
pub const HELPER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Consecutive malformed or error responses tolerated before a restart
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// A wall-clock jump larger than the monotonic clock by this much is
/// treated as a resume from sleep.
pub const RESUME_GAP_THRESHOLD: Duration = Duration::from_secs(5);

/// Bytes per megabyte, for network throughput in MB/s
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
