//! Sensor source trait and its error types

use crossbeam::channel::{bounded, Receiver, Sender};
use std::time::Duration;
use thermal_engine_types::SensorSnapshot;
use thiserror::Error;

/// Returned by [`SensorSource::open`] once the source is ready to poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReady {
    /// Human-readable description of what was opened
    pub detail: String,
}

/// Reasons a source could not be opened
#[derive(Debug, Error)]
pub enum OpenError {
    /// The monitoring facility is not running or cannot be found
    #[error("sensor source unavailable: {0}")]
    Unavailable(String),

    /// The source is not installed where it was looked for. Automatic
    /// retries are pointless until the user intervenes.
    #[error("sensor source not installed: {message}")]
    NotInstalled {
        message: String,
        diagnostic: Option<String>,
    },

    /// The source started but reported an error instead of becoming ready
    #[error("sensor source failed to start: {message}")]
    StartupFailed {
        message: String,
        diagnostic: Option<String>,
    },

    #[error("timed out after {0:?} waiting for the sensor source")]
    Timeout(Duration),

    #[error("I/O error opening sensor source: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a single poll failed
#[derive(Debug, Error)]
pub enum PollError {
    /// Source went away (process exited, region unmapped)
    #[error("sensor source crashed: {0}")]
    Crashed(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Source is alive but its data stopped advancing
    #[error("sensor data is stale")]
    Stale,

    #[error("malformed response: {0}")]
    Malformed(String),

    /// Source answered with an explicit error message
    #[error("sensor source reported: {0}")]
    Remote(String),

    #[error("sensor source is not open")]
    NotOpen,

    /// Another thread gave up on the request
    #[error("sensor request interrupted")]
    Interrupted,
}

impl PollError {
    /// Soft failures leave the source running and are only fatal after
    /// repeating several times in a row.
    pub fn is_soft(&self) -> bool {
        matches!(self, PollError::Malformed(_) | PollError::Remote(_))
    }
}

/// Wakes a source blocked in `open` or `poll` from another thread.
///
/// The source keeps the receiving end and gives out clones of the handle.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Sender<()>,
}

impl InterruptHandle {
    pub fn new() -> (Self, Receiver<()>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }

    pub fn interrupt(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Trait for external sensor sources
///
/// A source is owned by exactly one bridge thread. It is opened, polled at
/// the bridge's interval, and closed on restart or shutdown.
pub trait SensorSource: Send {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Start or attach to the source
    fn open(&mut self) -> Result<SourceReady, OpenError>;

    /// Fetch a complete snapshot of the source keys
    fn poll(&mut self) -> Result<SensorSnapshot, PollError>;

    /// Free-form diagnostic dump, if the source supports it
    fn diagnostics(&mut self) -> Result<String, PollError> {
        Ok(String::new())
    }

    /// Handle that aborts a blocking `open` or `poll`, if supported
    fn interrupt_handle(&self) -> Option<InterruptHandle> {
        None
    }

    /// Release the source. Must be idempotent.
    fn close(&mut self);
}

/// Type-erased sensor source for dynamic dispatch
pub type BoxedSensorSource = Box<dyn SensorSource>;

/// Builds a fresh, unopened source. The bridge calls it whenever it
/// abandons a source that is stuck in a request.
pub type SourceFactory = Box<dyn FnMut() -> BoxedSensorSource + Send>;
