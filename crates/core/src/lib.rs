//! thermal-engine-core: Runtime building blocks shared by Thermal Engine.
//!
//! This crate contains the sensor source trait, the sensor registry (single
//! writer, many lock-free readers), connection status tracking, the
//! reconnect backoff policy and shared constants.

pub mod backoff;
pub mod constants;
pub mod registry;
pub mod resume;
mod sensor_source;
pub mod status;

pub use backoff::{Backoff, BackoffPolicy};
pub use constants::{
    BYTES_PER_MB, CHART_HISTORY_LEN, DEFAULT_POLL_INTERVAL, DEFAULT_TARGET_FPS,
    HELPER_RESPONSE_TIMEOUT, HELPER_SHUTDOWN_GRACE, HELPER_STARTUP_TIMEOUT,
    MAX_CONSECUTIVE_FAILURES, MAX_TARGET_FPS, RESUME_GAP_THRESHOLD, SMOOTHING_WINDOW,
};
pub use registry::{RegistryReader, RegistrySnapshot, RegistryWriter, SensorRegistry};
pub use resume::ResumeDetector;
pub use sensor_source::{
    BoxedSensorSource, InterruptHandle, OpenError, PollError, SensorSource, SourceFactory,
    SourceReady,
};
pub use status::{StatusCell, TransitionError};

// Re-export types used in trait signatures for convenience
pub use thermal_engine_types::{
    ConnectionState, ConnectionStatus, Fault, FaultKind, MetricKey, SensorSnapshot, SensorValue,
};
