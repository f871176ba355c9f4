//! thermal-engine-types: Shared data types for Thermal Engine.
//!
//! Pure data types (metric keys, sensor snapshots, connection status, theme
//! elements and frames) shared by every crate in the workspace. Nothing here
//! touches Cairo, USB or the filesystem, so the types work as a foundation
//! layer for both the acquisition and the rendering side.

pub mod color;
pub mod frame;
pub mod metric;
pub mod status;
pub mod theme;

// Re-export commonly used types at the crate root for convenience
pub use color::{Color, Threshold};
pub use frame::{Frame, DISPLAY_HEIGHT, DISPLAY_WIDTH};
pub use metric::{MetricKey, Reading, SensorSnapshot, SensorValue, UnitKind};
pub use status::{ConnectionState, ConnectionStatus, Fault, FaultKind};
pub use theme::{
    AnalogFace, ArcGaugeStyle, BarGaugeStyle, BarTextMode, BarTextPosition, ChartStyle,
    ClockMode, ClockStyle, ElementKind, GaugeShape, GaugeStyle, Geometry, ImageFit,
    ImageSource, ImageStyle, RectangleStyle, TextAlign, TextStyle, ThemeElement, ThemeSnapshot,
    default_thresholds, sorted_by_z,
};
