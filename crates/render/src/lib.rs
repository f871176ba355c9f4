//! thermal-engine-render: Cairo compositor for Thermal Engine themes.
//!
//! Each element kind has its own `*_display` module with a plain draw
//! function; the [`Compositor`] walks a theme in z-order, caches a layer per
//! element and produces straight-alpha RGBA [`Frame`](thermal_engine_types::Frame)s.

pub mod chart_display;
pub mod clock_display;
pub mod compositor;
pub mod context;
pub mod error;
pub mod gauge_display;
pub mod image_cache;
pub mod image_display;
pub mod painter;
pub mod pango_text;
pub mod render_utils;
pub mod shape_display;
pub mod text_display;
pub mod video;

pub use chart_display::MetricHistory;
pub use compositor::{Compositor, LayerStats};
pub use context::RenderContext;
pub use error::RenderError;
pub use painter::{ElementPainter, PaintRequest, PainterRegistry};
pub use video::{FfmpegDecoder, VideoDecoder, VideoFrames};
