//! Engine runtime: theme handle, render scheduler and lifecycle

mod engine;
mod scheduler;
mod theme_handle;

pub use engine::{Engine, EngineParts, EngineStats};
pub use scheduler::{FrameSink, RenderScheduler, SchedulerStats};
pub use theme_handle::{builtin_theme, load_theme_file, ThemeHandle};
