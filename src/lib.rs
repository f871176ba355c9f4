//! Thermal Engine: streams live hardware sensor themes to USB LCD panels.
//!
//! This library ties the workspace crates together:
//! - Application configuration
//! - The render scheduler and the shared theme handle
//! - The engine lifecycle (start, pause, resume, shutdown)

pub mod config;
pub mod core;

// Re-export commonly used types
pub use config::AppConfig;
pub use self::core::{Engine, EngineParts, RenderScheduler, ThemeHandle};
