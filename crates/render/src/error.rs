use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cairo: {0}")]
    Cairo(#[from] cairo::Error),

    #[error("surface data unavailable: {0}")]
    SurfaceData(#[from] cairo::BorrowError),

    #[error("failed to load image {path}: {message}")]
    Image { path: PathBuf, message: String },

    #[error("failed to decode video {path}: {message}")]
    Video { path: PathBuf, message: String },

    #[error("{kind} painter failed: {message}")]
    Extension { kind: String, message: String },

    #[error("frame buffer does not match {width}x{height}")]
    FrameSize { width: u32, height: u32 },
}
