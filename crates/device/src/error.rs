use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no supported panel found")]
    NotFound,

    #[error("failed to open {device}: {message}")]
    Open { device: String, message: String },

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error("device unplugged")]
    Unplugged,

    #[error("USB backend unavailable: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
