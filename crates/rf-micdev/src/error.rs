//! Error types for microphone deviation correction

use thiserror::Error;

use crate::Channel;

/// Microphone deviation correction errors
#[derive(Error, Debug)]
pub enum MicDevError {
    /// Configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input impulse response contains NaN or infinity
    #[error("Non-finite sample in {channel} impulse response at index {index}")]
    NonFiniteSample { channel: Channel, index: usize },

    /// FFT planning or processing failed
    #[error("FFT error: {0}")]
    FftError(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for microphone deviation operations
pub type MicDevResult<T> = Result<T, MicDevError>;

impl From<realfft::FftError> for MicDevError {
    fn from(err: realfft::FftError) -> Self {
        MicDevError::FftError(err.to_string())
    }
}
