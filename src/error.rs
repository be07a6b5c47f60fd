//! Error types for the codec layer.

use thiserror::Error;

use crate::cuda::CudaError;

/// Errors surfaced by encoder backends, encoders, and the factory.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The backend does not support the requested codec format.
    #[error("unsupported codec format: {0}")]
    UnsupportedFormat(String),

    /// Encoder initialization failed.
    #[error("encoder initialization failed: {0}")]
    InitFailed(String),

    /// Encoding a frame failed.
    #[error("encoding failed: {0}")]
    EncodeFailed(String),

    /// The encoder was used before `init` configured it.
    #[error("encoder not initialized")]
    NotInitialized,

    /// Frame dimensions do not match the configured stream.
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Offending frame width.
        width: u32,
        /// Offending frame height.
        height: u32,
    },

    /// The frame's pixel format cannot be consumed by this encoder.
    #[error("unsupported pixel format")]
    UnsupportedPixelFormat,

    /// The NVENC runtime library could not be loaded or exposes no
    /// usable codecs on this device.
    #[error("NVENC runtime unavailable: {0}")]
    NvencUnavailable(String),

    /// An NVENC API call failed.
    #[error("{call} failed with NVENC status {status} ({name})")]
    Nvenc {
        /// The NVENC entry point that failed.
        call: &'static str,
        /// Raw `NVENCSTATUS` value.
        status: i32,
        /// Human-readable status name.
        name: &'static str,
    },

    /// A CUDA driver error bubbled up through the codec layer.
    #[error(transparent)]
    Cuda(#[from] CudaError),
}
