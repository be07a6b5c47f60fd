//! Error types for the CUDA driver layer.

use thiserror::Error;

/// Errors surfaced by driver loading, device resolution, and context
/// management.
#[derive(Debug, Error)]
pub enum CudaError {
    /// The CUDA driver library is not present on this machine.
    ///
    /// This disables the hardware path for the session; it is not fatal
    /// to the process.
    #[error("CUDA driver library not found; hardware acceleration unavailable")]
    DriverNotFound,

    /// Device enumeration completed but no CUDA-visible device carries
    /// the requested adapter identifier.
    #[error("no CUDA device matches the requested adapter identifier")]
    NoMatchingDevice,

    /// A driver call failed unexpectedly.
    #[error("{call} failed with CUDA status {status} ({})", status_name(.status))]
    Driver {
        /// The driver entry point that failed.
        call: &'static str,
        /// Raw `CUresult` status code.
        status: i32,
    },
}

/// Human-readable name for a `CUresult` status code.
pub(crate) fn status_name(status: &i32) -> &'static str {
    match *status {
        0 => "CUDA_SUCCESS",
        1 => "CUDA_ERROR_INVALID_VALUE",
        2 => "CUDA_ERROR_OUT_OF_MEMORY",
        3 => "CUDA_ERROR_NOT_INITIALIZED",
        4 => "CUDA_ERROR_DEINITIALIZED",
        100 => "CUDA_ERROR_NO_DEVICE",
        101 => "CUDA_ERROR_INVALID_DEVICE",
        200 => "CUDA_ERROR_INVALID_IMAGE",
        201 => "CUDA_ERROR_INVALID_CONTEXT",
        304 => "CUDA_ERROR_OPERATING_SYSTEM",
        500 => "CUDA_ERROR_NOT_FOUND",
        999 => "CUDA_ERROR_UNKNOWN",
        _ => "CUDA_ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_message_names_the_call() {
        let err = CudaError::Driver {
            call: "cuDeviceGetCount",
            status: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("cuDeviceGetCount"));
        assert!(msg.contains("CUDA_ERROR_NO_DEVICE"));
    }

    #[test]
    fn status_names_cover_success_and_unknown() {
        assert_eq!(status_name(&0), "CUDA_SUCCESS");
        assert_eq!(status_name(&100), "CUDA_ERROR_NO_DEVICE");
        assert_eq!(status_name(&12345), "CUDA_ERROR");
    }
}
