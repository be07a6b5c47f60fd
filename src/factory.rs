//! The unified encoder factory.
//!
//! Merges the software catalog (always present) and the hardware catalog
//! (present only when a CUDA context was resolved for the graphics
//! adapter) into one deterministically ordered list, and routes every
//! query/creation call to the backend that owns the requested format.

use std::sync::Arc;

use tracing::info;

use crate::error::CodecError;
use crate::format::{sort_by_codec_preference, VideoFormat};
use crate::instrument::InstrumentedEncoder;
use crate::nvenc::NvencBackend;
use crate::profiler::ProfilerMarkerFactory;
use crate::software::OpenH264Backend;
use crate::traits::{EncoderBackend, GraphicsDevice, VideoEncoder};
use crate::types::CodecInfo;

/// Composes the software and optional hardware encoder backends.
///
/// Constructed once per video-pipeline session. Absence of the hardware
/// backend is a reduced capability set, never an error: negotiation just
/// sees a smaller catalog.
pub struct EncoderFactory {
    software: Box<dyn EncoderBackend>,
    hardware: Option<Box<dyn EncoderBackend>>,
    profiler: Option<Arc<dyn ProfilerMarkerFactory>>,
}

impl EncoderFactory {
    /// Build the default backends for `device`.
    ///
    /// The hardware backend is attempted only when the graphics layer
    /// reports a resolved CUDA context; any construction failure is
    /// absorbed and logged once.
    pub fn new(
        device: &dyn GraphicsDevice,
        profiler: Option<Arc<dyn ProfilerMarkerFactory>>,
    ) -> Self {
        let software: Box<dyn EncoderBackend> = Box::new(OpenH264Backend::new());
        let hardware = match device.cuda_context() {
            Some(context) => {
                match NvencBackend::new(context, device.preferred_buffer_format()) {
                    Ok(backend) => Some(Box::new(backend) as Box<dyn EncoderBackend>),
                    Err(err) => {
                        info!(%err, "hardware video encoding unavailable, serving software only");
                        None
                    }
                }
            }
            None => {
                info!("no CUDA context resolved, serving software encoders only");
                None
            }
        };
        Self {
            software,
            hardware,
            profiler,
        }
    }

    /// Compose the factory from explicit backends. Used by tests and by
    /// embedders that bring their own providers.
    pub fn from_backends(
        software: Box<dyn EncoderBackend>,
        hardware: Option<Box<dyn EncoderBackend>>,
        profiler: Option<Arc<dyn ProfilerMarkerFactory>>,
    ) -> Self {
        Self {
            software,
            hardware,
            profiler,
        }
    }

    /// Whether a hardware backend is present.
    pub fn has_hardware_backend(&self) -> bool {
        self.hardware.is_some()
    }

    /// Every format either backend supports: software formats first,
    /// hardware formats appended, then stable-sorted by the fixed codec
    /// preference table. Deterministic across calls.
    pub fn supported_formats(&self) -> Vec<VideoFormat> {
        let mut formats = self.software.supported_formats();
        if let Some(hardware) = &self.hardware {
            formats.extend(hardware.supported_formats());
        }
        sort_by_codec_preference(&mut formats);
        formats
    }

    fn backend_for(&self, format: &VideoFormat) -> &dyn EncoderBackend {
        if let Some(hardware) = &self.hardware {
            if format.is_in_list(&hardware.supported_formats()) {
                return hardware.as_ref();
            }
        }
        // `supported_formats` is the only legitimate source of format
        // values, so the software catalog must contain everything the
        // hardware catalog does not.
        assert!(
            format.is_in_list(&self.software.supported_formats()),
            "codec format {format} is not in any backend catalog"
        );
        self.software.as_ref()
    }

    /// Capability information for `format`.
    ///
    /// # Panics
    ///
    /// Panics if `format` is in neither backend's catalog; formats must
    /// originate from [`supported_formats`](Self::supported_formats).
    pub fn query_encoder(&self, format: &VideoFormat) -> Result<CodecInfo, CodecError> {
        self.backend_for(format).query_encoder(format)
    }

    /// Create an encoder for `format`, wrapped for instrumentation when a
    /// profiler was supplied. The returned encoder is exclusively owned
    /// by the caller.
    ///
    /// # Panics
    ///
    /// Panics if `format` is in neither backend's catalog; formats must
    /// originate from [`supported_formats`](Self::supported_formats).
    pub fn create_encoder(
        &self,
        format: &VideoFormat,
    ) -> Result<Box<dyn VideoEncoder>, CodecError> {
        let encoder = self.backend_for(format).create_encoder(format)?;
        Ok(match &self.profiler {
            Some(profiler) => Box::new(InstrumentedEncoder::new(encoder, Arc::clone(profiler))),
            None => encoder,
        })
    }
}
