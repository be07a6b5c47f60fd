//! Capability traits at the factory's seams.

use crate::cuda::{AdapterIdentifier, CudaContextHandle};
use crate::error::CodecError;
use crate::format::VideoFormat;
use crate::types::{BufferFormat, CodecInfo, EncodedPacket, EncoderConfig, EncoderInfo, VideoFrame};

/// A single video encoder session.
///
/// `encode` is the data-plane call; everything else is control-plane.
/// Created encoders are exclusively owned by the caller and released by
/// dropping them.
pub trait VideoEncoder: Send {
    /// Prepare the encoder for the given stream parameters.
    fn init(&mut self, config: &EncoderConfig) -> Result<(), CodecError>;

    /// Encode one frame. `force_keyframe` requests an IDR regardless of
    /// the GOP position.
    fn encode(
        &mut self,
        frame: &VideoFrame,
        force_keyframe: bool,
    ) -> Result<EncodedPacket, CodecError>;

    /// Update the target bitrate without re-initializing.
    fn set_bitrate(&mut self, bitrate_bps: u32) -> Result<(), CodecError>;

    /// Update the target framerate without re-initializing.
    fn set_framerate(&mut self, fps: u32) -> Result<(), CodecError>;

    /// Static description of this encoder.
    fn info(&self) -> EncoderInfo;
}

/// Capability set shared by the software and hardware encoder providers.
///
/// The variant set is closed: the factory composes exactly one software
/// backend and at most one hardware backend. The trait exists so routing
/// code is written once and so tests can substitute doubles.
pub trait EncoderBackend: Send {
    /// Formats this backend can encode, in discovery order.
    fn supported_formats(&self) -> Vec<VideoFormat>;

    /// Capability information for a supported format.
    fn query_encoder(&self, format: &VideoFormat) -> Result<CodecInfo, CodecError>;

    /// Create an encoder for a supported format.
    fn create_encoder(&self, format: &VideoFormat) -> Result<Box<dyn VideoEncoder>, CodecError>;
}

/// The graphics layer's view of its device, as consumed by the factory.
///
/// Implemented by whichever rendering integration created the graphics
/// device; this crate only reads from it.
pub trait GraphicsDevice: Send + Sync {
    /// Identifier of the physical adapter the graphics API selected.
    fn adapter_identifier(&self) -> AdapterIdentifier;

    /// The CUDA context resolved for that adapter, or `None` when no
    /// CUDA-visible device matched (or CUDA is unavailable).
    fn cuda_context(&self) -> Option<CudaContextHandle>;

    /// Input buffer format the graphics layer prefers to hand to a
    /// hardware encoder.
    fn preferred_buffer_format(&self) -> BufferFormat;
}
