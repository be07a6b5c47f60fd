//! Cross-API GPU device resolution and a unified video encoder factory.
//!
//! This crate solves two coupled problems for a GPU video pipeline:
//!
//! - **Device resolution**: the graphics API (Vulkan, Direct3D) and the
//!   CUDA driver expose no shared device handle. The only stable
//!   artifact is the physical adapter identifier — a 16-byte UUID or an
//!   8-byte LUID — so [`cuda`] enumerates the CUDA-visible devices and
//!   matches identifiers byte for byte, then owns the one CUDA context
//!   the session uses ([`CudaContext`]).
//! - **Encoder composition**: [`EncoderFactory`] merges a software
//!   backend (OpenH264, always present) and a hardware backend (NVENC,
//!   present only when a CUDA context was resolved) into one catalog
//!   with a deterministic codec preference order, and routes every
//!   query/creation call to the backend that owns the requested format.
//!   Created encoders can be wrapped with a timing decorator when the
//!   pipeline injects a profiler.
//!
//! # Quick start
//!
//! ```ignore
//! use codec_bridge::{CudaContext, DriverModule, EncoderFactory};
//!
//! // Resolve the graphics adapter to a CUDA device and own the context.
//! let mut context = CudaContext::new(DriverModule::new());
//! if let Err(err) = context.init_from_identifier(&adapter_identifier) {
//!     // No driver or no matching device: the factory will be
//!     // software-only.
//! }
//!
//! // Build the factory and negotiate codecs.
//! let factory = EncoderFactory::new(&graphics_device, None);
//! let formats = factory.supported_formats();
//! let mut encoder = factory.create_encoder(&formats[0])?;
//! ```
//!
//! # Threading
//!
//! None of these components spawn threads. [`CudaContext::current`]
//! rebinds the owned context to the calling thread; confine all
//! context-affecting work to one dedicated thread per session.

pub mod cuda;
mod error;
mod factory;
mod format;
mod instrument;
mod nvenc;
mod profiler;
mod software;
mod traits;
mod types;

pub use cuda::{
    AdapterIdentifier, CudaContext, CudaContextHandle, CudaError, DeviceLuid, DeviceUuid,
    DriverApi, DriverModule,
};
pub use error::CodecError;
pub use factory::EncoderFactory;
pub use format::{sort_by_codec_preference, VideoFormat};
pub use instrument::InstrumentedEncoder;
pub use nvenc::{NvencBackend, NvencEncoder};
pub use profiler::{MarkerCategory, MarkerHandle, ProfilerMarkerFactory, ProfilerScope};
pub use software::{OpenH264Backend, OpenH264VideoEncoder};
pub use traits::{EncoderBackend, GraphicsDevice, VideoEncoder};
pub use types::{
    BufferFormat, Codec, CodecInfo, EncodedPacket, EncoderConfig, EncoderInfo, PixelFormat,
    VideoFrame,
};
