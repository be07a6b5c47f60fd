//! Core value types shared by the encoder backends.

use bytes::Bytes;

/// Video codec identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// H.264/AVC.
    H264,
    /// H.265/HEVC.
    Hevc,
    /// AV1.
    Av1,
}

impl Default for Codec {
    fn default() -> Self {
        Self::H264
    }
}

/// Pixel format of raw frames handed to an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Interleaved RGBA, 8 bits per channel.
    Rgba,
    /// Interleaved BGRA, 8 bits per channel.
    Bgra,
    /// Interleaved ARGB, 8 bits per channel.
    Argb,
    /// Planar YUV 4:2:0 (Y, U, V planes).
    I420,
}

impl PixelFormat {
    /// Bytes per pixel; planar 4:2:0 averages to 1.5.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> f32 {
        match self {
            Self::Rgba | Self::Bgra | Self::Argb => 4.0,
            Self::I420 => 1.5,
        }
    }
}

/// Hardware input buffer format the graphics layer prefers to hand to
/// the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    /// Semi-planar YUV 4:2:0.
    Nv12,
    /// Interleaved ARGB.
    Argb,
    /// Interleaved ABGR.
    Abgr,
}

/// A raw video frame submitted for encoding.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Layout of `data`.
    pub pixel_format: PixelFormat,
    /// Tightly packed pixel data.
    pub data: Bytes,
    /// Capture timestamp in microseconds.
    pub timestamp_us: u64,
}

impl VideoFrame {
    /// A frame over the given pixel data.
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        data: Bytes,
        timestamp_us: u64,
    ) -> Self {
        Self {
            width,
            height,
            pixel_format,
            data,
            timestamp_us,
        }
    }

    /// A frame from interleaved RGBA data.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>, timestamp_us: u64) -> Self {
        Self::new(width, height, PixelFormat::Rgba, Bytes::from(data), timestamp_us)
    }

    /// A frame from interleaved BGRA data.
    pub fn from_bgra(width: u32, height: u32, data: Vec<u8>, timestamp_us: u64) -> Self {
        Self::new(width, height, PixelFormat::Bgra, Bytes::from(data), timestamp_us)
    }
}

/// Encoded bitstream output for one frame.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Encoded payload (e.g. Annex-B H.264 NAL units).
    pub data: Bytes,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: u64,
    /// Whether the packet holds a keyframe.
    pub keyframe: bool,
    /// Monotonically increasing frame index.
    pub frame_index: u64,
}

/// Encoder configuration, builder style.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate_bps: u32,
    /// Maximum bitrate in bits per second.
    pub max_bitrate_bps: u32,
    /// Framerate as (numerator, denominator).
    pub framerate: (u32, u32),
    /// Keyframe interval in frames; 0 lets the encoder decide.
    pub gop_length: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            bitrate_bps: 2_000_000,
            max_bitrate_bps: 4_000_000,
            framerate: (30, 1),
            gop_length: 60,
        }
    }
}

impl EncoderConfig {
    /// A configuration for the given dimensions.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Set the target bitrate in bits per second.
    #[must_use]
    pub fn bitrate(mut self, bitrate_bps: u32) -> Self {
        self.bitrate_bps = bitrate_bps;
        self
    }

    /// Set the framerate.
    #[must_use]
    pub fn framerate(mut self, num: u32, den: u32) -> Self {
        self.framerate = (num, den);
        self
    }

    /// Set the keyframe interval in frames.
    #[must_use]
    pub fn gop_length(mut self, frames: u32) -> Self {
        self.gop_length = frames;
        self
    }

    /// Framerate in frames per second.
    #[must_use]
    pub fn fps(&self) -> f32 {
        self.framerate.0 as f32 / self.framerate.1.max(1) as f32
    }
}

/// Answer to a factory capability query for one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecInfo {
    /// Whether the owning backend encodes in hardware.
    pub is_hardware_accelerated: bool,
}

/// Static information reported by an encoder instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderInfo {
    /// Name of the implementation, e.g. `"OpenH264"`.
    pub implementation_name: String,
    /// Whether frames are encoded in hardware.
    pub is_hardware_accelerated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_overrides_defaults() {
        let config = EncoderConfig::new(1920, 1080)
            .bitrate(5_000_000)
            .framerate(60, 1)
            .gop_length(120);
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert_eq!(config.bitrate_bps, 5_000_000);
        assert_eq!(config.framerate, (60, 1));
        assert_eq!(config.gop_length, 120);
    }

    #[test]
    fn fps_handles_fractional_rates() {
        let config = EncoderConfig::default().framerate(30000, 1001);
        assert!((config.fps() - 29.97).abs() < 0.01);
    }

    #[test]
    fn frame_constructors_tag_the_pixel_format() {
        let frame = VideoFrame::from_bgra(2, 2, vec![0; 16], 42);
        assert_eq!(frame.pixel_format, PixelFormat::Bgra);
        assert_eq!(frame.timestamp_us, 42);
    }
}
