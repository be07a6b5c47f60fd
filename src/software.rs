//! Software H.264 backend over OpenH264.
//!
//! Always constructible; this is the catalog the factory falls back to
//! when no hardware backend could be built.

use bytes::Bytes;
use openh264::encoder::{Encoder, EncoderConfig as EngineConfig};
use openh264::formats::YUVBuffer;
use openh264::OpenH264API;
use tracing::{debug, info};

use crate::error::CodecError;
use crate::format::VideoFormat;
use crate::traits::{EncoderBackend, VideoEncoder};
use crate::types::{
    CodecInfo, EncodedPacket, EncoderConfig, EncoderInfo, PixelFormat, VideoFrame,
};

/// Constrained-baseline profile-level-id advertised for negotiation.
const H264_CONSTRAINED_BASELINE_3_1: &str = "42e01f";

fn h264_format(packetization_mode: &str) -> VideoFormat {
    VideoFormat::new("H264")
        .parameter("level-asymmetry-allowed", "1")
        .parameter("packetization-mode", packetization_mode)
        .parameter("profile-level-id", H264_CONSTRAINED_BASELINE_3_1)
}

/// Software encoder backend. Its catalog is fixed: the H.264
/// constrained-baseline variants OpenH264 can actually produce.
pub struct OpenH264Backend {
    formats: Vec<VideoFormat>,
}

impl OpenH264Backend {
    /// A backend advertising the supported H.264 variants.
    pub fn new() -> Self {
        Self {
            formats: vec![h264_format("1"), h264_format("0")],
        }
    }
}

impl Default for OpenH264Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for OpenH264Backend {
    fn supported_formats(&self) -> Vec<VideoFormat> {
        self.formats.clone()
    }

    fn query_encoder(&self, format: &VideoFormat) -> Result<CodecInfo, CodecError> {
        if !format.is_in_list(&self.formats) {
            return Err(CodecError::UnsupportedFormat(format.to_string()));
        }
        Ok(CodecInfo {
            is_hardware_accelerated: false,
        })
    }

    fn create_encoder(&self, format: &VideoFormat) -> Result<Box<dyn VideoEncoder>, CodecError> {
        if !format.is_in_list(&self.formats) {
            return Err(CodecError::UnsupportedFormat(format.to_string()));
        }
        Ok(Box::new(OpenH264VideoEncoder::new()))
    }
}

/// H.264 encoder session backed by the OpenH264 engine.
pub struct OpenH264VideoEncoder {
    engine: Option<Encoder>,
    config: EncoderConfig,
    frame_index: u64,
    yuv_buffer: Vec<u8>,
}

impl OpenH264VideoEncoder {
    /// An unconfigured encoder; `init` builds the engine.
    pub fn new() -> Self {
        Self {
            engine: None,
            config: EncoderConfig::default(),
            frame_index: 0,
            yuv_buffer: Vec::new(),
        }
    }

    /// Convert an interleaved RGBA-family frame into the reusable I420
    /// buffer (BT.601).
    fn convert_to_i420(&mut self, frame: &VideoFrame) -> Result<(), CodecError> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let stride = width * 4;

        // Offsets of R, G, B within one 4-byte pixel.
        let (r_off, g_off, b_off) = match frame.pixel_format {
            PixelFormat::Rgba => (0, 1, 2),
            PixelFormat::Bgra => (2, 1, 0),
            PixelFormat::Argb => (1, 2, 3),
            PixelFormat::I420 => {
                self.yuv_buffer.clear();
                self.yuv_buffer.extend_from_slice(&frame.data);
                return Ok(());
            }
        };

        if frame.data.len() < stride * height {
            return Err(CodecError::EncodeFailed(format!(
                "frame data too short: {} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let y_size = width * height;
        let uv_size = (width / 2) * (height / 2);
        self.yuv_buffer.resize(y_size + 2 * uv_size, 0);
        let (y_plane, uv_planes) = self.yuv_buffer.split_at_mut(y_size);
        let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

        for y in 0..height {
            for x in 0..width {
                let px = y * stride + x * 4;
                let r = frame.data[px + r_off] as i32;
                let g = frame.data[px + g_off] as i32;
                let b = frame.data[px + b_off] as i32;

                let luma = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
                y_plane[y * width + x] = luma.clamp(0, 255) as u8;

                // Chroma is subsampled per 2x2 block.
                if x % 2 == 0 && y % 2 == 0 {
                    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                    let idx = (y / 2) * (width / 2) + (x / 2);
                    u_plane[idx] = u.clamp(0, 255) as u8;
                    v_plane[idx] = v.clamp(0, 255) as u8;
                }
            }
        }
        Ok(())
    }
}

impl Default for OpenH264VideoEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for OpenH264VideoEncoder {
    fn init(&mut self, config: &EncoderConfig) -> Result<(), CodecError> {
        info!(
            width = config.width,
            height = config.height,
            bitrate_bps = config.bitrate_bps,
            "initializing OpenH264 encoder"
        );

        let engine_config = EngineConfig::new()
            .set_bitrate_bps(config.bitrate_bps)
            .max_frame_rate(config.fps())
            .enable_skip_frame(false);

        let engine = Encoder::with_api_config(OpenH264API::from_source(), engine_config)
            .map_err(|err| CodecError::InitFailed(err.to_string()))?;

        self.engine = Some(engine);
        self.config = config.clone();
        self.frame_index = 0;
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        force_keyframe: bool,
    ) -> Result<EncodedPacket, CodecError> {
        if self.engine.is_none() {
            return Err(CodecError::NotInitialized);
        }
        if frame.width != self.config.width || frame.height != self.config.height {
            return Err(CodecError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }

        self.convert_to_i420(frame)?;
        let yuv = YUVBuffer::from_vec(
            std::mem::take(&mut self.yuv_buffer),
            self.config.width as usize,
            self.config.height as usize,
        );

        let gop = self.config.gop_length.max(1) as u64;
        let keyframe = force_keyframe || self.frame_index % gop == 0;

        let engine = self.engine.as_mut().expect("checked above");
        if keyframe {
            engine.force_intra_frame();
        }

        let bitstream = engine
            .encode(&yuv)
            .map_err(|err| CodecError::EncodeFailed(err.to_string()))?;

        // Aggregate NAL units with Annex-B start codes.
        let mut payload = Vec::new();
        for l in 0..bitstream.num_layers() {
            let Some(layer) = bitstream.layer(l) else {
                continue;
            };
            for n in 0..layer.nal_count() {
                if let Some(nal) = layer.nal_unit(n) {
                    let has_start_code =
                        nal.starts_with(&[0, 0, 0, 1]) || nal.starts_with(&[0, 0, 1]);
                    if !has_start_code {
                        payload.extend_from_slice(&[0, 0, 0, 1]);
                    }
                    payload.extend_from_slice(nal);
                }
            }
        }

        if payload.is_empty() {
            return Err(CodecError::EncodeFailed("empty bitstream".into()));
        }

        let packet = EncodedPacket {
            data: Bytes::from(payload),
            timestamp_us: frame.timestamp_us,
            keyframe,
            frame_index: self.frame_index,
        };
        self.frame_index += 1;
        Ok(packet)
    }

    fn set_bitrate(&mut self, bitrate_bps: u32) -> Result<(), CodecError> {
        // OpenH264 picks the new target up on the next engine rebuild.
        self.config.bitrate_bps = bitrate_bps;
        debug!(bitrate_bps, "software encoder bitrate updated");
        Ok(())
    }

    fn set_framerate(&mut self, fps: u32) -> Result<(), CodecError> {
        self.config.framerate = (fps, 1);
        debug!(fps, "software encoder framerate updated");
        Ok(())
    }

    fn info(&self) -> EncoderInfo {
        EncoderInfo {
            implementation_name: "OpenH264".into(),
            is_hardware_accelerated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_h264_only() {
        let backend = OpenH264Backend::new();
        let formats = backend.supported_formats();
        assert_eq!(formats.len(), 2);
        assert!(formats.iter().all(|f| f.name == "H264"));
        assert_eq!(
            formats[0].parameters.get("packetization-mode"),
            Some(&"1".to_string())
        );
    }

    #[test]
    fn query_reports_software() {
        let backend = OpenH264Backend::new();
        let format = backend.supported_formats().remove(0);
        let info = backend.query_encoder(&format).unwrap();
        assert!(!info.is_hardware_accelerated);
    }

    #[test]
    fn query_rejects_foreign_formats() {
        let backend = OpenH264Backend::new();
        let err = backend.query_encoder(&VideoFormat::new("VP8")).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedFormat(_)));
    }

    #[test]
    fn encode_before_init_is_not_initialized() {
        let mut encoder = OpenH264VideoEncoder::new();
        let frame = VideoFrame::from_rgba(2, 2, vec![0; 16], 0);
        let err = encoder.encode(&frame, false).unwrap_err();
        assert!(matches!(err, CodecError::NotInitialized));
    }

    #[test]
    fn encodes_a_keyframe_first() {
        let mut encoder = OpenH264VideoEncoder::new();
        encoder
            .init(&EncoderConfig::new(64, 64).bitrate(200_000))
            .unwrap();
        let frame = VideoFrame::from_bgra(64, 64, vec![128; 64 * 64 * 4], 0);
        let packet = encoder.encode(&frame, false).unwrap();
        assert!(packet.keyframe);
        assert_eq!(packet.frame_index, 0);
        assert!(packet.data.starts_with(&[0, 0, 0, 1]) || packet.data.starts_with(&[0, 0, 1]));
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let mut encoder = OpenH264VideoEncoder::new();
        encoder.init(&EncoderConfig::new(64, 64)).unwrap();
        let frame = VideoFrame::from_rgba(32, 32, vec![0; 32 * 32 * 4], 0);
        let err = encoder.encode(&frame, false).unwrap_err();
        assert!(matches!(err, CodecError::InvalidDimensions { .. }));
    }
}
