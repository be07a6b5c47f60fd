//! NVENC encoder session.

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::api::{
    buffer_format_value, check, NvEncCreateBitstreamBuffer, NvEncCreateInputBuffer,
    NvEncInitializeParams, NvEncLockBitstream, NvEncLockInputBuffer, NvEncOpenEncodeSessionExParams,
    NvEncPicParams, NvEncPresetConfig, NvGuid, NvencLibrary, NV_ENC_CODEC_AV1_GUID,
    NV_ENC_CODEC_H264_GUID, NV_ENC_CODEC_HEVC_GUID, NV_ENC_DEVICE_TYPE_CUDA, NV_ENC_PIC_FLAG_EOS,
    NV_ENC_PIC_FLAG_FORCEIDR, NV_ENC_PIC_STRUCT_FRAME, NV_ENC_PIC_TYPE_I, NV_ENC_PIC_TYPE_IDR,
    NV_ENC_PRESET_P4_GUID, NV_ENC_TUNING_INFO_LOW_LATENCY,
};
use crate::cuda::CudaContextHandle;
use crate::error::CodecError;
use crate::traits::VideoEncoder;
use crate::types::{
    BufferFormat, Codec, EncodedPacket, EncoderConfig, EncoderInfo, PixelFormat, VideoFrame,
};

fn codec_guid(codec: Codec) -> NvGuid {
    match codec {
        Codec::H264 => NV_ENC_CODEC_H264_GUID,
        Codec::Hevc => NV_ENC_CODEC_HEVC_GUID,
        Codec::Av1 => NV_ENC_CODEC_AV1_GUID,
    }
}

/// One NVENC session plus its input and bitstream buffers.
struct Session {
    encoder: *mut c_void,
    input_buffer: *mut c_void,
    bitstream_buffer: *mut c_void,
    width: u32,
    height: u32,
    buffer_fmt: u32,
}

/// Hardware encoder driving one NVENC session on the session-owned CUDA
/// context. Frames are copied through the NVENC input buffer; the
/// encoded payload is read back from the locked bitstream.
pub struct NvencEncoder {
    library: Arc<NvencLibrary>,
    context: CudaContextHandle,
    buffer_format: BufferFormat,
    codec: Codec,
    session: Option<Session>,
    config: EncoderConfig,
    frame_index: u64,
    staging: Vec<u8>,
}

// SAFETY: the session pointers are NVENC handles only touched through
// &mut self; the context handle is an address token.
unsafe impl Send for NvencEncoder {}

impl NvencEncoder {
    pub(crate) fn new(
        library: Arc<NvencLibrary>,
        context: CudaContextHandle,
        buffer_format: BufferFormat,
        codec: Codec,
    ) -> Self {
        // The CPU upload path writes packed pixels; NV12 surfaces come
        // from the graphics layer, which this encoder does not consume.
        let buffer_format = match buffer_format {
            BufferFormat::Nv12 => BufferFormat::Argb,
            other => other,
        };
        Self {
            library,
            context,
            buffer_format,
            codec,
            session: None,
            config: EncoderConfig::default(),
            frame_index: 0,
            staging: Vec::new(),
        }
    }

    fn open_session(&self, config: &EncoderConfig) -> Result<Session, CodecError> {
        let api = &self.library.api;

        let mut session_params = NvEncOpenEncodeSessionExParams::default();
        session_params.device_type = NV_ENC_DEVICE_TYPE_CUDA;
        session_params.device = self.context.as_raw();

        let mut encoder: *mut c_void = ptr::null_mut();
        // SAFETY: the params struct is fully initialized and the out
        // pointer is valid.
        check(
            unsafe { (api.open_encode_session_ex)(&mut session_params, &mut encoder) },
            "NvEncOpenEncodeSessionEx",
        )?;

        let encode_guid = codec_guid(self.codec);
        let preset_guid = NV_ENC_PRESET_P4_GUID;

        let result = (|| {
            let mut preset = NvEncPresetConfig::default();
            // SAFETY: valid encoder handle and out struct.
            check(
                unsafe {
                    (api.get_encode_preset_config_ex)(
                        encoder,
                        encode_guid,
                        preset_guid,
                        NV_ENC_TUNING_INFO_LOW_LATENCY,
                        &mut preset,
                    )
                },
                "NvEncGetEncodePresetConfigEx",
            )?;

            let mut encode_config = preset.preset_cfg;
            if config.gop_length > 0 {
                encode_config.gop_length = config.gop_length;
            }
            encode_config.rc_params.average_bitrate = config.bitrate_bps;
            encode_config.rc_params.max_bitrate = config.max_bitrate_bps;

            let mut init_params = NvEncInitializeParams::default();
            init_params.encode_guid = encode_guid;
            init_params.preset_guid = preset_guid;
            init_params.encode_width = config.width;
            init_params.encode_height = config.height;
            init_params.dar_width = config.width;
            init_params.dar_height = config.height;
            init_params.frame_rate_num = config.framerate.0;
            init_params.frame_rate_den = config.framerate.1.max(1);
            init_params.tuning_info = NV_ENC_TUNING_INFO_LOW_LATENCY;
            init_params.encode_config = &mut encode_config;

            // SAFETY: encode_config outlives the call; the handle is live.
            check(
                unsafe { (api.initialize_encoder)(encoder, &mut init_params) },
                "NvEncInitializeEncoder",
            )?;

            let buffer_fmt = buffer_format_value(self.buffer_format);
            let mut create_input = NvEncCreateInputBuffer::default();
            create_input.width = config.width;
            create_input.height = config.height;
            create_input.buffer_fmt = buffer_fmt;
            // SAFETY: valid encoder handle and out struct.
            check(
                unsafe { (api.create_input_buffer)(encoder, &mut create_input) },
                "NvEncCreateInputBuffer",
            )?;
            let input_buffer = create_input.input_buffer;

            let mut create_bitstream = NvEncCreateBitstreamBuffer::default();
            // SAFETY: valid encoder handle and out struct.
            let created = check(
                unsafe { (api.create_bitstream_buffer)(encoder, &mut create_bitstream) },
                "NvEncCreateBitstreamBuffer",
            );
            if let Err(err) = created {
                // SAFETY: input_buffer was created above on this session.
                unsafe {
                    let _ = (api.destroy_input_buffer)(encoder, input_buffer);
                }
                return Err(err);
            }

            Ok(Session {
                encoder,
                input_buffer,
                bitstream_buffer: create_bitstream.bitstream_buffer,
                width: config.width,
                height: config.height,
                buffer_fmt,
            })
        })();

        if result.is_err() {
            // SAFETY: the session was opened above and owns no buffers on
            // this path.
            unsafe {
                let _ = (api.destroy_encoder)(encoder);
            }
        }
        result
    }

    /// Convert the frame into the session's packed buffer format.
    fn fill_staging(&mut self, frame: &VideoFrame) -> Result<(), CodecError> {
        // Destination channel order within one 4-byte pixel.
        let dst_order: [usize; 4] = match self.buffer_format {
            BufferFormat::Argb => [0, 1, 2, 3], // A R G B
            BufferFormat::Abgr => [0, 3, 2, 1], // A B G R
            BufferFormat::Nv12 => return Err(CodecError::UnsupportedPixelFormat),
        };
        // Source offsets of (A, R, G, B).
        let src_argb: [usize; 4] = match frame.pixel_format {
            PixelFormat::Rgba => [3, 0, 1, 2],
            PixelFormat::Bgra => [3, 2, 1, 0],
            PixelFormat::Argb => [0, 1, 2, 3],
            PixelFormat::I420 => return Err(CodecError::UnsupportedPixelFormat),
        };

        let pixels = frame.width as usize * frame.height as usize;
        if frame.data.len() < pixels * 4 {
            return Err(CodecError::EncodeFailed(format!(
                "frame data too short: {} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        self.staging.resize(pixels * 4, 0);
        for i in 0..pixels {
            let src = &frame.data[i * 4..i * 4 + 4];
            let dst = &mut self.staging[i * 4..i * 4 + 4];
            // dst holds (A, R, G, B) values placed per the target order.
            dst[dst_order[0]] = src[src_argb[0]];
            dst[dst_order[1]] = src[src_argb[1]];
            dst[dst_order[2]] = src[src_argb[2]];
            dst[dst_order[3]] = src[src_argb[3]];
        }
        Ok(())
    }

    fn upload_staging(&mut self, session: &Session) -> Result<u32, CodecError> {
        let api = &self.library.api;

        let mut lock = NvEncLockInputBuffer::default();
        lock.input_buffer = session.input_buffer;
        // SAFETY: valid session handles.
        check(
            unsafe { (api.lock_input_buffer)(session.encoder, &mut lock) },
            "NvEncLockInputBuffer",
        )?;

        let pitch = lock.pitch as usize;
        let row_bytes = session.width as usize * 4;
        let dst = lock.buffer_data_ptr as *mut u8;
        for row in 0..session.height as usize {
            // SAFETY: the locked buffer spans height rows of `pitch`
            // bytes; each copy stays within one row.
            unsafe {
                ptr::copy_nonoverlapping(
                    self.staging.as_ptr().add(row * row_bytes),
                    dst.add(row * pitch),
                    row_bytes,
                );
            }
        }

        // SAFETY: the buffer was locked above.
        check(
            unsafe { (api.unlock_input_buffer)(session.encoder, session.input_buffer) },
            "NvEncUnlockInputBuffer",
        )?;
        Ok(lock.pitch)
    }

    fn read_bitstream(
        &self,
        session: &Session,
        timestamp_us: u64,
        frame_index: u64,
    ) -> Result<EncodedPacket, CodecError> {
        let api = &self.library.api;

        let mut lock = NvEncLockBitstream::default();
        lock.output_bitstream = session.bitstream_buffer;
        // SAFETY: valid session handles.
        check(
            unsafe { (api.lock_bitstream)(session.encoder, &mut lock) },
            "NvEncLockBitstream",
        )?;

        let size = lock.bitstream_size_in_bytes as usize;
        // SAFETY: the locked bitstream exposes `size` readable bytes.
        let payload =
            unsafe { std::slice::from_raw_parts(lock.bitstream_buffer_ptr as *const u8, size) }
                .to_vec();
        let keyframe = lock.pic_type == NV_ENC_PIC_TYPE_IDR || lock.pic_type == NV_ENC_PIC_TYPE_I;

        // SAFETY: the bitstream was locked above.
        check(
            unsafe { (api.unlock_bitstream)(session.encoder, session.bitstream_buffer) },
            "NvEncUnlockBitstream",
        )?;

        Ok(EncodedPacket {
            data: Bytes::from(payload),
            timestamp_us,
            keyframe,
            frame_index,
        })
    }

    fn send_eos(&self, session: &Session) {
        let mut pic = NvEncPicParams::default();
        pic.encode_pic_flags = NV_ENC_PIC_FLAG_EOS;
        // SAFETY: flush with no input buffer is the documented EOS form.
        let status = unsafe { (self.library.api.encode_picture)(session.encoder, &mut pic) };
        if let Err(err) = check(status, "NvEncEncodePicture") {
            debug!(%err, "NVENC EOS flush reported an error");
        }
    }

    fn release_session(&self, session: Session) {
        self.send_eos(&session);
        let api = &self.library.api;
        // SAFETY: all handles below belong to this session and are
        // released exactly once.
        unsafe {
            let _ = (api.destroy_input_buffer)(session.encoder, session.input_buffer);
            let _ = (api.destroy_bitstream_buffer)(session.encoder, session.bitstream_buffer);
            let _ = (api.destroy_encoder)(session.encoder);
        }
        debug!("NVENC session destroyed");
    }
}

impl Drop for NvencEncoder {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.release_session(session);
        }
    }
}

impl VideoEncoder for NvencEncoder {
    fn init(&mut self, config: &EncoderConfig) -> Result<(), CodecError> {
        if let Some(previous) = self.session.take() {
            warn!("re-initializing NVENC encoder, discarding previous session");
            self.release_session(previous);
        }

        let session = self.open_session(config)?;
        info!(
            width = config.width,
            height = config.height,
            codec = ?self.codec,
            "NVENC encoder initialized"
        );
        self.session = Some(session);
        self.config = config.clone();
        self.frame_index = 0;
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        force_keyframe: bool,
    ) -> Result<EncodedPacket, CodecError> {
        let Some(session) = self.session.take() else {
            return Err(CodecError::NotInitialized);
        };
        let result = (|| {
            if frame.width != session.width || frame.height != session.height {
                return Err(CodecError::InvalidDimensions {
                    width: frame.width,
                    height: frame.height,
                });
            }

            self.fill_staging(frame)?;
            let pitch = self.upload_staging(&session)?;

            let mut pic = NvEncPicParams::default();
            pic.input_width = session.width;
            pic.input_height = session.height;
            pic.input_pitch = pitch;
            pic.input_buffer = session.input_buffer;
            pic.output_bitstream = session.bitstream_buffer;
            pic.buffer_fmt = session.buffer_fmt;
            pic.pic_struct = NV_ENC_PIC_STRUCT_FRAME;
            pic.input_time_stamp = frame.timestamp_us;
            if force_keyframe {
                pic.encode_pic_flags = NV_ENC_PIC_FLAG_FORCEIDR;
            }

            // SAFETY: all handles belong to the live session.
            check(
                unsafe { (self.library.api.encode_picture)(session.encoder, &mut pic) },
                "NvEncEncodePicture",
            )?;

            let index = self.frame_index;
            self.frame_index += 1;
            self.read_bitstream(&session, frame.timestamp_us, index)
        })();
        self.session = Some(session);
        result
    }

    fn set_bitrate(&mut self, bitrate_bps: u32) -> Result<(), CodecError> {
        // TODO: wire NvEncReconfigureEncoder so the change applies to the
        // live session instead of the next init.
        self.config.bitrate_bps = bitrate_bps;
        debug!(bitrate_bps, "NVENC bitrate target updated");
        Ok(())
    }

    fn set_framerate(&mut self, fps: u32) -> Result<(), CodecError> {
        self.config.framerate = (fps, 1);
        debug!(fps, "NVENC framerate target updated");
        Ok(())
    }

    fn info(&self) -> EncoderInfo {
        EncoderInfo {
            implementation_name: "NVENC".into(),
            is_hardware_accelerated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_guids_map_one_to_one() {
        assert_eq!(codec_guid(Codec::H264), NV_ENC_CODEC_H264_GUID);
        assert_eq!(codec_guid(Codec::Hevc), NV_ENC_CODEC_HEVC_GUID);
        assert_eq!(codec_guid(Codec::Av1), NV_ENC_CODEC_AV1_GUID);
    }
}
