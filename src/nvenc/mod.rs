//! NVENC hardware encoder backend.
//!
//! Built only when the graphics layer resolved a CUDA context for its
//! adapter. Construction probes the device's encode capabilities on a
//! throwaway session; failure at any point (no runtime library, no
//! encode-capable device) surfaces as a typed error that the factory
//! downgrades to the software-only path.

mod api;
mod encoder;

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use tracing::{debug, info};

use self::api::{
    check, NvEncOpenEncodeSessionExParams, NvGuid, NvencLibrary, NV_ENC_CODEC_AV1_GUID,
    NV_ENC_CODEC_H264_GUID, NV_ENC_CODEC_HEVC_GUID, NV_ENC_DEVICE_TYPE_CUDA,
};
pub use self::encoder::NvencEncoder;
use crate::cuda::CudaContextHandle;
use crate::error::CodecError;
use crate::format::VideoFormat;
use crate::traits::{EncoderBackend, VideoEncoder};
use crate::types::{BufferFormat, Codec, CodecInfo};

/// H.264 profile-level-id advertised for the hardware encoder.
const H264_CONSTRAINED_BASELINE_3_1: &str = "42e01f";

fn format_for_codec(codec: Codec) -> VideoFormat {
    match codec {
        Codec::H264 => VideoFormat::new("H264")
            .parameter("level-asymmetry-allowed", "1")
            .parameter("packetization-mode", "1")
            .parameter("profile-level-id", H264_CONSTRAINED_BASELINE_3_1),
        Codec::Hevc => VideoFormat::new("H265"),
        Codec::Av1 => VideoFormat::new("AV1X"),
    }
}

fn codec_for_guid(guid: &NvGuid) -> Option<Codec> {
    if *guid == NV_ENC_CODEC_H264_GUID {
        Some(Codec::H264)
    } else if *guid == NV_ENC_CODEC_HEVC_GUID {
        Some(Codec::Hevc)
    } else if *guid == NV_ENC_CODEC_AV1_GUID {
        Some(Codec::Av1)
    } else {
        None
    }
}

/// Enumerate the encode codec GUIDs of the device behind `context` on a
/// short-lived probe session.
fn probe_codecs(
    library: &NvencLibrary,
    context: CudaContextHandle,
) -> Result<Vec<Codec>, CodecError> {
    let api = &library.api;

    let mut session_params = NvEncOpenEncodeSessionExParams::default();
    session_params.device_type = NV_ENC_DEVICE_TYPE_CUDA;
    session_params.device = context.as_raw();

    let mut encoder: *mut c_void = ptr::null_mut();
    // SAFETY: the params struct is fully initialized and the out pointer
    // is valid.
    check(
        unsafe { (api.open_encode_session_ex)(&mut session_params, &mut encoder) },
        "NvEncOpenEncodeSessionEx",
    )?;

    let result = (|| {
        let mut count: u32 = 0;
        // SAFETY: valid encoder handle and out pointer.
        check(
            unsafe { (api.get_encode_guid_count)(encoder, &mut count) },
            "NvEncGetEncodeGUIDCount",
        )?;

        let mut guids = vec![
            NvGuid {
                data1: 0,
                data2: 0,
                data3: 0,
                data4: [0; 8],
            };
            count as usize
        ];
        let mut written: u32 = 0;
        // SAFETY: the array holds `count` GUID slots.
        check(
            unsafe { (api.get_encode_guids)(encoder, guids.as_mut_ptr(), count, &mut written) },
            "NvEncGetEncodeGUIDs",
        )?;
        guids.truncate(written as usize);

        Ok(guids.iter().filter_map(codec_for_guid).collect())
    })();

    // SAFETY: the probe session was opened above; close it on both paths.
    unsafe {
        let _ = (api.destroy_encoder)(encoder);
    }
    result
}

/// Hardware encoder backend over NVENC.
pub struct NvencBackend {
    library: Arc<NvencLibrary>,
    context: CudaContextHandle,
    buffer_format: BufferFormat,
    codecs: Vec<Codec>,
    formats: Vec<VideoFormat>,
}

impl NvencBackend {
    /// Load the NVENC runtime and probe the device behind `context`.
    pub fn new(
        context: CudaContextHandle,
        buffer_format: BufferFormat,
    ) -> Result<Self, CodecError> {
        let library = NvencLibrary::load()?;
        let codecs = probe_codecs(&library, context)?;
        if codecs.is_empty() {
            return Err(CodecError::NvencUnavailable(
                "device exposes no encode codecs".into(),
            ));
        }
        let formats: Vec<VideoFormat> = codecs.iter().map(|c| format_for_codec(*c)).collect();
        info!(
            codecs = ?codecs,
            ?buffer_format,
            "NVENC backend ready"
        );
        Ok(Self {
            library,
            context,
            buffer_format,
            codecs,
            formats,
        })
    }

    fn codec_for_format(&self, format: &VideoFormat) -> Option<Codec> {
        self.codecs
            .iter()
            .zip(self.formats.iter())
            .find(|(_, candidate)| *candidate == format)
            .map(|(codec, _)| *codec)
    }
}

impl EncoderBackend for NvencBackend {
    fn supported_formats(&self) -> Vec<VideoFormat> {
        self.formats.clone()
    }

    fn query_encoder(&self, format: &VideoFormat) -> Result<CodecInfo, CodecError> {
        if self.codec_for_format(format).is_none() {
            return Err(CodecError::UnsupportedFormat(format.to_string()));
        }
        Ok(CodecInfo {
            is_hardware_accelerated: true,
        })
    }

    fn create_encoder(&self, format: &VideoFormat) -> Result<Box<dyn VideoEncoder>, CodecError> {
        let codec = self
            .codec_for_format(format)
            .ok_or_else(|| CodecError::UnsupportedFormat(format.to_string()))?;
        debug!(?codec, "creating NVENC encoder");
        Ok(Box::new(NvencEncoder::new(
            Arc::clone(&self.library),
            self.context,
            self.buffer_format,
            codec,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_formats_use_the_negotiation_names() {
        assert_eq!(format_for_codec(Codec::H264).name, "H264");
        assert_eq!(format_for_codec(Codec::Hevc).name, "H265");
        assert_eq!(format_for_codec(Codec::Av1).name, "AV1X");
    }

    #[test]
    fn guid_mapping_ignores_unknown_codecs() {
        assert_eq!(codec_for_guid(&NV_ENC_CODEC_H264_GUID), Some(Codec::H264));
        let unknown = NvGuid {
            data1: 1,
            data2: 2,
            data3: 3,
            data4: [4; 8],
        };
        assert_eq!(codec_for_guid(&unknown), None);
    }
}
