//! Minimal FFI surface over NVIDIA's `nvEncodeAPI` library.
//!
//! The library is loaded dynamically at runtime so the crate builds and
//! runs on machines without the NVIDIA runtime; absence surfaces as a
//! typed error that the factory downgrades to "software only". Covers
//! only what the backend needs: session management, codec enumeration,
//! preset lookup, buffers, and the encode/readback loop.
//!
//! Reference: NVIDIA Video Codec SDK, `nvEncodeAPI.h`.

// Struct layouts mirror the C ABI; reserved and out-only fields are
// never read from Rust.
#![allow(dead_code)]

use std::ffi::c_void;
use std::sync::Arc;

use libloading::Library;
use tracing::debug;

use crate::error::CodecError;
use crate::types::BufferFormat;

/// NVENC API return type (`NVENCSTATUS`).
pub(crate) type NvencStatus = i32;

pub(crate) const NV_ENC_SUCCESS: NvencStatus = 0;

/// API version this surface targets (Video Codec SDK 12.x).
const NVENCAPI_MAJOR_VERSION: u32 = 12;
const NVENCAPI_MINOR_VERSION: u32 = 0;
const NVENCAPI_VERSION: u32 = NVENCAPI_MAJOR_VERSION | (NVENCAPI_MINOR_VERSION << 24);

/// Struct versioning: `struct_ver | (NVENCAPI_VERSION << 16)`.
pub(crate) const fn struct_version(struct_ver: u32) -> u32 {
    struct_ver | (NVENCAPI_VERSION << 16)
}

/// Device type passed when opening a session on a CUDA context.
pub(crate) const NV_ENC_DEVICE_TYPE_CUDA: u32 = 2;

/// Frame picture structure.
pub(crate) const NV_ENC_PIC_STRUCT_FRAME: u32 = 1;

/// Force-IDR flag in `NvEncPicParams::encode_pic_flags`.
pub(crate) const NV_ENC_PIC_FLAG_FORCEIDR: u32 = 0x04;

/// End-of-stream flag used to flush the encoder.
pub(crate) const NV_ENC_PIC_FLAG_EOS: u32 = 0x08;

/// Picture types reported in the locked bitstream.
pub(crate) const NV_ENC_PIC_TYPE_I: u32 = 2;
pub(crate) const NV_ENC_PIC_TYPE_IDR: u32 = 3;

/// Low-latency tuning preset info.
pub(crate) const NV_ENC_TUNING_INFO_LOW_LATENCY: u32 = 2;

// -- Buffer formats (NV_ENC_BUFFER_FORMAT) --

pub(crate) const NV_ENC_BUFFER_FORMAT_NV12: u32 = 0x0000_0001;
pub(crate) const NV_ENC_BUFFER_FORMAT_ARGB: u32 = 0x0100_0000;
pub(crate) const NV_ENC_BUFFER_FORMAT_ABGR: u32 = 0x1000_0000;

pub(crate) fn buffer_format_value(format: BufferFormat) -> u32 {
    match format {
        BufferFormat::Nv12 => NV_ENC_BUFFER_FORMAT_NV12,
        BufferFormat::Argb => NV_ENC_BUFFER_FORMAT_ARGB,
        BufferFormat::Abgr => NV_ENC_BUFFER_FORMAT_ABGR,
    }
}

/// GUID layout matching NVENC's `GUID` type.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct NvGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

pub(crate) const NV_ENC_CODEC_H264_GUID: NvGuid = NvGuid {
    data1: 0x6BC8_2762,
    data2: 0x4E63,
    data3: 0x4CA4,
    data4: [0xAA, 0x85, 0x1A, 0x4D, 0x14, 0x15, 0x26, 0xD2],
};

pub(crate) const NV_ENC_CODEC_HEVC_GUID: NvGuid = NvGuid {
    data1: 0x790C_DC88,
    data2: 0x4522,
    data3: 0x4D7B,
    data4: [0x94, 0x25, 0xBD, 0xA9, 0x97, 0x5F, 0x76, 0x03],
};

pub(crate) const NV_ENC_CODEC_AV1_GUID: NvGuid = NvGuid {
    data1: 0x0A35_2289,
    data2: 0x0AA7,
    data3: 0x4759,
    data4: [0x86, 0x2D, 0x5D, 0x15, 0xCD, 0x16, 0xD2, 0x54],
};

/// Preset P4 (balanced).
pub(crate) const NV_ENC_PRESET_P4_GUID: NvGuid = NvGuid {
    data1: 0x90A7_B826,
    data2: 0xDF06,
    data3: 0x4862,
    data4: [0xB9, 0xD2, 0xCD, 0x6D, 0x73, 0xA0, 0x8A, 0x81],
};

// -- Parameter structs (POD mirrors of the SDK layouts) --

#[repr(C)]
pub(crate) struct NvEncOpenEncodeSessionExParams {
    pub version: u32,
    pub device_type: u32,
    pub device: *mut c_void,
    pub reserved: *mut c_void,
    pub api_version: u32,
    pub reserved1: [u32; 253],
    pub reserved2: [*mut c_void; 64],
}

impl Default for NvEncOpenEncodeSessionExParams {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut params: Self = unsafe { std::mem::zeroed() };
        params.version = struct_version(1);
        params.api_version = NVENCAPI_VERSION;
        params
    }
}

#[repr(C)]
#[derive(Clone)]
pub(crate) struct NvEncRcParams {
    pub version: u32,
    pub rate_control_mode: u32,
    pub const_qp: [u32; 3],
    pub average_bitrate: u32,
    pub max_bitrate: u32,
    pub vbv_buffer_size: u32,
    pub vbv_initial_delay: u32,
    pub reserved: [u32; 245],
}

impl Default for NvEncRcParams {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut params: Self = unsafe { std::mem::zeroed() };
        params.version = struct_version(1);
        params
    }
}

#[repr(C)]
pub(crate) struct NvEncConfig {
    pub version: u32,
    pub profile_guid: NvGuid,
    pub gop_length: u32,
    pub frame_interval_p: i32,
    pub monochrome_encoding: u32,
    pub frame_field_mode: u32,
    pub mv_precision: u32,
    pub rc_params: NvEncRcParams,
    pub encode_codec_config: [u8; 7168],
    pub reserved: [u32; 67],
    pub reserved2: [*mut c_void; 64],
}

impl Default for NvEncConfig {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut config: Self = unsafe { std::mem::zeroed() };
        config.version = struct_version(8);
        config.rc_params.version = struct_version(1);
        config
    }
}

#[repr(C)]
pub(crate) struct NvEncPresetConfig {
    pub version: u32,
    pub preset_cfg: NvEncConfig,
    pub reserved1: [u32; 255],
    pub reserved2: [*mut c_void; 64],
}

impl Default for NvEncPresetConfig {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut preset: Self = unsafe { std::mem::zeroed() };
        preset.version = struct_version(4);
        preset.preset_cfg = NvEncConfig::default();
        preset
    }
}

#[repr(C)]
pub(crate) struct NvEncInitializeParams {
    pub version: u32,
    pub encode_guid: NvGuid,
    pub preset_guid: NvGuid,
    pub encode_width: u32,
    pub encode_height: u32,
    pub dar_width: u32,
    pub dar_height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub enable_encode_async: u32,
    pub enable_ptd: u32,
    pub flags: [u32; 10],
    pub private_data_size: u32,
    pub private_data: *mut c_void,
    pub encode_config: *mut NvEncConfig,
    pub max_encode_width: u32,
    pub max_encode_height: u32,
    pub max_me_hint_count_per_block: [u32; 2],
    pub tuning_info: u32,
    pub buffer_format: u32,
    pub reserved: [u32; 287],
    pub reserved2: [*mut c_void; 64],
}

impl Default for NvEncInitializeParams {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut params: Self = unsafe { std::mem::zeroed() };
        params.version = struct_version(7);
        // Let NVENC decide picture types.
        params.enable_ptd = 1;
        params
    }
}

#[repr(C)]
pub(crate) struct NvEncCreateInputBuffer {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub memory_heap: u32,
    pub buffer_fmt: u32,
    pub reserved: u32,
    pub input_buffer: *mut c_void,
    pub system_memory: *mut c_void,
    pub reserved1: [u32; 57],
    pub reserved2: [*mut c_void; 63],
}

impl Default for NvEncCreateInputBuffer {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut params: Self = unsafe { std::mem::zeroed() };
        params.version = struct_version(1);
        params
    }
}

#[repr(C)]
pub(crate) struct NvEncCreateBitstreamBuffer {
    pub version: u32,
    pub size: u32,
    pub memory_heap: u32,
    pub reserved: u32,
    pub bitstream_buffer: *mut c_void,
    pub bitstream_buffer_ptr: *mut c_void,
    pub reserved1: [u32; 58],
    pub reserved2: [*mut c_void; 64],
}

impl Default for NvEncCreateBitstreamBuffer {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut params: Self = unsafe { std::mem::zeroed() };
        params.version = struct_version(1);
        params
    }
}

#[repr(C)]
pub(crate) struct NvEncLockInputBuffer {
    pub version: u32,
    pub do_not_wait: u32,
    pub input_buffer: *mut c_void,
    pub buffer_data_ptr: *mut c_void,
    pub pitch: u32,
    pub reserved1: [u32; 251],
    pub reserved2: [*mut c_void; 64],
}

impl Default for NvEncLockInputBuffer {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut params: Self = unsafe { std::mem::zeroed() };
        params.version = struct_version(1);
        params
    }
}

#[repr(C)]
pub(crate) struct NvEncPicParams {
    pub version: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub input_pitch: u32,
    pub encode_pic_flags: u32,
    pub frame_idx: u32,
    pub input_time_stamp: u64,
    pub input_duration: u64,
    pub input_buffer: *mut c_void,
    pub output_bitstream: *mut c_void,
    pub completion_event: *mut c_void,
    pub buffer_fmt: u32,
    pub pic_struct: u32,
    pub pic_type: u32,
    pub codec_pic_params: [u8; 1024],
    pub me_hint_count_per_block: [u32; 2],
    pub me_external_hints: *mut c_void,
    pub reserved1: [u32; 6],
    pub reserved2: [*mut c_void; 2],
    pub reserved3: [u32; 284],
    pub reserved4: [*mut c_void; 60],
}

impl Default for NvEncPicParams {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut params: Self = unsafe { std::mem::zeroed() };
        params.version = struct_version(6);
        params
    }
}

#[repr(C)]
pub(crate) struct NvEncLockBitstream {
    pub version: u32,
    pub do_not_wait: u32,
    pub output_bitstream: *mut c_void,
    pub slice_offsets: *mut u32,
    pub frame_idx: u32,
    pub hw_encode_status: u32,
    pub num_slices: u32,
    pub bitstream_size_in_bytes: u32,
    pub output_time_stamp: u64,
    pub output_duration: u64,
    pub bitstream_buffer_ptr: *mut c_void,
    pub pic_type: u32,
    pub pic_struct: u32,
    pub frame_avg_qp: u32,
    pub frame_satd: u32,
    pub ltr_frame_idx: u32,
    pub ltr_frame_flag: u32,
    pub reserved: [u32; 236],
    pub reserved2: [*mut c_void; 64],
}

impl Default for NvEncLockBitstream {
    fn default() -> Self {
        // SAFETY: all-zeros is a valid state for this POD struct.
        let mut params: Self = unsafe { std::mem::zeroed() };
        params.version = struct_version(2);
        params
    }
}

// -- Entry point types --

type OpenEncodeSessionEx = unsafe extern "C" fn(
    params: *mut NvEncOpenEncodeSessionExParams,
    encoder: *mut *mut c_void,
) -> NvencStatus;
type GetEncodeGuidCount = unsafe extern "C" fn(encoder: *mut c_void, count: *mut u32) -> NvencStatus;
type GetEncodeGuids = unsafe extern "C" fn(
    encoder: *mut c_void,
    guids: *mut NvGuid,
    array_size: u32,
    count: *mut u32,
) -> NvencStatus;
type GetEncodePresetConfigEx = unsafe extern "C" fn(
    encoder: *mut c_void,
    encode_guid: NvGuid,
    preset_guid: NvGuid,
    tuning_info: u32,
    preset_config: *mut NvEncPresetConfig,
) -> NvencStatus;
type InitializeEncoder =
    unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncInitializeParams) -> NvencStatus;
type CreateInputBuffer =
    unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncCreateInputBuffer) -> NvencStatus;
type DestroyInputBuffer =
    unsafe extern "C" fn(encoder: *mut c_void, input_buffer: *mut c_void) -> NvencStatus;
type CreateBitstreamBuffer = unsafe extern "C" fn(
    encoder: *mut c_void,
    params: *mut NvEncCreateBitstreamBuffer,
) -> NvencStatus;
type DestroyBitstreamBuffer =
    unsafe extern "C" fn(encoder: *mut c_void, bitstream_buffer: *mut c_void) -> NvencStatus;
type LockInputBuffer =
    unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncLockInputBuffer) -> NvencStatus;
type UnlockInputBuffer =
    unsafe extern "C" fn(encoder: *mut c_void, input_buffer: *mut c_void) -> NvencStatus;
type EncodePicture =
    unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncPicParams) -> NvencStatus;
type LockBitstream =
    unsafe extern "C" fn(encoder: *mut c_void, params: *mut NvEncLockBitstream) -> NvencStatus;
type UnlockBitstream =
    unsafe extern "C" fn(encoder: *mut c_void, bitstream_buffer: *mut c_void) -> NvencStatus;
type DestroyEncoder = unsafe extern "C" fn(encoder: *mut c_void) -> NvencStatus;

/// Resolved NVENC entry points.
pub(crate) struct NvencApi {
    pub open_encode_session_ex: OpenEncodeSessionEx,
    pub get_encode_guid_count: GetEncodeGuidCount,
    pub get_encode_guids: GetEncodeGuids,
    pub get_encode_preset_config_ex: GetEncodePresetConfigEx,
    pub initialize_encoder: InitializeEncoder,
    pub create_input_buffer: CreateInputBuffer,
    pub destroy_input_buffer: DestroyInputBuffer,
    pub create_bitstream_buffer: CreateBitstreamBuffer,
    pub destroy_bitstream_buffer: DestroyBitstreamBuffer,
    pub lock_input_buffer: LockInputBuffer,
    pub unlock_input_buffer: UnlockInputBuffer,
    pub encode_picture: EncodePicture,
    pub lock_bitstream: LockBitstream,
    pub unlock_bitstream: UnlockBitstream,
    pub destroy_encoder: DestroyEncoder,
}

/// The dynamically loaded NVENC runtime.
pub(crate) struct NvencLibrary {
    // Keeps the shared library mapped while the entry points are in use.
    _lib: Library,
    pub api: NvencApi,
}

impl std::fmt::Debug for NvencLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvencLibrary").field("loaded", &true).finish()
    }
}

fn runtime_names() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &["nvEncodeAPI64.dll"]
    } else {
        &["libnvidia-encode.so.1", "libnvidia-encode.so"]
    }
}

fn entry_point<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, CodecError> {
    // SAFETY: `name` designates a well-known NVENC entry point and `T`
    // is the matching function pointer type from nvEncodeAPI.h.
    match unsafe { lib.get::<T>(name) } {
        Ok(sym) => Ok(*sym),
        Err(err) => Err(CodecError::NvencUnavailable(format!(
            "missing entry point {}: {err}",
            String::from_utf8_lossy(&name[..name.len() - 1])
        ))),
    }
}

impl NvencLibrary {
    /// Load the NVENC runtime and resolve the entry points.
    pub fn load() -> Result<Arc<Self>, CodecError> {
        let mut lib = None;
        for name in runtime_names() {
            // SAFETY: loading the well-known NVIDIA encode runtime.
            match unsafe { Library::new(name) } {
                Ok(l) => {
                    debug!(library = name, "NVENC runtime opened");
                    lib = Some(l);
                    break;
                }
                Err(err) => debug!(library = name, %err, "NVENC runtime candidate not loadable"),
            }
        }
        let Some(lib) = lib else {
            return Err(CodecError::NvencUnavailable(
                "encode runtime library not found".into(),
            ));
        };

        let api = NvencApi {
            open_encode_session_ex: entry_point::<OpenEncodeSessionEx>(
                &lib,
                b"NvEncOpenEncodeSessionEx\0",
            )?,
            get_encode_guid_count: entry_point::<GetEncodeGuidCount>(
                &lib,
                b"NvEncGetEncodeGUIDCount\0",
            )?,
            get_encode_guids: entry_point::<GetEncodeGuids>(&lib, b"NvEncGetEncodeGUIDs\0")?,
            get_encode_preset_config_ex: entry_point::<GetEncodePresetConfigEx>(
                &lib,
                b"NvEncGetEncodePresetConfigEx\0",
            )?,
            initialize_encoder: entry_point::<InitializeEncoder>(&lib, b"NvEncInitializeEncoder\0")?,
            create_input_buffer: entry_point::<CreateInputBuffer>(&lib, b"NvEncCreateInputBuffer\0")?,
            destroy_input_buffer: entry_point::<DestroyInputBuffer>(
                &lib,
                b"NvEncDestroyInputBuffer\0",
            )?,
            create_bitstream_buffer: entry_point::<CreateBitstreamBuffer>(
                &lib,
                b"NvEncCreateBitstreamBuffer\0",
            )?,
            destroy_bitstream_buffer: entry_point::<DestroyBitstreamBuffer>(
                &lib,
                b"NvEncDestroyBitstreamBuffer\0",
            )?,
            lock_input_buffer: entry_point::<LockInputBuffer>(&lib, b"NvEncLockInputBuffer\0")?,
            unlock_input_buffer: entry_point::<UnlockInputBuffer>(
                &lib,
                b"NvEncUnlockInputBuffer\0",
            )?,
            encode_picture: entry_point::<EncodePicture>(&lib, b"NvEncEncodePicture\0")?,
            lock_bitstream: entry_point::<LockBitstream>(&lib, b"NvEncLockBitstream\0")?,
            unlock_bitstream: entry_point::<UnlockBitstream>(&lib, b"NvEncUnlockBitstream\0")?,
            destroy_encoder: entry_point::<DestroyEncoder>(&lib, b"NvEncDestroyEncoder\0")?,
        };

        Ok(Arc::new(Self { _lib: lib, api }))
    }
}

/// Map an `NVENCSTATUS` to a result.
pub(crate) fn check(status: NvencStatus, call: &'static str) -> Result<(), CodecError> {
    if status == NV_ENC_SUCCESS {
        Ok(())
    } else {
        Err(CodecError::Nvenc {
            call,
            status,
            name: status_name(status),
        })
    }
}

/// Human-readable name for an `NVENCSTATUS` value.
pub(crate) fn status_name(status: NvencStatus) -> &'static str {
    match status {
        0 => "NV_ENC_SUCCESS",
        1 => "NV_ENC_ERR_NO_ENCODE_DEVICE",
        2 => "NV_ENC_ERR_UNSUPPORTED_DEVICE",
        3 => "NV_ENC_ERR_INVALID_ENCODERDEVICE",
        4 => "NV_ENC_ERR_INVALID_DEVICE",
        5 => "NV_ENC_ERR_DEVICE_NOT_EXIST",
        6 => "NV_ENC_ERR_INVALID_PTR",
        8 => "NV_ENC_ERR_INVALID_PARAM",
        9 => "NV_ENC_ERR_INVALID_CALL",
        10 => "NV_ENC_ERR_OUT_OF_MEMORY",
        11 => "NV_ENC_ERR_ENCODER_NOT_INITIALIZED",
        13 => "NV_ENC_ERR_LOCK_BUSY",
        15 => "NV_ENC_ERR_INVALID_VERSION",
        17 => "NV_ENC_ERR_NEED_MORE_INPUT",
        18 => "NV_ENC_ERR_ENCODER_BUSY",
        20 => "NV_ENC_ERR_GENERIC",
        _ => "NV_ENC_ERR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_versions_are_packed() {
        let version = struct_version(1);
        assert_eq!(version & 0xFFFF, 1);
        assert_ne!(version, 1);
    }

    #[test]
    fn defaults_carry_versions() {
        assert_ne!(NvEncOpenEncodeSessionExParams::default().version, 0);
        assert_ne!(NvEncInitializeParams::default().version, 0);
        assert_eq!(NvEncInitializeParams::default().enable_ptd, 1);
        assert_ne!(NvEncPicParams::default().version, 0);
        assert_ne!(NvEncLockBitstream::default().version, 0);
    }

    #[test]
    fn codec_guids_are_distinct() {
        assert_ne!(NV_ENC_CODEC_H264_GUID, NV_ENC_CODEC_HEVC_GUID);
        assert_ne!(NV_ENC_CODEC_H264_GUID, NV_ENC_CODEC_AV1_GUID);
        assert_ne!(NV_ENC_CODEC_HEVC_GUID, NV_ENC_CODEC_AV1_GUID);
    }

    #[test]
    fn status_check_maps_failures() {
        assert!(check(NV_ENC_SUCCESS, "NvEncTest").is_ok());
        let err = check(8, "NvEncTest").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("NvEncTest"));
        assert!(msg.contains("NV_ENC_ERR_INVALID_PARAM"));
    }

    #[test]
    fn buffer_formats_match_the_sdk_values() {
        assert_eq!(buffer_format_value(BufferFormat::Nv12), 0x0000_0001);
        assert_eq!(buffer_format_value(BufferFormat::Argb), 0x0100_0000);
        assert_eq!(buffer_format_value(BufferFormat::Abgr), 0x1000_0000);
    }
}
