//! Dynamic loading of the CUDA driver library and the capability trait
//! the rest of the CUDA layer is written against.
//!
//! The driver is delay-loaded: nothing touches `libcuda` until the first
//! context-creation attempt, and a missing library is reported as
//! [`CudaError::DriverNotFound`] rather than failing the process. The
//! loaded state lives in an explicitly owned [`DriverModule`] instance,
//! not in a process global, so its lifetime is tied to the session that
//! created it.

use std::ffi::{c_char, c_int, c_uint, c_void};
use std::ptr;
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::error::CudaError;

/// Size in bytes of a physical device UUID (`CUuuid`).
pub const DEVICE_UUID_SIZE: usize = 16;

/// Size in bytes of a locally-unique adapter identifier (`LUID`).
pub const DEVICE_LUID_SIZE: usize = 8;

const CUDA_SUCCESS: c_int = 0;

/// Handle to an enumerated CUDA device.
///
/// Valid only within the current process and only after the driver has
/// been initialized; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CudaDevice(pub(crate) i32);

impl CudaDevice {
    /// Raw `CUdevice` value.
    pub fn raw(&self) -> i32 {
        self.0
    }
}

/// Opaque handle to a CUDA context (`CUcontext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CudaContextHandle(*mut c_void);

// SAFETY: the handle is an address token owned by the driver; this crate
// never dereferences it. Thread affinity of the context it names is
// managed through explicit set-current calls, not through the handle.
unsafe impl Send for CudaContextHandle {}
unsafe impl Sync for CudaContextHandle {}

impl CudaContextHandle {
    /// Wrap a raw `CUcontext` pointer.
    pub fn from_raw(raw: *mut c_void) -> Self {
        Self(raw)
    }

    /// The raw `CUcontext` pointer.
    pub fn as_raw(&self) -> *mut c_void {
        self.0
    }
}

/// Capability set over the CUDA driver used by device resolution and
/// context management.
///
/// The production implementation is [`CudaDriver`], backed by the
/// dynamically loaded driver library; tests and embedders may substitute
/// their own via [`DriverModule::with_api`].
pub trait DriverApi: Send + Sync {
    /// `cuInit`. Idempotent at the driver level.
    fn init(&self) -> Result<(), CudaError>;

    /// Number of CUDA-visible devices.
    fn device_count(&self) -> Result<i32, CudaError>;

    /// Device handle for an enumeration ordinal.
    fn device_get(&self, ordinal: i32) -> Result<CudaDevice, CudaError>;

    /// The device's 16-byte UUID, comparable against the UUID the
    /// graphics API reports for its physical device.
    fn device_uuid(&self, device: CudaDevice) -> Result<[u8; DEVICE_UUID_SIZE], CudaError>;

    /// The device's 8-byte adapter LUID and node mask (Windows drivers).
    fn device_luid(&self, device: CudaDevice)
        -> Result<([u8; DEVICE_LUID_SIZE], u32), CudaError>;

    /// Create a context bound to `device`.
    fn ctx_create(&self, device: CudaDevice) -> Result<CudaContextHandle, CudaError>;

    /// Destroy a context previously created through this API.
    fn ctx_destroy(&self, ctx: CudaContextHandle) -> Result<(), CudaError>;

    /// The context current on the calling thread, if any.
    fn ctx_get_current(&self) -> Result<Option<CudaContextHandle>, CudaError>;

    /// Make `ctx` current on the calling thread, displacing it from any
    /// other thread it was current on.
    fn ctx_set_current(&self, ctx: CudaContextHandle) -> Result<(), CudaError>;
}

// Driver entry points, per cuda.h.
type CuInit = unsafe extern "C" fn(flags: c_uint) -> c_int;
type CuDeviceGetCount = unsafe extern "C" fn(count: *mut c_int) -> c_int;
type CuDeviceGet = unsafe extern "C" fn(device: *mut c_int, ordinal: c_int) -> c_int;
type CuDeviceGetUuid = unsafe extern "C" fn(uuid: *mut CuUuid, device: c_int) -> c_int;
type CuDeviceGetLuid =
    unsafe extern "C" fn(luid: *mut c_char, node_mask: *mut c_uint, device: c_int) -> c_int;
type CuCtxCreate = unsafe extern "C" fn(ctx: *mut *mut c_void, flags: c_uint, device: c_int) -> c_int;
type CuCtxDestroy = unsafe extern "C" fn(ctx: *mut c_void) -> c_int;
type CuCtxGetCurrent = unsafe extern "C" fn(ctx: *mut *mut c_void) -> c_int;
type CuCtxSetCurrent = unsafe extern "C" fn(ctx: *mut c_void) -> c_int;

/// Matches the driver's `CUuuid` struct.
#[repr(C)]
struct CuUuid {
    bytes: [c_char; DEVICE_UUID_SIZE],
}

/// The CUDA driver API resolved from the dynamically loaded library.
pub struct CudaDriver {
    // Keeps the shared library mapped while any symbol is callable.
    _lib: Library,
    init: CuInit,
    device_get_count: CuDeviceGetCount,
    device_get: CuDeviceGet,
    device_get_uuid: CuDeviceGetUuid,
    // Only exported by Windows driver builds.
    device_get_luid: Option<CuDeviceGetLuid>,
    ctx_create: CuCtxCreate,
    ctx_destroy: CuCtxDestroy,
    ctx_get_current: CuCtxGetCurrent,
    ctx_set_current: CuCtxSetCurrent,
}

impl std::fmt::Debug for CudaDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDriver").field("loaded", &true).finish()
    }
}

fn check(status: c_int, call: &'static str) -> Result<(), CudaError> {
    if status == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(CudaError::Driver { call, status })
    }
}

fn symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Option<T> {
    // SAFETY: `name` designates a well-known CUDA driver entry point and
    // `T` is the matching function pointer type from cuda.h.
    unsafe { lib.get::<T>(name) }.ok().map(|sym| *sym)
}

fn required<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, CudaError> {
    symbol(lib, name).ok_or_else(|| {
        // A driver missing mandatory entry points is as unusable as no
        // driver at all.
        warn!(
            symbol = %String::from_utf8_lossy(&name[..name.len() - 1]),
            "CUDA driver library is missing a required entry point"
        );
        CudaError::DriverNotFound
    })
}

impl CudaDriver {
    /// Candidate library names, tried in order.
    fn library_names() -> &'static [&'static str] {
        if cfg!(target_os = "windows") {
            &["nvcuda.dll"]
        } else {
            &["libcuda.so.1", "libcuda.so"]
        }
    }

    /// Open the driver library and resolve the required entry points.
    pub fn load() -> Result<Self, CudaError> {
        let mut lib = None;
        for name in Self::library_names() {
            // SAFETY: loading the well-known NVIDIA driver library.
            match unsafe { Library::new(name) } {
                Ok(l) => {
                    debug!(library = name, "CUDA driver library opened");
                    lib = Some(l);
                    break;
                }
                Err(err) => debug!(library = name, %err, "CUDA driver candidate not loadable"),
            }
        }
        let Some(lib) = lib else {
            return Err(CudaError::DriverNotFound);
        };

        let init = required::<CuInit>(&lib, b"cuInit\0")?;
        let device_get_count = required::<CuDeviceGetCount>(&lib, b"cuDeviceGetCount\0")?;
        let device_get = required::<CuDeviceGet>(&lib, b"cuDeviceGet\0")?;
        let device_get_uuid = required::<CuDeviceGetUuid>(&lib, b"cuDeviceGetUuid\0")?;
        // Windows-only export; its absence just rules out LUID matching.
        let device_get_luid = symbol::<CuDeviceGetLuid>(&lib, b"cuDeviceGetLuid\0");
        let ctx_create = required::<CuCtxCreate>(&lib, b"cuCtxCreate_v2\0")?;
        let ctx_destroy = required::<CuCtxDestroy>(&lib, b"cuCtxDestroy_v2\0")?;
        let ctx_get_current = required::<CuCtxGetCurrent>(&lib, b"cuCtxGetCurrent\0")?;
        let ctx_set_current = required::<CuCtxSetCurrent>(&lib, b"cuCtxSetCurrent\0")?;

        Ok(Self {
            _lib: lib,
            init,
            device_get_count,
            device_get,
            device_get_uuid,
            device_get_luid,
            ctx_create,
            ctx_destroy,
            ctx_get_current,
            ctx_set_current,
        })
    }
}

impl DriverApi for CudaDriver {
    fn init(&self) -> Result<(), CudaError> {
        // SAFETY: cuInit takes a flags word that must be zero.
        check(unsafe { (self.init)(0) }, "cuInit")
    }

    fn device_count(&self) -> Result<i32, CudaError> {
        let mut count: c_int = 0;
        // SAFETY: passes a valid out-pointer.
        check(
            unsafe { (self.device_get_count)(&mut count) },
            "cuDeviceGetCount",
        )?;
        Ok(count)
    }

    fn device_get(&self, ordinal: i32) -> Result<CudaDevice, CudaError> {
        let mut device: c_int = 0;
        // SAFETY: passes a valid out-pointer and an ordinal within the
        // enumerated range.
        check(unsafe { (self.device_get)(&mut device, ordinal) }, "cuDeviceGet")?;
        Ok(CudaDevice(device))
    }

    fn device_uuid(&self, device: CudaDevice) -> Result<[u8; DEVICE_UUID_SIZE], CudaError> {
        let mut uuid = CuUuid {
            bytes: [0; DEVICE_UUID_SIZE],
        };
        // SAFETY: passes a valid out-pointer to a CUuuid-sized buffer.
        check(
            unsafe { (self.device_get_uuid)(&mut uuid, device.0) },
            "cuDeviceGetUuid",
        )?;
        let mut out = [0u8; DEVICE_UUID_SIZE];
        for (dst, src) in out.iter_mut().zip(uuid.bytes.iter()) {
            *dst = *src as u8;
        }
        Ok(out)
    }

    fn device_luid(
        &self,
        device: CudaDevice,
    ) -> Result<([u8; DEVICE_LUID_SIZE], u32), CudaError> {
        let Some(device_get_luid) = self.device_get_luid else {
            // Linux driver builds do not export cuDeviceGetLuid.
            return Err(CudaError::Driver {
                call: "cuDeviceGetLuid",
                status: 500,
            });
        };
        let mut luid = [0 as c_char; DEVICE_LUID_SIZE];
        let mut node_mask: c_uint = 0;
        // SAFETY: passes an 8-byte LUID buffer and a node-mask out-pointer.
        check(
            unsafe { device_get_luid(luid.as_mut_ptr(), &mut node_mask, device.0) },
            "cuDeviceGetLuid",
        )?;
        let mut out = [0u8; DEVICE_LUID_SIZE];
        for (dst, src) in out.iter_mut().zip(luid.iter()) {
            *dst = *src as u8;
        }
        Ok((out, node_mask))
    }

    fn ctx_create(&self, device: CudaDevice) -> Result<CudaContextHandle, CudaError> {
        let mut ctx: *mut c_void = ptr::null_mut();
        // SAFETY: passes a valid out-pointer; flags are zero.
        check(
            unsafe { (self.ctx_create)(&mut ctx, 0, device.0) },
            "cuCtxCreate",
        )?;
        Ok(CudaContextHandle(ctx))
    }

    fn ctx_destroy(&self, ctx: CudaContextHandle) -> Result<(), CudaError> {
        // SAFETY: `ctx` was produced by ctx_create on this driver.
        check(unsafe { (self.ctx_destroy)(ctx.0) }, "cuCtxDestroy")
    }

    fn ctx_get_current(&self) -> Result<Option<CudaContextHandle>, CudaError> {
        let mut ctx: *mut c_void = ptr::null_mut();
        // SAFETY: passes a valid out-pointer.
        check(
            unsafe { (self.ctx_get_current)(&mut ctx) },
            "cuCtxGetCurrent",
        )?;
        Ok(if ctx.is_null() {
            None
        } else {
            Some(CudaContextHandle(ctx))
        })
    }

    fn ctx_set_current(&self, ctx: CudaContextHandle) -> Result<(), CudaError> {
        // SAFETY: `ctx` was produced by ctx_create on this driver.
        check(unsafe { (self.ctx_set_current)(ctx.0) }, "cuCtxSetCurrent")
    }
}

/// Load-once handle to the CUDA driver library.
///
/// Held by whichever session object owns the [`CudaContext`]; loading is
/// lazy and idempotent, unloading resets to the not-loaded state. The
/// cell is lock-guarded for memory safety, but serializing the *first*
/// load against concurrent callers remains the embedder's documented
/// responsibility.
///
/// [`CudaContext`]: super::CudaContext
pub struct DriverModule {
    api: Mutex<Option<Arc<dyn DriverApi>>>,
}

impl DriverModule {
    /// A module with no driver loaded.
    pub fn new() -> Self {
        Self {
            api: Mutex::new(None),
        }
    }

    /// A module pre-populated with an injected driver API. Used by tests
    /// and by embedders that bring their own driver binding.
    pub fn with_api(api: Arc<dyn DriverApi>) -> Self {
        Self {
            api: Mutex::new(Some(api)),
        }
    }

    /// Load the driver library if it is not loaded yet and return the
    /// resolved API. Succeeds immediately on subsequent calls.
    pub fn ensure_loaded(&self) -> Result<Arc<dyn DriverApi>, CudaError> {
        let mut slot = self.api.lock();
        if let Some(api) = slot.as_ref() {
            return Ok(Arc::clone(api));
        }
        let driver = CudaDriver::load()?;
        info!("CUDA driver library loaded");
        let api: Arc<dyn DriverApi> = Arc::new(driver);
        *slot = Some(Arc::clone(&api));
        Ok(api)
    }

    /// Release the driver handle and reset to not-loaded. No-op when
    /// nothing was ever loaded.
    pub fn unload(&self) {
        if self.api.lock().take().is_some() {
            debug!("CUDA driver module released");
        }
    }

    /// Whether a driver API is currently held.
    pub fn is_loaded(&self) -> bool {
        self.api.lock().is_some()
    }
}

impl Default for DriverModule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuda::fake::FakeDriver;

    #[test]
    fn module_starts_unloaded() {
        let module = DriverModule::new();
        assert!(!module.is_loaded());
    }

    #[test]
    fn injected_api_counts_as_loaded() {
        let module = DriverModule::with_api(Arc::new(FakeDriver::default()));
        assert!(module.is_loaded());
        assert!(module.ensure_loaded().is_ok());
    }

    #[test]
    fn ensure_loaded_reuses_the_held_api() {
        let module = DriverModule::with_api(Arc::new(FakeDriver::default()));
        let a = module.ensure_loaded().unwrap();
        let b = module.ensure_loaded().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unload_is_idempotent() {
        let module = DriverModule::with_api(Arc::new(FakeDriver::default()));
        module.unload();
        assert!(!module.is_loaded());
        // Second unload and unload-before-load must both be no-ops.
        module.unload();
        DriverModule::new().unload();
    }

    #[test]
    fn context_handles_compare_by_address() {
        let a = CudaContextHandle::from_raw(0x10 as *mut _);
        let b = CudaContextHandle::from_raw(0x10 as *mut _);
        let c = CudaContextHandle::from_raw(0x20 as *mut _);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
