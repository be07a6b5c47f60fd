//! CUDA driver integration: delay-loaded driver module, cross-API
//! physical device resolution, and the session-owned compute context.

mod context;
mod device;
mod driver;
mod error;

#[cfg(test)]
pub(crate) mod fake;

pub use context::CudaContext;
pub use device::{
    resolve_adapter, resolve_by_luid, resolve_by_uuid, AdapterIdentifier, DeviceLuid, DeviceUuid,
};
pub use driver::{
    CudaContextHandle, CudaDevice, CudaDriver, DriverApi, DriverModule, DEVICE_LUID_SIZE,
    DEVICE_UUID_SIZE,
};
pub use error::CudaError;
