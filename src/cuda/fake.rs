//! In-memory CUDA driver double for exercising resolution and context
//! logic without GPU hardware.

use parking_lot::Mutex;

use super::driver::{
    CudaContextHandle, CudaDevice, DriverApi, DEVICE_LUID_SIZE, DEVICE_UUID_SIZE,
};
use super::error::CudaError;

pub(crate) struct FakeDevice {
    pub uuid: [u8; DEVICE_UUID_SIZE],
    pub luid: [u8; DEVICE_LUID_SIZE],
}

impl FakeDevice {
    pub fn with_uuid(uuid: [u8; DEVICE_UUID_SIZE]) -> Self {
        Self {
            uuid,
            luid: [0; DEVICE_LUID_SIZE],
        }
    }

    pub fn with_luid(luid: [u8; DEVICE_LUID_SIZE]) -> Self {
        Self {
            uuid: [0; DEVICE_UUID_SIZE],
            luid,
        }
    }
}

/// Call counters recorded by the fake, keyed the way the tests assert.
#[derive(Default)]
pub(crate) struct FakeCalls {
    pub init: usize,
    pub set_current: usize,
    pub device_get: Vec<i32>,
    pub created: Vec<usize>,
    pub destroyed: Vec<usize>,
}

pub(crate) struct FakeDriver {
    pub devices: Vec<FakeDevice>,
    /// Ordinal at which `device_uuid` fails, to exercise fail-fast scans.
    pub fail_uuid_at: Option<i32>,
    /// When false, `device_luid` reports the missing-entry-point error.
    pub luid_supported: bool,
    /// When true, context creation fails.
    pub fail_ctx_create: bool,
    /// The context current on the (conceptual) calling thread, as a raw
    /// address; 0 means none.
    pub current: Mutex<usize>,
    pub calls: Mutex<FakeCalls>,
    next_ctx: Mutex<usize>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::with_devices(vec![FakeDevice::with_uuid([1; DEVICE_UUID_SIZE])])
    }
}

impl FakeDriver {
    pub fn with_devices(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices,
            fail_uuid_at: None,
            luid_supported: true,
            fail_ctx_create: false,
            current: Mutex::new(0),
            calls: Mutex::new(FakeCalls::default()),
            next_ctx: Mutex::new(0x1000),
        }
    }

    fn device_at(&self, device: CudaDevice) -> Result<&FakeDevice, CudaError> {
        self.devices
            .get(device.raw() as usize)
            .ok_or(CudaError::Driver {
                call: "cuDeviceGet",
                status: 101,
            })
    }
}

impl DriverApi for FakeDriver {
    fn init(&self) -> Result<(), CudaError> {
        self.calls.lock().init += 1;
        Ok(())
    }

    fn device_count(&self) -> Result<i32, CudaError> {
        Ok(self.devices.len() as i32)
    }

    fn device_get(&self, ordinal: i32) -> Result<CudaDevice, CudaError> {
        self.calls.lock().device_get.push(ordinal);
        if ordinal < 0 || ordinal as usize >= self.devices.len() {
            return Err(CudaError::Driver {
                call: "cuDeviceGet",
                status: 101,
            });
        }
        Ok(CudaDevice(ordinal))
    }

    fn device_uuid(&self, device: CudaDevice) -> Result<[u8; DEVICE_UUID_SIZE], CudaError> {
        if self.fail_uuid_at == Some(device.raw()) {
            return Err(CudaError::Driver {
                call: "cuDeviceGetUuid",
                status: 999,
            });
        }
        Ok(self.device_at(device)?.uuid)
    }

    fn device_luid(
        &self,
        device: CudaDevice,
    ) -> Result<([u8; DEVICE_LUID_SIZE], u32), CudaError> {
        if !self.luid_supported {
            return Err(CudaError::Driver {
                call: "cuDeviceGetLuid",
                status: 500,
            });
        }
        Ok((self.device_at(device)?.luid, 1))
    }

    fn ctx_create(&self, device: CudaDevice) -> Result<CudaContextHandle, CudaError> {
        self.device_at(device)?;
        if self.fail_ctx_create {
            return Err(CudaError::Driver {
                call: "cuCtxCreate",
                status: 2,
            });
        }
        let mut next = self.next_ctx.lock();
        let addr = *next;
        *next += 0x10;
        self.calls.lock().created.push(addr);
        // Creating a context makes it current on the calling thread.
        *self.current.lock() = addr;
        Ok(CudaContextHandle::from_raw(addr as *mut _))
    }

    fn ctx_destroy(&self, ctx: CudaContextHandle) -> Result<(), CudaError> {
        let addr = ctx.as_raw() as usize;
        self.calls.lock().destroyed.push(addr);
        let mut current = self.current.lock();
        if *current == addr {
            *current = 0;
        }
        Ok(())
    }

    fn ctx_get_current(&self) -> Result<Option<CudaContextHandle>, CudaError> {
        let addr = *self.current.lock();
        Ok(if addr == 0 {
            None
        } else {
            Some(CudaContextHandle::from_raw(addr as *mut _))
        })
    }

    fn ctx_set_current(&self, ctx: CudaContextHandle) -> Result<(), CudaError> {
        self.calls.lock().set_current += 1;
        *self.current.lock() = ctx.as_raw() as usize;
        Ok(())
    }
}
