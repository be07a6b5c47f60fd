//! Cross-API physical device resolution.
//!
//! The graphics API and the CUDA driver expose no shared device handle.
//! The only artifact stable across both is the physical adapter
//! identifier — a 16-byte UUID (Vulkan) or an 8-byte LUID (Direct3D 12) —
//! so resolution scans the CUDA-visible devices and compares identifiers
//! byte for byte.

use tracing::debug;

use super::driver::{CudaDevice, DriverApi, DEVICE_LUID_SIZE, DEVICE_UUID_SIZE};
use super::error::CudaError;

/// 16-byte physical device identifier.
///
/// Obtainable from `VkPhysicalDeviceIDProperties::deviceUUID` on the
/// graphics side and from the CUDA driver on the compute side.
/// Byte-for-byte equality implies the same physical adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceUuid([u8; DEVICE_UUID_SIZE]);

impl DeviceUuid {
    /// Wrap a raw 16-byte identifier.
    pub const fn new(bytes: [u8; DEVICE_UUID_SIZE]) -> Self {
        Self(bytes)
    }

    /// The raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; DEVICE_UUID_SIZE] {
        &self.0
    }
}

impl From<[u8; DEVICE_UUID_SIZE]> for DeviceUuid {
    fn from(bytes: [u8; DEVICE_UUID_SIZE]) -> Self {
        Self(bytes)
    }
}

/// 8-byte locally-unique adapter identifier, split into the low and high
/// parts the way DXGI reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceLuid([u8; DEVICE_LUID_SIZE]);

impl DeviceLuid {
    /// Wrap raw LUID bytes (low part first, little endian).
    pub const fn from_bytes(bytes: [u8; DEVICE_LUID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from the DXGI `LUID { LowPart, HighPart }` pair.
    pub fn from_parts(low: u32, high: i32) -> Self {
        let mut bytes = [0u8; DEVICE_LUID_SIZE];
        bytes[..4].copy_from_slice(&low.to_le_bytes());
        bytes[4..].copy_from_slice(&high.to_le_bytes());
        Self(bytes)
    }

    /// The raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; DEVICE_LUID_SIZE] {
        &self.0
    }

    /// The DXGI `LowPart`.
    pub fn low(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// The DXGI `HighPart`.
    pub fn high(&self) -> i32 {
        i32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }
}

/// Identifier the graphics layer reports for its physical adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterIdentifier {
    /// 16-byte UUID form (Vulkan).
    Uuid(DeviceUuid),
    /// 8-byte LUID form (Direct3D 12).
    Luid(DeviceLuid),
}

/// Find the CUDA device whose UUID equals `uuid`.
///
/// Scans ordinals in the driver's native enumeration order; the first
/// exact match wins. Returns [`CudaError::NoMatchingDevice`] when the
/// scan exhausts all devices, and propagates any driver failure
/// immediately without continuing the scan.
pub fn resolve_by_uuid(api: &dyn DriverApi, uuid: &DeviceUuid) -> Result<CudaDevice, CudaError> {
    api.init()?;
    let count = api.device_count()?;
    for ordinal in 0..count {
        let device = api.device_get(ordinal)?;
        let candidate = api.device_uuid(device)?;
        if candidate == *uuid.as_bytes() {
            debug!(ordinal, "matched CUDA device by UUID");
            return Ok(device);
        }
    }
    Err(CudaError::NoMatchingDevice)
}

/// Find the CUDA device whose adapter LUID equals `luid`.
///
/// Same scan discipline as [`resolve_by_uuid`]; the comparison covers the
/// low and high halves of the identifier separately, mirroring how the
/// graphics API defines the pair.
pub fn resolve_by_luid(api: &dyn DriverApi, luid: &DeviceLuid) -> Result<CudaDevice, CudaError> {
    api.init()?;
    let count = api.device_count()?;
    let wanted = luid.as_bytes();
    for ordinal in 0..count {
        let device = api.device_get(ordinal)?;
        let (candidate, _node_mask) = api.device_luid(device)?;
        if candidate[..4] == wanted[..4] && candidate[4..] == wanted[4..] {
            debug!(ordinal, "matched CUDA device by LUID");
            return Ok(device);
        }
    }
    Err(CudaError::NoMatchingDevice)
}

/// Resolve whichever identifier form the graphics layer supplied.
pub fn resolve_adapter(
    api: &dyn DriverApi,
    identifier: &AdapterIdentifier,
) -> Result<CudaDevice, CudaError> {
    match identifier {
        AdapterIdentifier::Uuid(uuid) => resolve_by_uuid(api, uuid),
        AdapterIdentifier::Luid(luid) => resolve_by_luid(api, luid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuda::fake::{FakeDevice, FakeDriver};

    fn uuid(seed: u8) -> DeviceUuid {
        DeviceUuid::new([seed; DEVICE_UUID_SIZE])
    }

    #[test]
    fn resolves_the_device_with_the_matching_uuid() {
        let driver = FakeDriver::with_devices(vec![
            FakeDevice::with_uuid([1; DEVICE_UUID_SIZE]),
            FakeDevice::with_uuid([2; DEVICE_UUID_SIZE]),
            FakeDevice::with_uuid([3; DEVICE_UUID_SIZE]),
        ]);
        let device = resolve_by_uuid(&driver, &uuid(2)).unwrap();
        assert_eq!(device.raw(), 1);
    }

    #[test]
    fn first_match_wins_in_enumeration_order() {
        let driver = FakeDriver::with_devices(vec![
            FakeDevice::with_uuid([9; DEVICE_UUID_SIZE]),
            FakeDevice::with_uuid([9; DEVICE_UUID_SIZE]),
        ]);
        let device = resolve_by_uuid(&driver, &uuid(9)).unwrap();
        assert_eq!(device.raw(), 0);
    }

    #[test]
    fn absent_uuid_reports_no_matching_device() {
        let driver = FakeDriver::with_devices(vec![
            FakeDevice::with_uuid([1; DEVICE_UUID_SIZE]),
        ]);
        let err = resolve_by_uuid(&driver, &uuid(7)).unwrap_err();
        assert!(matches!(err, CudaError::NoMatchingDevice));
    }

    #[test]
    fn empty_enumeration_reports_no_matching_device() {
        let driver = FakeDriver::with_devices(Vec::new());
        let err = resolve_by_uuid(&driver, &uuid(1)).unwrap_err();
        assert!(matches!(err, CudaError::NoMatchingDevice));
    }

    #[test]
    fn enumeration_failure_stops_the_scan_immediately() {
        let mut driver = FakeDriver::with_devices(vec![
            FakeDevice::with_uuid([1; DEVICE_UUID_SIZE]),
            FakeDevice::with_uuid([2; DEVICE_UUID_SIZE]),
            FakeDevice::with_uuid([3; DEVICE_UUID_SIZE]),
        ]);
        driver.fail_uuid_at = Some(1);
        let err = resolve_by_uuid(&driver, &uuid(3)).unwrap_err();
        assert!(matches!(err, CudaError::Driver { .. }));
        // Ordinal 2 must never have been fetched.
        assert_eq!(driver.calls.lock().device_get, vec![0, 1]);
    }

    #[test]
    fn luid_matches_on_both_halves() {
        let wanted = DeviceLuid::from_parts(0xAABBCCDD, 0x0011_2233);
        let mut other = *wanted.as_bytes();
        other[6] ^= 0xFF; // same low part, different high part
        let driver = FakeDriver::with_devices(vec![
            FakeDevice::with_luid(other),
            FakeDevice::with_luid(*wanted.as_bytes()),
        ]);
        let device = resolve_by_luid(&driver, &wanted).unwrap();
        assert_eq!(device.raw(), 1);
    }

    #[test]
    fn luid_low_half_match_alone_is_not_a_match() {
        let wanted = DeviceLuid::from_parts(0xAABBCCDD, 7);
        let half = DeviceLuid::from_parts(0xAABBCCDD, 8);
        let driver = FakeDriver::with_devices(vec![FakeDevice::with_luid(*half.as_bytes())]);
        let err = resolve_by_luid(&driver, &wanted).unwrap_err();
        assert!(matches!(err, CudaError::NoMatchingDevice));
    }

    #[test]
    fn luid_resolution_fails_fast_without_driver_support() {
        let mut driver = FakeDriver::with_devices(vec![FakeDevice::with_luid([1; 8])]);
        driver.luid_supported = false;
        let err = resolve_by_luid(&driver, &DeviceLuid::from_bytes([1; 8])).unwrap_err();
        assert!(matches!(
            err,
            CudaError::Driver {
                call: "cuDeviceGetLuid",
                ..
            }
        ));
    }

    #[test]
    fn luid_parts_round_trip() {
        let luid = DeviceLuid::from_parts(0xDEAD_BEEF, -42);
        assert_eq!(luid.low(), 0xDEAD_BEEF);
        assert_eq!(luid.high(), -42);
    }

    #[test]
    fn resolver_initializes_the_driver_first() {
        let driver = FakeDriver::with_devices(vec![FakeDevice::with_uuid([5; 16])]);
        resolve_by_uuid(&driver, &uuid(5)).unwrap();
        assert!(driver.calls.lock().init >= 1);
    }
}
