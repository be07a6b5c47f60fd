//! The owned CUDA context for a video session.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::device::{self, AdapterIdentifier};
use super::driver::{CudaContextHandle, CudaDevice, DriverApi, DriverModule};
use super::error::CudaError;

struct ActiveContext {
    api: Arc<dyn DriverApi>,
    context: CudaContextHandle,
    device: CudaDevice,
}

/// Owns at most one CUDA context, created for the device resolved from
/// the graphics layer's adapter identifier.
///
/// State machine: `Uninitialized` --create--> `Active` --[`shutdown`]-->
/// `Uninitialized`. A failed create leaves no partial state behind.
/// [`current`](Self::current) is only valid in `Active`.
///
/// # Thread affinity
///
/// [`current`](Self::current) rebinds the owned context to the calling
/// thread, displacing it from any other thread it was current on. At most
/// one thread may perform context-affecting calls for the lifetime of a
/// session; confining all hardware-encoder work to a single dedicated
/// thread is the caller's responsibility.
pub struct CudaContext {
    module: DriverModule,
    active: Option<ActiveContext>,
}

impl CudaContext {
    /// A context owner over `module`, with nothing created yet.
    pub fn new(module: DriverModule) -> Self {
        Self {
            module,
            active: None,
        }
    }

    /// Load the driver if necessary, resolve `identifier` against the
    /// CUDA-visible devices, and create the context in one step.
    ///
    /// On any failure the state stays `Uninitialized`; a missing driver
    /// or unmatched adapter means "no hardware acceleration", not a
    /// process error.
    pub fn init_from_identifier(
        &mut self,
        identifier: &AdapterIdentifier,
    ) -> Result<(), CudaError> {
        let api = self.module.ensure_loaded()?;
        api.init()?;
        let device = device::resolve_adapter(api.as_ref(), identifier)?;
        self.create_with_api(api, device)
    }

    /// Create the context for an already-resolved device.
    pub fn create_for_device(&mut self, device: CudaDevice) -> Result<(), CudaError> {
        let api = self.module.ensure_loaded()?;
        self.create_with_api(api, device)
    }

    fn create_with_api(
        &mut self,
        api: Arc<dyn DriverApi>,
        device: CudaDevice,
    ) -> Result<(), CudaError> {
        // Creating over a live context would leak it; the caller must
        // shutdown() first.
        assert!(
            self.active.is_none(),
            "compute context already created; call shutdown() before re-creating"
        );
        let context = api.ctx_create(device)?;
        info!(device = device.raw(), "CUDA context created");
        self.active = Some(ActiveContext {
            api,
            context,
            device,
        });
        Ok(())
    }

    /// Whether a context is currently owned.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Handle of the owned context, or `None` before creation.
    pub fn handle(&self) -> Option<CudaContextHandle> {
        self.active.as_ref().map(|active| active.context)
    }

    /// The device the owned context is bound to, if any.
    pub fn device(&self) -> Option<CudaDevice> {
        self.active.as_ref().map(|active| active.device)
    }

    /// Returns the owned context, making it current on the calling thread
    /// first if some other context (or none) is bound there. When the
    /// owned context is already current, no driver call is issued beyond
    /// the query.
    ///
    /// # Panics
    ///
    /// Panics if no context was created — every caller relies on a valid
    /// context existing, so this is a broken invariant rather than a
    /// recoverable condition. Also panics if the current-context query or
    /// the rebind fails: the session cannot make forward progress on the
    /// right device afterwards.
    pub fn current(&self) -> CudaContextHandle {
        let active = self
            .active
            .as_ref()
            .expect("compute context used before creation");
        let bound = active
            .api
            .ctx_get_current()
            .expect("querying the calling thread's CUDA context failed");
        if bound == Some(active.context) {
            return active.context;
        }
        active
            .api
            .ctx_set_current(active.context)
            .expect("rebinding the CUDA context to the calling thread failed");
        active.context
    }

    /// Destroy the owned context if present and release the driver
    /// module. Safe to call repeatedly and when nothing was created.
    pub fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            match active.api.ctx_destroy(active.context) {
                Ok(()) => debug!("CUDA context destroyed"),
                Err(err) => warn!(%err, "destroying the CUDA context failed"),
            }
        }
        self.module.unload();
    }
}

impl Drop for CudaContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuda::device::DeviceUuid;
    use crate::cuda::fake::{FakeDevice, FakeDriver};

    fn context_over(driver: Arc<FakeDriver>) -> CudaContext {
        CudaContext::new(DriverModule::with_api(driver))
    }

    #[test]
    fn init_resolves_and_creates() {
        let driver = Arc::new(FakeDriver::with_devices(vec![
            FakeDevice::with_uuid([3; 16]),
            FakeDevice::with_uuid([7; 16]),
        ]));
        let mut ctx = context_over(driver.clone());
        ctx.init_from_identifier(&AdapterIdentifier::Uuid(DeviceUuid::new([7; 16])))
            .unwrap();
        assert!(ctx.is_active());
        assert_eq!(ctx.device().unwrap().raw(), 1);
        assert!(ctx.handle().is_some());
    }

    #[test]
    fn failed_resolution_leaves_no_partial_state() {
        let driver = Arc::new(FakeDriver::with_devices(vec![FakeDevice::with_uuid(
            [1; 16],
        )]));
        let mut ctx = context_over(driver);
        let err = ctx
            .init_from_identifier(&AdapterIdentifier::Uuid(DeviceUuid::new([9; 16])))
            .unwrap_err();
        assert!(matches!(err, CudaError::NoMatchingDevice));
        assert!(!ctx.is_active());
        assert!(ctx.handle().is_none());
    }

    #[test]
    fn failed_creation_leaves_no_partial_state() {
        let mut driver = FakeDriver::default();
        driver.fail_ctx_create = true;
        let mut ctx = context_over(Arc::new(driver));
        let err = ctx
            .init_from_identifier(&AdapterIdentifier::Uuid(DeviceUuid::new([1; 16])))
            .unwrap_err();
        assert!(matches!(err, CudaError::Driver { .. }));
        assert!(!ctx.is_active());
    }

    #[test]
    fn current_skips_set_current_when_already_bound() {
        let driver = Arc::new(FakeDriver::default());
        let mut ctx = context_over(driver.clone());
        ctx.create_for_device(CudaDevice(0)).unwrap();

        // Creation bound the context to this thread, so two consecutive
        // calls must not rebind at all.
        let a = ctx.current();
        let b = ctx.current();
        assert_eq!(a, b);
        assert_eq!(driver.calls.lock().set_current, 0);
    }

    #[test]
    fn current_rebinds_after_the_thread_lost_the_context() {
        let driver = Arc::new(FakeDriver::default());
        let mut ctx = context_over(driver.clone());
        ctx.create_for_device(CudaDevice(0)).unwrap();

        // Some other component bound a different context on this thread.
        *driver.current.lock() = 0xBEEF;
        let handle = ctx.current();
        assert_eq!(handle, ctx.handle().unwrap());
        assert_eq!(driver.calls.lock().set_current, 1);

        // Fast path again afterwards.
        ctx.current();
        assert_eq!(driver.calls.lock().set_current, 1);
    }

    #[test]
    #[should_panic(expected = "compute context used before creation")]
    fn current_before_creation_is_a_contract_violation() {
        let ctx = context_over(Arc::new(FakeDriver::default()));
        let _ = ctx.current();
    }

    #[test]
    fn shutdown_destroys_once_and_is_idempotent() {
        let driver = Arc::new(FakeDriver::default());
        let mut ctx = context_over(driver.clone());
        ctx.create_for_device(CudaDevice(0)).unwrap();
        let handle = ctx.handle().unwrap();

        ctx.shutdown();
        ctx.shutdown();

        let calls = driver.calls.lock();
        assert_eq!(calls.destroyed, vec![handle.as_raw() as usize]);
        drop(calls);
        assert!(!ctx.is_active());
    }

    #[test]
    fn shutdown_without_creation_is_a_no_op() {
        let mut ctx = context_over(Arc::new(FakeDriver::default()));
        ctx.shutdown();
        assert!(!ctx.is_active());
    }

    #[test]
    fn drop_destroys_the_context() {
        let driver = Arc::new(FakeDriver::default());
        {
            let mut ctx = context_over(driver.clone());
            ctx.create_for_device(CudaDevice(0)).unwrap();
        }
        let calls = driver.calls.lock();
        assert_eq!(calls.created.len(), 1);
        assert_eq!(calls.destroyed, calls.created);
    }

    #[test]
    #[should_panic(expected = "already created")]
    fn double_create_is_a_contract_violation() {
        let driver = Arc::new(FakeDriver::default());
        let mut ctx = context_over(driver);
        ctx.create_for_device(CudaDevice(0)).unwrap();
        let _ = ctx.create_for_device(CudaDevice(0));
    }
}
