//! CUDA context selection and scoped context binding.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;

use cudarc::driver::safe::CudaContext;
use cudarc::driver::result::DriverError;
use cudarc::driver::sys;
use tracing::{debug, info, warn};

use hd_common::{DecodeError, DecodeResult, DeviceSelector};

/// Map a CUDA driver error into a `Hardware` error naming the call.
pub(crate) fn driver_error(call: &'static str) -> impl FnOnce(DriverError) -> DecodeError {
    move |err| DecodeError::Hardware {
        call,
        code: err.0 as i32,
    }
}

/// The CUDA context a decoder instance runs on.
#[derive(Clone)]
pub struct DeviceContext {
    ctx: Arc<CudaContext>,
    name: String,
}

impl DeviceContext {
    /// Open the primary context of the selected device.
    ///
    /// [`DeviceSelector::Current`] follows whatever context is current on the
    /// calling thread and falls back to device 0 when there is none.
    pub fn open(selector: DeviceSelector) -> DecodeResult<Self> {
        let ordinal = match selector {
            DeviceSelector::Ordinal(ordinal) => ordinal,
            DeviceSelector::Current => current_device().unwrap_or_else(|| {
                debug!("No current CUDA context, using device 0");
                0
            }),
        };

        let ctx = CudaContext::new(ordinal).map_err(driver_error("cuDevicePrimaryCtxRetain"))?;
        let name = ctx.name().unwrap_or_else(|_| "Unknown NVIDIA GPU".to_string());
        info!(ordinal, gpu = %name, "CUDA context opened");
        Ok(Self { ctx, name })
    }

    pub fn cuda(&self) -> &Arc<CudaContext> {
        &self.ctx
    }

    pub fn ordinal(&self) -> usize {
        self.ctx.ordinal()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> sys::CUcontext {
        self.ctx.cu_ctx()
    }

    /// Make this context current until the guard drops.
    pub fn push(&self) -> DecodeResult<ContextGuard<'_>> {
        ContextGuard::push(&self.ctx)
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("ordinal", &self.ordinal())
            .field("name", &self.name)
            .finish()
    }
}

/// Device of the context current on this thread, if any.
fn current_device() -> Option<usize> {
    cudarc::driver::result::init().ok()?;

    // SAFETY: Plain queries of the calling thread's context state; both
    // out-pointers reference local storage.
    unsafe {
        let mut current = MaybeUninit::<sys::CUcontext>::uninit();
        sys::cuCtxGetCurrent(current.as_mut_ptr()).result().ok()?;
        if current.assume_init().is_null() {
            return None;
        }

        let mut device = MaybeUninit::<sys::CUdevice>::uninit();
        sys::cuCtxGetDevice(device.as_mut_ptr()).result().ok()?;
        usize::try_from(device.assume_init()).ok()
    }
}

/// Keeps a context pushed on the calling thread; pops it on drop.
pub struct ContextGuard<'a> {
    _ctx: PhantomData<&'a CudaContext>,
}

impl<'a> ContextGuard<'a> {
    pub fn push(ctx: &'a CudaContext) -> DecodeResult<Self> {
        // SAFETY: cu_ctx() is a live context retained by `ctx`, which
        // outlives the guard.
        unsafe { sys::cuCtxPushCurrent_v2(ctx.cu_ctx()) }
            .result()
            .map_err(driver_error("cuCtxPushCurrent"))?;
        Ok(Self { _ctx: PhantomData })
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let mut popped = MaybeUninit::<sys::CUcontext>::uninit();
        // SAFETY: Balances the push in ContextGuard::push on this thread.
        if let Err(err) = unsafe { sys::cuCtxPopCurrent_v2(popped.as_mut_ptr()) }.result() {
            warn!(error = ?err, "cuCtxPopCurrent failed");
        }
    }
}
