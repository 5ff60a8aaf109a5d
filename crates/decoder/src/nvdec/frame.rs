//! Frame buffers in device memory or page-locked host memory.

use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::sync::Arc;

use cudarc::driver::safe::CudaContext;
use cudarc::driver::sys;
use tracing::{debug, warn};

use hd_common::{DecodeError, DecodeResult, FrameLocation};

use super::context::ContextGuard;
use crate::backend::FrameMemory;

enum Allocation {
    Device(sys::CUdeviceptr),
    Host(*mut c_void),
}

/// One frame slot's memory. Freed with the owning context pushed.
pub struct NvFrame {
    ctx: Arc<CudaContext>,
    allocation: Allocation,
    size: usize,
}

// SAFETY: The allocation is owned exclusively by this value; CUDA memory
// may be used and freed from any thread that binds the owning context.
unsafe impl Send for NvFrame {}

impl NvFrame {
    pub fn alloc(ctx: &Arc<CudaContext>, size: usize, location: FrameLocation) -> DecodeResult<Self> {
        let _guard = ContextGuard::push(ctx)?;
        let failed = |_| DecodeError::AllocFailed { size, location };

        let allocation = match location {
            FrameLocation::Device => {
                let mut ptr = MaybeUninit::uninit();
                // SAFETY: The context is current; `ptr` is written on success.
                unsafe {
                    sys::cuMemAlloc_v2(ptr.as_mut_ptr(), size).result().map_err(failed)?;
                    Allocation::Device(ptr.assume_init())
                }
            }
            FrameLocation::Host => {
                let mut ptr = MaybeUninit::uninit();
                // SAFETY: As above, for page-locked host memory.
                unsafe {
                    sys::cuMemAllocHost_v2(ptr.as_mut_ptr(), size).result().map_err(failed)?;
                    Allocation::Host(ptr.assume_init())
                }
            }
        };

        debug!(size, location = ?location, "Frame buffer allocated");
        Ok(Self {
            ctx: Arc::clone(ctx),
            allocation,
            size,
        })
    }

    /// Fill in the destination half of a 2-D copy.
    pub(crate) fn set_copy_destination(&mut self, copy: &mut sys::CUDA_MEMCPY2D, offset: usize) {
        match self.allocation {
            Allocation::Device(ptr) => {
                copy.dstMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_DEVICE;
                copy.dstDevice = ptr + offset as u64;
            }
            Allocation::Host(ptr) => {
                copy.dstMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_HOST;
                // SAFETY: Callers bound-check `offset` against the allocation size.
                copy.dstHost = unsafe { ptr.cast::<u8>().add(offset) }.cast();
            }
        }
    }
}

impl FrameMemory for NvFrame {
    fn len(&self) -> usize {
        self.size
    }

    fn location(&self) -> FrameLocation {
        match self.allocation {
            Allocation::Device(_) => FrameLocation::Device,
            Allocation::Host(_) => FrameLocation::Host,
        }
    }

    fn device_ptr(&self) -> Option<u64> {
        match self.allocation {
            Allocation::Device(ptr) => Some(ptr),
            Allocation::Host(_) => None,
        }
    }

    fn host_bytes(&self) -> Option<&[u8]> {
        match self.allocation {
            // SAFETY: The pinned block is `size` bytes and lives as long as self.
            // Copies into it complete before frames are handed out.
            Allocation::Host(ptr) => Some(unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), self.size) }),
            Allocation::Device(_) => None,
        }
    }
}

impl Drop for NvFrame {
    fn drop(&mut self) {
        let _guard = match ContextGuard::push(&self.ctx) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(error = %err, size = self.size, "Leaking frame buffer, context unavailable");
                return;
            }
        };

        // SAFETY: The pointer came from the matching allocator and is freed
        // exactly once. Best-effort; errors during drop are only logged.
        let result = unsafe {
            match self.allocation {
                Allocation::Device(ptr) => sys::cuMemFree_v2(ptr),
                Allocation::Host(ptr) => sys::cuMemFreeHost(ptr),
            }
        };
        if let Err(err) = result.result() {
            warn!(error = ?err, "Failed to free frame buffer");
        }
    }
}

impl std::fmt::Debug for NvFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvFrame")
            .field("location", &self.location())
            .field("size", &self.size)
            .finish()
    }
}
