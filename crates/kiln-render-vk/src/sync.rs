// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::trace;

use crate::error::GpuError;
use crate::gpu::Gpu;

/// Shared shape of the GPU synchronization objects. Each implementor
/// uniquely owns its native handle until `destroy`.
pub trait SyncPrimitive: Sized {
    type Raw: Copy;

    fn create<G: Gpu>(gpu: &G) -> Result<Self, GpuError>;
    fn destroy<G: Gpu>(self, gpu: &G);
    fn raw(&self) -> Self::Raw;
}

#[derive(Debug)]
pub struct Semaphore(vk::Semaphore);

impl SyncPrimitive for Semaphore {
    type Raw = vk::Semaphore;

    fn create<G: Gpu>(gpu: &G) -> Result<Self, GpuError> {
        let raw = gpu.create_semaphore()?;
        trace!("created semaphore {raw:?}");
        Ok(Self(raw))
    }

    fn destroy<G: Gpu>(self, gpu: &G) {
        trace!("destroying semaphore {:?}", self.0);
        gpu.destroy_semaphore(self.0);
    }

    fn raw(&self) -> vk::Semaphore {
        self.0
    }
}

/// Host-waitable fence, created signaled so the first wait on a fresh
/// frame slot returns immediately.
#[derive(Debug)]
pub struct Fence(vk::Fence);

impl Fence {
    pub fn wait<G: Gpu>(&self, gpu: &G) -> Result<(), GpuError> {
        gpu.wait_fence(self.0, u64::MAX)
    }

    pub fn reset<G: Gpu>(&self, gpu: &G) -> Result<(), GpuError> {
        gpu.reset_fence(self.0)
    }
}

impl SyncPrimitive for Fence {
    type Raw = vk::Fence;

    fn create<G: Gpu>(gpu: &G) -> Result<Self, GpuError> {
        let raw = gpu.create_fence(true)?;
        trace!("created fence {raw:?}");
        Ok(Self(raw))
    }

    fn destroy<G: Gpu>(self, gpu: &G) {
        trace!("destroying fence {:?}", self.0);
        gpu.destroy_fence(self.0);
    }

    fn raw(&self) -> vk::Fence {
        self.0
    }
}

/// Creates `count` primitives; on failure the ones already created are destroyed.
pub fn create_many<P: SyncPrimitive, G: Gpu>(gpu: &G, count: usize) -> Result<Vec<P>, GpuError> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        match P::create(gpu) {
            Ok(p) => out.push(p),
            Err(e) => {
                destroy_all(gpu, out);
                return Err(e);
            }
        }
    }
    Ok(out)
}

pub fn destroy_all<P: SyncPrimitive, G: Gpu>(gpu: &G, primitives: Vec<P>) {
    primitives.into_iter().for_each(|p| p.destroy(gpu));
}
