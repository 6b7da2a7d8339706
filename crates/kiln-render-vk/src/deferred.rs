// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::trace;

use crate::gpu::{DeviceBuffer, Gpu};

#[derive(Debug)]
pub enum Garbage {
    Buffer(DeviceBuffer),
    Pipeline(vk::Pipeline),
}

impl Garbage {
    fn destroy<G: Gpu>(self, gpu: &G) {
        trace!("releasing {self:?}");
        match self {
            Garbage::Buffer(buffer) => gpu.destroy_buffer(buffer),
            Garbage::Pipeline(pipeline) => gpu.destroy_pipeline(pipeline),
        }
    }
}

/// Objects removed while frames that may still read them are in flight.
#[derive(Debug, Default)]
pub struct DeferredRelease {
    /// `(first frame that no longer uses it, object)`
    pending: Vec<(u64, Garbage)>,
}

impl DeferredRelease {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// `unused_from` is the index of the next frame to be recorded.
    pub fn push(&mut self, unused_from: u64, garbage: Garbage) {
        self.pending.push((unused_from, garbage));
    }

    /// Destroys everything only referenced by frames below `retired_before`.
    pub fn collect<G: Gpu>(&mut self, gpu: &G, retired_before: u64) {
        let (ready, waiting): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|(unused_from, _)| *unused_from <= retired_before);
        self.pending = waiting;
        for (_, garbage) in ready {
            garbage.destroy(gpu);
        }
    }

    /// The device must be idle.
    pub fn flush<G: Gpu>(&mut self, gpu: &G) {
        for (_, garbage) in self.pending.drain(..) {
            garbage.destroy(gpu);
        }
    }
}
