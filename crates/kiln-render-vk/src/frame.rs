// SPDX-License-Identifier: CEPL-1.0
//! Frames-in-flight bookkeeping.
//!
//! Each slot cycles `Idle -> WaitedOn -> Recording -> Submitted -> Idle`
//! (`Submitted` is observed again as `WaitedOn` on its next turn). A slot's
//! command buffer and semaphores are only reused after its fence was seen
//! signaled, which is what keeps the CPU at most N frames ahead.

use ash::vk;
use thiserror::Error;
use tracing::debug;

use crate::error::{GpuError, RenderError};
use crate::gpu::Gpu;
use crate::sync::{create_many, destroy_all, Fence, Semaphore, SyncPrimitive};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    WaitedOn,
    Recording,
    Submitted,
}

#[derive(Debug, Error)]
pub enum SlotError {
    #[error("frame slot {slot} is {found:?}, expected {expected}")]
    Transition {
        slot: usize,
        found: SlotState,
        expected: &'static str,
    },
    #[error("frame slots have no synchronization objects")]
    Released,
}

#[derive(Debug)]
pub struct FrameSync {
    pub image_acquired: Semaphore,
    pub render_finished: Semaphore,
    pub in_flight: Fence,
    state: SlotState,
}

pub struct FrameRing {
    command_buffers: Vec<vk::CommandBuffer>,
    sync: Vec<FrameSync>,
    frame_index: u64,
    /// Frames with a lower index are known to have finished on the GPU.
    retired_before: u64,
    /// Slot whose submission last rendered into each swapchain image.
    images_in_flight: Vec<Option<usize>>,
}

impl FrameRing {
    /// One slot per command buffer. `image_count` sizes the image ownership table.
    pub fn new<G: Gpu>(
        gpu: &G,
        command_buffers: Vec<vk::CommandBuffer>,
        image_count: usize,
    ) -> Result<Self, GpuError> {
        let mut ring = Self {
            command_buffers,
            sync: Vec::new(),
            frame_index: 0,
            retired_before: 0,
            images_in_flight: Vec::new(),
        };
        ring.create_sync(gpu, image_count)?;
        Ok(ring)
    }

    pub fn len(&self) -> usize {
        self.command_buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.command_buffers.is_empty()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn retired_before(&self) -> u64 {
        self.retired_before
    }

    pub fn current_slot(&self) -> usize {
        (self.frame_index % self.len() as u64) as usize
    }

    pub fn current(&self) -> Result<&FrameSync, SlotError> {
        self.sync.get(self.current_slot()).ok_or(SlotError::Released)
    }

    pub fn states(&self) -> Vec<SlotState> {
        self.sync.iter().map(|s| s.state).collect()
    }

    /// Blocks until the current slot's previous submission retired.
    pub fn begin<G: Gpu>(&mut self, gpu: &G) -> Result<(), RenderError> {
        let n = self.len() as u64;
        let slot = self.current_slot();
        let sync = self.sync.get_mut(slot).ok_or(SlotError::Released)?;
        if sync.state == SlotState::Recording {
            return Err(SlotError::Transition {
                slot,
                found: sync.state,
                expected: "Idle, WaitedOn or Submitted",
            }
            .into());
        }
        sync.in_flight.wait(gpu)?;
        sync.state = SlotState::WaitedOn;
        // the slot's previous frame was `frame_index - n`; it and everything before it are done
        self.retired_before = self
            .retired_before
            .max((self.frame_index + 1).saturating_sub(n));
        Ok(())
    }

    /// Waits for whichever other slot last rendered into `image`, then
    /// records the current slot as its owner.
    pub fn claim_image<G: Gpu>(&mut self, gpu: &G, image: u32) -> Result<(), RenderError> {
        let current = self.current_slot();
        let owner = self
            .images_in_flight
            .get_mut(image as usize)
            .ok_or(SlotError::Released)?;
        if let Some(previous) = owner.replace(current) {
            if previous != current {
                let sync = self.sync.get(previous).ok_or(SlotError::Released)?;
                sync.in_flight.wait(gpu)?;
            }
        }
        Ok(())
    }

    /// Resets the current slot's fence. Only legal once the fence was waited on.
    pub fn start_recording<G: Gpu>(&mut self, gpu: &G) -> Result<vk::CommandBuffer, RenderError> {
        let slot = self.current_slot();
        let sync = self.sync.get_mut(slot).ok_or(SlotError::Released)?;
        if sync.state != SlotState::WaitedOn {
            return Err(SlotError::Transition {
                slot,
                found: sync.state,
                expected: "WaitedOn",
            }
            .into());
        }
        sync.in_flight.reset(gpu)?;
        sync.state = SlotState::Recording;
        Ok(self.command_buffers[slot])
    }

    pub fn mark_submitted(&mut self) -> Result<(), SlotError> {
        let slot = self.current_slot();
        let sync = self.sync.get_mut(slot).ok_or(SlotError::Released)?;
        if sync.state != SlotState::Recording {
            return Err(SlotError::Transition {
                slot,
                found: sync.state,
                expected: "Recording",
            });
        }
        sync.state = SlotState::Submitted;
        Ok(())
    }

    pub fn advance(&mut self) {
        self.frame_index += 1;
    }

    /// Call after the device went idle: every submitted frame has retired.
    pub fn mark_all_retired(&mut self) {
        self.retired_before = self.frame_index;
        for sync in &mut self.sync {
            sync.state = SlotState::Idle;
        }
    }

    pub fn destroy_sync<G: Gpu>(&mut self, gpu: &G) {
        for sync in self.sync.drain(..) {
            sync.image_acquired.destroy(gpu);
            sync.render_finished.destroy(gpu);
            sync.in_flight.destroy(gpu);
        }
        self.images_in_flight.clear();
    }

    /// Creates fresh semaphores and signaled fences for every slot.
    pub fn create_sync<G: Gpu>(&mut self, gpu: &G, image_count: usize) -> Result<(), GpuError> {
        debug_assert!(self.sync.is_empty());
        let n = self.len();
        let acquired = create_many::<Semaphore, _>(gpu, n)?;
        let finished = match create_many::<Semaphore, _>(gpu, n) {
            Ok(finished) => finished,
            Err(e) => {
                destroy_all(gpu, acquired);
                return Err(e);
            }
        };
        let fences = match create_many::<Fence, _>(gpu, n) {
            Ok(fences) => fences,
            Err(e) => {
                destroy_all(gpu, acquired);
                destroy_all(gpu, finished);
                return Err(e);
            }
        };
        let (mut acquired, mut finished, mut fences) =
            (acquired.into_iter(), finished.into_iter(), fences.into_iter());
        while let (Some(image_acquired), Some(render_finished), Some(in_flight)) =
            (acquired.next(), finished.next(), fences.next())
        {
            self.sync.push(FrameSync {
                image_acquired,
                render_finished,
                in_flight,
                state: SlotState::Idle,
            });
        }
        self.images_in_flight = vec![None; image_count];
        debug!("created sync objects for {n} frame slots");
        Ok(())
    }
}
