// SPDX-License-Identifier: CEPL-1.0
use std::collections::BTreeMap;

use ash::vk;
use kiln_render::{DrawableId, ShaderId};

use crate::device::QueueRole;
use crate::error::GpuError;
use crate::frame::FrameSync;
use crate::gpu::{DeviceBuffer, DrawCommand, FrameSubmission, Gpu};
use crate::pipeline::PipelineRegistry;
use crate::sync::SyncPrimitive;

/// Graphics pool for per-slot frame recording, transfer pool for uploads.
pub struct CommandPools {
    pub graphics: vk::CommandPool,
    pub transfer: vk::CommandPool,
}

impl CommandPools {
    /// Returns the pools and one graphics command buffer per frame slot.
    pub fn create<G: Gpu>(
        gpu: &G,
        frames_in_flight: usize,
    ) -> Result<(Self, Vec<vk::CommandBuffer>), GpuError> {
        let graphics = gpu.create_command_pool(QueueRole::Graphics)?;
        let transfer = match gpu.create_command_pool(QueueRole::Transfer) {
            Ok(pool) => pool,
            Err(e) => {
                gpu.destroy_command_pool(graphics);
                return Err(e);
            }
        };
        let pools = Self { graphics, transfer };
        match gpu.allocate_command_buffers(graphics, frames_in_flight as u32) {
            Ok(buffers) => Ok((pools, buffers)),
            Err(e) => {
                pools.destroy(gpu);
                Err(e)
            }
        }
    }

    pub fn destroy<G: Gpu>(self, gpu: &G) {
        gpu.destroy_command_pool(self.graphics);
        gpu.destroy_command_pool(self.transfer);
    }
}

/// Device-local geometry of one registered drawable.
#[derive(Debug)]
pub struct GpuDrawable {
    pub shader: ShaderId,
    pub vertices: DeviceBuffer,
    pub indices: DeviceBuffer,
    pub index_count: u32,
}

/// Draws in drawable-id order; the pipeline is looked up at record time
/// because recreation may have rebuilt it.
pub fn draw_list(
    drawables: &BTreeMap<DrawableId, GpuDrawable>,
    pipelines: &PipelineRegistry,
) -> Vec<DrawCommand> {
    drawables
        .values()
        .filter_map(|d| {
            Some(DrawCommand {
                pipeline: pipelines.get(&d.shader)?,
                vertex_buffer: d.vertices.buffer,
                index_buffer: d.indices.buffer,
                index_count: d.index_count,
            })
        })
        .collect()
}

/// Waits on image acquisition before color output, signals render-finished
/// for present, and retires the slot through its fence.
pub fn frame_submission(sync: &FrameSync, command_buffer: vk::CommandBuffer) -> FrameSubmission {
    FrameSubmission {
        command_buffer,
        wait_semaphore: sync.image_acquired.raw(),
        wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        signal_semaphore: sync.render_finished.raw(),
        fence: sync.in_flight.raw(),
    }
}
