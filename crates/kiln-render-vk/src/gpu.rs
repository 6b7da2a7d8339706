// SPDX-License-Identifier: CEPL-1.0
//! The native surface the frame orchestration runs against.
//!
//! Everything above this trait is plain bookkeeping over Vulkan handles;
//! everything below it talks to the driver. `AshGpu` is the production
//! implementation.

use ash::vk;

use crate::device::{DeviceIdentity, QueueRole, SurfaceSnapshot};
use crate::error::GpuError;

/// Result of asking the presentation engine for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreation(self) -> bool {
        !matches!(self, PresentOutcome::Optimal)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Predecessor being replaced, or null.
    pub old_swapchain: vk::SwapchainKHR,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCommand {
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// One frame's worth of recording: clear the framebuffer, then draw each entry.
#[derive(Clone, Copy, Debug)]
pub struct FrameCommands<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub draws: &'a [DrawCommand],
}

#[derive(Clone, Copy, Debug)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineDesc<'a> {
    pub vertex_spirv: &'a [u32],
    pub fragment_spirv: &'a [u32],
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub cache: vk::PipelineCache,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

pub trait Gpu {
    fn identity(&self) -> DeviceIdentity;
    fn surface_snapshot(&self) -> Result<SurfaceSnapshot, GpuError>;
    fn wait_idle(&self) -> Result<(), GpuError>;

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<(), GpuError>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError>;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR, GpuError>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>, GpuError>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> Result<vk::ImageView, GpuError>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome, GpuError>;
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome, GpuError>;

    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass, GpuError>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Pools hand out individually resettable primary buffers.
    fn create_command_pool(&self, role: QueueRole) -> Result<vk::CommandPool, GpuError>;
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError>;
    /// Also frees every buffer allocated from `pool`.
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn record_frame(
        &self,
        command_buffer: vk::CommandBuffer,
        frame: &FrameCommands<'_>,
    ) -> Result<(), GpuError>;
    /// Submits to the graphics queue.
    fn submit(&self, submission: &FrameSubmission) -> Result<(), GpuError>;

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> Result<vk::PipelineCache, GpuError>;
    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> Result<Vec<u8>, GpuError>;
    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);
    fn create_pipeline_layout(&self) -> Result<vk::PipelineLayout, GpuError>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline, GpuError>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    /// Copies `bytes` into a new device-local buffer through a staging
    /// buffer on the transfer queue; returns once the copy completed.
    fn upload_device_local(
        &self,
        transfer_pool: vk::CommandPool,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<DeviceBuffer, GpuError>;
    fn destroy_buffer(&self, buffer: DeviceBuffer);

    /// Destroys the device, then the surface, then the instance.
    fn destroy(&mut self);
}
