// SPDX-License-Identifier: CEPL-1.0
//! [`Gpu`] over ash: one instance, one surface, one logical device.

mod buffer;
mod instance;
mod pipeline;
mod record;

use anyhow::{Context, Result};
use ash::{khr::surface, khr::swapchain, vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::device::{DeviceIdentity, QueueFamilies, QueueRole, SurfaceSnapshot};
use crate::error::{GpuError, VkResultExt};
use crate::gpu::{
    AcquireOutcome, DeviceBuffer, FrameCommands, FrameSubmission, Gpu, PipelineDesc,
    PresentOutcome, SwapchainDesc,
};

pub struct AshGpu {
    _entry: Entry,
    instance: Instance,
    debug: instance::DebugState,
    surface_i: surface::Instance,
    surface: vk::SurfaceKHR,

    physical: vk::PhysicalDevice,
    memory: vk::PhysicalDeviceMemoryProperties,
    identity: DeviceIdentity,
    families: QueueFamilies,

    device: ash::Device,
    swapchain_d: swapchain::Device,
    queues: Vec<(QueueRole, vk::Queue)>,

    destroyed: bool,
}

impl AshGpu {
    // STRICT ORDER:
    // 1) Instance (WSI extensions, validation if requested and installed)
    // 2) Surface from THIS instance
    // 3) Physical device + queue families checked AGAINST this surface
    // 4) Logical device with one queue per distinct family
    /// # Safety
    /// `display` and `window` must stay valid until [`Gpu::destroy`] ran.
    pub unsafe fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        validation: bool,
    ) -> Result<Self> {
        let entry = Entry::load().context("loading the Vulkan library")?;
        let (instance, validation) = instance::create_instance(&entry, display, validation)?;
        let debug = if validation {
            instance::create_debug_messenger(&entry, &instance)?
        } else {
            None
        };

        let surface_i = surface::Instance::new(&entry, &instance);
        let surface = instance::create_surface(&entry, &instance, display, window)?;

        let choice = instance::pick_physical_device(&instance, &surface_i, surface)?;
        let memory = instance.get_physical_device_memory_properties(choice.physical);
        let dq = instance::create_device(&instance, &choice)?;
        let swapchain_d = swapchain::Device::new(&instance, &dq.device);
        info!(
            "device ready (validation {})",
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_i,
            surface,
            physical: choice.physical,
            memory,
            identity: choice.identity,
            families: choice.families,
            device: dq.device,
            swapchain_d,
            queues: dq.queues,
            destroyed: false,
        })
    }

    fn queue(&self, role: QueueRole) -> Result<vk::Queue, GpuError> {
        self.queues
            .iter()
            .find(|(r, _)| *r == role)
            .map(|&(_, q)| q)
            .ok_or(GpuError::new(
                "vkGetDeviceQueue",
                vk::Result::ERROR_FEATURE_NOT_PRESENT,
            ))
    }
}

impl Gpu for AshGpu {
    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn surface_snapshot(&self) -> Result<SurfaceSnapshot, GpuError> {
        unsafe {
            Ok(SurfaceSnapshot {
                capabilities: self
                    .surface_i
                    .get_physical_device_surface_capabilities(self.physical, self.surface)
                    .or_gpu("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: self
                    .surface_i
                    .get_physical_device_surface_formats(self.physical, self.surface)
                    .or_gpu("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: self
                    .surface_i
                    .get_physical_device_surface_present_modes(self.physical, self.surface)
                    .or_gpu("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        unsafe { self.device.device_wait_idle() }.or_gpu("vkDeviceWaitIdle")
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError> {
        let ci = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_semaphore(&ci, None) }.or_gpu("vkCreateSemaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&ci, None) }.or_gpu("vkCreateFence")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<(), GpuError> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
            .or_gpu("vkWaitForFences")
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        unsafe { self.device.reset_fences(&[fence]) }.or_gpu("vkResetFences")
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR, GpuError> {
        let families = [self.families.graphics, self.families.presentation];
        let shared = families[0] != families[1];
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: desc.image_count,
            image_format: desc.surface_format.format,
            image_color_space: desc.surface_format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: if shared {
                vk::SharingMode::CONCURRENT
            } else {
                vk::SharingMode::EXCLUSIVE
            },
            queue_family_index_count: if shared { 2 } else { 0 },
            p_queue_family_indices: if shared {
                families.as_ptr()
            } else {
                std::ptr::null()
            },
            pre_transform: desc.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: desc.old_swapchain,
            ..Default::default()
        };
        unsafe { self.swapchain_d.create_swapchain(&info, None) }.or_gpu("vkCreateSwapchainKHR")
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>, GpuError> {
        unsafe { self.swapchain_d.get_swapchain_images(swapchain) }
            .or_gpu("vkGetSwapchainImagesKHR")
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_d.destroy_swapchain(swapchain, None) }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> Result<vk::ImageView, GpuError> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&info, None) }.or_gpu("vkCreateImageView")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome, GpuError> {
        let acquired = unsafe {
            self.swapchain_d
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(GpuError::new("vkAcquireNextImageKHR", e)),
        }
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome, GpuError> {
        let queue = self.queue(QueueRole::Presentation)?;
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_d.queue_present(queue, &info) } {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(GpuError::new("vkQueuePresentKHR", e)),
        }
    }

    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass, GpuError> {
        unsafe { pipeline::create_render_pass(&self.device, format) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError> {
        let info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: &view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.create_framebuffer(&info, None) }.or_gpu("vkCreateFramebuffer")
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_command_pool(&self, role: QueueRole) -> Result<vk::CommandPool, GpuError> {
        let family = self.families.family(role).ok_or(GpuError::new(
            "vkCreateCommandPool",
            vk::Result::ERROR_FEATURE_NOT_PRESENT,
        ))?;
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        debug!("command pool for {role:?} on family {family}");
        unsafe { self.device.create_command_pool(&info, None) }.or_gpu("vkCreateCommandPool")
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&info) }
            .or_gpu("vkAllocateCommandBuffers")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn record_frame(
        &self,
        command_buffer: vk::CommandBuffer,
        frame: &FrameCommands<'_>,
    ) -> Result<(), GpuError> {
        unsafe { record::record_frame(&self.device, command_buffer, frame) }
    }

    fn submit(&self, submission: &FrameSubmission) -> Result<(), GpuError> {
        let queue = self.queue(QueueRole::Graphics)?;
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &submission.wait_semaphore,
            p_wait_dst_stage_mask: &submission.wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &submission.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &submission.signal_semaphore,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(queue, std::slice::from_ref(&info), submission.fence)
        }
        .or_gpu("vkQueueSubmit")
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> Result<vk::PipelineCache, GpuError> {
        unsafe { pipeline::create_pipeline_cache(&self.device, initial_data) }
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> Result<Vec<u8>, GpuError> {
        unsafe { self.device.get_pipeline_cache_data(cache) }.or_gpu("vkGetPipelineCacheData")
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.device.destroy_pipeline_cache(cache, None) }
    }

    fn create_pipeline_layout(&self) -> Result<vk::PipelineLayout, GpuError> {
        unsafe { pipeline::create_pipeline_layout(&self.device) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<vk::Pipeline, GpuError> {
        unsafe { pipeline::create_graphics_pipeline(&self.device, desc) }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn upload_device_local(
        &self,
        transfer_pool: vk::CommandPool,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<DeviceBuffer, GpuError> {
        let up = buffer::Upload {
            memory: &self.memory,
            queue: self.queue(QueueRole::Transfer)?,
            pool: transfer_pool,
            transfer_family: self.families.transfer,
            graphics_family: self.families.graphics,
        };
        unsafe { buffer::upload_device_local(&self.device, &up, bytes, usage) }
    }

    fn destroy_buffer(&self, buffer: DeviceBuffer) {
        unsafe { buffer::destroy_buffer(&self.device, buffer) }
    }

    // STRICT TEARDOWN ORDER: device, then surface, then debug messenger, instance last.
    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        unsafe {
            self.device.destroy_device(None);
            self.surface_i.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("device, surface and instance destroyed");
    }
}

impl Drop for AshGpu {
    fn drop(&mut self) {
        self.destroy();
    }
}
