// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{GpuError, VkResultExt};
use crate::gpu::DeviceBuffer;

fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && memory.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

/// `families` lists every queue family that touches the buffer; more than
/// one distinct family makes it concurrently shared.
pub(super) unsafe fn create_buffer(
    device: &ash::Device,
    memory: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
    families: &[u32],
) -> Result<DeviceBuffer, GpuError> {
    let concurrent = families.windows(2).any(|w| w[0] != w[1]);
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: if concurrent {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        },
        queue_family_index_count: if concurrent { families.len() as u32 } else { 0 },
        p_queue_family_indices: if concurrent {
            families.as_ptr()
        } else {
            std::ptr::null()
        },
        ..Default::default()
    };
    let buffer = device.create_buffer(&bci, None).or_gpu("vkCreateBuffer")?;
    let req = device.get_buffer_memory_requirements(buffer);
    let Some(memory_type_index) = find_memory_type(memory, req.memory_type_bits, props) else {
        device.destroy_buffer(buffer, None);
        return Err(GpuError::new(
            "vkAllocateMemory",
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        ));
    };
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    let memory = match device.allocate_memory(&mai, None) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(GpuError::new("vkAllocateMemory", e));
        }
    };
    let out = DeviceBuffer {
        buffer,
        memory,
        size,
    };
    if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
        destroy_buffer(device, out);
        return Err(GpuError::new("vkBindBufferMemory", e));
    }
    Ok(out)
}

pub(super) unsafe fn destroy_buffer(device: &ash::Device, buffer: DeviceBuffer) {
    device.destroy_buffer(buffer.buffer, None);
    device.free_memory(buffer.memory, None);
}

pub(super) struct Upload<'a> {
    pub memory: &'a vk::PhysicalDeviceMemoryProperties,
    pub queue: vk::Queue,
    pub pool: vk::CommandPool,
    pub transfer_family: u32,
    pub graphics_family: u32,
}

// STRICT ORDER (staging upload):
// 1) host-visible staging buffer, filled through a mapping
// 2) device-local destination, shared with graphics if the transfer family differs
// 3) one-shot copy + release barrier on the transfer queue, then wait
// 4) staging buffer and command buffer freed only after the wait
pub(super) unsafe fn upload_device_local(
    device: &ash::Device,
    up: &Upload<'_>,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<DeviceBuffer, GpuError> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = create_buffer(
        device,
        up.memory,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        &[up.transfer_family],
    )?;
    let result = (|| {
        let ptr = device
            .map_memory(staging.memory, 0, size, vk::MemoryMapFlags::empty())
            .or_gpu("vkMapMemory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
        device.unmap_memory(staging.memory);

        let dst = create_buffer(
            device,
            up.memory,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &[up.transfer_family, up.graphics_family],
        )?;
        match copy_and_wait(device, up, staging.buffer, dst.buffer, size) {
            Ok(()) => Ok(dst),
            Err(e) => {
                destroy_buffer(device, dst);
                Err(e)
            }
        }
    })();
    destroy_buffer(device, staging);
    result
}

unsafe fn copy_and_wait(
    device: &ash::Device,
    up: &Upload<'_>,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<(), GpuError> {
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: up.pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device
        .allocate_command_buffers(&ai)
        .or_gpu("vkAllocateCommandBuffers")?[0];

    let result = (|| {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &bi)
            .or_gpu("vkBeginCommandBuffer")?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));

        // a transfer-only queue cannot name vertex-input stages
        let (dst_stage, dst_access) = if up.transfer_family == up.graphics_family {
            (
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ,
            )
        } else {
            (
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::AccessFlags::empty(),
            )
        };
        let barrier = vk::BufferMemoryBarrier {
            s_type: vk::StructureType::BUFFER_MEMORY_BARRIER,
            src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
            dst_access_mask: dst_access,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            buffer: dst,
            offset: 0,
            size: vk::WHOLE_SIZE,
            ..Default::default()
        };
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            std::slice::from_ref(&barrier),
            &[],
        );
        device.end_command_buffer(cmd).or_gpu("vkEndCommandBuffer")?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device
            .queue_submit(up.queue, std::slice::from_ref(&si), vk::Fence::null())
            .or_gpu("vkQueueSubmit")?;
        device.queue_wait_idle(up.queue).or_gpu("vkQueueWaitIdle")
    })();
    device.free_command_buffers(up.pool, std::slice::from_ref(&cmd));
    result
}
