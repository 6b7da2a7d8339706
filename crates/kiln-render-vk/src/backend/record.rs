// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{GpuError, VkResultExt};
use crate::gpu::FrameCommands;

pub(super) unsafe fn record_frame(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    frame: &FrameCommands<'_>,
) -> Result<(), GpuError> {
    device
        .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        .or_gpu("vkResetCommandBuffer")?;
    let bi = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &bi)
        .or_gpu("vkBeginCommandBuffer")?;

    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: frame.extent,
    };
    let clear = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: frame.clear_color,
        },
    };
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: frame.render_pass,
        framebuffer: frame.framebuffer,
        render_area: area,
        clear_value_count: 1,
        p_clear_values: &clear,
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: frame.extent.width as f32,
        height: frame.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));

    let mut bound = vk::Pipeline::null();
    for draw in frame.draws {
        // consecutive draws sharing a pipeline skip the rebind
        if draw.pipeline != bound {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
            bound = draw.pipeline;
        }
        device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, vk::IndexType::UINT32);
        device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
    }

    device.cmd_end_render_pass(cmd);
    device.end_command_buffer(cmd).or_gpu("vkEndCommandBuffer")
}
