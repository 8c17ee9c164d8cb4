// Command pool and the single reusable command buffer
//
// The buffer is reset and re-recorded every frame; it is never freed or
// reallocated before the pool goes away.

use anyhow::{Context, Result};
use ash::vk;

use crate::error::Stage;

/// Vertices drawn per frame; positions come from the vertex shader
pub const TRIANGLE_VERTEX_COUNT: u32 = 3;

pub struct CommandInfrastructure {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    device: ash::Device,
}

impl CommandInfrastructure {
    pub fn new(device: &ash::Device, graphics_queue_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            // RESET: Allow individual buffer reset
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context(Stage::CreateCommandPool)?;

        let mut infra = Self {
            command_pool,
            command_buffer: vk::CommandBuffer::null(),
            device: device.clone(),
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        infra.command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context(Stage::AllocateCommandBuffer)?
            .into_iter()
            .next()
            .context(Stage::AllocateCommandBuffer)?;

        Ok(infra)
    }

    /// Record one frame: clear, bind the pipeline, draw the triangle.
    pub fn record(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        pipeline: vk::Pipeline,
        clear_color: [f32; 4],
    ) -> Result<()> {
        let cmd = self.command_buffer;
        let device = &self.device;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context(Stage::RecordCommands)?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .context(Stage::RecordCommands)?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_draw(cmd, TRIANGLE_VERTEX_COUNT, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd).context(Stage::RecordCommands)?;
        }

        Ok(())
    }
}

impl Drop for CommandInfrastructure {
    fn drop(&mut self) {
        // Destroying the pool also frees the command buffer
        unsafe { self.device.destroy_command_pool(self.command_pool, None) };
    }
}
