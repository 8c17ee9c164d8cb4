// Render pass, graphics pipeline and framebuffers
//
// The pipeline draws a triangle whose vertices live in the vertex shader:
// no vertex input, no descriptor sets, no push constants. Everything here is
// immutable after creation.

use anyhow::{Context, Result};
use ash::vk;

use super::shader::ShaderModule;
use super::teardown::HandleStack;
use crate::error::Stage;

/// Single color attachment matching the swapchain format, cleared on load and
/// stored for presentation. One subpass, no depth.
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    device: ash::Device,
}

impl RenderPass {
    pub fn new(device: &ash::Device, format: vk::Format) -> Result<Self> {
        // Color attachment (the swapchain image)
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments)
            .build();

        // The layout transition must wait for the acquire semaphore, which is
        // waited on at COLOR_ATTACHMENT_OUTPUT
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let render_pass = unsafe { device.create_render_pass(&render_pass_info, None) }
            .context(Stage::CreateRenderPass)?;

        Ok(Self {
            render_pass,
            device: device.clone(),
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// Shader modules, layout and pipeline object
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    // Kept alive with the pipeline; dropped after it
    _vertex_shader: ShaderModule,
    _fragment_shader: ShaderModule,
    device: ash::Device,
}

impl GraphicsPipeline {
    pub fn new(
        device: &ash::Device,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
        vertex_code: &[u8],
        fragment_code: &[u8],
    ) -> Result<Self> {
        let vertex_shader = ShaderModule::new(device, vertex_code)
            .context("Failed to create vertex shader module")?;
        let fragment_shader = ShaderModule::new(device, fragment_code)
            .context("Failed to create fragment shader module")?;

        let entry_point = c"main";

        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_shader.module)
            .name(entry_point)
            .build();

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_shader.module)
            .name(entry_point)
            .build();

        let shader_stages = &[vert_stage, frag_stage];

        // Vertex positions are hard-coded in the vertex shader
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // The swapchain is never recreated, so viewport and scissor are baked in
        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build();

        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent)
            .build();

        let viewports = &[viewport];
        let scissors = &[scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Opaque, no blending
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(color_blend_attachments);

        // Empty layout: no descriptor sets, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::builder();

        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .context(Stage::CreatePipelineLayout)?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| e)
        .context(Stage::CreatePipeline);

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        Ok(Self {
            pipeline,
            layout,
            _vertex_shader: vertex_shader,
            _fragment_shader: fragment_shader,
            device: device.clone(),
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// One framebuffer per swapchain image view, indexed like the swapchain images
pub struct Framebuffers {
    framebuffers: HandleStack<vk::Framebuffer>,
}

impl Framebuffers {
    pub fn new(
        device: &ash::Device,
        image_views: &[vk::ImageView],
        render_pass: &RenderPass,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let owner = device.clone();
        let framebuffers = HandleStack::build(
            image_views,
            move |framebuffer: vk::Framebuffer| unsafe { owner.destroy_framebuffer(framebuffer, None) },
            |&image_view| {
                let attachments = &[image_view];
                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass.render_pass)
                    .attachments(attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);

                unsafe { device.create_framebuffer(&framebuffer_info, None) }
                    .context(Stage::CreateFramebuffers)
            },
        )?;

        log::info!("Created {} framebuffers", framebuffers.len());
        Ok(Self { framebuffers })
    }

    pub fn get(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize)
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }
}
