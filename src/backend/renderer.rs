// Renderer - every GPU object the triangle needs, built bottom-up
//
// IMPORTANT: Field order matters for Drop! `Objects` declares its fields
// newest first, so Rust destroys them in exact reverse order of creation:
//   sync -> commands -> framebuffers -> pipeline -> render pass
//   -> swapchain (semaphore, views, swapchain) -> context (device, surface, instance)

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use super::command::CommandInfrastructure;
use super::device::GraphicsContext;
use super::pipeline::{Framebuffers, GraphicsPipeline, RenderPass};
use super::swapchain::{Swapchain, SwapchainRequest};
use super::sync::FrameSync;
use crate::config::Config;
use crate::error::Stage;
use crate::frame::FrameBackend;
use crate::resources::{Resources, FRAGMENT_SHADER, VERTEX_SHADER};

/// Image-acquired is waited on where the color attachment is written
const WAIT_STAGES: [vk::PipelineStageFlags; 1] = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

/// Renderer settings pulled out of the config once
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub app_name: String,
    pub app_version: u32,
    pub api_version: u32,
    pub enable_validation: bool,
    pub swapchain: SwapchainRequest,
    pub clear_color: [f32; 4],
    pub fence_timeout: u64,
}

impl RendererSettings {
    pub fn from_config(config: &Config, app_version: u32, api_version: u32) -> Self {
        Self {
            app_name: config.window.title.clone(),
            app_version,
            api_version,
            // Validation only in debug builds
            enable_validation: cfg!(debug_assertions) && config.debug.validation_layers,
            swapchain: SwapchainRequest {
                surface_format: config.surface_format(),
                present_mode: config.present_mode(),
                negotiate: config.graphics.negotiate_surface,
                width: config.window.width,
                height: config.window.height,
            },
            clear_color: config.graphics.clear_color,
            fence_timeout: config.fence_timeout(),
        }
    }
}

/// Every owned object, newest first
struct Objects<S, C, F, P, R, W, X> {
    sync: S,
    commands: C,
    framebuffers: F,
    pipeline: P,
    render_pass: R,
    swapchain: W,
    context: X,
}

type GpuObjects = Objects<
    FrameSync,
    CommandInfrastructure,
    Framebuffers,
    GraphicsPipeline,
    RenderPass,
    Swapchain,
    GraphicsContext,
>;

pub struct Renderer {
    gpu: GpuObjects,
    clear_color: [f32; 4],
    fence_timeout: u64,
    /// No submission since the last successful device idle
    drained: bool,
}

impl Renderer {
    /// Build the whole object graph. A failure at any step drops what was
    /// already built, newest first.
    pub fn new<W>(window: &W, settings: &RendererSettings, resources: &Resources) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Initializing Vulkan...");

        let vertex = resources.require(VERTEX_SHADER, "vertex shader")?;
        let fragment = resources.require(FRAGMENT_SHADER, "fragment shader")?;
        log::debug!("Vertex shader {:?}: {} bytes", vertex.path(), vertex.size());
        log::debug!("Fragment shader {:?}: {} bytes", fragment.path(), fragment.size());

        let context = GraphicsContext::new(
            window,
            &settings.app_name,
            settings.app_version,
            settings.api_version,
            settings.enable_validation,
        )?;

        let swapchain = Swapchain::new(&context, &settings.swapchain)?;

        let render_pass = RenderPass::new(&context.device, swapchain.format)?;

        let pipeline = GraphicsPipeline::new(
            &context.device,
            &render_pass,
            swapchain.extent,
            vertex.bytes(),
            fragment.bytes(),
        )
        .with_context(|| format!("Shaders {:?} / {:?}", vertex.path(), fragment.path()))?;

        let framebuffers = Framebuffers::new(
            &context.device,
            swapchain.image_views.as_slice(),
            &render_pass,
            swapchain.extent,
        )?;

        let commands = CommandInfrastructure::new(&context.device, context.queue_families.graphics)?;

        let sync = FrameSync::new(&context.device)?;

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            gpu: Objects {
                sync,
                commands,
                framebuffers,
                pipeline,
                render_pass,
                swapchain,
                context,
            },
            clear_color: settings.clear_color,
            fence_timeout: settings.fence_timeout,
            drained: true,
        })
    }

    pub fn framebuffer_count(&self) -> usize {
        self.gpu.framebuffers.len()
    }
}

impl FrameBackend for Renderer {
    fn image_count(&self) -> u32 {
        self.gpu.swapchain.image_count()
    }

    fn wait_for_previous_frame(&mut self) -> Result<()> {
        self.gpu.sync.wait_and_reset(self.fence_timeout)
    }

    fn acquire_next_image(&mut self) -> Result<u32> {
        self.gpu.swapchain.acquire_next_image()
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        let framebuffer = self
            .gpu
            .framebuffers
            .get(image_index)
            .with_context(|| format!("No framebuffer for image {}", image_index))
            .context(Stage::RecordCommands)?;

        self.gpu.commands.record(
            self.gpu.render_pass.render_pass,
            framebuffer,
            self.gpu.swapchain.extent,
            self.gpu.pipeline.pipeline,
            self.clear_color,
        )
    }

    fn submit(&mut self) -> Result<()> {
        let wait_semaphores = [self.gpu.swapchain.image_available];
        let signal_semaphores = [self.gpu.sync.render_finished];
        let command_buffers = [self.gpu.commands.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores) // Wait for image to be available
            .wait_dst_stage_mask(&WAIT_STAGES) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        self.drained = false;
        unsafe {
            self.gpu.context.device.queue_submit(
                self.gpu.context.graphics_queue,
                &[submit_info.build()],
                self.gpu.sync.in_flight_fence, // Signal this fence when GPU is done
            )
        }
        .context(Stage::SubmitCommands)
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        self.gpu.swapchain.present(
            self.gpu.context.present_queue,
            image_index,
            &[self.gpu.sync.render_finished], // Wait for rendering to finish
        )
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.gpu.context.wait_idle()?;
        self.drained = true;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Nothing may be destroyed while the GPU still uses it
        if !self.drained {
            if let Err(e) = self.gpu.context.wait_idle() {
                log::warn!("{:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Logs its name when dropped
    struct Tracked {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    #[test]
    fn objects_drop_in_reverse_creation_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let make = |name| Tracked { name, log: Rc::clone(&log) };

        // Built in the order Renderer::new creates them
        let context = make("context");
        let swapchain = make("swapchain");
        let render_pass = make("render pass");
        let pipeline = make("pipeline");
        let framebuffers = make("framebuffers");
        let commands = make("commands");
        let sync = make("sync");

        let objects = Objects {
            sync,
            commands,
            framebuffers,
            pipeline,
            render_pass,
            swapchain,
            context,
        };
        drop(objects);

        assert_eq!(
            *log.borrow(),
            vec![
                "sync",
                "commands",
                "framebuffers",
                "pipeline",
                "render pass",
                "swapchain",
                "context",
            ]
        );
    }

    #[test]
    fn settings_forward_versions_and_policy() {
        let mut config = Config::default();
        config.graphics.fence_timeout_ms = Some(250);

        let api = vk::API_VERSION_1_0;
        let settings = RendererSettings::from_config(&config, vk::make_api_version(0, 0, 1, 0), api);

        assert_eq!(settings.api_version, api);
        assert_eq!(settings.app_name, config.window.title);
        assert_eq!(settings.fence_timeout, 250_000_000);
        assert_eq!(settings.swapchain.present_mode, config.present_mode());
        if !cfg!(debug_assertions) {
            assert!(!settings.enable_validation);
        }
    }
}
