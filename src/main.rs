// =============================================================================
// PXCUBE - Vulkan triangle
// =============================================================================
//
// Stands up a Vulkan context and draws one hard-coded triangle every frame
// until the window closes.
//
// STARTUP (each step needs everything above it):
//   resources -> window -> instance -> surface -> physical device
//   -> logical device + queues -> swapchain + image views -> render pass
//   -> pipeline -> framebuffers -> command pool/buffer -> sync objects
//
// FRAME FLOW:
// 1. Wait for the previous frame's fence, reset it
// 2. Acquire swapchain image
// 3. Record command buffer
// 4. Submit to the graphics queue
// 5. Present on the present queue
//
// Teardown runs in exact reverse order through Drop, after the device has
// gone idle. Every failure maps to its own process exit code.
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame;
mod resources;
mod window;

use anyhow::Result;
use ash::vk;
use backend::{Renderer, RendererSettings};
use config::Config;
use frame::FrameBackend;
use resources::Resources;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use window::Window;

const APP_VERSION: u32 = vk::make_api_version(0, 0, 1, 0);
const API_VERSION: u32 = vk::API_VERSION_1_0;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_PATH));

    let config = match Config::load_from_path(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(&Config::default());
            return fail(e);
        }
    };

    init_logging(&config);
    log::info!("Starting PXCube");
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Present mode: {}", config.graphics.present_mode);

    match run(&config) {
        Ok(frames) => {
            log::info!("Window closed after {} frames", frames);
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn fail(err: anyhow::Error) -> ExitCode {
    let code = error::exit_code_of(&err);
    log::error!("Exiting with code {}: {:?}", code, err);
    ExitCode::from(code)
}

/// Bootstrap everything and drive the frame loop.
///
/// Locals drop in reverse declaration order, so on every exit path the
/// renderer goes first, then the window, then the resource blobs.
fn run(config: &Config) -> Result<u64> {
    let resources = Resources::load(&config.resources.shaders)?;

    let mut window = Window::create(&config.window.title, config.window.width, config.window.height)?;

    let settings = RendererSettings::from_config(config, APP_VERSION, API_VERSION);
    let mut renderer = Renderer::new(window.raw(), &settings, &resources)?;

    log::info!(
        "{} framebuffers for {} swapchain images",
        renderer.framebuffer_count(),
        renderer.image_count()
    );

    frame::run(&mut window, &mut renderer)
}

/// Initialize logging, optionally redirected into a file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    // RUST_LOG still wins over the config
    builder.parse_default_env();

    if config.debug.log_to_file {
        match File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Could not open log file {}: {}", config.debug.log_file, e),
        }
    }

    // A second init (tests, re-entry) is harmless
    let _ = builder.try_init();
}
