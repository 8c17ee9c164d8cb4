// Backend module - Vulkan abstraction layer
//
// Design: Thin owning wrappers around ash handles. Each wrapper destroys its
// handle on drop; the renderer composes them so drops run newest first.

pub mod command;
pub mod device;
pub mod pipeline;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod teardown;

pub use renderer::{Renderer, RendererSettings};
