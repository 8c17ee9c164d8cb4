// Failure stages and process exit codes
//
// Every fallible step of bootstrap and the frame loop tags its error with
// exactly one Stage. The entry point recovers it with downcast_ref and maps
// it to a distinct exit code, so tooling can tell which step failed without
// reading logs.

use thiserror::Error;

/// Exit code for errors that carry no stage.
pub const GENERIC_EXIT_CODE: u8 = 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    #[error("failed to load configuration")]
    ConfigLoad,
    #[error("failed to load resources")]
    ResourcesLoad,
    #[error("failed to create window")]
    WindowCreate,

    #[error("failed to create Vulkan instance")]
    CreateInstance,
    #[error("failed to create window surface")]
    CreateSurface,
    #[error("failed to find a suitable physical device")]
    EnumeratePhysicalDevices,
    #[error("failed to create logical device")]
    CreateLogicalDevice,
    #[error("failed to retrieve device queues")]
    RetrieveQueues,

    #[error("failed to create swapchain")]
    CreateSwapchain,
    #[error("failed to create swapchain image views")]
    CreateImageViews,

    #[error("failed to create render pass")]
    CreateRenderPass,
    #[error("failed to create shader module")]
    CreateShaderModule,
    #[error("failed to create pipeline layout")]
    CreatePipelineLayout,
    #[error("failed to create graphics pipeline")]
    CreatePipeline,

    #[error("failed to create framebuffers")]
    CreateFramebuffers,
    #[error("failed to create command pool")]
    CreateCommandPool,
    #[error("failed to allocate command buffer")]
    AllocateCommandBuffer,
    #[error("failed to create synchronization objects")]
    CreateSyncObjects,

    #[error("failed waiting for the in-flight fence")]
    WaitForFence,
    #[error("failed to reset the in-flight fence")]
    ResetFence,
    #[error("failed to acquire swapchain image")]
    AcquireImage,
    #[error("failed to record command buffer")]
    RecordCommands,
    #[error("failed to submit command buffer")]
    SubmitCommands,
    #[error("failed to present swapchain image")]
    PresentImage,
    #[error("failed waiting for device idle")]
    DeviceIdle,
}

impl Stage {
    pub fn exit_code(self) -> u8 {
        match self {
            Stage::ConfigLoad => 2,
            Stage::ResourcesLoad => 3,
            Stage::WindowCreate => 4,
            Stage::CreateInstance => 5,
            Stage::CreateSurface => 6,
            Stage::EnumeratePhysicalDevices => 7,
            Stage::CreateLogicalDevice => 8,
            Stage::RetrieveQueues => 9,
            Stage::CreateSwapchain => 10,
            Stage::CreateImageViews => 11,
            Stage::CreateRenderPass => 12,
            Stage::CreateShaderModule => 13,
            Stage::CreatePipelineLayout => 14,
            Stage::CreatePipeline => 15,
            Stage::CreateFramebuffers => 16,
            Stage::CreateCommandPool => 17,
            Stage::AllocateCommandBuffer => 18,
            Stage::CreateSyncObjects => 19,
            Stage::WaitForFence => 20,
            Stage::ResetFence => 21,
            Stage::AcquireImage => 22,
            Stage::RecordCommands => 23,
            Stage::SubmitCommands => 24,
            Stage::PresentImage => 25,
            Stage::DeviceIdle => 26,
        }
    }
}

/// Map an error to the process exit code of the stage it was tagged with.
pub fn exit_code_of(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<Stage>()
        .map(|stage| stage.exit_code())
        .unwrap_or(GENERIC_EXIT_CODE)
}
