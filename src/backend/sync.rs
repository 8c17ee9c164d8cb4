// Synchronization primitives
//
// A single frame is in flight at any time: one fence for CPU-GPU ordering and
// one semaphore marking rendering complete. The image-acquired semaphore
// lives on the swapchain.

use anyhow::{Context, Result};
use ash::vk;

use crate::error::Stage;

pub struct FrameSync {
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: ash::Device,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first frame's wait returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let render_finished = unsafe { device.create_semaphore(&semaphore_info, None) }
            .context(Stage::CreateSyncObjects)?;

        let in_flight_fence = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.destroy_semaphore(render_finished, None) };
                return Err(e).context(Stage::CreateSyncObjects);
            }
        };

        Ok(Self {
            render_finished,
            in_flight_fence,
            device: device.clone(),
        })
    }

    /// Block until the previous frame's GPU work is done, then reset the fence.
    pub fn wait_and_reset(&self, timeout: u64) -> Result<()> {
        let fences = [self.in_flight_fence];
        unsafe {
            self.device
                .wait_for_fences(&fences, true, timeout)
                .context(Stage::WaitForFence)?;
            self.device.reset_fences(&fences).context(Stage::ResetFence)?;
        }
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.in_flight_fence, None);
            self.device.destroy_semaphore(self.render_finished, None);
        }
    }
}
