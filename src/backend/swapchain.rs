// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The surface format and present mode are requested as configured; unless
// negotiation is switched on there is no fallback, so hardware lacking the
// exact pair fails here.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;

use super::device::{GraphicsContext, QueueFamilies};
use super::teardown::HandleStack;
use crate::error::Stage;

/// What the caller asks of the swapchain
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub negotiate: bool,
    pub width: u32,
    pub height: u32,
}

/// Pick the surface format. Without negotiation the requested format must be
/// supported as-is.
pub fn choose_surface_format(
    supported: &[vk::SurfaceFormatKHR],
    requested: vk::SurfaceFormatKHR,
    negotiate: bool,
) -> Result<vk::SurfaceFormatKHR> {
    let exact = supported
        .iter()
        .any(|f| f.format == requested.format && f.color_space == requested.color_space);

    // A single UNDEFINED entry means the surface takes any format
    let unconstrained = supported.len() == 1 && supported[0].format == vk::Format::UNDEFINED;

    if exact || unconstrained {
        return Ok(requested);
    }

    if negotiate {
        if let Some(first) = supported.first() {
            log::warn!(
                "Surface format {:?} unsupported, falling back to {:?}",
                requested.format,
                first.format
            );
            return Ok(*first);
        }
    }

    Err(anyhow::Error::new(Stage::CreateSwapchain)).with_context(|| {
        format!(
            "Surface does not support format {:?} / {:?}",
            requested.format, requested.color_space
        )
    })
}

/// Pick the present mode. FIFO is the only mode the API guarantees, so it is
/// the negotiated fallback.
pub fn choose_present_mode(
    supported: &[vk::PresentModeKHR],
    requested: vk::PresentModeKHR,
    negotiate: bool,
) -> Result<vk::PresentModeKHR> {
    if supported.contains(&requested) {
        return Ok(requested);
    }

    if negotiate {
        log::warn!("Present mode {:?} unsupported, falling back to FIFO", requested);
        return Ok(vk::PresentModeKHR::FIFO);
    }

    Err(anyhow::Error::new(Stage::CreateSwapchain))
        .with_context(|| format!("Surface does not support present mode {:?}", requested))
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped when the surface has a maximum
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: HandleStack<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Signaled when an acquired image is ready. Tied to the swapchain
    /// because acquisition is the only operation that signals it.
    pub image_available: vk::Semaphore,
    device: ash::Device,
}

impl Swapchain {
    pub fn new(ctx: &GraphicsContext, request: &SwapchainRequest) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", request.width, request.height);

        let surface_caps = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
        }
        .context(Stage::CreateSwapchain)?;

        let formats = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
        }
        .context(Stage::CreateSwapchain)?;

        let present_modes = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
        }
        .context(Stage::CreateSwapchain)?;

        let surface_format = choose_surface_format(&formats, request.surface_format, request.negotiate)?;
        let present_mode = choose_present_mode(&present_modes, request.present_mode, request.negotiate)?;
        let extent = choose_extent(&surface_caps, request.width, request.height);
        let image_count = choose_image_count(&surface_caps);

        log::info!("Surface format: {:?}", surface_format.format);
        log::info!("Present mode: {:?}", present_mode);

        let swapchain_loader = khr::Swapchain::new(&ctx.instance, &ctx.device);

        let family_indices = ctx.queue_families.unique();
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let create_info = sharing_mode(create_info, &ctx.queue_families, &family_indices);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context(Stage::CreateSwapchain)?;

        // Owned from here on so an early return still destroys what exists
        let owner = ctx.device.clone();
        let mut chain = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: HandleStack::new(move |view: vk::ImageView| unsafe {
                owner.destroy_image_view(view, None)
            }),
            format: surface_format.format,
            extent,
            image_available: vk::Semaphore::null(),
            device: ctx.device.clone(),
        };

        chain.images = unsafe { chain.swapchain_loader.get_swapchain_images(chain.swapchain) }
            .context(Stage::CreateSwapchain)?;

        log::info!("Created swapchain with {} images", chain.images.len());

        let format = chain.format;
        let device = &chain.device;
        chain.image_views.try_extend(&chain.images, |&image| {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            unsafe { device.create_image_view(&create_info, None) }.context(Stage::CreateImageViews)
        })?;

        chain.image_available = unsafe {
            chain
                .device
                .create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)
        }
        .context(Stage::CreateSyncObjects)?;

        Ok(chain)
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Acquire next image for rendering, signaling `image_available`
    pub fn acquire_next_image(&self) -> Result<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.image_available,
                vk::Fence::null(),
            )
        }
        .context(Stage::AcquireImage)?;

        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }

        if index >= self.image_count() {
            return Err(anyhow::Error::new(Stage::AcquireImage)).with_context(|| {
                format!("Acquired index {} out of range ({} images)", index, self.image_count())
            });
        }

        Ok(index)
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
            .context(Stage::PresentImage)?;

        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }

        Ok(())
    }
}

fn sharing_mode<'a>(
    create_info: vk::SwapchainCreateInfoKHRBuilder<'a>,
    families: &QueueFamilies,
    family_indices: &'a [u32],
) -> vk::SwapchainCreateInfoKHRBuilder<'a> {
    if families.is_shared() {
        create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
    } else {
        create_info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(family_indices)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            if self.image_available != vk::Semaphore::null() {
                self.device.destroy_semaphore(self.image_available, None);
            }
        }
        // Views go before the swapchain that owns their images
        self.image_views.clear();
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code_of;

    const BGRA_SRGB: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    const RGBA_UNORM: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 800, height: 600 },
            ..Default::default()
        }
    }

    #[test]
    fn exact_format_is_used() {
        let chosen = choose_surface_format(&[RGBA_UNORM, BGRA_SRGB], BGRA_SRGB, false).unwrap();
        assert_eq!(chosen.format, BGRA_SRGB.format);
    }

    #[test]
    fn missing_format_fails_without_negotiation() {
        let err = choose_surface_format(&[RGBA_UNORM], BGRA_SRGB, false).unwrap_err();
        assert_eq!(exit_code_of(&err), Stage::CreateSwapchain.exit_code());
    }

    #[test]
    fn missing_format_falls_back_with_negotiation() {
        let chosen = choose_surface_format(&[RGBA_UNORM], BGRA_SRGB, true).unwrap();
        assert_eq!(chosen.format, RGBA_UNORM.format);
    }

    #[test]
    fn undefined_surface_accepts_request() {
        let any = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let chosen = choose_surface_format(&[any], BGRA_SRGB, false).unwrap();
        assert_eq!(chosen.format, BGRA_SRGB.format);
    }

    #[test]
    fn present_mode_policy() {
        let fifo_only = [vk::PresentModeKHR::FIFO];
        let err = choose_present_mode(&fifo_only, vk::PresentModeKHR::MAILBOX, false).unwrap_err();
        assert_eq!(exit_code_of(&err), Stage::CreateSwapchain.exit_code());

        let chosen = choose_present_mode(&fifo_only, vk::PresentModeKHR::MAILBOX, true).unwrap();
        assert_eq!(chosen, vk::PresentModeKHR::FIFO);

        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let chosen = choose_present_mode(&both, vk::PresentModeKHR::MAILBOX, false).unwrap();
        assert_eq!(chosen, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn extent_prefers_current_then_clamps() {
        let mut c = caps(2, 3);
        let extent = choose_extent(&c, 1000, 700);
        assert_eq!((extent.width, extent.height), (800, 600));

        c.current_extent = vk::Extent2D { width: 1000, height: 700 };
        let extent = choose_extent(&c, 10, 10);
        assert_eq!((extent.width, extent.height), (1000, 700));
    }

    #[test]
    fn image_count_policy() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
    }
}
