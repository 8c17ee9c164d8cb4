// Graphics context - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Window surface creation
// - Physical device selection (first device with graphics + present queues)
// - Logical device + queue retrieval
//
// Each step tags its failure with its own Stage.

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr::Surface};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::{CStr, CString};

use crate::error::Stage;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices used by the renderer. Both may name the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Find a graphics family and a family able to present to the surface.
///
/// The graphics family is the first one advertising GRAPHICS. Presentation
/// prefers that same family and otherwise takes the first family that can
/// present.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<Option<QueueFamilies>>
where
    F: FnMut(u32) -> Result<bool>,
{
    let graphics = families
        .iter()
        .position(|props| props.queue_count > 0 && props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32);

    let Some(graphics) = graphics else {
        return Ok(None);
    };

    if supports_present(graphics)? {
        return Ok(Some(QueueFamilies { graphics, present: graphics }));
    }

    for (index, props) in families.iter().enumerate() {
        let index = index as u32;
        if index == graphics || props.queue_count == 0 {
            continue;
        }
        if supports_present(index)? {
            return Ok(Some(QueueFamilies { graphics, present: index }));
        }
    }

    Ok(None)
}

/// Vulkan instance, surface and device, destroyed together in reverse order
pub struct GraphicsContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: Surface,

    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl GraphicsContext {
    /// Create the context for a window
    ///
    /// # Arguments
    /// * `window` - Window providing raw display/window handles for the surface
    /// * `app_name` - Application name reported to the driver
    /// * `app_version` - Application version (`vk::make_api_version`)
    /// * `api_version` - Vulkan API version the application targets
    /// * `enable_validation` - Enable Vulkan validation layers when installed
    pub fn new<W>(
        window: &W,
        app_name: &str,
        app_version: u32,
        api_version: u32,
        enable_validation: bool,
    ) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        log::info!("Creating graphics context: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")
            .context(Stage::CreateInstance)?;

        let enable_validation = enable_validation && Self::validation_available(&entry);
        let instance = Self::create_instance(
            &entry,
            window,
            app_name,
            app_version,
            api_version,
            enable_validation,
        )?;

        // From here on a failure must release what was already created, so
        // the context is assembled field by field through a guard.
        let mut partial = PartialContext {
            instance: Some(instance),
            debug_utils: None,
            surface: None,
        };

        let instance_ref = partial.instance.as_ref().context(Stage::CreateInstance)?;
        if enable_validation {
            partial.debug_utils = Some(Self::setup_debug_messenger(&entry, instance_ref)?);
        }

        let surface_loader = Surface::new(&entry, instance_ref);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                instance_ref,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .context(Stage::CreateSurface)?;
        partial.surface = Some((surface_loader.clone(), surface));

        let (physical_device, queue_families) =
            Self::pick_physical_device(instance_ref, &surface_loader, surface)?;

        let properties = unsafe { instance_ref.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        let device = Self::create_logical_device(instance_ref, physical_device, &queue_families)?;

        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(queue_families.graphics, 0),
                device.get_device_queue(queue_families.present, 0),
            )
        };

        if graphics_queue == vk::Queue::null() || present_queue == vk::Queue::null() {
            unsafe { device.destroy_device(None) };
            return Err(anyhow::Error::new(Stage::RetrieveQueues))
                .context("Device returned a null queue handle");
        }

        let (instance, debug_utils, (surface_loader, surface)) = partial.finish()?;

        Ok(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            queue_families,
            graphics_queue,
            present_queue,
            debug_utils,
        })
    }

    fn validation_available(entry: &Entry) -> bool {
        let layers = match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers,
            Err(e) => {
                log::warn!("Could not enumerate instance layers: {}", e);
                return false;
            }
        };

        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if !found {
            log::warn!("Validation layer requested but not installed, continuing without it");
        }
        found
    }

    fn create_instance<W: HasRawDisplayHandle>(
        entry: &Entry,
        window: &W,
        app_name: &str,
        app_version: u32,
        api_version: u32,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name).context(Stage::CreateInstance)?;
        let engine_name = c"PXCube";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(app_version)
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);

        // Platform-specific surface extensions
        let mut extensions = ash_window::enumerate_required_extensions(window.raw_display_handle())
            .context("Window system is not supported by the Vulkan surface loader")
            .context(Stage::CreateInstance)?
            .to_vec();

        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }.context(Stage::CreateInstance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")
            .context(Stage::CreateInstance)?;

        Ok((debug_utils, messenger))
    }

    /// First enumerated device with both queue families wins. No scoring.
    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context(Stage::EnumeratePhysicalDevices)?;

        for device in devices {
            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let found = find_queue_families(&queue_families, |index| {
                unsafe {
                    surface_loader.get_physical_device_surface_support(device, index, surface)
                }
                .context(Stage::EnumeratePhysicalDevices)
            })?;

            if let Some(families) = found {
                return Ok((device, families));
            }
        }

        Err(anyhow::Error::new(Stage::EnumeratePhysicalDevices))
            .context("No GPU exposes both a graphics queue and presentation to this surface")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: &QueueFamilies,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .context(Stage::CreateLogicalDevice)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context(Stage::DeviceIdle)
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        log::info!("Destroying graphics context...");

        // Cleanup in reverse order; the renderer has drained the device by now
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Instance-level objects created before the device exists. Dropping it
/// without `finish` releases whatever was created, newest first.
struct PartialContext {
    instance: Option<ash::Instance>,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(Surface, vk::SurfaceKHR)>,
}

impl PartialContext {
    #[allow(clippy::type_complexity)]
    fn finish(
        mut self,
    ) -> Result<(
        ash::Instance,
        Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
        (Surface, vk::SurfaceKHR),
    )> {
        let surface = self.surface.take().context(Stage::CreateSurface)?;
        let debug_utils = self.debug_utils.take();
        let instance = self.instance.take().context(Stage::CreateInstance)?;
        Ok((instance, debug_utils, surface))
    }
}

impl Drop for PartialContext {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
