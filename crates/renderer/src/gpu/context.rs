use std::cell::Cell;
use std::ffi::CStr;

use ash::khr::{surface, swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::GraphicsApiError;
use crate::types::{Extent, PresentModePreference};

/// Instance, device and surface shared by every GPU object.
///
/// Wrapped in an `Rc` by each owned handle; it is destroyed only after the
/// last handle referencing it has been dropped.
pub(crate) struct DeviceContext {
    _entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    pub command_pool: vk::CommandPool,
    pub present_mode: PresentModePreference,
    /// Window size used when the surface leaves the extent to the swapchain.
    pub window_extent: Cell<Extent>,
}

impl DeviceContext {
    pub(crate) fn new<T>(
        target: &T,
        initial_size: Extent,
        present_mode: PresentModePreference,
    ) -> Result<Self, GraphicsApiError>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let display_handle = target
            .display_handle()
            .map_err(|err| GraphicsApiError::Invalid(format!("failed to acquire display handle: {err}")))?
            .as_raw();
        let window_handle = target
            .window_handle()
            .map_err(|err| GraphicsApiError::Invalid(format!("failed to acquire window handle: {err}")))?
            .as_raw();

        let entry = unsafe { ash::Entry::load()? };
        let extensions = ash_window::enumerate_required_extensions(display_handle)
            .map_err(GraphicsApiError::vulkan("vkEnumerateInstanceExtensionProperties"))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"livesh")
            .engine_name(c"livesh")
            .api_version(vk::API_VERSION_1_0);
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(extensions);
        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateInstance"))?;

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(GraphicsApiError::vulkan("vkCreateSurfaceKHR"))?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        let (physical_device, queue_family) =
            pick_device(&instance, &surface_loader, surface)?;
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let priorities = [1.0_f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities);
        let device_extensions = [swapchain::NAME.as_ptr()];
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&device_extensions);
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateDevice"))?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(GraphicsApiError::vulkan("vkCreateCommandPool"))?;

        Ok(Self {
            _entry: entry,
            instance,
            surface_loader,
            surface,
            physical_device,
            memory_properties,
            device,
            queue,
            swapchain_loader,
            command_pool,
            present_mode,
            window_extent: Cell::new(initial_size),
        })
    }

    pub(crate) fn surface_capabilities(
        &self,
    ) -> Result<vk::SurfaceCapabilitiesKHR, GraphicsApiError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .map_err(GraphicsApiError::vulkan("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))
    }

    /// Extent the next swapchain should use, clamped to what the surface allows.
    pub(crate) fn surface_extent(&self) -> Result<Extent, GraphicsApiError> {
        let caps = self.surface_capabilities()?;
        Ok(resolve_extent(&caps, self.window_extent.get()))
    }

    pub(crate) fn choose_surface_format(&self) -> Result<vk::SurfaceFormatKHR, GraphicsApiError> {
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .map_err(GraphicsApiError::vulkan("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        let preferred = formats.iter().copied().find(|format| {
            matches!(
                format.format,
                vk::Format::B8G8R8A8_UNORM | vk::Format::R8G8B8A8_UNORM
            ) && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        });
        match preferred.or_else(|| formats.first().copied()) {
            Some(format) => {
                if preferred.is_none() {
                    tracing::warn!(
                        format = ?format.format,
                        "no UNORM surface format available; falling back"
                    );
                }
                Ok(format)
            }
            None => Err(GraphicsApiError::Unsupported("surface format")),
        }
    }

    pub(crate) fn choose_present_mode(&self) -> Result<vk::PresentModeKHR, GraphicsApiError> {
        let modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
        .map_err(GraphicsApiError::vulkan("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;
        let wanted = match self.present_mode {
            PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
            PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
        };
        let mode = if modes.contains(&wanted) {
            wanted
        } else {
            tracing::warn!(
                requested = ?wanted,
                "present mode not supported by the surface; using FIFO"
            );
            vk::PresentModeKHR::FIFO
        };
        Ok(mode)
    }

    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32, GraphicsApiError> {
        let props = &self.memory_properties;
        props.memory_types[..props.memory_type_count as usize]
            .iter()
            .enumerate()
            .find(|(index, memory_type)| {
                type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
            })
            .map(|(index, _)| index as u32)
            .ok_or(GraphicsApiError::Unsupported("memory type"))
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

fn resolve_extent(caps: &vk::SurfaceCapabilitiesKHR, window: Extent) -> Extent {
    if caps.current_extent.width != u32::MAX {
        return Extent::new(caps.current_extent.width, caps.current_extent.height);
    }
    if window.is_empty() {
        return window;
    }
    Extent::new(
        window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    )
}

fn pick_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32), GraphicsApiError> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(GraphicsApiError::vulkan("vkEnumeratePhysicalDevices"))?;

    let mut best: Option<(vk::PhysicalDevice, u32, bool)> = None;
    for device in devices {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let family = families.iter().enumerate().find_map(|(index, family)| {
            let index = index as u32;
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
            }
            .unwrap_or(false);
            (graphics && present).then_some(index)
        });
        let Some(family) = family else { continue };

        let properties = unsafe { instance.get_physical_device_properties(device) };
        let discrete = properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
        let name = properties
            .device_name_as_c_str()
            .map(CStr::to_string_lossy)
            .unwrap_or_default();
        tracing::debug!(%name, device_type = ?properties.device_type, family, "candidate GPU");
        if best.map_or(true, |(_, _, best_discrete)| discrete && !best_discrete) {
            best = Some((device, family, discrete));
        }
    }

    let (device, family, _) = best.ok_or(GraphicsApiError::Unsupported("GPU"))?;
    let properties = unsafe { instance.get_physical_device_properties(device) };
    tracing::info!(
        name = %properties
            .device_name_as_c_str()
            .map(CStr::to_string_lossy)
            .unwrap_or_default(),
        "selected GPU"
    );
    Ok((device, family))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_surface_extent_wins() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        assert_eq!(
            resolve_extent(&caps, Extent::new(1024, 768)),
            Extent::new(800, 600)
        );
    }

    #[test]
    fn undefined_surface_extent_uses_clamped_window_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        };
        assert_eq!(
            resolve_extent(&caps, Extent::new(5000, 300)),
            Extent::new(4096, 300)
        );
        assert!(resolve_extent(&caps, Extent::new(0, 300)).is_empty());
    }
}
