// Presentation surface
//
// Created from raw window/display handles so the backend never depends on a
// concrete windowing crate.

use ash::extensions::khr::Surface;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

use super::instance::VulkanInstance;
use crate::error::{EngineError, EngineResult, VkResultExt};

pub struct VulkanSurface {
    pub loader: Surface,
    pub surface: vk::SurfaceKHR,
    _instance: Arc<VulkanInstance>,
}

/// Instance extensions needed to present to `display`.
pub fn required_extensions(display: RawDisplayHandle) -> EngineResult<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|result| EngineError::Surface(format!("unsupported display: {result}")))?;
    Ok(extensions.to_vec())
}

impl VulkanSurface {
    pub fn new(
        instance: Arc<VulkanInstance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> EngineResult<Self> {
        let surface = unsafe {
            ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        }
        .op("vkCreateSurfaceKHR")?;
        let loader = Surface::new(&instance.entry, &instance.instance);

        log::debug!("Created presentation surface");

        Ok(Self {
            loader,
            surface,
            _instance: instance,
        })
    }

    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        family_index: u32,
    ) -> EngineResult<bool> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                family_index,
                self.surface,
            )
        }
        .op("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    /// Capabilities, formats and present modes for `physical_device`.
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> EngineResult<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        log::debug!("Destroying presentation surface");
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}

#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}
