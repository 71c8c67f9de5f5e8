// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (see `selector`)
// - Queue family role resolution (see `queues`)
// - Logical device + queue creation with the renderer's feature set
// - Format support queries

use ash::vk;
use std::sync::Arc;

use super::instance::VulkanInstance;
use super::queues::QueueAssignment;
use super::selector::{self, DeviceCandidate, REQUIRED_DEVICE_EXTENSIONS};
use super::surface::VulkanSurface;
use crate::error::{EngineError, EngineResult, VkResultExt};

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Logical device plus the queues it was created with.
///
/// Holds its instance alive; everything created from the device holds an
/// `Arc<VulkanDevice>` in turn.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queues: QueueAssignment,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub name: String,

    pub instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    /// Select a GPU and create the logical device.
    ///
    /// Without a surface (offscreen use) the present role resolves to the
    /// graphics family.
    pub fn new(
        instance: Arc<VulkanInstance>,
        surface: Option<&VulkanSurface>,
    ) -> EngineResult<Arc<Self>> {
        // Step 1: Pick physical device
        let candidates = selector::enumerate_candidates(&instance.instance)?;
        let candidate = selector::select_device(candidates)?;

        // Step 2: Resolve queue roles
        let queues = Self::resolve_queues(&candidate, surface)?;
        log::info!(
            "Queue families: graphics={} present={} transfer={}",
            queues.graphics,
            queues.present,
            queues.transfer
        );

        // Step 3: Create logical device
        let device = Self::create_logical_device(&instance.instance, &candidate, &queues)?;

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(queues.graphics, 0),
                device.get_device_queue(queues.present, 0),
                device.get_device_queue(queues.transfer, 0),
            )
        };

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(candidate.handle)
        };
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device: candidate.handle,
            queues,
            graphics_queue,
            present_queue,
            transfer_queue,
            properties,
            name: candidate.name,
            instance,
        }))
    }

    fn resolve_queues(
        candidate: &DeviceCandidate,
        surface: Option<&VulkanSurface>,
    ) -> EngineResult<QueueAssignment> {
        match surface {
            Some(surface) => QueueAssignment::resolve(&candidate.queue_families, |index| {
                surface.supports_present(candidate.handle, index)
            }),
            None => QueueAssignment::resolve(&candidate.queue_families, |index| {
                Ok(candidate.queue_families[index as usize].contains(vk::QueueFlags::GRAPHICS))
            }),
        }
    }

    fn create_logical_device(
        instance: &ash::Instance,
        candidate: &DeviceCandidate,
        queues: &QueueAssignment,
    ) -> EngineResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queues
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        // Extended dynamic state is core in 1.3, so only the 1.2/1.3 structs are chained
        let base_features = vk::PhysicalDeviceFeatures::builder()
            .geometry_shader(true)
            .sample_rate_shading(true);
        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::builder()
            .buffer_device_address(true)
            .descriptor_binding_partially_bound(true)
            .scalar_block_layout(true)
            .shader_uniform_buffer_array_non_uniform_indexing(true);
        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::builder()
            .synchronization2(true)
            .dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&base_features)
            .push_next(&mut vulkan12)
            .push_next(&mut vulkan13);

        unsafe { instance.create_device(candidate.handle, &create_info, None) }
            .op("vkCreateDevice")
    }

    /// First format in `candidates` supporting `features` with `tiling`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> EngineResult<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let props = unsafe {
                    self.instance
                        .instance
                        .get_physical_device_format_properties(self.physical_device, format)
                };
                match tiling {
                    vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                    vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                    _ => false,
                }
            })
            .ok_or_else(|| {
                EngineError::UnsupportedFormat(format!("{candidates:?} with {features:?}"))
            })
    }

    pub fn find_depth_format(&self) -> EngineResult<vk::Format> {
        self.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    pub fn device_name(&self) -> &str {
        &self.name
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> EngineResult<()> {
        unsafe { self.device.device_wait_idle() }.op("vkDeviceWaitIdle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        if let Err(err) = self.wait_idle() {
            log::error!("{err}");
        }

        unsafe {
            self.device.destroy_device(None);
        }
    }
}
