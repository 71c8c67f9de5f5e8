// Physical device selection
//
// Candidates are queried once into plain data; scoring and selection never
// touch the driver again.

use ash::vk;
use std::ffi::CStr;

use crate::error::{EngineError, EngineResult, VkResultExt};

pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 4] = [
    c"VK_KHR_swapchain",
    c"VK_KHR_spirv_1_4",
    c"VK_KHR_synchronization2",
    c"VK_KHR_create_renderpass2",
];

/// Core 1.0 features the renderer enables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseFeatures {
    pub geometry_shader: bool,
    pub sample_rate_shading: bool,
}

/// Features from the 1.2/1.3 feature structs and extended dynamic state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvancedFeatures {
    pub extended_dynamic_state: bool,
    pub buffer_device_address: bool,
    pub descriptor_binding_partially_bound: bool,
    pub scalar_block_layout: bool,
    /// Per-instance indexing into the object uniform array
    pub uniform_buffer_array_non_uniform_indexing: bool,
    pub synchronization2: bool,
    pub dynamic_rendering: bool,
}

#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub api_version: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub base: BaseFeatures,
    pub advanced: AdvancedFeatures,
    pub extensions: Vec<String>,
    pub queue_families: Vec<vk::QueueFlags>,
}

impl DeviceCandidate {
    /// Snapshot everything scoring needs from the driver.
    pub fn query(instance: &ash::Instance, handle: vk::PhysicalDevice) -> EngineResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut dynamic_state = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut vulkan12)
            .push_next(&mut vulkan13)
            .push_next(&mut dynamic_state);
        unsafe { instance.get_physical_device_features2(handle, &mut features2) };
        let core = features2.features;

        let base = BaseFeatures {
            geometry_shader: core.geometry_shader == vk::TRUE,
            sample_rate_shading: core.sample_rate_shading == vk::TRUE,
        };
        let advanced = AdvancedFeatures {
            extended_dynamic_state: dynamic_state.extended_dynamic_state == vk::TRUE,
            buffer_device_address: vulkan12.buffer_device_address == vk::TRUE,
            descriptor_binding_partially_bound: vulkan12.descriptor_binding_partially_bound
                == vk::TRUE,
            scalar_block_layout: vulkan12.scalar_block_layout == vk::TRUE,
            uniform_buffer_array_non_uniform_indexing: vulkan12
                .shader_uniform_buffer_array_non_uniform_indexing
                == vk::TRUE,
            synchronization2: vulkan13.synchronization2 == vk::TRUE,
            dynamic_rendering: vulkan13.dynamic_rendering == vk::TRUE,
        };

        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .op("vkEnumerateDeviceExtensionProperties")?
            .iter()
            .map(|ext| {
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) }
                .iter()
                .map(|family| family.queue_flags)
                .collect();

        Ok(Self {
            handle,
            name,
            api_version: properties.api_version,
            device_type: properties.device_type,
            base,
            advanced,
            extensions,
            queue_families,
        })
    }

    /// First requirement this device fails, if any.
    pub fn unmet_requirement(&self) -> Option<String> {
        if self.api_version < MIN_API_VERSION {
            return Some(format!(
                "API version {}.{} < 1.3",
                vk::api_version_major(self.api_version),
                vk::api_version_minor(self.api_version)
            ));
        }
        if !self.base.geometry_shader {
            return Some("geometryShader".into());
        }
        if !self.base.sample_rate_shading {
            return Some("sampleRateShading".into());
        }
        if !self
            .queue_families
            .iter()
            .any(|flags| flags.contains(vk::QueueFlags::GRAPHICS))
        {
            return Some("graphics queue family".into());
        }
        for required in REQUIRED_DEVICE_EXTENSIONS {
            let required = required.to_string_lossy();
            if !self.extensions.iter().any(|ext| *ext == required) {
                return Some(required.into_owned());
            }
        }

        let advanced = &self.advanced;
        let checks = [
            (advanced.extended_dynamic_state, "extendedDynamicState"),
            (advanced.buffer_device_address, "bufferDeviceAddress"),
            (
                advanced.descriptor_binding_partially_bound,
                "descriptorBindingPartiallyBound",
            ),
            (advanced.scalar_block_layout, "scalarBlockLayout"),
            (
                advanced.uniform_buffer_array_non_uniform_indexing,
                "shaderUniformBufferArrayNonUniformIndexing",
            ),
            (advanced.synchronization2, "synchronization2"),
            (advanced.dynamic_rendering, "dynamicRendering"),
        ];
        checks
            .iter()
            .find(|(supported, _)| !supported)
            .map(|(_, name)| (*name).to_string())
    }

    /// 0 = unusable, 1 = usable, 2 = usable discrete GPU.
    pub fn score(&self) -> u32 {
        if self.unmet_requirement().is_some() {
            return 0;
        }
        match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 2,
            _ => 1,
        }
    }
}

/// Pick the highest scoring candidate. Ties keep the earlier one.
pub fn select_device(candidates: Vec<DeviceCandidate>) -> EngineResult<DeviceCandidate> {
    let checked = candidates.len();
    let mut best: Option<(u32, DeviceCandidate)> = None;

    for candidate in candidates {
        let score = candidate.score();
        match candidate.unmet_requirement() {
            Some(missing) => log::debug!("GPU {} rejected: missing {}", candidate.name, missing),
            None => log::debug!("GPU {} scored {}", candidate.name, score),
        }
        if score > best.as_ref().map_or(0, |(best_score, _)| *best_score) {
            best = Some((score, candidate));
        }
    }

    match best {
        Some((_, candidate)) => {
            log::info!("Selected GPU: {}", candidate.name);
            Ok(candidate)
        }
        None => Err(EngineError::NoSuitableDevice {
            candidates: checked,
        }),
    }
}

/// Enumerate and query every physical device the instance exposes.
pub fn enumerate_candidates(instance: &ash::Instance) -> EngineResult<Vec<DeviceCandidate>> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.op("vkEnumeratePhysicalDevices")?;
    devices
        .into_iter()
        .map(|device| DeviceCandidate::query(instance, device))
        .collect()
}
