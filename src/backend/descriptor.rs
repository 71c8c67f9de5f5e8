// Descriptor sets - per-frame resource binding tables
//
// One layout, one pool sized for N sets, one set per frame in flight.
// Resources for a binding are supplied as `[element][frame]`.

use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::device::VulkanDevice;
use crate::error::{EngineError, EngineResult, VkResultExt};

/// One binding slot of the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSpec {
    pub slot: u32,
    pub kind: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl BindingSpec {
    pub fn uniform(slot: u32, count: u32, stages: vk::ShaderStageFlags) -> Self {
        Self {
            slot,
            kind: vk::DescriptorType::UNIFORM_BUFFER,
            count,
            stages,
        }
    }

    fn is_buffer(&self) -> bool {
        matches!(
            self.kind,
            vk::DescriptorType::UNIFORM_BUFFER
                | vk::DescriptorType::STORAGE_BUFFER
                | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
                | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        )
    }
}

/// A buffer range bound to one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    pub buffer: vk::Buffer,
    pub range: vk::DeviceSize,
}

/// Buffers for one binding, indexed `[element][frame]`.
pub type BindingResources = Vec<Vec<BufferBinding>>;

/// Descriptor counts per kind, multiplied by `frames`.
pub fn pool_sizes(specs: &[BindingSpec], frames: u32) -> Vec<vk::DescriptorPoolSize> {
    let mut per_kind: BTreeMap<i32, u32> = BTreeMap::new();
    for spec in specs {
        *per_kind.entry(spec.kind.as_raw()).or_default() += spec.count * frames;
    }
    per_kind
        .into_iter()
        .map(|(kind, descriptor_count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(kind),
            descriptor_count,
        })
        .collect()
}

/// Buffer infos for `frame`, one `Vec` per spec.
///
/// A binding with count 1 reads `resources[0][frame]`; an array binding
/// reads `resources[element][frame]` for every element.
pub fn frame_buffer_infos(
    specs: &[BindingSpec],
    resources: &[BindingResources],
    frame: usize,
) -> EngineResult<Vec<Vec<vk::DescriptorBufferInfo>>> {
    if resources.len() != specs.len() {
        return Err(EngineError::Descriptor(format!(
            "{} binding(s) declared but {} resource list(s) supplied",
            specs.len(),
            resources.len()
        )));
    }

    specs
        .iter()
        .zip(resources)
        .map(|(spec, elements)| {
            (0..spec.count as usize)
                .map(|element| -> EngineResult<vk::DescriptorBufferInfo> {
                    let binding = elements
                        .get(element)
                        .and_then(|frames| frames.get(frame))
                        .ok_or_else(|| {
                            EngineError::Descriptor(format!(
                                "binding {} has no resource for element {} frame {}",
                                spec.slot, element, frame
                            ))
                        })?;
                    Ok(vk::DescriptorBufferInfo {
                        buffer: binding.buffer,
                        offset: 0,
                        range: binding.range,
                    })
                })
                .collect()
        })
        .collect()
}

pub struct DescriptorBinder {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    specs: Vec<BindingSpec>,
    device: Arc<VulkanDevice>,
}

impl DescriptorBinder {
    pub fn new(
        device: Arc<VulkanDevice>,
        specs: &[BindingSpec],
        frames_in_flight: usize,
    ) -> EngineResult<Self> {
        if let Some(spec) = specs.iter().find(|spec| !spec.is_buffer()) {
            return Err(EngineError::Descriptor(format!(
                "binding {} uses unsupported kind {:?}",
                spec.slot, spec.kind
            )));
        }

        let bindings: Vec<_> = specs
            .iter()
            .map(|spec| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(spec.slot)
                    .descriptor_type(spec.kind)
                    .descriptor_count(spec.count)
                    .stage_flags(spec.stages)
                    .build()
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe {
            device
                .device
                .create_descriptor_set_layout(&layout_info, None)
        }
        .op("vkCreateDescriptorSetLayout")?;

        let sizes = pool_sizes(specs, frames_in_flight as u32);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(frames_in_flight as u32)
            .pool_sizes(&sizes);
        let pool = match unsafe { device.device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(result) => {
                unsafe { device.device.destroy_descriptor_set_layout(layout, None) };
                return Err(EngineError::Vulkan {
                    operation: "vkCreateDescriptorPool",
                    result,
                });
            }
        };

        // Pool and layout are owned from here; Drop handles failures below
        let mut binder = Self {
            layout,
            pool,
            sets: Vec::new(),
            specs: specs.to_vec(),
            device,
        };

        let layouts = vec![layout; frames_in_flight];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        binder.sets = unsafe { binder.device.device.allocate_descriptor_sets(&alloc_info) }
            .op("vkAllocateDescriptorSets")?;

        log::debug!(
            "Created descriptor layout with {} binding(s), {} set(s)",
            specs.len(),
            frames_in_flight
        );

        Ok(binder)
    }

    pub fn set(&self, frame: usize) -> vk::DescriptorSet {
        self.sets[frame]
    }

    pub fn specs(&self) -> &[BindingSpec] {
        &self.specs
    }

    /// Point the set of `frame` at its buffers in a single update call.
    pub fn write_frame(&self, frame: usize, resources: &[BindingResources]) -> EngineResult<()> {
        let set = *self.sets.get(frame).ok_or_else(|| {
            EngineError::Descriptor(format!("no descriptor set for frame {frame}"))
        })?;

        let infos = frame_buffer_infos(&self.specs, resources, frame)?;
        let writes: Vec<_> = self
            .specs
            .iter()
            .zip(&infos)
            .map(|(spec, buffer_infos)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(spec.slot)
                    .dst_array_element(0)
                    .descriptor_type(spec.kind)
                    .buffer_info(buffer_infos)
                    .build()
            })
            .collect();

        unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
        Ok(())
    }
}

impl Drop for DescriptorBinder {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its sets
            self.device
                .device
                .destroy_descriptor_pool(self.pool, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
        log::debug!("Destroyed descriptor binder");
    }
}
