// Graphics pipeline creation
//
// Raster pipelines target dynamic rendering (no render pass objects).
// Viewport, scissor and cull mode are dynamic state set by the recorder.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::ffi::CStr;
use std::path::PathBuf;
use std::sync::Arc;

use super::device::VulkanDevice;
use super::registry::PipelineHandles;
use super::shader::ShaderModule;
use crate::error::{EngineError, EngineResult, VkResultExt};

const ENTRY_POINT: &CStr = c"main";

pub const DYNAMIC_STATES: [vk::DynamicState; 3] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::CULL_MODE,
];

/// Interleaved vertex: position, normal, color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        let attribute = |location: u32, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset as u32,
        };
        [
            attribute(0, std::mem::offset_of!(Vertex, position)),
            attribute(1, std::mem::offset_of!(Vertex, normal)),
            attribute(2, std::mem::offset_of!(Vertex, color)),
        ]
    }
}

/// Inputs for one raster pipeline.
#[derive(Debug, Clone)]
pub struct RasterPipelineDesc {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub set_layout: vk::DescriptorSetLayout,
    pub cull_mode: vk::CullModeFlags,
}

pub struct RasterPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub cull_mode: vk::CullModeFlags,
    device: Arc<VulkanDevice>,
}

impl RasterPipeline {
    pub fn new(device: Arc<VulkanDevice>, desc: &RasterPipelineDesc) -> EngineResult<Self> {
        let vert = ShaderModule::from_file(device.clone(), &desc.vertex_shader)?;
        let frag = ShaderModule::from_file(device.clone(), &desc.fragment_shader)?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert.module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag.module)
                .name(ENTRY_POINT)
                .build(),
        ];

        // Vertex input
        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Counts only; the rectangles are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_format.is_some())
            .depth_write_enable(desc.depth_format.is_some())
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

        let set_layouts = [desc.set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .op("vkCreatePipelineLayout")?;

        let color_formats = [desc.color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info)
            .build();

        let pipelines = unsafe {
            device.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, result)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(EngineError::Vulkan {
                    operation: "vkCreateGraphicsPipelines",
                    result,
                });
            }
        };

        log::info!(
            "Created raster pipeline ({:?} + {:?})",
            desc.vertex_shader,
            desc.fragment_shader
        );

        Ok(Self {
            pipeline,
            layout,
            cull_mode: desc.cull_mode,
            device,
        })
    }
}

impl PipelineHandles for RasterPipeline {
    fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    fn cull_mode(&self) -> vk::CullModeFlags {
        self.cull_mode
    }
}

impl Drop for RasterPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct() {
        let binding = Vertex::binding_description();
        assert_eq!(binding.stride, 36);

        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|attr| attr.offset)
            .collect();
        assert_eq!(offsets, vec![0, 12, 24]);
    }

    #[test]
    fn cull_mode_is_dynamic() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::CULL_MODE));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::SCISSOR));
    }
}
