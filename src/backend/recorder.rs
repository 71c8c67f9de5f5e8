// Per-frame command recording
//
// `record_frame` is the only place that knows the order of commands in a
// frame. It writes through `CommandSink`, which is a real command buffer in
// the renderer and a plain log in tests.

use ash::vk;

use crate::error::{EngineError, EngineResult, VkResultExt};

/// One layout transition of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl ImageTransition {
    pub fn color_to_attachment(image: vk::Image) -> Self {
        Self {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags2::NONE,
            dst_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            dst_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        }
    }

    pub fn depth_to_attachment(depth: &DepthTarget) -> Self {
        Self {
            image: depth.image,
            aspect: depth_aspect(depth.format),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: depth_attachment_layout(depth.format),
            src_stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            src_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_stage: vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            dst_access: vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        }
    }

    pub fn color_to_present(image: vk::Image) -> Self {
        Self {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            src_stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            dst_stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            dst_access: vk::AccessFlags2::NONE,
        }
    }
}

/// Formats carrying a stencil aspect next to depth.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Aspects a depth image of `format` is viewed and transitioned with.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil_component(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Combined formats use the depth/stencil layout; depth-only layouts would
/// need separateDepthStencilLayouts.
pub fn depth_attachment_layout(format: vk::Format) -> vk::ImageLayout {
    if has_stencil_component(format) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

/// Image the frame renders into, plus the optional depth attachment.
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub depth: Option<DepthTarget>,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// Everything needed to issue one batched, instanced draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub cull_mode: vk::CullModeFlags,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub instance_count: u32,
}

pub trait CommandSink {
    fn begin(&mut self) -> EngineResult<()>;
    fn end(&mut self) -> EngineResult<()>;
    fn image_barrier(&mut self, transition: &ImageTransition);
    fn begin_rendering(&mut self, target: &FrameTarget);
    fn end_rendering(&mut self);
    fn set_viewport(&mut self, extent: vk::Extent2D);
    fn set_scissor(&mut self, extent: vk::Extent2D);
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags);
    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet);
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32);
}

/// Record a whole frame into `sink`.
///
/// Only reads already-updated per-frame data; no engine state is touched.
pub fn record_frame<S: CommandSink + ?Sized>(
    sink: &mut S,
    target: &FrameTarget,
    descriptor_set: vk::DescriptorSet,
    draws: &[DrawCall],
) -> EngineResult<()> {
    if draws.is_empty() {
        return Err(EngineError::NoPipelines);
    }

    sink.begin()?;

    sink.image_barrier(&ImageTransition::color_to_attachment(target.image));
    if let Some(depth) = &target.depth {
        sink.image_barrier(&ImageTransition::depth_to_attachment(depth));
    }

    sink.begin_rendering(target);
    sink.set_viewport(target.extent);
    sink.set_scissor(target.extent);

    for draw in draws {
        sink.bind_pipeline(draw.pipeline);
        sink.set_cull_mode(draw.cull_mode);
        sink.bind_descriptor_set(draw.layout, descriptor_set);
        sink.bind_vertex_buffer(draw.vertex_buffer);
        sink.bind_index_buffer(draw.index_buffer);
        sink.draw_indexed(draw.index_count, draw.instance_count);
    }

    sink.end_rendering();
    sink.image_barrier(&ImageTransition::color_to_present(target.image));

    sink.end()
}

/// `CommandSink` writing into a Vulkan command buffer.
pub struct VulkanCommandSink<'a> {
    pub device: &'a ash::Device,
    pub cmd: vk::CommandBuffer,
}

impl CommandSink for VulkanCommandSink<'_> {
    fn begin(&mut self) -> EngineResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { self.device.begin_command_buffer(self.cmd, &begin_info) }
            .op("vkBeginCommandBuffer")
    }

    fn end(&mut self) -> EngineResult<()> {
        unsafe { self.device.end_command_buffer(self.cmd) }.op("vkEndCommandBuffer")
    }

    fn image_barrier(&mut self, t: &ImageTransition) {
        let barrier = vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(t.src_stage)
            .src_access_mask(t.src_access)
            .dst_stage_mask(t.dst_stage)
            .dst_access_mask(t.dst_access)
            .old_layout(t.old_layout)
            .new_layout(t.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(t.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: t.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();
        let dependency =
            vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(self.cmd, &dependency) };
    }

    fn begin_rendering(&mut self, target: &FrameTarget) {
        let color_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(target.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: target.clear_color,
                },
            })
            .build();

        let depth_attachment = target.depth.map(|depth| {
            vk::RenderingAttachmentInfo::builder()
                .image_view(depth.view)
                .image_layout(depth_attachment_layout(depth.format))
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                })
                .build()
        });

        let mut rendering_info = vk::RenderingInfo::builder()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: target.extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe { self.device.cmd_begin_rendering(self.cmd, &rendering_info) };
    }

    fn end_rendering(&mut self) {
        unsafe { self.device.cmd_end_rendering(self.cmd) };
    }

    fn set_viewport(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe { self.device.cmd_set_viewport(self.cmd, 0, &[viewport]) };
    }

    fn set_scissor(&mut self, extent: vk::Extent2D) {
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe { self.device.cmd_set_scissor(self.cmd, 0, &[scissor]) };
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags) {
        unsafe { self.device.cmd_set_cull_mode(self.cmd, cull_mode) };
    }

    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            )
        };
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, 0, &[buffer], &[0])
        };
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.cmd, buffer, 0, vk::IndexType::UINT32)
        };
    }

    fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(self.cmd, index_count, instance_count, 0, 0, 0)
        };
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Recorded {
        Begin,
        End,
        Barrier(vk::ImageLayout, vk::ImageLayout, vk::ImageAspectFlags),
        BeginRendering { depth: bool, clear: [u32; 4] },
        EndRendering,
        Viewport(vk::Extent2D),
        Scissor(vk::Extent2D),
        Pipeline(u64),
        CullMode(vk::CullModeFlags),
        DescriptorSet(u64),
        VertexBuffer(u64),
        IndexBuffer(u64),
        DrawIndexed(u32, u32),
    }

    #[derive(Default)]
    pub(crate) struct LogSink(pub Vec<Recorded>);

    impl CommandSink for LogSink {
        fn begin(&mut self) -> EngineResult<()> {
            self.0.push(Recorded::Begin);
            Ok(())
        }
        fn end(&mut self) -> EngineResult<()> {
            self.0.push(Recorded::End);
            Ok(())
        }
        fn image_barrier(&mut self, t: &ImageTransition) {
            self.0
                .push(Recorded::Barrier(t.old_layout, t.new_layout, t.aspect));
        }
        fn begin_rendering(&mut self, target: &FrameTarget) {
            self.0.push(Recorded::BeginRendering {
                depth: target.depth.is_some(),
                clear: target.clear_color.map(f32::to_bits),
            });
        }
        fn end_rendering(&mut self) {
            self.0.push(Recorded::EndRendering);
        }
        fn set_viewport(&mut self, extent: vk::Extent2D) {
            self.0.push(Recorded::Viewport(extent));
        }
        fn set_scissor(&mut self, extent: vk::Extent2D) {
            self.0.push(Recorded::Scissor(extent));
        }
        fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
            self.0.push(Recorded::Pipeline(pipeline.as_raw()));
        }
        fn set_cull_mode(&mut self, cull_mode: vk::CullModeFlags) {
            self.0.push(Recorded::CullMode(cull_mode));
        }
        fn bind_descriptor_set(&mut self, _layout: vk::PipelineLayout, set: vk::DescriptorSet) {
            self.0.push(Recorded::DescriptorSet(set.as_raw()));
        }
        fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
            self.0.push(Recorded::VertexBuffer(buffer.as_raw()));
        }
        fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
            self.0.push(Recorded::IndexBuffer(buffer.as_raw()));
        }
        fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
            self.0.push(Recorded::DrawIndexed(index_count, instance_count));
        }
    }

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 480,
    };

    fn target(depth: bool) -> FrameTarget {
        FrameTarget {
            image: vk::Image::from_raw(1),
            view: vk::ImageView::from_raw(2),
            depth: depth.then(|| DepthTarget {
                image: vk::Image::from_raw(3),
                view: vk::ImageView::from_raw(4),
                format: vk::Format::D32_SFLOAT,
            }),
            extent: EXTENT,
            clear_color: [0.1, 0.2, 0.3, 1.0],
        }
    }

    fn draw(pipeline: u64, instances: u32) -> DrawCall {
        DrawCall {
            pipeline: vk::Pipeline::from_raw(pipeline),
            layout: vk::PipelineLayout::from_raw(50),
            cull_mode: vk::CullModeFlags::BACK,
            vertex_buffer: vk::Buffer::from_raw(pipeline * 10),
            index_buffer: vk::Buffer::from_raw(pipeline * 10 + 1),
            index_count: 36,
            instance_count: instances,
        }
    }

    #[test]
    fn records_full_frame_in_order() {
        let mut sink = LogSink::default();
        let set = vk::DescriptorSet::from_raw(99);

        record_frame(&mut sink, &target(true), set, &[draw(7, 4), draw(8, 1)]).unwrap();

        use Recorded::*;
        let clear = [0.1f32, 0.2, 0.3, 1.0].map(f32::to_bits);
        assert_eq!(
            sink.0,
            vec![
                Begin,
                Barrier(
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageAspectFlags::COLOR
                ),
                Barrier(
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
                    vk::ImageAspectFlags::DEPTH
                ),
                BeginRendering { depth: true, clear },
                Viewport(EXTENT),
                Scissor(EXTENT),
                Pipeline(7),
                CullMode(vk::CullModeFlags::BACK),
                DescriptorSet(99),
                VertexBuffer(70),
                IndexBuffer(71),
                DrawIndexed(36, 4),
                Pipeline(8),
                CullMode(vk::CullModeFlags::BACK),
                DescriptorSet(99),
                VertexBuffer(80),
                IndexBuffer(81),
                DrawIndexed(36, 1),
                EndRendering,
                Barrier(
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::ImageAspectFlags::COLOR
                ),
                End,
            ]
        );
    }

    #[test]
    fn no_depth_barrier_without_depth_target() {
        let mut sink = LogSink::default();
        record_frame(
            &mut sink,
            &target(false),
            vk::DescriptorSet::from_raw(1),
            &[draw(1, 1)],
        )
        .unwrap();

        let barriers = sink
            .0
            .iter()
            .filter(|cmd| matches!(cmd, Recorded::Barrier(..)))
            .count();
        assert_eq!(barriers, 2);
    }

    #[test]
    fn stencil_depth_format_uses_combined_layout_and_aspects() {
        let mut frame_target = target(true);
        if let Some(depth) = frame_target.depth.as_mut() {
            depth.format = vk::Format::D24_UNORM_S8_UINT;
        }

        let mut sink = LogSink::default();
        record_frame(
            &mut sink,
            &frame_target,
            vk::DescriptorSet::from_raw(1),
            &[draw(1, 1)],
        )
        .unwrap();

        assert_eq!(
            sink.0[2],
            Recorded::Barrier(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            )
        );
    }

    #[test]
    fn depth_helpers_follow_stencil_component() {
        assert!(has_stencil_component(vk::Format::D32_SFLOAT_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            depth_attachment_layout(vk::Format::D32_SFLOAT),
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            depth_attachment_layout(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn zero_draws_is_an_error_and_records_nothing() {
        let mut sink = LogSink::default();
        let result = record_frame(&mut sink, &target(true), vk::DescriptorSet::null(), &[]);
        assert!(matches!(result, Err(EngineError::NoPipelines)));
        assert!(sink.0.is_empty());
    }
}
