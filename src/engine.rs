// =============================================================================
// ENGINE - ties the backend together and drives frames
// =============================================================================
//
// INIT ORDER:
//   Instance -> Surface -> Device -> Allocator -> Swapchain -> Depth image
//   -> Command infrastructure -> Strategy resources -> Sync objects
//
// FRAME FLOW (FrameScheduler::run_frame):
//   wait fence -> acquire -> reset -> update + record -> submit -> present
//
// Fields are declared so that Rust's drop order (top to bottom) tears down
// the strategy first and the instance last.

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::frame::validate_frame_counts;
use crate::backend::recorder::{depth_aspect, record_frame, VulkanCommandSink};
use crate::backend::sync::VulkanFrameTimeline;
use crate::backend::{
    surface, AllocatedImage, CommandInfrastructure, CommandSink, DepthTarget, DrawCall, FrameReport,
    FrameScheduler, FrameSyncSet, FrameTarget, MemoryAllocator, Swapchain, VulkanDevice,
    VulkanInstance, VulkanSurface,
};
use crate::error::EngineResult;
use crate::window::KeyStates;

/// Startup settings the engine needs, independent of how they were loaded.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub app_name: String,
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub depth: bool,
    pub validation: bool,
}

impl EngineSettings {
    /// Checks that need no device. The swapchain image count is checked
    /// against `frames_in_flight` once the swapchain exists.
    pub fn validate(&self) -> EngineResult<()> {
        validate_frame_counts(self.frames_in_flight, self.frames_in_flight)
    }
}

/// What a strategy gets to build its GPU resources with.
pub struct ResourceContext<'a> {
    pub device: &'a Arc<VulkanDevice>,
    pub allocator: &'a Arc<MemoryAllocator>,
    pub commands: &'a CommandInfrastructure,
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub extent: vk::Extent2D,
    pub frames_in_flight: usize,
}

/// The application side of the frame loop.
///
/// `update_frame` and `record_commands` run after the frame's fence has
/// signaled, so everything indexed by `frame` is safe to touch.
pub trait RenderStrategy {
    /// Build pipelines, drawables, buffers and descriptor sets. Called once.
    fn create_resources(&mut self, ctx: &ResourceContext<'_>) -> EngineResult<()>;

    /// Write per-frame data (uniform buffers) for `frame`.
    fn update_frame(&mut self, frame: usize, dt: Duration) -> EngineResult<()>;

    /// Batched draws for this frame.
    fn draw_calls(&self) -> Vec<DrawCall>;

    /// Descriptor set bound for every draw of `frame`.
    fn descriptor_set(&self, frame: usize) -> vk::DescriptorSet;

    fn record_commands(
        &self,
        sink: &mut dyn CommandSink,
        target: &FrameTarget,
        frame: usize,
    ) -> EngineResult<()> {
        record_frame(sink, target, self.descriptor_set(frame), &self.draw_calls())
    }

    /// Consume this frame's key events.
    fn process_input(&mut self, keys: &mut KeyStates);
}

pub struct Engine<S: RenderStrategy> {
    strategy: S,
    scheduler: FrameScheduler,
    sync: FrameSyncSet,
    commands: CommandInfrastructure,
    depth: Option<AllocatedImage>,
    swapchain: Swapchain,
    allocator: Arc<MemoryAllocator>,
    device: Arc<VulkanDevice>,
    _surface: Arc<VulkanSurface>,
    _instance: Arc<VulkanInstance>,

    clear_color: [f32; 4],
    last_frame: Instant,
}

impl<S: RenderStrategy> Engine<S> {
    /// Bring up Vulkan for `window` and let `strategy` build its resources.
    ///
    /// `drawable` is the window's framebuffer size in pixels.
    pub fn new<W>(
        window: &W,
        drawable: (u32, u32),
        settings: &EngineSettings,
        mut strategy: S,
    ) -> EngineResult<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        settings.validate()?;
        log::info!("Initializing engine '{}'", settings.app_name);

        let display = window.raw_display_handle();
        let extensions = surface::required_extensions(display)?;
        let instance = VulkanInstance::new(&settings.app_name, &extensions, settings.validation)?;

        let surface = Arc::new(VulkanSurface::new(
            instance.clone(),
            display,
            window.raw_window_handle(),
        )?);

        let device = VulkanDevice::new(instance.clone(), Some(&surface))?;
        let allocator = MemoryAllocator::new(device.clone())?;
        let swapchain = Swapchain::new(device.clone(), surface.clone(), drawable)?;

        let depth = if settings.depth {
            let format = device.find_depth_format()?;
            Some(allocator.create_image(
                swapchain.extent,
                format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                depth_aspect(format),
                "depth",
            )?)
        } else {
            None
        };

        let commands = CommandInfrastructure::new(device.clone(), settings.frames_in_flight)?;

        strategy.create_resources(&ResourceContext {
            device: &device,
            allocator: &allocator,
            commands: &commands,
            color_format: swapchain.format,
            depth_format: depth.as_ref().map(|image| image.format()),
            extent: swapchain.extent,
            frames_in_flight: settings.frames_in_flight,
        })?;

        let image_count = swapchain.image_count();
        let sync = FrameSyncSet::new(device.clone(), settings.frames_in_flight, image_count)?;
        let scheduler = FrameScheduler::new(settings.frames_in_flight, image_count)?;

        log::info!(
            "Engine ready: {} frame(s) in flight, {} swapchain image(s)",
            settings.frames_in_flight,
            image_count
        );

        Ok(Self {
            strategy,
            scheduler,
            sync,
            commands,
            depth,
            swapchain,
            allocator,
            device,
            _surface: surface,
            _instance: instance,
            clear_color: settings.clear_color,
            last_frame: Instant::now(),
        })
    }

    /// Run one frame of the acquire/record/submit/present protocol.
    pub fn draw_frame(&mut self, keys: &mut KeyStates) -> EngineResult<FrameReport> {
        self.strategy.process_input(keys);
        keys.end_frame();

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame);
        self.last_frame = now;

        let mut timeline = VulkanFrameTimeline {
            device: &self.device,
            sync: &self.sync,
            swapchain: &self.swapchain,
            commands: &self.commands,
        };

        let strategy = &mut self.strategy;
        let swapchain = &self.swapchain;
        let commands = &self.commands;
        let device = &self.device;
        let depth = self.depth.as_ref();
        let clear_color = self.clear_color;

        self.scheduler.run_frame(&mut timeline, |ctx| {
            strategy.update_frame(ctx.frame, dt)?;

            let image = ctx.image_index as usize;
            let target = FrameTarget {
                image: swapchain.images[image],
                view: swapchain.image_views[image].handle(),
                depth: depth.map(|d| DepthTarget {
                    image: d.handle(),
                    view: d.view(),
                    format: d.format(),
                }),
                extent: swapchain.extent,
                clear_color,
            };
            let mut sink = VulkanCommandSink {
                device: &device.device,
                cmd: commands.frame_buffer(ctx.frame),
            };
            strategy.record_commands(&mut sink, &target, ctx.frame)
        })
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn allocator(&self) -> &Arc<MemoryAllocator> {
        &self.allocator
    }

    pub fn frames_run(&self) -> u64 {
        self.scheduler.frames_run()
    }

    /// Block until the GPU has finished everything submitted so far.
    pub fn wait_idle(&self) -> EngineResult<()> {
        self.device.wait_idle()
    }
}

impl<S: RenderStrategy> Drop for Engine<S> {
    fn drop(&mut self) {
        log::info!("Shutting down engine after {} frame(s)", self.frames_run());
        // Nothing below may be destroyed while the GPU still uses it
        if let Err(err) = self.device.wait_idle() {
            log::error!("{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

    /// Window whose handles must never be asked for.
    struct UntouchedWindow;

    unsafe impl HasRawWindowHandle for UntouchedWindow {
        fn raw_window_handle(&self) -> RawWindowHandle {
            panic!("window handle requested");
        }
    }

    unsafe impl HasRawDisplayHandle for UntouchedWindow {
        fn raw_display_handle(&self) -> RawDisplayHandle {
            panic!("display handle requested");
        }
    }

    struct UntouchedStrategy;

    impl RenderStrategy for UntouchedStrategy {
        fn create_resources(&mut self, _ctx: &ResourceContext<'_>) -> EngineResult<()> {
            panic!("resources created");
        }
        fn update_frame(&mut self, _frame: usize, _dt: Duration) -> EngineResult<()> {
            Ok(())
        }
        fn draw_calls(&self) -> Vec<DrawCall> {
            Vec::new()
        }
        fn descriptor_set(&self, _frame: usize) -> vk::DescriptorSet {
            vk::DescriptorSet::null()
        }
        fn process_input(&mut self, _keys: &mut KeyStates) {}
    }

    fn settings(frames_in_flight: usize) -> EngineSettings {
        EngineSettings {
            app_name: "engine-test".into(),
            frames_in_flight,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth: true,
            validation: false,
        }
    }

    #[test]
    fn zero_frames_in_flight_fails_before_any_vulkan_call() {
        let result = Engine::new(&UntouchedWindow, (640, 480), &settings(0), UntouchedStrategy);
        assert!(matches!(result, Err(EngineError::FrameConfig(_))));
    }

    #[test]
    fn settings_validation() {
        assert!(matches!(
            settings(0).validate(),
            Err(EngineError::FrameConfig(_))
        ));
        assert!(settings(1).validate().is_ok());
        assert!(settings(3).validate().is_ok());
    }
}
