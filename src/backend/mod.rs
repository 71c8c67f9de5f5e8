// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Lifetimes: every object holds an Arc to what it was created from, so
// teardown runs resources -> allocator -> device -> instance.

pub mod command;
pub mod descriptor;
pub mod device;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod mesh;
pub mod owned;
pub mod pipeline;
pub mod queues;
pub mod recorder;
pub mod registry;
pub mod selector;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use command::CommandInfrastructure;
pub use descriptor::{BindingResources, BindingSpec, BufferBinding, DescriptorBinder};
pub use device::VulkanDevice;
pub use frame::{AcquiredImage, FrameContext, FrameReport, FrameScheduler, FrameTimeline, PresentStatus};
pub use instance::VulkanInstance;
pub use memory::{AllocatedBuffer, AllocatedImage, MemoryAllocator};
pub use mesh::Mesh;
pub use owned::{Owned, Release};
pub use pipeline::{RasterPipeline, RasterPipelineDesc, Vertex};
pub use queues::QueueAssignment;
pub use recorder::{CommandSink, DepthTarget, DrawCall, FrameTarget};
pub use registry::{DrawableId, PipelineId, RenderRegistry};
pub use surface::VulkanSurface;
pub use swapchain::Swapchain;
pub use sync::FrameSyncSet;
