// vk-frame-engine: Vulkan device, memory, swapchain and frame-execution layer
//
// backend/  - ash wrappers (instance, device, memory, swapchain, sync, ...)
// engine    - RenderStrategy trait and the frame loop driving it
// scene     - demo strategy (instanced rotating cubes)
// window    - winit window creation and key state tracking
// config    - config.toml + command line settings

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod scene;
pub mod window;

pub use engine::{Engine, EngineSettings, RenderStrategy, ResourceContext};
pub use error::{EngineError, EngineResult};
