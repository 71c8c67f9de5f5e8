// Engine error taxonomy
//
// Every failure in the core is fatal and bubbles up to the run loop.
// Transient per-frame conditions (suboptimal acquire/present) are NOT errors,
// they come back as status values from the frame protocol.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to load Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("{operation} failed: {result} ({})", .result.as_raw())]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("Required layer not supported: {0}")]
    MissingLayer(String),

    #[error("Required extension not supported: {0}")]
    MissingExtension(String),

    #[error("No supported format among {0}")]
    UnsupportedFormat(String),

    #[error("No suitable GPU found ({candidates} candidate(s) checked)")]
    NoSuitableDevice { candidates: usize },

    #[error("Queue family roles incomplete: {0}")]
    IncompleteQueueFamilies(String),

    #[error("Swapchain error: {0}")]
    Swapchain(String),

    #[error("{operation} failed for '{name}': {reason} ({code})")]
    Allocation {
        operation: &'static str,
        name: String,
        code: i32,
        reason: String,
    },

    #[error("Failed to read shader file {path:?}: {source}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Descriptor error: {0}")]
    Descriptor(String),

    #[error("Render registry error: {0}")]
    Registry(String),

    #[error("There are no raster pipelines that can be used")]
    NoPipelines,

    #[error("Invalid frame configuration: {0}")]
    FrameConfig(String),

    #[error("Surface error: {0}")]
    Surface(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Attach the failing operation name to a raw `vk::Result`.
pub(crate) trait VkResultExt<T> {
    fn op(self, operation: &'static str) -> EngineResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn op(self, operation: &'static str) -> EngineResult<T> {
        self.map_err(|result| EngineError::Vulkan { operation, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_error_names_operation_and_code() {
        let err: EngineResult<()> =
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).op("vkCreateBuffer");
        let message = err.unwrap_err().to_string();
        assert!(message.starts_with("vkCreateBuffer failed"));
        assert!(message.contains("(-2)"));
    }

    #[test]
    fn allocation_error_carries_numeric_code() {
        let err = EngineError::Allocation {
            operation: "create_buffer",
            name: "vertex buffer".into(),
            code: -2,
            reason: "out of device memory".into(),
        };
        assert_eq!(
            err.to_string(),
            "create_buffer failed for 'vertex buffer': out of device memory (-2)"
        );
    }
}
