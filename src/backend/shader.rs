// Shader module loading
//
// Shaders are consumed as pre-compiled SPIR-V files read at runtime. A
// missing or malformed file is fatal.

use ash::vk;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::device::VulkanDevice;
use crate::error::{EngineError, EngineResult, VkResultExt};

/// Read a SPIR-V binary into 4-byte words.
pub fn read_spirv(path: &Path) -> EngineResult<Vec<u32>> {
    let shader_read = |source| EngineError::ShaderRead {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(shader_read)?;
    ash::util::read_spv(&mut file).map_err(shader_read)
}

/// Shader module that lives as long as pipeline creation needs it.
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    pub fn from_file(device: Arc<VulkanDevice>, path: &Path) -> EngineResult<Self> {
        let code = read_spirv(path)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .op("vkCreateShaderModule")?;

        log::debug!("Loaded shader {:?} ({} words)", path, code.len());

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn reads_spirv_words() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let words = [SPIRV_MAGIC, 0x0001_0300, 0, 1, 0];
        for word in words {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();

        assert_eq!(read_spirv(file.path()).unwrap(), words);
    }

    #[test]
    fn missing_file_is_a_shader_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.vert.spv");

        match read_spirv(&path) {
            Err(EngineError::ShaderRead { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected ShaderRead, got {other:?}"),
        }
    }

    #[test]
    fn truncated_binary_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&SPIRV_MAGIC.to_le_bytes()[..3]).unwrap();
        file.flush().unwrap();

        assert!(matches!(
            read_spirv(file.path()),
            Err(EngineError::ShaderRead { .. })
        ));
    }
}
