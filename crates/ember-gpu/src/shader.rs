//! Shader binary loading.

use crate::error::{GpuError, Result};
use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Validated SPIR-V words, cheap to clone into pipeline configs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpirV(Arc<[u32]>);

impl SpirV {
    /// Parse a SPIR-V blob, checking size and magic number.
    pub fn from_bytes(bytes: &[u8]) -> std::io::Result<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
        Ok(Self(words.into()))
    }

    /// The instruction words.
    pub fn words(&self) -> &[u32] {
        &self.0
    }
}

/// Read a compiled shader from disk.
///
/// Unreadable or malformed files are reported as [`GpuError::ShaderLoad`].
pub fn load_spirv(path: impl AsRef<Path>) -> Result<SpirV> {
    let path = path.as_ref();
    let to_error = |source| GpuError::ShaderLoad {
        path: PathBuf::from(path),
        source,
    };
    let bytes = std::fs::read(path).map_err(to_error)?;
    let spirv = SpirV::from_bytes(&bytes).map_err(to_error)?;
    tracing::debug!("Loaded shader {} ({} words)", path.display(), spirv.words().len());
    Ok(spirv)
}

/// Create a shader module from validated SPIR-V.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_shader_module(
    device: &ash::Device,
    spirv: &SpirV,
) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(spirv.words());
    // SAFETY: caller guarantees the device is valid
    unsafe {
        device
            .create_shader_module(&info, None)
            .map_err(|e| GpuError::ShaderCompilation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn accepts_well_formed_header() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let spirv = SpirV::from_bytes(&bytes).unwrap();
        assert_eq!(spirv.words(), &[SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_blob() {
        assert!(SpirV::from_bytes(&[0x03, 0x02, 0x23]).is_err());
    }

    #[test]
    fn missing_file_is_shader_load_error() {
        let err = load_spirv("does/not/exist.spv").unwrap_err();
        match err {
            GpuError::ShaderLoad { path, .. } => {
                assert_eq!(path, PathBuf::from("does/not/exist.spv"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
