//! Compiled shader binaries and the short-lived modules built from them.
//!
//! Binaries are produced offline and only ever consumed here as opaque SPIR-V word
//! streams. They are read and checked before any backend object exists, so a missing
//! or truncated file is reported without anything to tear down.

use std::{
    ffi::CStr,
    io::Cursor,
    path::{Path, PathBuf},
    sync::Arc,
};

use ash::vk;
use thiserror::Error;

use super::device::Device;

/// Entry point of both shader stages.
pub const ENTRY_POINT: &CStr = c"main";

pub const VERTEX_SHADER_FILE: &str = "vert.spv";
pub const FRAGMENT_SHADER_FILE: &str = "frag.spv";

const SPIRV_MAGIC: u32 = 0x0723_0203;
/// Magic, version, generator, bound and schema.
const SPIRV_HEADER_WORDS: usize = 5;

#[derive(Debug, Error)]
pub enum ShaderReadError {
    #[error("failed to read shader binary {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader binary {path:?} is empty")]
    Empty { path: PathBuf },

    #[error("shader binary {path:?} is not a whole number of SPIR-V words")]
    Malformed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader binary {path:?} has magic number {found:#010x}, expected SPIR-V")]
    BadMagic { path: PathBuf, found: u32 },

    #[error("shader binary {path:?} has {words} word(s), shorter than the SPIR-V header")]
    Truncated { path: PathBuf, words: usize },
}

/// One validated SPIR-V blob.
#[derive(Debug, Clone)]
pub struct ShaderBinary {
    pub path: PathBuf,
    pub words: Vec<u32>,
}

impl ShaderBinary {
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self, ShaderReadError> {
        let path = path.into();
        if bytes.is_empty() {
            return Err(ShaderReadError::Empty { path });
        }

        if let Some(head) = bytes.first_chunk::<4>() {
            let found = u32::from_le_bytes(*head);
            if found != SPIRV_MAGIC && found.swap_bytes() != SPIRV_MAGIC {
                return Err(ShaderReadError::BadMagic { path, found });
            }
        }

        // read_spv takes care of alignment and of byte-swapped modules
        let words = match ash::util::read_spv(&mut Cursor::new(bytes)) {
            Ok(words) => words,
            Err(source) => return Err(ShaderReadError::Malformed { path, source }),
        };
        if words.len() < SPIRV_HEADER_WORDS {
            return Err(ShaderReadError::Truncated {
                path,
                words: words.len(),
            });
        }

        Ok(Self { path, words })
    }

    pub fn read(path: impl Into<PathBuf>) -> Result<Self, ShaderReadError> {
        let path = path.into();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(source) => return Err(ShaderReadError::Io { path, source }),
        };

        Self::from_bytes(path, &bytes)
    }
}

/// The vertex and fragment stages of the triangle pipeline.
#[derive(Debug, Clone)]
pub struct ShaderBinaries {
    pub vertex: ShaderBinary,
    pub fragment: ShaderBinary,
}

impl ShaderBinaries {
    pub fn load(directory: &Path) -> Result<Self, ShaderReadError> {
        let vertex = ShaderBinary::read(directory.join(VERTEX_SHADER_FILE))?;
        let fragment = ShaderBinary::read(directory.join(FRAGMENT_SHADER_FILE))?;
        log::debug!(
            "loaded shaders {:?} ({} words) and {:?} ({} words)",
            vertex.path,
            vertex.words.len(),
            fragment.path,
            fragment.words.len()
        );

        Ok(Self { vertex, fragment })
    }
}

#[derive(Debug, Error)]
pub enum ShaderModuleCreateError {
    #[error("vulkan call to create shader module for {path:?} failed")]
    VulkanCreation { path: PathBuf, result: vk::Result },
}

/// Owns a shader module; dropped as soon as the pipeline using it exists.
pub(crate) struct ShaderModule {
    pub handle: vk::ShaderModule,
    device: Arc<Device>,
}

impl ShaderModule {
    pub fn create(
        device: Arc<Device>,
        binary: &ShaderBinary,
    ) -> Result<Self, ShaderModuleCreateError> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(&binary.words);
        let handle = unsafe { device.create_shader_module(&create_info, None) }.map_err(
            |result| ShaderModuleCreateError::VulkanCreation {
                path: binary.path.clone(),
                result,
            },
        )?;

        Ok(Self { handle, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spirv_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    #[test]
    fn valid_module_is_accepted() {
        let bytes = spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 8, 0]);
        let binary = ShaderBinary::from_bytes("vert.spv", &bytes).expect("binary should parse");

        assert_eq!(binary.words.len(), 5);
        assert_eq!(binary.words[0], SPIRV_MAGIC);
    }

    #[test]
    fn empty_blob_is_rejected() {
        let err = ShaderBinary::from_bytes("vert.spv", &[]).unwrap_err();
        assert!(matches!(err, ShaderReadError::Empty { .. }));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let mut bytes = spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000]);
        bytes.pop();

        let err = ShaderBinary::from_bytes("frag.spv", &bytes).unwrap_err();
        assert!(matches!(err, ShaderReadError::Malformed { .. }));
    }

    #[test]
    fn magic_alone_is_rejected() {
        let bytes = SPIRV_MAGIC.to_le_bytes();

        let err = ShaderBinary::from_bytes("vert.spv", &bytes).unwrap_err();
        assert!(matches!(err, ShaderReadError::Truncated { words: 1, .. }));
    }

    #[test]
    fn header_shorter_than_five_words_is_rejected() {
        let bytes = spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000]);

        let err = ShaderBinary::from_bytes("vert.spv", &bytes).unwrap_err();
        assert!(matches!(err, ShaderReadError::Truncated { words: 2, .. }));

        let bytes = spirv_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 8]);
        assert!(ShaderBinary::from_bytes("vert.spv", &bytes).is_err());
    }

    #[test]
    fn byte_swapped_module_is_accepted() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_be_bytes()).collect();

        let binary = ShaderBinary::from_bytes("frag.spv", &bytes).expect("binary should parse");
        assert_eq!(binary.words[0], SPIRV_MAGIC);
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let bytes = spirv_bytes(&[0xDEAD_BEEF, 0x0001_0000]);

        let err = ShaderBinary::from_bytes("frag.spv", &bytes).unwrap_err();
        assert!(matches!(
            err,
            ShaderReadError::BadMagic {
                found: 0xDEAD_BEEF,
                ..
            }
        ));
    }

    #[test]
    fn missing_directory_reports_path() {
        let directory = Path::new("this/directory/does/not/exist");
        let err = ShaderBinaries::load(directory).unwrap_err();

        match err {
            ShaderReadError::Io { path, .. } => {
                assert_eq!(path, directory.join(VERTEX_SHADER_FILE));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
