// Shader module loading
//
// Vulkan consumes SPIR-V as 4-byte words. Bytecode arrives from the resource
// collection as raw bytes; it is decoded and sanity-checked here before the
// driver ever sees it.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;

use crate::error::Stage;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode raw bytecode into SPIR-V words.
///
/// Rejects empty blobs, lengths that are not a whole number of words and
/// blobs without the SPIR-V magic number. `read_spv` fixes up alignment and
/// byte order.
pub fn decode_spirv(code: &[u8]) -> Result<Vec<u32>> {
    if code.is_empty() {
        return Err(anyhow::Error::new(Stage::CreateShaderModule))
            .context("Shader bytecode is empty");
    }

    let words = ash::util::read_spv(&mut Cursor::new(code))
        .context("Shader bytecode is not a whole number of SPIR-V words")
        .context(Stage::CreateShaderModule)?;

    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(anyhow::Error::new(Stage::CreateShaderModule))
            .context("Shader bytecode is missing the SPIR-V magic number");
    }

    Ok(words)
}

/// Owned shader module, destroyed on drop
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: ash::Device,
}

impl ShaderModule {
    pub fn new(device: &ash::Device, code: &[u8]) -> Result<Self> {
        let words = decode_spirv(code)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .context(Stage::CreateShaderModule)?;

        Ok(Self {
            module,
            device: device.clone(),
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code_of;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn empty_bytecode_is_shader_module_error() {
        let err = decode_spirv(&[]).unwrap_err();
        assert_eq!(exit_code_of(&err), Stage::CreateShaderModule.exit_code());
    }

    #[test]
    fn ragged_length_is_rejected() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000]);
        bytes.push(0);
        let err = decode_spirv(&bytes).unwrap_err();
        assert_eq!(exit_code_of(&err), Stage::CreateShaderModule.exit_code());
    }

    #[test]
    fn missing_magic_is_rejected() {
        let bytes = words_to_bytes(&[0xdead_beef, 0x0001_0000]);
        let err = decode_spirv(&bytes).unwrap_err();
        assert_eq!(exit_code_of(&err), Stage::CreateShaderModule.exit_code());
    }

    #[test]
    fn decodes_little_endian_words() {
        let header = [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0];
        assert_eq!(decode_spirv(&words_to_bytes(&header)).unwrap(), header);
    }

    #[test]
    fn byte_swapped_module_is_normalised() {
        let header = [SPIRV_MAGIC, 0x0001_0000];
        let bytes: Vec<u8> = header.iter().flat_map(|w| w.to_be_bytes()).collect();
        assert_eq!(decode_spirv(&bytes).unwrap(), header);
    }
}
