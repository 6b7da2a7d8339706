// SPDX-License-Identifier: CEPL-1.0
use kiln_render::{ShaderId, ShaderSource};
use thiserror::Error;

/// Compiled vertex + fragment stages of one shader program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpirvProgram {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader compiler unavailable: {0}")]
    Unavailable(String),
    #[error("{stage} stage of shader `{shader}` failed to compile: {message}")]
    Compile {
        shader: ShaderId,
        stage: &'static str,
        message: String,
    },
}

pub trait ShaderCompiler {
    fn compile(&mut self, id: &ShaderId, source: &ShaderSource) -> Result<SpirvProgram, ShaderError>;
}

#[cfg(feature = "shaderc")]
pub use self::shaderc_impl::ShadercCompiler;

#[cfg(feature = "shaderc")]
mod shaderc_impl {
    use super::*;
    use kiln_render::ShaderLanguage;
    use tracing::debug;

    /// GLSL/HLSL to SPIR-V for Vulkan 1.0.
    pub struct ShadercCompiler {
        compiler: shaderc::Compiler,
    }

    impl ShadercCompiler {
        pub fn new() -> Result<Self, ShaderError> {
            let compiler =
                shaderc::Compiler::new().map_err(|e| ShaderError::Unavailable(e.to_string()))?;
            Ok(Self { compiler })
        }

        fn stage(
            &self,
            id: &ShaderId,
            language: ShaderLanguage,
            text: &str,
            kind: shaderc::ShaderKind,
            stage: &'static str,
        ) -> Result<Vec<u32>, ShaderError> {
            let mut opts = shaderc::CompileOptions::new()
                .map_err(|e| ShaderError::Unavailable(e.to_string()))?;
            opts.set_target_env(
                shaderc::TargetEnv::Vulkan,
                shaderc::EnvVersion::Vulkan1_0 as u32,
            );
            opts.set_optimization_level(shaderc::OptimizationLevel::Performance);
            opts.set_source_language(match language {
                ShaderLanguage::Glsl => shaderc::SourceLanguage::GLSL,
                ShaderLanguage::Hlsl => shaderc::SourceLanguage::HLSL,
            });

            let file_name = format!("{id}.{stage}");
            let artifact = self
                .compiler
                .compile_into_spirv(text, kind, &file_name, "main", Some(&opts))
                .map_err(|e| ShaderError::Compile {
                    shader: id.clone(),
                    stage,
                    message: e.to_string(),
                })?;
            if artifact.get_num_warnings() > 0 {
                debug!("{file_name}: {}", artifact.get_warning_messages());
            }
            Ok(artifact.as_binary().to_vec())
        }
    }

    impl ShaderCompiler for ShadercCompiler {
        fn compile(
            &mut self,
            id: &ShaderId,
            source: &ShaderSource,
        ) -> Result<SpirvProgram, ShaderError> {
            Ok(SpirvProgram {
                vertex: self.stage(
                    id,
                    source.language,
                    &source.vertex,
                    shaderc::ShaderKind::Vertex,
                    "vert",
                )?,
                fragment: self.stage(
                    id,
                    source.language,
                    &source.fragment,
                    shaderc::ShaderKind::Fragment,
                    "frag",
                )?,
            })
        }
    }
}
