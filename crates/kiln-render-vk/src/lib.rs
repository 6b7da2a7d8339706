// SPDX-License-Identifier: CEPL-1.0
//! Vulkan frame orchestration: swapchain lifecycle, frames in flight,
//! pipeline sharing and a persisted pipeline cache.

pub mod backend;
pub mod command;
pub mod config;
pub mod deferred;
pub mod device;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod pipeline;
pub mod pipeline_cache;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod mock;

pub use backend::AshGpu;
pub use config::RendererConfig;
pub use error::{GpuError, RenderError};
pub use gpu::Gpu;
pub use renderer::FrameRenderer;
pub use shader::{ShaderCompiler, ShaderError, SpirvProgram};

#[cfg(feature = "shaderc")]
pub use shader::ShadercCompiler;

#[cfg(feature = "shaderc")]
mod vk_renderer {
    use anyhow::{Context, Result};
    use kiln_render::{DrawableSource, RenderSize};
    use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

    use super::{AshGpu, FrameRenderer, RendererConfig, ShadercCompiler};

    pub type VkRenderer<S> = FrameRenderer<AshGpu, S, ShadercCompiler>;

    /// Brings up the device against `window` and builds a renderer for it.
    /// The window must outlive the renderer.
    pub fn create_renderer<S: DrawableSource>(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        source: S,
        config: RendererConfig,
    ) -> Result<VkRenderer<S>> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();
        let gpu = unsafe { AshGpu::new(dh, wh, config.validation)? };
        let compiler = ShadercCompiler::new()?;
        FrameRenderer::new(gpu, source, compiler, config, size)
            .context("building swapchain and frame resources")
    }
}

#[cfg(feature = "shaderc")]
pub use vk_renderer::{create_renderer, VkRenderer};
