// SPDX-License-Identifier: CEPL-1.0
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub vsync: bool,
    /// Frame slots the CPU may record ahead of the GPU.
    pub frames_in_flight: NonZeroUsize,
    pub clear_color: [f32; 3],
    pub pipeline_cache_path: PathBuf,
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
}

pub const DEFAULT_FRAMES_IN_FLIGHT: NonZeroUsize = NonZeroUsize::MIN.saturating_add(1);

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            clear_color: [0.02, 0.02, 0.04],
            pipeline_cache_path: PathBuf::from("cache/pipeline_cache.bin"),
            validation: cfg!(debug_assertions),
        }
    }
}
