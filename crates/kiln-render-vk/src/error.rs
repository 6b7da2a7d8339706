// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use kiln_render::{DrawableId, ShaderId};
use thiserror::Error;

use crate::frame::SlotError;
use crate::shader::ShaderError;

/// A native call returned an error code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{call} failed: {result}")]
pub struct GpuError {
    pub call: &'static str,
    pub result: vk::Result,
}

impl GpuError {
    pub fn new(call: &'static str, result: vk::Result) -> Self {
        Self { call, result }
    }

    pub fn is_device_lost(&self) -> bool {
        self.result == vk::Result::ERROR_DEVICE_LOST
    }
}

pub(crate) trait VkResultExt<T> {
    fn or_gpu(self, call: &'static str) -> Result<T, GpuError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn or_gpu(self, call: &'static str) -> Result<T, GpuError> {
        self.map_err(|result| GpuError::new(call, result))
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("surface reports no formats")]
    NoSurfaceFormat,
    #[error("drawable {0:?} is unknown to the drawable source")]
    UnknownDrawable(DrawableId),
    #[error("drawable {0:?} has no geometry")]
    EmptyDrawable(DrawableId),
    #[error("shader `{0}` is unknown to the drawable source")]
    UnknownShader(ShaderId),
    #[error("renderer was already destroyed")]
    Destroyed,
}
