// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;

use ash::vk;
use kiln_render::ShaderId;
use tracing::{debug, info};

use crate::error::{GpuError, RenderError};
use crate::gpu::{Gpu, PipelineDesc};
use crate::shader::SpirvProgram;

struct PipelineEntry {
    pipeline: vk::Pipeline,
    program: SpirvProgram,
    users: usize,
}

/// Graphics pipelines shared by every drawable naming the same shader.
pub struct PipelineRegistry {
    layout: vk::PipelineLayout,
    entries: HashMap<ShaderId, PipelineEntry>,
}

impl PipelineRegistry {
    pub fn new<G: Gpu>(gpu: &G) -> Result<Self, GpuError> {
        Ok(Self {
            layout: gpu.create_pipeline_layout()?,
            entries: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &ShaderId) -> Option<vk::Pipeline> {
        self.entries.get(id).map(|e| e.pipeline)
    }

    /// Adds a user to the pipeline for `id`, building it on first use.
    /// `compile` only runs when no pipeline exists yet.
    pub fn acquire<G, F>(
        &mut self,
        gpu: &G,
        id: &ShaderId,
        render_pass: vk::RenderPass,
        cache: vk::PipelineCache,
        compile: F,
    ) -> Result<vk::Pipeline, RenderError>
    where
        G: Gpu,
        F: FnOnce() -> Result<SpirvProgram, RenderError>,
    {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.users += 1;
            return Ok(entry.pipeline);
        }
        let program = compile()?;
        let pipeline = gpu.create_graphics_pipeline(&PipelineDesc {
            vertex_spirv: &program.vertex,
            fragment_spirv: &program.fragment,
            render_pass,
            layout: self.layout,
            cache,
        })?;
        debug!("pipeline for shader `{id}` created");
        self.entries.insert(
            id.clone(),
            PipelineEntry {
                pipeline,
                program,
                users: 1,
            },
        );
        Ok(pipeline)
    }

    /// Drops one user. Returns the pipeline once nobody uses it any more;
    /// the caller decides when it is safe to destroy.
    pub fn release(&mut self, id: &ShaderId) -> Option<vk::Pipeline> {
        let entry = self.entries.get_mut(id)?;
        entry.users = entry.users.saturating_sub(1);
        if entry.users > 0 {
            return None;
        }
        self.entries.remove(id).map(|e| e.pipeline)
    }

    /// Recreates every pipeline against a new render pass. The device must be idle.
    pub fn rebuild<G: Gpu>(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
        cache: vk::PipelineCache,
    ) -> Result<(), GpuError> {
        for entry in self.entries.values_mut() {
            gpu.destroy_pipeline(entry.pipeline);
            entry.pipeline = vk::Pipeline::null();
        }
        for entry in self.entries.values_mut() {
            entry.pipeline = gpu.create_graphics_pipeline(&PipelineDesc {
                vertex_spirv: &entry.program.vertex,
                fragment_spirv: &entry.program.fragment,
                render_pass,
                layout: self.layout,
                cache,
            })?;
        }
        info!("rebuilt {} pipelines for new render pass", self.entries.len());
        Ok(())
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for (_, entry) in self.entries.drain() {
            if entry.pipeline != vk::Pipeline::null() {
                gpu.destroy_pipeline(entry.pipeline);
            }
        }
        if self.layout != vk::PipelineLayout::null() {
            gpu.destroy_pipeline_layout(self.layout);
            self.layout = vk::PipelineLayout::null();
        }
    }
}
