// SPDX-License-Identifier: CEPL-1.0
//! Frame orchestration: per-frame acquire/record/submit/present, swapchain
//! recreation and ordered teardown, generic over the native [`Gpu`].

use std::collections::BTreeMap;

use anyhow::Result;
use ash::vk;
use kiln_render::{DrawableId, DrawableSource, FrameStatus, RenderSize, Renderer, Window};
use tracing::{debug, error, info, warn};

use crate::command::{draw_list, frame_submission, CommandPools, GpuDrawable};
use crate::config::RendererConfig;
use crate::deferred::{DeferredRelease, Garbage};
use crate::error::{GpuError, RenderError};
use crate::frame::FrameRing;
use crate::gpu::{AcquireOutcome, FrameCommands, Gpu};
use crate::pipeline::PipelineRegistry;
use crate::pipeline_cache::PipelineCache;
use crate::shader::ShaderCompiler;
use crate::swapchain::{extent_from_caps, Swapchain};
use crate::sync::SyncPrimitive;

pub struct FrameRenderer<G: Gpu, S: DrawableSource, C: ShaderCompiler> {
    gpu: G,
    source: S,
    compiler: C,
    config: RendererConfig,
    clear_color: [f32; 4],

    swapchain: Option<Swapchain>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    pools: Option<CommandPools>,
    frames: FrameRing,
    pipelines: PipelineRegistry,
    cache: Option<PipelineCache>,
    drawables: BTreeMap<DrawableId, GpuDrawable>,
    deferred: DeferredRelease,

    /// A recreation was abandoned because the window was closing.
    stale: bool,
    destroyed: bool,
}

impl<G: Gpu, S: DrawableSource, C: ShaderCompiler> FrameRenderer<G, S, C> {
    /// Builds every swapchain-scoped and frame-scoped object on an
    /// already-created device. `window` must not be minimized.
    pub fn new(
        gpu: G,
        source: S,
        compiler: C,
        config: RendererConfig,
        window: RenderSize,
    ) -> Result<Self, RenderError> {
        let snapshot = gpu.surface_snapshot()?;
        let swapchain = Swapchain::create(&gpu, &snapshot, config.vsync, window, None)?;
        let render_pass = gpu.create_render_pass(swapchain.format())?;
        let framebuffers = create_framebuffers(&gpu, render_pass, &swapchain)?;
        let (pools, command_buffers) =
            CommandPools::create(&gpu, config.frames_in_flight.get())?;
        let frames = FrameRing::new(&gpu, command_buffers, swapchain.image_count())?;
        let cache = PipelineCache::open(&gpu, &config.pipeline_cache_path)?;
        let pipelines = PipelineRegistry::new(&gpu)?;
        let [r, g, b] = config.clear_color;

        info!(
            "renderer ready: {} frames in flight, vsync={}",
            frames.len(),
            config.vsync
        );
        Ok(Self {
            gpu,
            source,
            compiler,
            config,
            clear_color: [r, g, b, 1.0],
            swapchain: Some(swapchain),
            render_pass,
            framebuffers,
            pools: Some(pools),
            frames,
            pipelines,
            cache: Some(cache),
            drawables: BTreeMap::new(),
            deferred: DeferredRelease::default(),
            stale: false,
            destroyed: false,
        })
    }

    pub fn frame_index(&self) -> u64 {
        self.frames.frame_index()
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    fn live(&self) -> Result<&Swapchain, RenderError> {
        match (&self.swapchain, self.destroyed) {
            (Some(swapchain), false) => Ok(swapchain),
            _ => Err(RenderError::Destroyed),
        }
    }

    pub fn draw_frame(&mut self, window: &mut dyn Window) -> Result<FrameStatus, RenderError> {
        self.live()?;
        if window.take_resized() || self.stale {
            debug!("swapchain stale; recreating before drawing");
            return self.recreate_or_close(window);
        }

        self.frames.begin(&self.gpu)?;
        self.deferred
            .collect(&self.gpu, self.frames.retired_before());

        let swapchain = self.swapchain.as_ref().ok_or(RenderError::Destroyed)?;
        let image_acquired = self.frames.current()?.image_acquired.raw();
        let (image_index, acquire_suboptimal) =
            match swapchain.acquire(&self.gpu, image_acquired)? {
                AcquireOutcome::Image { index, suboptimal } => (index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    debug!("acquire: swapchain out of date");
                    return self.recreate_or_close(window);
                }
            };

        self.frames.claim_image(&self.gpu, image_index)?;
        let command_buffer = self.frames.start_recording(&self.gpu)?;
        let draws = draw_list(&self.drawables, &self.pipelines);
        let swapchain = self.swapchain.as_ref().ok_or(RenderError::Destroyed)?;
        self.gpu.record_frame(
            command_buffer,
            &FrameCommands {
                render_pass: self.render_pass,
                framebuffer: self.framebuffers[image_index as usize],
                extent: swapchain.extent(),
                clear_color: self.clear_color,
                draws: &draws,
            },
        )?;

        let sync = self.frames.current()?;
        let render_finished = sync.render_finished.raw();
        self.gpu.submit(&frame_submission(sync, command_buffer))?;
        self.frames.mark_submitted()?;

        let presented = swapchain.present(&self.gpu, image_index, render_finished)?;
        self.frames.advance();

        if acquire_suboptimal || presented.needs_recreation() {
            debug!("present: {presented:?}, acquire suboptimal: {acquire_suboptimal}");
            if self.recreate_swapchain(window)? {
                return Ok(FrameStatus::PresentedAndRecreated);
            }
        }
        Ok(FrameStatus::Presented)
    }

    fn recreate_or_close(&mut self, window: &mut dyn Window) -> Result<FrameStatus, RenderError> {
        Ok(if self.recreate_swapchain(window)? {
            FrameStatus::Recreated
        } else {
            FrameStatus::Closing
        })
    }

    // STRICT ORDER (recreate):
    // 1) Block until the framebuffer has area again (minimized windows report 0x0)
    // 2) Device idle: nothing in flight references the old swapchain
    // 3) Refresh surface capabilities, they change across resizes and monitors
    // 4) Destroy all frame-slot sync objects (an acquire may have signaled one nobody waits on)
    // 5) Create the new swapchain chained to the old one, then retire the old one
    // 6) Rebuild framebuffers; render pass and pipelines only if the format changed
    // 7) Fresh sync objects
    // A window closing during 1) or 3) abandons the recreation before anything
    // is destroyed; the swapchain stays stale and returns false.
    fn recreate_swapchain(&mut self, window: &mut dyn Window) -> Result<bool, RenderError> {
        self.stale = true;
        // 1) + 2) + 3)
        let (size, snapshot) = loop {
            let mut size = window.framebuffer_size();
            while size.is_empty() {
                if window.is_closing() {
                    debug!("window closing while minimized; swapchain left stale");
                    return Ok(false);
                }
                window.wait_for_next_event();
                size = window.framebuffer_size();
            }
            self.gpu.wait_idle()?;
            let snapshot = self.gpu.surface_snapshot()?;
            let extent = extent_from_caps(&snapshot.capabilities, size);
            if extent.width > 0 && extent.height > 0 {
                break (size, snapshot);
            }
            if window.is_closing() {
                debug!("window closing with a zero surface extent; swapchain left stale");
                return Ok(false);
            }
            window.wait_for_next_event();
        };
        window.take_resized();
        self.frames.mark_all_retired();
        self.deferred.flush(&self.gpu);

        // 4)
        self.frames.destroy_sync(&self.gpu);
        for framebuffer in self.framebuffers.drain(..) {
            self.gpu.destroy_framebuffer(framebuffer);
        }

        // 5)
        let old = self.swapchain.take().ok_or(RenderError::Destroyed)?;
        let new = match Swapchain::create(&self.gpu, &snapshot, self.config.vsync, size, Some(&old))
        {
            Ok(new) => new,
            Err(e) => {
                self.swapchain = Some(old);
                return Err(e);
            }
        };
        let old_format = old.format();
        old.retire(&self.gpu);

        // 6)
        if new.format() != old_format {
            info!("swapchain format changed {old_format:?} -> {:?}", new.format());
            self.gpu.destroy_render_pass(self.render_pass);
            self.render_pass = self.gpu.create_render_pass(new.format())?;
            let cache = self
                .cache
                .as_ref()
                .map_or(vk::PipelineCache::null(), PipelineCache::handle);
            self.pipelines.rebuild(&self.gpu, self.render_pass, cache)?;
        }
        self.framebuffers = create_framebuffers(&self.gpu, self.render_pass, &new)?;
        let image_count = new.image_count();
        self.swapchain = Some(new);

        // 7)
        self.frames.create_sync(&self.gpu, image_count)?;
        self.stale = false;
        Ok(true)
    }

    pub fn add(&mut self, id: DrawableId) -> Result<(), RenderError> {
        self.live()?;
        if self.drawables.contains_key(&id) {
            warn!("drawable {id:?} already added");
            return Ok(());
        }
        let data = self
            .source
            .drawable(id)
            .ok_or(RenderError::UnknownDrawable(id))?;
        if data.vertices.is_empty() || data.indices.is_empty() {
            return Err(RenderError::EmptyDrawable(id));
        }
        let transfer_pool = self
            .pools
            .as_ref()
            .ok_or(RenderError::Destroyed)?
            .transfer;
        let cache = self
            .cache
            .as_ref()
            .map_or(vk::PipelineCache::null(), PipelineCache::handle);

        let source = &self.source;
        let compiler = &mut self.compiler;
        let shader_id = &data.shader;
        self.pipelines
            .acquire(&self.gpu, shader_id, self.render_pass, cache, || {
                let shader = source
                    .shader(shader_id)
                    .ok_or_else(|| RenderError::UnknownShader(shader_id.clone()))?;
                Ok(compiler.compile(shader_id, shader)?)
            })?;

        let uploaded = upload_geometry(&self.gpu, transfer_pool, data);
        let (vertices, indices) = match uploaded {
            Ok(buffers) => buffers,
            Err(e) => {
                if let Some(pipeline) = self.pipelines.release(&data.shader) {
                    self.gpu.destroy_pipeline(pipeline);
                }
                return Err(e.into());
            }
        };
        debug!(
            "drawable {id:?}: {} vertices, {} indices, shader `{}`",
            data.vertices.len(),
            data.indices.len(),
            data.shader
        );
        self.drawables.insert(
            id,
            GpuDrawable {
                shader: data.shader.clone(),
                vertices,
                indices,
                index_count: data.indices.len() as u32,
            },
        );
        Ok(())
    }

    /// Frames already submitted may still read the drawable's buffers, so
    /// they are released once those frames have retired.
    pub fn remove(&mut self, id: DrawableId) -> Result<(), RenderError> {
        self.live()?;
        let Some(drawable) = self.drawables.remove(&id) else {
            warn!("drawable {id:?} was not added");
            return Ok(());
        };
        let unused_from = self.frames.frame_index();
        self.deferred
            .push(unused_from, Garbage::Buffer(drawable.vertices));
        self.deferred
            .push(unused_from, Garbage::Buffer(drawable.indices));
        if let Some(pipeline) = self.pipelines.release(&drawable.shader) {
            self.deferred.push(unused_from, Garbage::Pipeline(pipeline));
        }
        Ok(())
    }

    pub fn set_clear(&mut self, rgb: [f32; 3]) {
        let [r, g, b] = rgb;
        self.clear_color = [r, g, b, 1.0];
    }

    // STRICT TEARDOWN ORDER:
    // - device idle, then persist the pipeline cache while it is still alive
    // - sync objects, command pools (with their buffers), drawable buffers
    // - framebuffers, pipelines + layout, pipeline cache, render pass
    // - swapchain (views, then handle)
    // - device, surface, instance
    fn teardown(&mut self) -> Result<(), RenderError> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let idle = self.gpu.wait_idle();
        if let Err(e) = idle {
            error!("teardown: {e}; releasing anyway");
        }
        if let Some(cache) = &self.cache {
            if idle.is_ok() {
                cache.flush(&self.gpu);
            }
        }

        self.frames.destroy_sync(&self.gpu);
        if let Some(pools) = self.pools.take() {
            pools.destroy(&self.gpu);
        }
        for (_, drawable) in std::mem::take(&mut self.drawables) {
            self.gpu.destroy_buffer(drawable.vertices);
            self.gpu.destroy_buffer(drawable.indices);
        }
        self.deferred.flush(&self.gpu);
        for framebuffer in self.framebuffers.drain(..) {
            self.gpu.destroy_framebuffer(framebuffer);
        }
        self.pipelines.destroy(&self.gpu);
        if let Some(cache) = self.cache.take() {
            cache.destroy(&self.gpu);
        }
        self.gpu.destroy_render_pass(self.render_pass);
        self.render_pass = vk::RenderPass::null();
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(&self.gpu);
        }
        self.gpu.destroy();
        info!("renderer destroyed");
        idle.map_err(RenderError::from)
    }
}

fn create_framebuffers<G: Gpu>(
    gpu: &G,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
) -> Result<Vec<vk::Framebuffer>, GpuError> {
    let mut out = Vec::with_capacity(swapchain.image_count());
    for &view in swapchain.views() {
        match gpu.create_framebuffer(render_pass, view, swapchain.extent()) {
            Ok(fb) => out.push(fb),
            Err(e) => {
                out.into_iter().for_each(|fb| gpu.destroy_framebuffer(fb));
                return Err(e);
            }
        }
    }
    Ok(out)
}

fn upload_geometry<G: Gpu>(
    gpu: &G,
    transfer_pool: vk::CommandPool,
    data: &kiln_render::DrawableData,
) -> Result<(crate::gpu::DeviceBuffer, crate::gpu::DeviceBuffer), GpuError> {
    let vertices = gpu.upload_device_local(
        transfer_pool,
        bytemuck::cast_slice(&data.vertices),
        vk::BufferUsageFlags::VERTEX_BUFFER,
    )?;
    match gpu.upload_device_local(
        transfer_pool,
        bytemuck::cast_slice(&data.indices),
        vk::BufferUsageFlags::INDEX_BUFFER,
    ) {
        Ok(indices) => Ok((vertices, indices)),
        Err(e) => {
            gpu.destroy_buffer(vertices);
            Err(e)
        }
    }
}

impl<G: Gpu, S: DrawableSource, C: ShaderCompiler> Renderer for FrameRenderer<G, S, C> {
    fn draw(&mut self, window: &mut dyn Window) -> Result<FrameStatus> {
        Ok(self.draw_frame(window)?)
    }

    fn add_drawable(&mut self, id: DrawableId) -> Result<()> {
        Ok(self.add(id)?)
    }

    fn remove_drawable(&mut self, id: DrawableId) -> Result<()> {
        Ok(self.remove(id)?)
    }

    fn set_clear_color(&mut self, rgb: [f32; 3]) {
        self.set_clear(rgb);
    }

    fn destroy(&mut self) -> Result<()> {
        Ok(self.teardown()?)
    }
}

impl<G: Gpu, S: DrawableSource, C: ShaderCompiler> Drop for FrameRenderer<G, S, C> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            error!("renderer teardown: {e}");
        }
    }
}
