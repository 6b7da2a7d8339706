// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`Gpu`] that tracks handle lifetimes and records calls, plus
//! scripted window and scene doubles for driving the renderer in tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use ash::vk::{self, Handle};
use kiln_render::{
    DrawableData, DrawableId, DrawableSource, RenderSize, ShaderId, ShaderLanguage, ShaderSource,
    Vertex, Window,
};

use crate::device::{DeviceIdentity, QueueRole, SurfaceSnapshot};
use crate::error::GpuError;
use crate::gpu::{
    AcquireOutcome, DeviceBuffer, FrameCommands, FrameSubmission, Gpu, PipelineDesc,
    PresentOutcome, SwapchainDesc,
};
use crate::shader::{ShaderCompiler, ShaderError, SpirvProgram};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Kind {
    Semaphore,
    Fence,
    Swapchain,
    ImageView,
    RenderPass,
    Framebuffer,
    CommandPool,
    PipelineCache,
    PipelineLayout,
    Pipeline,
    Buffer,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    WaitIdle,
    SurfaceSnapshot,
    WaitFence(u64),
    ResetFence(u64),
    CreateSwapchain {
        handle: u64,
        old: u64,
        extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
        image_count: u32,
    },
    DestroySwapchain(u64),
    Acquire {
        swapchain: u64,
        signal: u64,
    },
    Present {
        swapchain: u64,
        image: u32,
        wait: u64,
    },
    CreateRenderPass(vk::Format),
    Record {
        cmd: u64,
        framebuffer: u64,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        draws: usize,
    },
    Submit {
        cmd: u64,
        fence: u64,
        wait: u64,
        signal: u64,
    },
    CreatePipeline(u64),
    DestroyPipeline(u64),
    Upload {
        usage: vk::BufferUsageFlags,
        len: usize,
    },
    DestroyBuffer(u64),
    DestroyDevice,
}

pub(crate) struct MockState {
    next_handle: u64,
    live: HashMap<Kind, HashSet<u64>>,
    signaled: HashMap<u64, bool>,
    images: HashMap<u64, u32>,
    next_image: HashMap<u64, u32>,
    semaphores_created: usize,

    pub calls: Vec<Call>,
    pub snapshot: SurfaceSnapshot,
    pub identity: DeviceIdentity,
    /// Consumed front to back; empty means "next image, optimal".
    pub acquire_script: VecDeque<AcquireOutcome>,
    /// Consumed front to back; empty means `Optimal`.
    pub present_script: VecDeque<PresentOutcome>,
    /// Semaphore creation fails once this many have been created.
    pub fail_semaphore_after: Option<usize>,
    pub fail_submit: Option<vk::Result>,
    pub fail_upload: bool,
    /// Returned by `pipeline_cache_data`.
    pub cache_data: Vec<u8>,
    /// Length of the seed passed to each `create_pipeline_cache`.
    pub cache_seed_lengths: Vec<usize>,
    pub destroyed: bool,
}

impl MockState {
    fn new() -> Self {
        Self {
            next_handle: 0x10_0000,
            live: HashMap::new(),
            signaled: HashMap::new(),
            images: HashMap::new(),
            next_image: HashMap::new(),
            semaphores_created: 0,
            calls: Vec::new(),
            snapshot: default_snapshot(),
            identity: DeviceIdentity {
                vendor_id: 0x10de,
                device_id: 0x2484,
                driver_version: 0x0215_0000,
                cache_uuid: [7; vk::UUID_SIZE],
            },
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_semaphore_after: None,
            fail_submit: None,
            fail_upload: false,
            cache_data: Vec::new(),
            cache_seed_lengths: Vec::new(),
            destroyed: false,
        }
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.live.get(&kind).map_or(0, HashSet::len)
    }

    pub fn total_live(&self) -> usize {
        self.live.values().map(HashSet::len).sum()
    }

    pub fn is_live(&self, kind: Kind, raw: u64) -> bool {
        self.live.get(&kind).is_some_and(|set| set.contains(&raw))
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn fresh(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn alloc(&mut self, kind: Kind) -> u64 {
        let raw = self.fresh();
        self.live.entry(kind).or_default().insert(raw);
        raw
    }

    fn release(&mut self, kind: Kind, raw: u64) {
        assert!(
            self.live.get_mut(&kind).is_some_and(|set| set.remove(&raw)),
            "{kind:?} {raw:#x} destroyed but not alive"
        );
    }
}

fn default_snapshot() -> SurfaceSnapshot {
    SurfaceSnapshot {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

pub(crate) struct MockGpu {
    state: Rc<RefCell<MockState>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::new())),
        }
    }

    /// Shared with the gpu, so it stays inspectable after the gpu moved into a renderer.
    pub fn state(&self) -> Rc<RefCell<MockState>> {
        Rc::clone(&self.state)
    }

    fn alloc(&self, kind: Kind) -> u64 {
        self.state.borrow_mut().alloc(kind)
    }

    fn release(&self, kind: Kind, raw: u64) {
        self.state.borrow_mut().release(kind, raw);
    }
}

impl Gpu for MockGpu {
    fn identity(&self) -> DeviceIdentity {
        self.state.borrow().identity
    }

    fn surface_snapshot(&self) -> Result<SurfaceSnapshot, GpuError> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::SurfaceSnapshot);
        Ok(s.snapshot.clone())
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        self.state.borrow_mut().calls.push(Call::WaitIdle);
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError> {
        let mut s = self.state.borrow_mut();
        if s.fail_semaphore_after
            .is_some_and(|limit| s.semaphores_created >= limit)
        {
            return Err(GpuError::new(
                "vkCreateSemaphore",
                vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            ));
        }
        s.semaphores_created += 1;
        Ok(vk::Semaphore::from_raw(s.alloc(Kind::Semaphore)))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(Kind::Semaphore, semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError> {
        let mut s = self.state.borrow_mut();
        let raw = s.alloc(Kind::Fence);
        s.signaled.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.state.borrow_mut();
        s.release(Kind::Fence, fence.as_raw());
        s.signaled.remove(&fence.as_raw());
    }

    /// Nothing ever completes asynchronously here, so waiting on an
    /// unsignaled fence would hang a real device.
    fn wait_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<(), GpuError> {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        s.calls.push(Call::WaitFence(raw));
        assert!(s.is_live(Kind::Fence, raw), "wait on dead fence {raw:#x}");
        if s.signaled.get(&raw).copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(GpuError::new("vkWaitForFences", vk::Result::TIMEOUT))
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        let mut s = self.state.borrow_mut();
        let raw = fence.as_raw();
        s.calls.push(Call::ResetFence(raw));
        assert!(s.is_live(Kind::Fence, raw), "reset of dead fence {raw:#x}");
        s.signaled.insert(raw, false);
        Ok(())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR, GpuError> {
        let mut s = self.state.borrow_mut();
        let old = desc.old_swapchain.as_raw();
        assert!(
            old == 0 || s.is_live(Kind::Swapchain, old),
            "old swapchain {old:#x} is not alive"
        );
        assert!(
            desc.extent.width > 0 && desc.extent.height > 0,
            "zero-sized swapchain"
        );
        let handle = s.alloc(Kind::Swapchain);
        s.images.insert(handle, desc.image_count);
        s.calls.push(Call::CreateSwapchain {
            handle,
            old,
            extent: desc.extent,
            present_mode: desc.present_mode,
            image_count: desc.image_count,
        });
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>, GpuError> {
        let mut s = self.state.borrow_mut();
        let count = s.images.get(&swapchain.as_raw()).copied().unwrap_or(0);
        Ok((0..count).map(|_| vk::Image::from_raw(s.fresh())).collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.borrow_mut();
        let raw = swapchain.as_raw();
        s.release(Kind::Swapchain, raw);
        s.images.remove(&raw);
        s.calls.push(Call::DestroySwapchain(raw));
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
    ) -> Result<vk::ImageView, GpuError> {
        Ok(vk::ImageView::from_raw(self.alloc(Kind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(Kind::ImageView, view.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome, GpuError> {
        let mut s = self.state.borrow_mut();
        let raw = swapchain.as_raw();
        assert!(s.is_live(Kind::Swapchain, raw), "acquire on dead swapchain");
        assert!(
            s.is_live(Kind::Semaphore, signal.as_raw()),
            "acquire signals a dead semaphore"
        );
        s.calls.push(Call::Acquire {
            swapchain: raw,
            signal: signal.as_raw(),
        });
        if let Some(outcome) = s.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let count = s.images.get(&raw).copied().unwrap_or(1).max(1);
        let next = s.next_image.entry(raw).or_insert(0);
        let index = *next % count;
        *next += 1;
        Ok(AcquireOutcome::Image {
            index,
            suboptimal: false,
        })
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome, GpuError> {
        let mut s = self.state.borrow_mut();
        assert!(s.is_live(Kind::Swapchain, swapchain.as_raw()));
        s.calls.push(Call::Present {
            swapchain: swapchain.as_raw(),
            image: image_index,
            wait: wait.as_raw(),
        });
        Ok(s.present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Optimal))
    }

    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass, GpuError> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::CreateRenderPass(format));
        Ok(vk::RenderPass::from_raw(s.alloc(Kind::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release(Kind::RenderPass, render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError> {
        let mut s = self.state.borrow_mut();
        assert!(s.is_live(Kind::RenderPass, render_pass.as_raw()));
        assert!(s.is_live(Kind::ImageView, view.as_raw()));
        Ok(vk::Framebuffer::from_raw(s.alloc(Kind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(Kind::Framebuffer, framebuffer.as_raw());
    }

    fn create_command_pool(&self, _role: QueueRole) -> Result<vk::CommandPool, GpuError> {
        Ok(vk::CommandPool::from_raw(self.alloc(Kind::CommandPool)))
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError> {
        let mut s = self.state.borrow_mut();
        assert!(s.is_live(Kind::CommandPool, pool.as_raw()));
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(s.fresh()))
            .collect())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.release(Kind::CommandPool, pool.as_raw());
    }

    fn record_frame(
        &self,
        command_buffer: vk::CommandBuffer,
        frame: &FrameCommands<'_>,
    ) -> Result<(), GpuError> {
        let mut s = self.state.borrow_mut();
        assert!(s.is_live(Kind::Framebuffer, frame.framebuffer.as_raw()));
        for draw in frame.draws {
            assert!(s.is_live(Kind::Pipeline, draw.pipeline.as_raw()));
            assert!(s.is_live(Kind::Buffer, draw.vertex_buffer.as_raw()));
            assert!(s.is_live(Kind::Buffer, draw.index_buffer.as_raw()));
        }
        s.calls.push(Call::Record {
            cmd: command_buffer.as_raw(),
            framebuffer: frame.framebuffer.as_raw(),
            extent: frame.extent,
            clear_color: frame.clear_color,
            draws: frame.draws.len(),
        });
        Ok(())
    }

    /// Completes instantly: the fence is signaled on return.
    fn submit(&self, submission: &FrameSubmission) -> Result<(), GpuError> {
        let mut s = self.state.borrow_mut();
        if let Some(result) = s.fail_submit {
            return Err(GpuError::new("vkQueueSubmit", result));
        }
        let fence = submission.fence.as_raw();
        assert!(s.is_live(Kind::Fence, fence), "submit with dead fence");
        assert!(
            !s.signaled.get(&fence).copied().unwrap_or(true),
            "submit with a fence that was not reset"
        );
        s.signaled.insert(fence, true);
        s.calls.push(Call::Submit {
            cmd: submission.command_buffer.as_raw(),
            fence,
            wait: submission.wait_semaphore.as_raw(),
            signal: submission.signal_semaphore.as_raw(),
        });
        Ok(())
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> Result<vk::PipelineCache, GpuError> {
        let mut s = self.state.borrow_mut();
        s.cache_seed_lengths.push(initial_data.len());
        Ok(vk::PipelineCache::from_raw(s.alloc(Kind::PipelineCache)))
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> Result<Vec<u8>, GpuError> {
        let s = self.state.borrow();
        assert!(s.is_live(Kind::PipelineCache, cache.as_raw()));
        Ok(s.cache_data.clone())
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.release(Kind::PipelineCache, cache.as_raw());
    }

    fn create_pipeline_layout(&self) -> Result<vk::PipelineLayout, GpuError> {
        Ok(vk::PipelineLayout::from_raw(
            self.alloc(Kind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.release(Kind::PipelineLayout, layout.as_raw());
    }

    fn create_graphics_pipeline(&self, _desc: &PipelineDesc<'_>) -> Result<vk::Pipeline, GpuError> {
        let mut s = self.state.borrow_mut();
        let raw = s.alloc(Kind::Pipeline);
        s.calls.push(Call::CreatePipeline(raw));
        Ok(vk::Pipeline::from_raw(raw))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut s = self.state.borrow_mut();
        s.release(Kind::Pipeline, pipeline.as_raw());
        s.calls.push(Call::DestroyPipeline(pipeline.as_raw()));
    }

    fn upload_device_local(
        &self,
        transfer_pool: vk::CommandPool,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<DeviceBuffer, GpuError> {
        let mut s = self.state.borrow_mut();
        assert!(s.is_live(Kind::CommandPool, transfer_pool.as_raw()));
        if s.fail_upload {
            return Err(GpuError::new(
                "vkAllocateMemory",
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        let raw = s.alloc(Kind::Buffer);
        s.calls.push(Call::Upload {
            usage,
            len: bytes.len(),
        });
        Ok(DeviceBuffer {
            buffer: vk::Buffer::from_raw(raw),
            memory: vk::DeviceMemory::from_raw(raw),
            size: bytes.len() as vk::DeviceSize,
        })
    }

    fn destroy_buffer(&self, buffer: DeviceBuffer) {
        let mut s = self.state.borrow_mut();
        s.release(Kind::Buffer, buffer.buffer.as_raw());
        s.calls.push(Call::DestroyBuffer(buffer.buffer.as_raw()));
    }

    fn destroy(&mut self) {
        let mut s = self.state.borrow_mut();
        assert!(!s.destroyed, "device destroyed twice");
        s.destroyed = true;
        s.calls.push(Call::DestroyDevice);
    }
}

/// A window whose size changes only when the renderer waits for events.
pub(crate) struct MockWindow {
    size: RenderSize,
    pending: VecDeque<RenderSize>,
    resized: bool,
    pub closing: bool,
    pub waits: usize,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: RenderSize::new(width, height),
            pending: VecDeque::new(),
            resized: false,
            closing: false,
            waits: 0,
        }
    }

    /// Resizes now and flags it, like a resize event arriving between frames.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = RenderSize::new(width, height);
        self.resized = true;
    }

    /// Sizes delivered one per event wait.
    pub fn queue_sizes(&mut self, sizes: &[(u32, u32)]) {
        self.pending
            .extend(sizes.iter().map(|&(w, h)| RenderSize::new(w, h)));
    }
}

impl Window for MockWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.size
    }

    fn wait_for_next_event(&mut self) {
        self.waits += 1;
        let next = self
            .pending
            .pop_front()
            .expect("renderer waited for an event that never comes");
        self.size = next;
        self.resized = true;
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    fn is_closing(&self) -> bool {
        self.closing
    }
}

/// Emits a placeholder module; sources containing `#error` fail to compile.
#[derive(Default)]
pub(crate) struct StubCompiler {
    pub compiled: Vec<ShaderId>,
}

impl ShaderCompiler for StubCompiler {
    fn compile(&mut self, id: &ShaderId, source: &ShaderSource) -> Result<SpirvProgram, ShaderError> {
        if source.vertex.contains("#error") {
            return Err(ShaderError::Compile {
                shader: id.clone(),
                stage: "vertex",
                message: "#error directive".into(),
            });
        }
        self.compiled.push(id.clone());
        Ok(SpirvProgram {
            vertex: vec![0x0723_0203, 1],
            fragment: vec![0x0723_0203, 2],
        })
    }
}

#[derive(Default)]
pub(crate) struct TestScene {
    drawables: HashMap<DrawableId, DrawableData>,
    shaders: HashMap<ShaderId, ShaderSource>,
}

impl TestScene {
    /// Drawables 1 and 2 share `flat`, 3 uses `tinted`, 4 has no geometry
    /// and 5 names a shader that fails to compile.
    pub fn new() -> Self {
        let mut scene = Self::default();
        for (name, vertex) in [
            ("flat", "void main() {}"),
            ("tinted", "void main() {}"),
            ("broken", "#error nope"),
        ] {
            scene.shaders.insert(
                ShaderId::from(name),
                ShaderSource {
                    language: ShaderLanguage::Glsl,
                    vertex: vertex.into(),
                    fragment: "void main() {}".into(),
                },
            );
        }
        let tri = vec![
            Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0]),
            Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0]),
            Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0]),
        ];
        let quad = vec![
            Vertex::new([-0.5, -0.5, 0.0], [1.0, 1.0, 1.0]),
            Vertex::new([0.5, -0.5, 0.0], [1.0, 1.0, 1.0]),
            Vertex::new([0.5, 0.5, 0.0], [1.0, 1.0, 1.0]),
            Vertex::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0]),
        ];
        scene.insert(1, tri.clone(), vec![0, 1, 2], "flat");
        scene.insert(2, quad.clone(), vec![0, 1, 2, 2, 3, 0], "flat");
        scene.insert(3, quad, vec![0, 1, 2, 2, 3, 0], "tinted");
        scene.insert(4, Vec::new(), Vec::new(), "flat");
        scene.insert(5, tri, vec![0, 1, 2], "broken");
        scene
    }

    fn insert(&mut self, id: u32, vertices: Vec<Vertex>, indices: Vec<u32>, shader: &str) {
        self.drawables.insert(
            DrawableId(id),
            DrawableData {
                vertices,
                indices,
                shader: ShaderId::from(shader),
            },
        );
    }
}

impl DrawableSource for TestScene {
    fn drawable(&self, id: DrawableId) -> Option<&DrawableData> {
        self.drawables.get(&id)
    }

    fn shader(&self, id: &ShaderId) -> Option<&ShaderSource> {
        self.shaders.get(id)
    }
}
