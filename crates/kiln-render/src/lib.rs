// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero dimension.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Window-system services a renderer relies on while it drives frames.
pub trait Window {
    /// Framebuffer size in pixels. Zero in either dimension while minimized.
    fn framebuffer_size(&self) -> RenderSize;

    /// Blocks until the window system delivered at least one event and it was processed.
    fn wait_for_next_event(&mut self);

    /// Reports whether the window was resized since the last call and clears the flag.
    fn take_resized(&mut self) -> bool;

    /// True once the window is going away. Waiting for events may then
    /// return immediately, so nothing should block on the window any more.
    fn is_closing(&self) -> bool;
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3]) -> Self {
        Self { pos, color }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(pub u32);

/// Identity of a shader program. Drawables naming the same id share one pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub String);

impl From<&str> for ShaderId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Display for ShaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShaderLanguage {
    #[default]
    Glsl,
    Hlsl,
}

#[derive(Clone, Debug)]
pub struct ShaderSource {
    pub language: ShaderLanguage,
    pub vertex: String,
    pub fragment: String,
}

#[derive(Clone, Debug)]
pub struct DrawableData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub shader: ShaderId,
}

/// Where a renderer looks up what a drawable id refers to.
pub trait DrawableSource {
    fn drawable(&self, id: DrawableId) -> Option<&DrawableData>;
    fn shader(&self, id: &ShaderId) -> Option<&ShaderSource>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was recorded, submitted and presented.
    Presented,
    /// A frame was presented, then the swapchain was rebuilt because it went stale.
    PresentedAndRecreated,
    /// No frame was produced; the swapchain was rebuilt instead.
    Recreated,
    /// No frame was produced; the swapchain is stale but the window is
    /// closing, so rebuilding it is left to the next call.
    Closing,
}

pub trait Renderer {
    /// Produces at most one frame. Stale or resized swapchains are rebuilt
    /// internally; only unrecoverable failures surface as errors.
    fn draw(&mut self, window: &mut dyn Window) -> Result<FrameStatus>;
    fn add_drawable(&mut self, id: DrawableId) -> Result<()>;
    fn remove_drawable(&mut self, id: DrawableId) -> Result<()>;
    fn set_clear_color(&mut self, rgb: [f32; 3]);
    /// Releases every GPU object. Calling it twice is a no-op.
    fn destroy(&mut self) -> Result<()>;
}
