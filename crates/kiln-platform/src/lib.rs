// SPDX-License-Identifier: CEPL-1.0
//! Windowing on winit, driven by pumping the event loop from the host's
//! own frame loop instead of handing control to `run_app`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use kiln_render::RenderSize;
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowId};

pub use winit;

/// Window plus everything the event handlers learned about it.
pub struct WindowState {
    title: String,
    initial: PhysicalSize<u32>,
    window: Option<Window>,
    size: RenderSize,
    resized: bool,
    close_requested: bool,
    error: Option<winit::error::OsError>,
}

impl WindowState {
    fn new(title: &str, width: u32, height: u32) -> Self {
        Self {
            title: title.to_owned(),
            initial: PhysicalSize::new(width, height),
            window: None,
            size: RenderSize::new(width, height),
            resized: false,
            close_requested: false,
            error: None,
        }
    }

    fn record_size(&mut self, size: PhysicalSize<u32>) {
        let size = RenderSize::new(size.width, size.height);
        if size != self.size {
            debug!("resized to {}x{}", size.width, size.height);
            self.size = size;
            self.resized = true;
        }
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(self.initial);
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let size = window.inner_size();
                self.size = RenderSize::new(size.width, size.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window.as_ref().map(Window::id) != Some(id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.close_requested = true;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => self.record_size(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(size) = self.window.as_ref().map(Window::inner_size) {
                    self.record_size(size);
                }
            }
            _ => {}
        }
    }
}

pub struct Platform {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl Platform {
    /// Opens a window and pumps until it exists.
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let mut platform = Self {
            event_loop,
            state: WindowState::new(title, width, height),
        };
        while platform.state.window.is_none() {
            platform.pump();
            if let Some(e) = platform.state.error.take() {
                return Err(anyhow!("create_window: {e}"));
            }
            if platform.state.close_requested {
                return Err(anyhow!("event loop exited before the window was created"));
            }
        }
        // the creation-time size is not a resize
        platform.state.resized = false;
        Ok(platform)
    }

    /// Handles whatever events are pending without blocking.
    pub fn pump(&mut self) {
        pump(&mut self.event_loop, &mut self.state, Some(Duration::ZERO));
    }

    pub fn close_requested(&self) -> bool {
        self.state.close_requested
    }

    pub fn size(&self) -> RenderSize {
        self.state.size
    }

    pub fn raw_window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    pub fn window(&mut self) -> PumpedWindow<'_> {
        PumpedWindow {
            event_loop: &mut self.event_loop,
            state: &mut self.state,
        }
    }
}

fn pump(event_loop: &mut EventLoop<()>, state: &mut WindowState, timeout: Option<Duration>) {
    if let PumpStatus::Exit(code) = event_loop.pump_app_events(timeout, state) {
        debug!("event loop exited with {code}");
        state.close_requested = true;
    }
}

/// [`kiln_render::Window`] that blocks in the event loop while waiting.
pub struct PumpedWindow<'a> {
    event_loop: &'a mut EventLoop<()>,
    state: &'a mut WindowState,
}

impl kiln_render::Window for PumpedWindow<'_> {
    fn framebuffer_size(&self) -> RenderSize {
        self.state.size
    }

    fn wait_for_next_event(&mut self) {
        if !self.state.close_requested {
            pump(self.event_loop, self.state, None);
        }
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn is_closing(&self) -> bool {
        self.state.close_requested
    }
}
