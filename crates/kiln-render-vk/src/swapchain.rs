// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bitflags::bitflags;
use kiln_render::RenderSize;
use tracing::{debug, info, warn};

use crate::device::SurfaceSnapshot;
use crate::error::{GpuError, RenderError};
use crate::gpu::{AcquireOutcome, Gpu, PresentOutcome, SwapchainDesc};

bitflags! {
    /// Present modes a surface advertises.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PresentModes: u8 {
        const IMMEDIATE = 1 << 0;
        const MAILBOX = 1 << 1;
        const FIFO = 1 << 2;
        const FIFO_RELAXED = 1 << 3;
    }
}

impl PresentModes {
    pub fn from_supported(modes: &[vk::PresentModeKHR]) -> Self {
        modes.iter().fold(Self::empty(), |acc, &m| {
            acc | match m {
                vk::PresentModeKHR::IMMEDIATE => Self::IMMEDIATE,
                vk::PresentModeKHR::MAILBOX => Self::MAILBOX,
                vk::PresentModeKHR::FIFO => Self::FIFO,
                vk::PresentModeKHR::FIFO_RELAXED => Self::FIFO_RELAXED,
                _ => Self::empty(),
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentModeChoice {
    pub mode: vk::PresentModeKHR,
    /// Non-blocking presentation was requested but the surface only offers FIFO.
    pub fell_back: bool,
}

/// Vsync always gets FIFO, which every surface supports. Without vsync,
/// mailbox is preferred over immediate (no tearing).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> PresentModeChoice {
    let supported = PresentModes::from_supported(modes);
    let fifo = PresentModeChoice {
        mode: vk::PresentModeKHR::FIFO,
        fell_back: false,
    };
    if vsync {
        return fifo;
    }
    [
        (PresentModes::MAILBOX, vk::PresentModeKHR::MAILBOX),
        (PresentModes::IMMEDIATE, vk::PresentModeKHR::IMMEDIATE),
    ]
    .into_iter()
    .find(|(flag, _)| supported.contains(*flag))
    .map(|(_, mode)| PresentModeChoice {
        mode,
        fell_back: false,
    })
    .unwrap_or(PresentModeChoice {
        fell_back: true,
        ..fifo
    })
}

const SRGB_8BIT: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8_SRGB,
    vk::Format::R8G8B8_SRGB,
];

/// An 8-bit sRGB format in the sRGB-nonlinear color space if offered,
/// otherwise whatever the surface lists first.
pub fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // a lone UNDEFINED entry means the surface takes anything
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            });
        }
    }
    formats
        .iter()
        .copied()
        .find(|f| {
            SRGB_8BIT.contains(&f.format) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// `current_extent.width == u32::MAX` means the surface follows whatever
/// extent the swapchain asks for; the window size is used, clamped.
pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Builds a swapchain for the current surface state. A `predecessor`
    /// is chained as `old_swapchain` so frames already queued on it drain.
    pub fn create<G: Gpu>(
        gpu: &G,
        snapshot: &SurfaceSnapshot,
        vsync: bool,
        window: RenderSize,
        predecessor: Option<&Swapchain>,
    ) -> Result<Self, RenderError> {
        let caps = &snapshot.capabilities;
        let surface_format =
            pick_surface_format(&snapshot.formats).ok_or(RenderError::NoSurfaceFormat)?;
        let present = choose_present_mode(&snapshot.present_modes, vsync);
        if present.fell_back {
            warn!("vsync off requested but surface offers neither MAILBOX nor IMMEDIATE; using FIFO");
        }
        let desc = SwapchainDesc {
            surface_format,
            present_mode: present.mode,
            extent: extent_from_caps(caps, window),
            image_count: image_count(caps),
            pre_transform: caps.current_transform,
            old_swapchain: predecessor.map_or(vk::SwapchainKHR::null(), |p| p.handle),
        };

        let handle = gpu.create_swapchain(&desc)?;
        let images = match gpu.swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                gpu.destroy_swapchain(handle);
                return Err(e.into());
            }
        };
        let mut swapchain = Self {
            handle,
            surface_format,
            present_mode: present.mode,
            extent: desc.extent,
            images,
            views: Vec::new(),
        };
        for &image in &swapchain.images {
            match gpu.create_image_view(image, surface_format.format) {
                Ok(view) => swapchain.views.push(view),
                Err(e) => {
                    swapchain.destroy(gpu);
                    return Err(e.into());
                }
            }
        }

        info!(
            "swapchain: {:?} / {:?}, present_mode: {:?}, extent: {}x{}, images: {} (min={})",
            surface_format.format,
            surface_format.color_space,
            present.mode,
            desc.extent.width,
            desc.extent.height,
            swapchain.images.len(),
            caps.min_image_count,
        );
        Ok(swapchain)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn acquire<G: Gpu>(
        &self,
        gpu: &G,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome, GpuError> {
        gpu.acquire_next_image(self.handle, u64::MAX, signal)
    }

    pub fn present<G: Gpu>(
        &self,
        gpu: &G,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome, GpuError> {
        gpu.present(self.handle, image_index, wait)
    }

    /// Tears down a swapchain that a successor was already chained to.
    /// The device must be idle.
    pub fn retire<G: Gpu>(self, gpu: &G) {
        debug!("retiring swapchain {:?}", self.handle);
        self.destroy(gpu);
    }

    /// Views first; images belong to the swapchain and go with it.
    pub fn destroy<G: Gpu>(self, gpu: &G) {
        for view in self.views {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_swapchain(self.handle);
    }
}
