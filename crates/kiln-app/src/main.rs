// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod scene;

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use kiln_core::{fatal, init_tracing};
use kiln_platform::Platform;
use kiln_render::{FrameStatus, Renderer};
use kiln_render_vk::{create_renderer, RendererConfig};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::scene::{DemoScene, BLINKER};

/// Frames between toggling the blinking drawable.
const BLINK_PERIOD: u64 = 120;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "kiln.toml")]
    config: PathBuf,
    /// Override `render.vsync`
    #[arg(long)]
    vsync: Option<bool>,
    /// Override `render.frames_in_flight`
    #[arg(long)]
    frames_in_flight: Option<NonZeroUsize>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 3],
    vsync: bool,
    frames_in_flight: NonZeroUsize,
    pipeline_cache: PathBuf,
    validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let d = RendererConfig::default();
        RenderCfg {
            clear_color: d.clear_color,
            vsync: d.vsync,
            frames_in_flight: d.frames_in_flight,
            pipeline_cache: d.pipeline_cache_path,
            validation: d.validation,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "kiln".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
    #[serde(default)]
    window: WindowCfg,
}

impl AppCfg {
    fn renderer_config(&self, args: &Args) -> RendererConfig {
        RendererConfig {
            vsync: args.vsync.unwrap_or(self.render.vsync),
            frames_in_flight: args.frames_in_flight.unwrap_or(self.render.frames_in_flight),
            clear_color: self.render.clear_color,
            pipeline_cache_path: self.render.pipeline_cache.clone(),
            validation: self.render.validation,
        }
    }
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => {
            debug!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = load_cfg(&args.config);
    let config = cfg.renderer_config(&args);
    info!(
        "vsync={} frames_in_flight={}",
        config.vsync, config.frames_in_flight
    );

    let mut platform = Platform::new(&cfg.window.title, cfg.window.width, cfg.window.height)?;
    let scene = DemoScene::new();
    let ids: Vec<_> = scene.ids().collect();

    // declared after the platform: dropped before the window it renders into
    let window = platform.raw_window().context("window vanished")?;
    let mut renderer = create_renderer(window, window, platform.size(), scene, config)
        .unwrap_or_else(|e| fatal(&e));
    for id in ids {
        renderer
            .add_drawable(id)
            .unwrap_or_else(|e| fatal(&e));
    }

    let mut presented: u64 = 0;
    let mut blinker_on = true;
    let mut frames = 0u32;
    let mut last_fps_instant = Instant::now();
    while !platform.close_requested() {
        platform.pump();
        if platform.close_requested() {
            break;
        }
        match renderer.draw(&mut platform.window()) {
            Ok(FrameStatus::Presented | FrameStatus::PresentedAndRecreated) => {
                presented += 1;
                frames += 1;
            }
            Ok(FrameStatus::Recreated | FrameStatus::Closing) => continue,
            Err(e) => fatal(&e),
        }
        if presented % BLINK_PERIOD == 0 {
            let toggled = if blinker_on {
                renderer.remove_drawable(BLINKER)
            } else {
                renderer.add_drawable(BLINKER)
            };
            toggled.unwrap_or_else(|e| fatal(&e));
            blinker_on = !blinker_on;
        }

        let now = Instant::now();
        if now.duration_since(last_fps_instant) >= Duration::from_secs(1) {
            info!("fps ~ {frames}");
            frames = 0;
            last_fps_instant = now;
        }
    }

    info!("exiting after {presented} frames");
    renderer.destroy().unwrap_or_else(|e| fatal(&e));
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    run(Args::parse())
}
