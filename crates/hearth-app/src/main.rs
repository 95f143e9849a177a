// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::Parser;
use hearth_core::{init_tracing, FrameClock};
use hearth_render::{RenderConfig, RenderPacket, RenderSize, Renderer};
use hearth_render_vk::VkRenderer;
use serde::Deserialize;
use tracing::{error, info, warn};

use hearth_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "hearth.toml")]
    config: PathBuf,
    /// Application name reported to the driver
    #[arg(long, default_value = "hearth")]
    app_name: String,
    /// Exit after this many rendered frames (0 runs until the window closes)
    #[arg(long, default_value_t = 0)]
    frames: u64,
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
            title: "hearth".into(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderConfig,
    #[serde(default)]
    window: WindowCfg,
}

fn load_cfg(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => {
            info!("no config at {}, using defaults", path.display());
            return AppCfg::default();
        }
    };
    toml::from_str::<AppCfg>(&text).unwrap_or_else(|e| {
        warn!("ignoring malformed {}: {e}", path.display());
        AppCfg::default()
    })
}

struct App {
    app_name: String,
    cfg: AppCfg,
    max_frames: u64,
    // dropped before the window it renders into
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,
    clock: FrameClock,
    paused: bool,
    exiting: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    fn init_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.cfg.window.width,
                self.cfg.window.height,
            ));
        let window = event_loop.create_window(attrs)?;

        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        let renderer = VkRenderer::initialize(
            &self.app_name,
            &window,
            &window,
            self.render_size,
            &self.cfg.render,
        )?;
        info!(
            "renderer up, vsync = {} ({:?})",
            self.cfg.render.vsync, self.cfg.render.vsync_mode
        );

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.clock.start();
        Ok(())
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(mut r) = self.renderer.take() {
            r.shutdown();
        }
        self.window = None;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        let packet = RenderPacket {
            delta_time: self.clock.update(),
        };
        match renderer.draw_frame(&packet) {
            Ok(_) => {}
            Err(e) => {
                error!("fatal render error, shutting down");
                self.failure = Some(anyhow!(e));
                self.exit(event_loop);
                return;
            }
        }

        let done = renderer.frame_number();
        if self.max_frames > 0 && done >= self.max_frames {
            info!("rendered {done} frame(s) in {:.2}s", self.clock.elapsed_secs());
            self.exit(event_loop);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init_window(event_loop) {
                error!("initialization failed: {e:#}");
                self.failure = Some(e);
                self.exit(event_loop);
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        self.paused = self.render_size.is_zero();
        info!("resumed, paused = {}", self.paused);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("close requested");
                self.exit(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                let now_paused = self.render_size.is_zero();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "resized to {}x{} (paused = {})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                }
                // Always forward; a zero size is reconciled as a no-op.
                if let Some(r) = &mut self.renderer {
                    r.resize(self.render_size);
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.exiting {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        app_name: args.app_name,
        cfg,
        max_frames: args.frames,
        renderer: None,
        window: None,
        render_size: RenderSize {
            width: 0,
            height: 0,
        },
        clock: FrameClock::new(),
        paused: false,
        exiting: false,
        failure: None,
    };

    event_loop.run_app(&mut app)?;
    match app.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
