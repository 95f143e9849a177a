// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for `hearth-render`.
//!
//! [`VkRenderer`] owns the instance, surface and logical device. Per-frame
//! work is delegated to a [`FrameOrchestrator`] over the real [`AshDriver`].
#![deny(unsafe_op_in_unsafe_fn)]
pub mod command;
pub mod context;
pub mod device;
pub mod driver;
pub mod frame;
pub mod framebuffer;
pub mod image;
pub mod instance;
pub mod render_pass;
pub mod selector;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod mock;

use anyhow::{Context, Result};
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use hearth_render::{FrameResult, RenderConfig, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

pub use context::VulkanContext;
pub use driver::{AshDriver, Driver};
pub use frame::{FrameOrchestrator, FrameState};
pub use selector::{DeviceRequirements, QueueCapabilities, SelectionError};

use instance::DebugMessenger;
use selector::{select_physical_device, AshProbe};

pub struct VkRenderer {
    frames: FrameOrchestrator<AshDriver>,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    instance: Instance,
    _entry: Entry,
    destroyed: bool,
}

fn init_frames(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    size: RenderSize,
    cfg: &RenderConfig,
) -> Result<FrameOrchestrator<AshDriver>> {
    let probe = AshProbe {
        instance,
        surface_loader,
        surface,
    };
    let req = DeviceRequirements::from_config(cfg);
    let candidate = select_physical_device(&probe, &req).context("select physical device")?;
    let (device, queues) = device::create_logical_device(instance, &candidate, &req)?;

    let fallback = device.clone();
    let driver = AshDriver::new(instance, device, candidate.handle, surface_loader, surface);
    match VulkanContext::new(driver, queues, size, cfg) {
        Ok(ctx) => Ok(FrameOrchestrator::new(ctx, size, cfg.frame_timeout_ns())),
        Err(e) => {
            unsafe { fallback.destroy_device(None) };
            Err(e)
        }
    }
}

impl VkRenderer {
    /// Brings up instance, surface, device and the swapchain resources for a
    /// window of `size`. Any failure here is fatal to the renderer.
    pub fn initialize(
        app_name: &str,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self> {
        // SAFETY: the loader library stays loaded for as long as `entry` lives,
        // and `entry` is the last field dropped.
        let entry = unsafe { Entry::load() }.context("load the Vulkan loader")?;
        let display_raw = display
            .display_handle()
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .as_raw();

        let (instance, validation) =
            instance::create_instance(&entry, app_name, display_raw, cfg.validation)?;

        let mut debug = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("continuing without debug messenger: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let unwind = |debug: &mut Option<DebugMessenger>| {
            if let Some(mut d) = debug.take() {
                d.destroy();
            }
            unsafe { instance.destroy_instance(None) };
        };

        let surface = match hearth_platform::create_surface(&entry, &instance, window, display) {
            Ok(s) => s,
            Err(e) => {
                unwind(&mut debug);
                return Err(e);
            }
        };
        let surface_loader = surface::Instance::new(&entry, &instance);

        let frames = match init_frames(&instance, &surface_loader, surface, size, cfg) {
            Ok(f) => f,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                unwind(&mut debug);
                return Err(e);
            }
        };

        info!("Vulkan renderer ready at {}x{}", size.width, size.height);
        Ok(VkRenderer {
            frames,
            debug,
            surface_loader,
            surface,
            instance,
            _entry: entry,
            destroyed: false,
        })
    }

    pub fn frames(&self) -> &FrameOrchestrator<AshDriver> {
        &self.frames
    }
}

impl Renderer for VkRenderer {
    fn resize(&mut self, size: RenderSize) {
        self.frames.resize(size);
    }

    fn begin_frame(&mut self, delta_time: f32) -> FrameResult<bool> {
        self.frames.begin_frame(delta_time)
    }

    fn end_frame(&mut self, delta_time: f32) -> FrameResult<()> {
        self.frames.end_frame(delta_time)
    }

    fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.frames.set_clear_color(rgba);
    }

    fn set_vsync(&mut self, on: bool) {
        self.frames.set_vsync(on);
    }

    /// Releases everything in reverse creation order: frame resources,
    /// device, debug messenger, surface, instance.
    fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        self.frames.shutdown();
        self.frames.driver().destroy_device();
        if let Some(mut d) = self.debug.take() {
            d.destroy();
        }
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
        self.destroyed = true;
        info!("Vulkan renderer shut down");
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
