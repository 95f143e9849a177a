// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use hearth_render::{RenderSize, VsyncMode};
use tracing::{debug, info};

use crate::device::DeviceQueues;
use crate::driver::Driver;
use crate::image::{create_image_view, Image, ImageDesc};

/// Surface capabilities as last queried for the selected device.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupportInfo {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportInfo {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub size: RenderSize,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
}

// Info only
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| formats[0])
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

/// Frames the CPU may run ahead of the GPU for a swapchain of `image_count`.
pub fn frames_in_flight_for(image_count: usize) -> usize {
    image_count.saturating_sub(1).max(1)
}

/// Presentable images, their views and the shared depth attachment.
#[derive(Debug)]
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Image,
    depth_format: vk::Format,
    max_frames_in_flight: usize,
    /// Bumped on every rebuild.
    generation: u64,
}

impl Swapchain {
    pub fn new<D: Driver>(
        driver: &D,
        support: &SwapchainSupportInfo,
        queues: &DeviceQueues,
        depth_format: vk::Format,
        cfg: SwapchainConfig,
    ) -> VkResult<Self> {
        build(driver, support, queues, depth_format, cfg, vk::SwapchainKHR::null(), 0)
    }

    /// Rebuilds the swapchain in place against fresh surface support.
    ///
    /// The old handle is passed as `old_swapchain` and destroyed once the
    /// replacement exists. The caller must have idled the device.
    pub fn recreate<D: Driver>(
        &mut self,
        driver: &D,
        support: &SwapchainSupportInfo,
        queues: &DeviceQueues,
        depth_format: vk::Format,
        cfg: SwapchainConfig,
    ) -> VkResult<()> {
        let next = build(
            driver,
            support,
            queues,
            depth_format,
            cfg,
            self.handle,
            self.generation + 1,
        )?;
        let mut old = std::mem::replace(self, next);
        old.destroy(driver);
        Ok(())
    }

    pub fn acquire_next_image<D: Driver>(
        &self,
        driver: &D,
        timeout_ns: u64,
        image_available: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        driver.acquire_next_image(self.handle, timeout_ns, image_available)
    }

    /// Queues `image_index` for presentation once `render_complete` signals.
    /// `Ok(true)` means the swapchain is suboptimal.
    pub fn present<D: Driver>(
        &self,
        driver: &D,
        queue: vk::Queue,
        render_complete: vk::Semaphore,
        image_index: u32,
    ) -> VkResult<bool> {
        let waits = [render_complete];
        let swapchains = [self.handle];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        driver.queue_present(queue, &info)
    }

    pub fn destroy<D: Driver>(&mut self, driver: &D) {
        self.depth.destroy(driver);
        for view in self.views.drain(..) {
            driver.destroy_image_view(view);
        }
        // images belong to the swapchain
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.view().unwrap_or_default()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn max_frames_in_flight(&self) -> usize {
        self.max_frames_in_flight
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn build<D: Driver>(
    driver: &D,
    support: &SwapchainSupportInfo,
    queues: &DeviceQueues,
    depth_format: vk::Format,
    cfg: SwapchainConfig,
    old_swapchain: vk::SwapchainKHR,
    generation: u64,
) -> VkResult<Swapchain> {
    if !support.is_adequate() {
        return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
    }
    let caps = &support.capabilities;
    let surface_format = choose_surface_format(&support.formats);
    let present_mode = choose_present_mode(&support.present_modes, cfg.vsync, cfg.vsync_mode);
    let extent = choose_extent(caps, cfg.size);
    let min_count = choose_image_count(caps);

    let pre_transform = if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    };

    // Separate graphics and present families share the images concurrently.
    let families = [queues.graphics_family, queues.present_family];
    let info = vk::SwapchainCreateInfoKHR::default()
        .min_image_count(min_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .pre_transform(pre_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);
    let info = if queues.graphics_family != queues.present_family {
        info.image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&families)
    } else {
        info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
    };

    let handle = driver.create_swapchain(&info)?;
    let (images, views, depth) =
        match attach_images(driver, handle, surface_format.format, extent, depth_format) {
            Ok(parts) => parts,
            Err(e) => {
                driver.destroy_swapchain(handle);
                return Err(e);
            }
        };

    let max_frames_in_flight = frames_in_flight_for(images.len());
    info!(
        "swapchain #{generation}: {}x{} fmt {:?} present {} images {} (frames in flight {})",
        extent.width,
        extent.height,
        surface_format.format,
        pm_name(present_mode),
        images.len(),
        max_frames_in_flight
    );
    debug!("swapchain depth format {:?}", depth_format);

    Ok(Swapchain {
        handle,
        surface_format,
        present_mode,
        extent,
        images,
        views,
        depth,
        depth_format,
        max_frames_in_flight,
        generation,
    })
}

/// Color views for every swapchain image plus the depth attachment.
/// Releases whatever it created if any step fails.
fn attach_images<D: Driver>(
    driver: &D,
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    depth_format: vk::Format,
) -> VkResult<(Vec<vk::Image>, Vec<vk::ImageView>, Image)> {
    let images = driver.swapchain_images(handle)?;
    let mut views = Vec::with_capacity(images.len());
    let release = |views: &mut Vec<vk::ImageView>| {
        for view in views.drain(..) {
            driver.destroy_image_view(view);
        }
    };

    for &img in &images {
        match create_image_view(driver, img, format, vk::ImageAspectFlags::COLOR) {
            Ok(view) => views.push(view),
            Err(e) => {
                release(&mut views);
                return Err(e);
            }
        }
    }

    let depth = Image::new(
        driver,
        &ImageDesc {
            width: extent.width,
            height: extent.height,
            format: depth_format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            memory_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            view_aspect: Some(vk::ImageAspectFlags::DEPTH),
        },
    );
    match depth {
        Ok(depth) => Ok((images, views, depth)),
        Err(e) => {
            release(&mut views);
            Err(e)
        }
    }
}
