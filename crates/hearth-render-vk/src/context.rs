// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use hearth_render::{RenderConfig, RenderSize};
use tracing::{debug, warn};

use crate::command::CommandBufferPool;
use crate::device::DeviceQueues;
use crate::driver::Driver;
use crate::framebuffer::FrameBufferSet;
use crate::render_pass::RenderPass;
use crate::swapchain::{Swapchain, SwapchainConfig, SwapchainSupportInfo};
use crate::sync::{ImagesInFlight, SyncPrimitives};

/// Every GPU object the frame loop touches, owned in one place.
pub struct VulkanContext<D: Driver> {
    pub(crate) driver: D,
    pub(crate) queues: DeviceQueues,
    pub(crate) support: SwapchainSupportInfo,
    pub(crate) swap_cfg: SwapchainConfig,
    pub(crate) swapchain: Swapchain,
    pub(crate) render_pass: RenderPass,
    pub(crate) framebuffers: FrameBufferSet,
    pub(crate) commands: CommandBufferPool,
    pub(crate) sync: SyncPrimitives,
    pub(crate) images_in_flight: ImagesInFlight,
}

fn detect_depth<D: Driver>(driver: &D) -> Result<vk::Format> {
    driver
        .detect_depth_format()
        .ok_or_else(|| anyhow!("no supported depth attachment format"))
}

impl<D: Driver> VulkanContext<D> {
    pub fn new(driver: D, queues: DeviceQueues, size: RenderSize, cfg: &RenderConfig) -> Result<Self> {
        let support = driver.swapchain_support().context("query swapchain support")?;
        let depth_format = detect_depth(&driver)?;
        let swap_cfg = SwapchainConfig {
            size,
            vsync: cfg.vsync,
            vsync_mode: cfg.vsync_mode,
        };

        let mut swapchain = Swapchain::new(&driver, &support, &queues, depth_format, swap_cfg)
            .context("create swapchain")?;
        let render_pass = match RenderPass::new(
            &driver,
            swapchain.format(),
            depth_format,
            swapchain.extent(),
            cfg.clear_color,
            cfg.depth_clear,
            cfg.stencil_clear,
        ) {
            Ok(rp) => rp,
            Err(e) => {
                swapchain.destroy(&driver);
                return Err(e).context("create render pass");
            }
        };

        let mut ctx = VulkanContext {
            driver,
            queues,
            support,
            swap_cfg,
            swapchain,
            render_pass,
            framebuffers: FrameBufferSet::default(),
            commands: CommandBufferPool::default(),
            sync: SyncPrimitives::default(),
            images_in_flight: ImagesInFlight::default(),
        };
        if let Err(e) = ctx.populate() {
            ctx.destroy();
            return Err(e);
        }
        Ok(ctx)
    }

    fn populate(&mut self) -> Result<()> {
        let d = &self.driver;
        self.framebuffers
            .regenerate(
                d,
                self.render_pass.handle(),
                self.swapchain.views(),
                self.swapchain.depth_view(),
                self.swapchain.extent(),
            )
            .context("create framebuffers")?;
        self.commands =
            CommandBufferPool::new(d, self.queues.graphics_family).context("create command pool")?;
        self.commands
            .regenerate(d, self.swapchain.image_count())
            .context("allocate command buffers")?;
        self.sync = SyncPrimitives::new(d, self.swapchain.max_frames_in_flight())
            .context("create sync objects")?;
        self.images_in_flight = ImagesInFlight::new(self.swapchain.image_count());
        Ok(())
    }

    /// Rebuilds the swapchain at `size` and everything sized by it.
    ///
    /// Returns `true` when the frame slot count changed and sync objects were
    /// rebuilt, in which case the caller restarts at slot 0.
    pub(crate) fn rebuild_swapchain(&mut self, size: RenderSize) -> Result<bool> {
        let d = &self.driver;
        d.device_wait_idle().context("device_wait_idle before recreate")?;
        self.images_in_flight.clear();

        self.support = d.swapchain_support().context("requery swapchain support")?;
        let depth_format = detect_depth(d)?;
        self.swap_cfg.size = size;
        self.swapchain
            .recreate(d, &self.support, &self.queues, depth_format, self.swap_cfg)
            .context("recreate swapchain")?;
        self.render_pass
            .sync_to(d, self.swapchain.format(), depth_format, self.swapchain.extent())
            .context("sync render pass")?;

        self.commands.free_all(d);
        self.framebuffers.destroy(d);
        self.framebuffers
            .regenerate(
                d,
                self.render_pass.handle(),
                self.swapchain.views(),
                self.swapchain.depth_view(),
                self.swapchain.extent(),
            )
            .context("regenerate framebuffers")?;
        self.commands
            .regenerate(d, self.swapchain.image_count())
            .context("regenerate command buffers")?;

        let frames = self.swapchain.max_frames_in_flight();
        let resynced = frames != self.sync.frames_in_flight();
        if resynced {
            debug!(
                "frames in flight {} -> {}",
                self.sync.frames_in_flight(),
                frames
            );
            self.sync.destroy(d);
            self.sync = SyncPrimitives::new(d, frames).context("rebuild sync objects")?;
        }
        self.images_in_flight.resize(self.swapchain.image_count());
        Ok(resynced)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn sync(&self) -> &SyncPrimitives {
        &self.sync
    }

    pub fn images_in_flight(&self) -> &ImagesInFlight {
        &self.images_in_flight
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    /// Waits for the GPU and releases everything in reverse creation order.
    /// Leaves the driver itself alive.
    pub fn destroy(&mut self) {
        let d = &self.driver;
        if let Err(e) = d.device_wait_idle() {
            warn!("device_wait_idle during teardown: {e:?}");
        }
        self.sync.destroy(d);
        self.commands.destroy(d);
        self.framebuffers.destroy(d);
        self.render_pass.destroy(d);
        self.swapchain.destroy(d);
        self.images_in_flight.clear();
    }
}
