// SPDX-License-Identifier: CEPL-1.0
//! The per-frame state machine.
//!
//! `begin_frame` waits on the slot fence, acquires an image and opens the
//! render pass. `end_frame` closes it, submits and presents. Resizes are only
//! recorded by `resize`; the next `begin_frame` notices the generation
//! mismatch and rebuilds the swapchain before any recording happens.
use anyhow::anyhow;
use ash::vk;
use hearth_render::{FrameError, FrameResult, RenderSize, Renderer};
use tracing::{debug, info, trace, warn};

use crate::context::VulkanContext;
use crate::driver::Driver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recreating,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
}

fn vk_fatal(what: &'static str) -> impl FnOnce(vk::Result) -> FrameError {
    move |e| FrameError::fatal(anyhow::Error::new(e).context(what))
}

pub struct FrameOrchestrator<D: Driver> {
    ctx: VulkanContext<D>,
    state: FrameState,
    /// Frame slot, cycles through `0..frames_in_flight`.
    current_frame: usize,
    image_index: u32,
    size_generation: u64,
    size_last_generation: u64,
    frame_number: u64,
    cached_size: RenderSize,
    recreating: bool,
    timeout_ns: u64,
    shut_down: bool,
}

impl<D: Driver> FrameOrchestrator<D> {
    pub fn new(ctx: VulkanContext<D>, size: RenderSize, timeout_ns: u64) -> Self {
        FrameOrchestrator {
            ctx,
            state: FrameState::Idle,
            current_frame: 0,
            image_index: 0,
            size_generation: 0,
            size_last_generation: 0,
            frame_number: 0,
            cached_size: size,
            recreating: false,
            timeout_ns,
            shut_down: false,
        }
    }

    pub fn context(&self) -> &VulkanContext<D> {
        &self.ctx
    }

    pub fn driver(&self) -> &D {
        self.ctx.driver()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// `(size_generation, size_last_generation)`; they differ while a resize is pending.
    pub fn generations(&self) -> (u64, u64) {
        (self.size_generation, self.size_last_generation)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Rebuilds the swapchain at the cached size. A zero size is a no-op
    /// that leaves the pending resize in place. Returns whether anything
    /// was rebuilt. On failure the generation stays pending so the next
    /// frame tries again.
    fn recreate(&mut self) -> anyhow::Result<bool> {
        if self.recreating {
            debug!("recreate already in progress");
            return Ok(false);
        }
        if self.cached_size.is_zero() {
            trace!("window minimized, keeping current swapchain");
            return Ok(false);
        }

        self.recreating = true;
        self.state = FrameState::Recreating;
        let result = self.ctx.rebuild_swapchain(self.cached_size);
        self.state = FrameState::Idle;

        let resynced = match result {
            Ok(r) => r,
            Err(e) => {
                self.recreating = false;
                return Err(e.context("swapchain recreation"));
            }
        };
        if resynced {
            self.current_frame = 0;
        }
        self.size_last_generation = self.size_generation;
        let extent = self.ctx.swapchain.extent();
        info!(
            "swapchain recreated at {}x{} (generation {})",
            extent.width, extent.height, self.size_generation
        );
        self.recreating = false;
        Ok(true)
    }

    fn record(&mut self) -> FrameResult<()> {
        let idx = self.image_index as usize;
        let extent = self.ctx.swapchain.extent();
        let d = &self.ctx.driver;

        let fb = self
            .ctx
            .framebuffers
            .get(idx)
            .ok_or_else(|| FrameError::fatal(anyhow!("no framebuffer for image {idx}")))?;
        let cmd = self
            .ctx
            .commands
            .get_mut(idx)
            .ok_or_else(|| FrameError::fatal(anyhow!("no command buffer for image {idx}")))?;

        cmd.reset(d)?;
        cmd.begin(d, false)?;

        // Flip Y so +Y points up in clip space.
        let viewport = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        d.cmd_set_viewport(cmd.handle(), &viewport);
        d.cmd_set_scissor(cmd.handle(), &scissor);

        self.ctx.render_pass.begin(d, cmd, fb)?;
        Ok(())
    }

    fn submit_and_present(&mut self) -> FrameResult<()> {
        let frame = self.current_frame;
        let idx = self.image_index as usize;
        let d = &self.ctx.driver;

        let cmd = self
            .ctx
            .commands
            .get_mut(idx)
            .ok_or_else(|| FrameError::fatal(anyhow!("no command buffer for image {idx}")))?;
        self.ctx.render_pass.end(d, cmd)?;
        cmd.end(d)?;

        self.state = FrameState::Submitting;

        // The image may still be in use by an older frame slot.
        if let Some(owner) = self.ctx.images_in_flight.get(idx) {
            self.ctx.sync.in_flight_fences[owner]
                .wait(d, u64::MAX)
                .map_err(vk_fatal("wait on image fence"))?;
        }
        self.ctx.images_in_flight.bind(idx, frame);

        let fence = &mut self.ctx.sync.in_flight_fences[frame];
        fence.reset(d).map_err(vk_fatal("reset in-flight fence"))?;

        let waits = [self.ctx.sync.image_available[frame]];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signals = [self.ctx.sync.queue_complete[frame]];
        let cmds = [cmd.handle()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&cmds)
            .signal_semaphores(&signals);
        d.queue_submit(self.ctx.queues.graphics, &submit, fence.handle())
            .map_err(vk_fatal("queue_submit"))?;
        cmd.mark_submitted()?;

        self.state = FrameState::Presenting;
        match self
            .ctx
            .swapchain
            .present(d, self.ctx.queues.present, signals[0], self.image_index)
        {
            Ok(false) => {}
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("present reports swapchain out of date, recreating next frame");
                self.size_generation += 1;
            }
            Err(e) => return Err(vk_fatal("queue_present")(e)),
        }

        self.current_frame = (frame + 1) % self.ctx.sync.frames_in_flight();
        self.frame_number += 1;
        Ok(())
    }
}

impl<D: Driver> Renderer for FrameOrchestrator<D> {
    fn resize(&mut self, size: RenderSize) {
        self.cached_size = size;
        self.size_generation += 1;
        debug!(
            "resize to {}x{} (generation {})",
            size.width, size.height, self.size_generation
        );
    }

    fn begin_frame(&mut self, _delta_time: f32) -> FrameResult<bool> {
        if self.shut_down {
            return Err(FrameError::fatal(anyhow!("renderer already shut down")));
        }
        if self.state != FrameState::Idle {
            return Err(FrameError::fatal(anyhow!(
                "begin_frame while {:?}",
                self.state
            )));
        }

        if self.recreating {
            self.ctx
                .driver
                .device_wait_idle()
                .map_err(vk_fatal("device_wait_idle"))?;
            return Ok(false);
        }

        // The frame that notices a resize never renders.
        if self.size_generation != self.size_last_generation {
            self.ctx
                .driver
                .device_wait_idle()
                .map_err(vk_fatal("device_wait_idle"))?;
            if let Err(e) = self.recreate() {
                warn!("{e:#}; retrying next frame");
            }
            return Ok(false);
        }

        let frame = self.current_frame;
        match self.ctx.sync.in_flight_fences[frame].wait(&self.ctx.driver, self.timeout_ns) {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => {
                return Err(FrameError::Timeout {
                    timeout_ns: self.timeout_ns,
                })
            }
            Err(e) => return Err(vk_fatal("wait on in-flight fence")(e)),
        }

        self.state = FrameState::Acquiring;
        let image_available = self.ctx.sync.image_available[frame];
        let acquired =
            self.ctx
                .swapchain
                .acquire_next_image(&self.ctx.driver, self.timeout_ns, image_available);
        match acquired {
            Ok((index, suboptimal)) => {
                // Still rendered and presented; the swapchain is rebuilt next frame.
                if suboptimal {
                    debug!("acquired image {index} from a suboptimal swapchain, recreating next frame");
                    self.size_generation += 1;
                }
                self.image_index = index;
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.state = FrameState::Idle;
                self.size_generation += 1;
                return Err(FrameError::AcquireFailed {
                    reason: "swapchain out of date".into(),
                });
            }
            Err(e @ (vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_SURFACE_LOST_KHR)) => {
                self.state = FrameState::Idle;
                return Err(vk_fatal("acquire_next_image")(e));
            }
            Err(e) => {
                self.state = FrameState::Idle;
                return Err(FrameError::AcquireFailed {
                    reason: format!("{e:?}"),
                });
            }
        }

        self.state = FrameState::Recording;
        if let Err(e) = self.record() {
            self.state = FrameState::Idle;
            return Err(e);
        }
        Ok(true)
    }

    fn end_frame(&mut self, _delta_time: f32) -> FrameResult<()> {
        if self.state != FrameState::Recording {
            return Err(FrameError::fatal(anyhow!(
                "end_frame without an open frame ({:?})",
                self.state
            )));
        }
        let result = self.submit_and_present();
        self.state = FrameState::Idle;
        result
    }

    fn frame_number(&self) -> u64 {
        self.frame_number
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.ctx.render_pass.set_clear_color(rgba);
    }

    fn set_vsync(&mut self, on: bool) {
        if self.ctx.swap_cfg.vsync != on {
            self.ctx.swap_cfg.vsync = on;
            self.size_generation += 1;
        }
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.ctx.destroy();
        self.shut_down = true;
        self.state = FrameState::Idle;
        debug!("frame resources released after {} frame(s)", self.frame_number);
    }
}
