// SPDX-License-Identifier: CEPL-1.0
//! Command buffers with an explicit recording state.
//!
//! Every driver call that moves a buffer between states is checked against
//! [`CommandBufferState::can_transition`] first, so an out-of-order call is
//! rejected before it reaches the GPU.
use ash::vk;
use hearth_render::FrameError;
use thiserror::Error;

use crate::driver::Driver;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferState {
    NotAllocated,
    Ready,
    Recording,
    InRenderPass,
    RecordingEnded,
    Submitted,
}

impl CommandBufferState {
    pub fn can_transition(self, to: CommandBufferState) -> bool {
        use CommandBufferState::*;
        matches!(
            (self, to),
            (NotAllocated, Ready)
                | (Ready, Recording)
                | (Recording, InRenderPass)
                | (InRenderPass, Recording)
                | (Recording, RecordingEnded)
                | (RecordingEnded, Submitted)
                | (Ready | RecordingEnded | Submitted, Ready)
        )
    }
}

#[derive(Debug, Error)]
pub enum CommandBufferError {
    #[error("illegal command buffer transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: CommandBufferState,
        to: CommandBufferState,
    },
    #[error(transparent)]
    Vulkan(#[from] vk::Result),
}

impl From<CommandBufferError> for FrameError {
    fn from(err: CommandBufferError) -> Self {
        FrameError::fatal(err)
    }
}

type Result<T> = std::result::Result<T, CommandBufferError>;

#[derive(Debug)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBuffer {
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    fn check(&self, to: CommandBufferState) -> Result<()> {
        if self.state.can_transition(to) {
            Ok(())
        } else {
            Err(CommandBufferError::IllegalTransition {
                from: self.state,
                to,
            })
        }
    }

    fn transition(&mut self, to: CommandBufferState) -> Result<()> {
        self.check(to)?;
        self.state = to;
        Ok(())
    }

    /// Starts recording. `one_time` marks the buffer single-submit.
    pub fn begin<D: Driver>(&mut self, driver: &D, one_time: bool) -> Result<()> {
        self.check(CommandBufferState::Recording)?;
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        driver.begin_command_buffer(
            self.handle,
            &vk::CommandBufferBeginInfo::default().flags(flags),
        )?;
        self.transition(CommandBufferState::Recording)
    }

    pub fn end<D: Driver>(&mut self, driver: &D) -> Result<()> {
        self.check(CommandBufferState::RecordingEnded)?;
        driver.end_command_buffer(self.handle)?;
        self.transition(CommandBufferState::RecordingEnded)
    }

    pub fn reset<D: Driver>(&mut self, driver: &D) -> Result<()> {
        self.check(CommandBufferState::Ready)?;
        driver.reset_command_buffer(self.handle)?;
        self.transition(CommandBufferState::Ready)
    }

    pub(crate) fn enter_render_pass(&mut self) -> Result<()> {
        self.transition(CommandBufferState::InRenderPass)
    }

    pub(crate) fn leave_render_pass(&mut self) -> Result<()> {
        self.transition(CommandBufferState::Recording)
    }

    pub fn mark_submitted(&mut self) -> Result<()> {
        self.transition(CommandBufferState::Submitted)
    }
}

/// Pool on the graphics family with one buffer per swapchain image.
#[derive(Debug, Default)]
pub struct CommandBufferPool {
    pool: vk::CommandPool,
    buffers: Vec<CommandBuffer>,
}

impl CommandBufferPool {
    pub fn new<D: Driver>(driver: &D, graphics_family: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = driver.create_command_pool(&info)?;
        Ok(CommandBufferPool {
            pool,
            buffers: Vec::new(),
        })
    }

    /// Frees the current buffers and allocates `count` fresh primary ones.
    pub fn regenerate<D: Driver>(&mut self, driver: &D, count: usize) -> Result<()> {
        self.free_all(driver);
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let handles = driver.allocate_command_buffers(&info)?;
        self.buffers = handles
            .into_iter()
            .map(|handle| CommandBuffer {
                handle,
                state: CommandBufferState::NotAllocated,
            })
            .collect();
        for cb in &mut self.buffers {
            cb.transition(CommandBufferState::Ready)?;
        }
        Ok(())
    }

    pub fn free_all<D: Driver>(&mut self, driver: &D) {
        if self.buffers.is_empty() {
            return;
        }
        let handles: Vec<_> = self.buffers.drain(..).map(|cb| cb.handle).collect();
        driver.free_command_buffers(self.pool, &handles);
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut CommandBuffer> {
        self.buffers.get_mut(index)
    }

    pub fn get(&self, index: usize) -> Option<&CommandBuffer> {
        self.buffers.get(index)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn destroy<D: Driver>(&mut self, driver: &D) {
        self.free_all(driver);
        if self.pool != vk::CommandPool::null() {
            driver.destroy_command_pool(self.pool);
            self.pool = vk::CommandPool::null();
        }
    }
}
