// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

use crate::driver::Driver;

/// One framebuffer per swapchain image: `[color view, shared depth view]`.
#[derive(Debug, Default)]
pub struct FrameBufferSet {
    framebuffers: Vec<vk::Framebuffer>,
}

impl FrameBufferSet {
    /// Destroys any existing framebuffers and builds one per color view.
    pub fn regenerate<D: Driver>(
        &mut self,
        driver: &D,
        render_pass: vk::RenderPass,
        color_views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<()> {
        self.destroy(driver);
        self.framebuffers.reserve(color_views.len());
        for &view in color_views {
            let attachments = [view, depth_view];
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            self.framebuffers.push(driver.create_framebuffer(&info)?);
        }
        Ok(())
    }

    pub fn get(&self, image_index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index).copied()
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    pub fn destroy<D: Driver>(&mut self, driver: &D) {
        for fb in self.framebuffers.drain(..) {
            driver.destroy_framebuffer(fb);
        }
    }
}
