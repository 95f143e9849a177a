// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

use crate::command::{CommandBuffer, CommandBufferError};
use crate::driver::Driver;

/// Clear color plus depth, both cleared and stored.
pub fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: vk::Format,
) -> [vk::AttachmentDescription; 2] {
    let color = vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);
    let depth = vk::AttachmentDescription::default()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    [color, depth]
}

/// Holds color writes back until the presentation engine is done with the image.
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
}

#[derive(Debug)]
pub struct RenderPass {
    handle: vk::RenderPass,
    color_format: vk::Format,
    depth_format: vk::Format,
    area: vk::Rect2D,
    clear_color: [f32; 4],
    depth: f32,
    stencil: u32,
}

impl RenderPass {
    pub fn new<D: Driver>(
        driver: &D,
        color_format: vk::Format,
        depth_format: vk::Format,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        depth: f32,
        stencil: u32,
    ) -> VkResult<Self> {
        let attachments = attachment_descriptions(color_format, depth_format);
        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref)];
        let deps = [external_dependency()];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpass)
            .dependencies(&deps);
        let handle = driver.create_render_pass(&info)?;

        Ok(RenderPass {
            handle,
            color_format,
            depth_format,
            area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_color,
            depth,
            stencil,
        })
    }

    /// Rebuilds the pass if the attachment formats changed, then tracks `extent`.
    pub fn sync_to<D: Driver>(
        &mut self,
        driver: &D,
        color_format: vk::Format,
        depth_format: vk::Format,
        extent: vk::Extent2D,
    ) -> VkResult<()> {
        if color_format != self.color_format || depth_format != self.depth_format {
            let next = RenderPass::new(
                driver,
                color_format,
                depth_format,
                extent,
                self.clear_color,
                self.depth,
                self.stencil,
            )?;
            let mut old = std::mem::replace(self, next);
            old.destroy(driver);
        }
        self.set_extent(extent);
        Ok(())
    }

    pub fn begin<D: Driver>(
        &self,
        driver: &D,
        cmd: &mut CommandBuffer,
        framebuffer: vk::Framebuffer,
    ) -> Result<(), CommandBufferError> {
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.depth,
                    stencil: self.stencil,
                },
            },
        ];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(self.handle)
            .framebuffer(framebuffer)
            .render_area(self.area)
            .clear_values(&clears);
        cmd.enter_render_pass()?;
        driver.cmd_begin_render_pass(cmd.handle(), &info);
        Ok(())
    }

    pub fn end<D: Driver>(
        &self,
        driver: &D,
        cmd: &mut CommandBuffer,
    ) -> Result<(), CommandBufferError> {
        cmd.leave_render_pass()?;
        driver.cmd_end_render_pass(cmd.handle());
        Ok(())
    }

    pub fn set_extent(&mut self, extent: vk::Extent2D) {
        self.area.extent = extent;
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn area(&self) -> vk::Rect2D {
        self.area
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn destroy<D: Driver>(&mut self, driver: &D) {
        if self.handle != vk::RenderPass::null() {
            driver.destroy_render_pass(self.handle);
            self.handle = vk::RenderPass::null();
        }
    }
}
