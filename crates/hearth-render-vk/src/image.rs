// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;

use crate::driver::Driver;

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_flags: vk::MemoryPropertyFlags,
    /// Creates a view with this aspect when set.
    pub view_aspect: Option<vk::ImageAspectFlags>,
}

/// A device-local 2D image with its own memory and optional view.
#[derive(Debug)]
pub struct Image {
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: Option<vk::ImageView>,
    width: u32,
    height: u32,
}

impl Image {
    pub fn new<D: Driver>(driver: &D, desc: &ImageDesc) -> VkResult<Self> {
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = driver.create_image(&info)?;
        let memory = match driver.allocate_image_memory(handle, desc.memory_flags) {
            Ok(m) => m,
            Err(e) => {
                driver.destroy_image(handle);
                return Err(e);
            }
        };

        let mut image = Image {
            handle,
            memory,
            view: None,
            width: desc.width,
            height: desc.height,
        };
        if let Some(aspect) = desc.view_aspect {
            match create_image_view(driver, handle, desc.format, aspect) {
                Ok(view) => image.view = Some(view),
                Err(e) => {
                    image.destroy(driver);
                    return Err(e);
                }
            }
        }
        Ok(image)
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn view(&self) -> Option<vk::ImageView> {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Releases view, memory and image. Safe to call twice.
    pub fn destroy<D: Driver>(&mut self, driver: &D) {
        if let Some(view) = self.view.take() {
            driver.destroy_image_view(view);
        }
        if self.memory != vk::DeviceMemory::null() {
            driver.free_memory(self.memory);
            self.memory = vk::DeviceMemory::null();
        }
        if self.handle != vk::Image::null() {
            driver.destroy_image(self.handle);
            self.handle = vk::Image::null();
        }
    }
}

pub fn create_image_view<D: Driver>(
    driver: &D,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> VkResult<vk::ImageView> {
    let sub = vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(sub);
    driver.create_image_view(&info)
}
