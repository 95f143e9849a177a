// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use tracing::{debug, info};

use crate::selector::{DeviceRequirements, PhysicalDeviceCandidate, QueueFamilyIndices};

/// Queue families the logical device was created with, and one queue from each.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceQueues {
    pub graphics_family: u32,
    pub present_family: u32,
    pub transfer_family: u32,
    pub compute_family: Option<u32>,
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
    pub compute: Option<vk::Queue>,
}

/// Distinct family indices that need a queue, in graphics, present,
/// transfer, compute order.
pub fn queue_create_indices(q: &QueueFamilyIndices) -> Vec<u32> {
    let mut out = Vec::with_capacity(4);
    for idx in [q.graphics, q.present, q.transfer, q.compute].into_iter().flatten() {
        if !out.contains(&idx) {
            out.push(idx);
        }
    }
    out
}

pub fn create_logical_device(
    instance: &ash::Instance,
    candidate: &PhysicalDeviceCandidate,
    req: &DeviceRequirements,
) -> Result<(ash::Device, DeviceQueues)> {
    let q = candidate.queues;
    let graphics_family = q.graphics.ok_or_else(|| anyhow!("no graphics family"))?;
    let present_family = q.present.ok_or_else(|| anyhow!("no present family"))?;
    let transfer_family = q.transfer.ok_or_else(|| anyhow!("no transfer family"))?;

    let priorities = [1.0f32];
    let families = queue_create_indices(&q);
    let queue_infos: Vec<_> = families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();
    debug!("creating {} queue(s) for families {:?}", queue_infos.len(), families);

    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(req.sampler_anisotropy);
    let ext_ptrs: Vec<_> = req.extensions.iter().map(|e| e.as_ptr()).collect();

    let info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_features(&features)
        .enabled_extension_names(&ext_ptrs);

    let device = unsafe { instance.create_device(candidate.handle, &info, None) }
        .context("vkCreateDevice")?;

    let queues = unsafe {
        DeviceQueues {
            graphics_family,
            present_family,
            transfer_family,
            compute_family: q.compute,
            graphics: device.get_device_queue(graphics_family, 0),
            present: device.get_device_queue(present_family, 0),
            transfer: device.get_device_queue(transfer_family, 0),
            compute: q.compute.map(|f| device.get_device_queue(f, 0)),
        }
    };
    info!(
        "logical device ready (graphics {}, present {}, transfer {}, compute {:?})",
        graphics_family, present_family, transfer_family, q.compute
    );
    Ok((device, queues))
}
