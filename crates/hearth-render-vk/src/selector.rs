// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection.
//!
//! Devices are inspected in enumeration order and the first one that meets
//! every [`DeviceRequirements`] entry wins. All driver queries go through
//! [`DeviceProbe`] so selection can run against fake hardware.
use std::ffi::{CStr, CString};

use ash::khr::surface;
use ash::prelude::VkResult;
use ash::vk;
use bitflags::bitflags;
use hearth_render::RenderConfig;
use thiserror::Error;
use tracing::{debug, info};

use crate::driver::query_swapchain_support;
use crate::swapchain::SwapchainSupportInfo;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct QueueCapabilities: u8 {
        const GRAPHICS = 1 << 0;
        const PRESENT  = 1 << 1;
        const COMPUTE  = 1 << 2;
        const TRANSFER = 1 << 3;
    }
}

#[derive(Clone, Debug)]
pub struct DeviceRequirements {
    pub queues: QueueCapabilities,
    pub extensions: Vec<CString>,
    pub sampler_anisotropy: bool,
    pub discrete_gpu: bool,
}

impl DeviceRequirements {
    pub fn from_config(cfg: &RenderConfig) -> Self {
        let mut queues =
            QueueCapabilities::GRAPHICS | QueueCapabilities::PRESENT | QueueCapabilities::TRANSFER;
        if cfg.require_compute {
            queues |= QueueCapabilities::COMPUTE;
        }
        DeviceRequirements {
            queues,
            extensions: vec![CString::from(ash::khr::swapchain::NAME)],
            sampler_anisotropy: cfg.sampler_anisotropy,
            discrete_gpu: cfg.discrete_gpu_only,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scans the family list once.
    ///
    /// Graphics and compute take the first matching family. Present prefers
    /// the graphics family. Transfer takes the family with the fewest extra
    /// graphics/compute bits; on a tie the earlier family is kept.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut can_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut out = QueueFamilyIndices::default();
        let mut best_transfer = u8::MAX;
        for (i, fam) in families.iter().enumerate() {
            let i = i as u32;
            let flags = fam.queue_flags;
            let mut score = 0u8;
            if flags.contains(vk::QueueFlags::GRAPHICS) {
                score += 1;
                out.graphics.get_or_insert(i);
            }
            if flags.contains(vk::QueueFlags::COMPUTE) {
                score += 1;
                out.compute.get_or_insert(i);
            }
            if flags.contains(vk::QueueFlags::TRANSFER) && score < best_transfer {
                best_transfer = score;
                out.transfer = Some(i);
            }
            if can_present(i) {
                let is_graphics = out.graphics == Some(i);
                if out.present.is_none() || is_graphics {
                    out.present = Some(i);
                }
            }
        }
        out
    }

    pub fn covers(&self, req: QueueCapabilities) -> bool {
        (!req.contains(QueueCapabilities::GRAPHICS) || self.graphics.is_some())
            && (!req.contains(QueueCapabilities::PRESENT) || self.present.is_some())
            && (!req.contains(QueueCapabilities::COMPUTE) || self.compute.is_some())
            && (!req.contains(QueueCapabilities::TRANSFER) || self.transfer.is_some())
    }
}

/// A device that passed selection, with everything learned while probing it.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queues: QueueFamilyIndices,
    pub support: SwapchainSupportInfo,
}

impl PhysicalDeviceCandidate {
    pub fn name(&self) -> String {
        device_name(&self.properties)
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no physical device meets the renderer requirements")]
    NoSuitableDevice,
    #[error("enumerating physical devices: {0}")]
    Enumerate(#[from] vk::Result),
}

/// Read-only view of the physical devices behind an instance and surface.
pub trait DeviceProbe {
    fn physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;
    fn properties(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties;
    fn features(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures;
    fn memory_properties(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties;
    fn queue_families(&self, pd: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    fn surface_support(&self, pd: vk::PhysicalDevice, family: u32) -> bool;
    fn swapchain_support(&self, pd: vk::PhysicalDevice) -> VkResult<SwapchainSupportInfo>;
    fn extensions(&self, pd: vk::PhysicalDevice) -> VkResult<Vec<CString>>;
}

pub struct AshProbe<'a> {
    pub instance: &'a ash::Instance,
    pub surface_loader: &'a surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl DeviceProbe for AshProbe<'_> {
    fn physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance.enumerate_physical_devices() }
    }

    fn properties(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        unsafe { self.instance.get_physical_device_properties(pd) }
    }

    fn features(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        unsafe { self.instance.get_physical_device_features(pd) }
    }

    fn memory_properties(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        unsafe { self.instance.get_physical_device_memory_properties(pd) }
    }

    fn queue_families(&self, pd: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(pd)
        }
    }

    fn surface_support(&self, pd: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(pd, family, self.surface)
                .unwrap_or(false)
        }
    }

    fn swapchain_support(&self, pd: vk::PhysicalDevice) -> VkResult<SwapchainSupportInfo> {
        query_swapchain_support(self.surface_loader, pd, self.surface)
    }

    fn extensions(&self, pd: vk::PhysicalDevice) -> VkResult<Vec<CString>> {
        let props = unsafe { self.instance.enumerate_device_extension_properties(pd)? };
        Ok(props
            .iter()
            .filter_map(|p| p.extension_name_as_c_str().ok().map(CStr::to_owned))
            .collect())
    }
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(|c| c.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_owned())
}

fn device_type_name(ty: vk::PhysicalDeviceType) -> &'static str {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
        vk::PhysicalDeviceType::CPU => "cpu",
        _ => "unknown",
    }
}

fn version_string(v: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(v),
        vk::api_version_minor(v),
        vk::api_version_patch(v)
    )
}

fn log_device_info(c: &PhysicalDeviceCandidate) {
    let p = &c.properties;
    info!(
        "selected GPU '{}' ({}), driver {}, Vulkan {}",
        c.name(),
        device_type_name(p.device_type),
        version_string(p.driver_version),
        version_string(p.api_version)
    );
    let heaps = &c.memory.memory_heaps[..c.memory.memory_heap_count as usize];
    for heap in heaps {
        let gib = heap.size as f64 / (1024.0 * 1024.0 * 1024.0);
        if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
            info!("  local GPU memory: {gib:.2} GiB");
        } else {
            info!("  shared system memory: {gib:.2} GiB");
        }
    }
    debug!("  queue families: {:?}", c.queues);
}

/// Why a device was passed over, for debug logging.
fn check_device<P: DeviceProbe>(
    probe: &P,
    pd: vk::PhysicalDevice,
    req: &DeviceRequirements,
) -> Result<PhysicalDeviceCandidate, &'static str> {
    let properties = probe.properties(pd);
    if req.discrete_gpu && properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        return Err("not a discrete GPU");
    }

    let families = probe.queue_families(pd);
    let queues = QueueFamilyIndices::find(&families, |i| probe.surface_support(pd, i));
    if !queues.covers(req.queues) {
        return Err("missing a required queue family");
    }

    let support = probe
        .swapchain_support(pd)
        .map_err(|_| "surface query failed")?;
    if !support.is_adequate() {
        return Err("no surface formats or present modes");
    }

    let available = probe.extensions(pd).map_err(|_| "extension query failed")?;
    if let Some(missing) = req
        .extensions
        .iter()
        .find(|want| !available.iter().any(|have| have == *want))
    {
        debug!("  missing extension {:?}", missing);
        return Err("missing a required extension");
    }

    let features = probe.features(pd);
    if req.sampler_anisotropy && features.sampler_anisotropy != vk::TRUE {
        return Err("sampler anisotropy unsupported");
    }

    Ok(PhysicalDeviceCandidate {
        handle: pd,
        properties,
        features,
        memory: probe.memory_properties(pd),
        queues,
        support,
    })
}

pub fn select_physical_device<P: DeviceProbe>(
    probe: &P,
    req: &DeviceRequirements,
) -> Result<PhysicalDeviceCandidate, SelectionError> {
    let devices = probe.physical_devices()?;
    debug!("{} physical device(s) found", devices.len());
    for pd in devices {
        match check_device(probe, pd, req) {
            Ok(candidate) => {
                log_device_info(&candidate);
                return Ok(candidate);
            }
            Err(why) => debug!("skipping '{}': {why}", device_name(&probe.properties(pd))),
        }
    }
    Err(SelectionError::NoSuitableDevice)
}
