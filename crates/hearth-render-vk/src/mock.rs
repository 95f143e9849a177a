// SPDX-License-Identifier: CEPL-1.0
//! In-memory stand-ins for the GPU used by the unit tests.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::{c_char, CString};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::device::DeviceQueues;
use crate::driver::Driver;
use crate::selector::DeviceProbe;
use crate::swapchain::SwapchainSupportInfo;

pub fn mock_support() -> SwapchainSupportInfo {
    SwapchainSupportInfo {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ],
    }
}

pub fn mock_queues() -> DeviceQueues {
    DeviceQueues {
        graphics_family: 0,
        present_family: 0,
        transfer_family: 0,
        compute_family: Some(0),
        graphics: vk::Queue::from_raw(1),
        present: vk::Queue::from_raw(1),
        transfer: vk::Queue::from_raw(1),
        compute: Some(vk::Queue::from_raw(1)),
    }
}

/// Fence traffic in call order, by raw handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceEvent {
    Wait(u64),
    Reset(u64),
    Submit(u64),
}

/// Hands out fresh handles, tracks which are alive and lets tests inject
/// one-shot failures.
pub struct MockDriver {
    next: Cell<u64>,
    live: RefCell<HashSet<u64>>,
    support: RefCell<SwapchainSupportInfo>,
    depth_format: Cell<Option<vk::Format>>,
    swapchain_images: RefCell<HashMap<u64, u32>>,
    acquire_cursor: Cell<u32>,
    acquire_script: RefCell<VecDeque<u32>>,
    acquire_suboptimal: Cell<bool>,
    fences: RefCell<HashMap<u64, bool>>,
    fence_resets: RefCell<HashMap<u64, u32>>,
    fence_waits: Cell<u32>,
    fence_log: RefCell<Vec<FenceEvent>>,
    swapchains_created: Cell<u32>,
    submits: Cell<u32>,
    presents: Cell<u32>,
    wait_idle: Cell<u32>,
    fail_wait: Cell<Option<vk::Result>>,
    fail_acquire: Cell<Option<vk::Result>>,
    fail_submit: Cell<Option<vk::Result>>,
    fail_present: Cell<Option<vk::Result>>,
    fail_create_image: Cell<Option<vk::Result>>,
    fail_view_after: Cell<Option<(u32, vk::Result)>>,
    suboptimal: Cell<bool>,
    last_viewport: Cell<vk::Viewport>,
    last_render_area: Cell<vk::Rect2D>,
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver {
            next: Cell::new(0x1000),
            live: RefCell::default(),
            support: RefCell::new(mock_support()),
            depth_format: Cell::new(Some(vk::Format::D32_SFLOAT)),
            swapchain_images: RefCell::default(),
            acquire_cursor: Cell::new(0),
            acquire_script: RefCell::default(),
            acquire_suboptimal: Cell::new(false),
            fences: RefCell::default(),
            fence_resets: RefCell::default(),
            fence_waits: Cell::new(0),
            fence_log: RefCell::default(),
            swapchains_created: Cell::new(0),
            submits: Cell::new(0),
            presents: Cell::new(0),
            wait_idle: Cell::new(0),
            fail_wait: Cell::new(None),
            fail_acquire: Cell::new(None),
            fail_submit: Cell::new(None),
            fail_present: Cell::new(None),
            fail_create_image: Cell::new(None),
            fail_view_after: Cell::new(None),
            suboptimal: Cell::new(false),
            last_viewport: Cell::new(vk::Viewport::default()),
            last_render_area: Cell::new(vk::Rect2D::default()),
        }
    }

    fn raw(&self) -> u64 {
        let raw = self.next.get();
        self.next.set(raw + 1);
        raw
    }

    fn make<H: Handle>(&self) -> H {
        let raw = self.raw();
        self.live.borrow_mut().insert(raw);
        H::from_raw(raw)
    }

    fn release<H: Handle>(&self, handle: H) {
        let raw = handle.as_raw();
        assert!(
            self.live.borrow_mut().remove(&raw),
            "destroying unknown or already destroyed handle {raw:#x}"
        );
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn set_depth_format(&self, format: Option<vk::Format>) {
        self.depth_format.set(format);
    }

    pub fn set_min_image_count(&self, count: u32) {
        self.support.borrow_mut().capabilities.min_image_count = count;
    }

    pub fn fail_wait(&self, err: vk::Result) {
        self.fail_wait.set(Some(err));
    }

    pub fn fail_acquire(&self, err: vk::Result) {
        self.fail_acquire.set(Some(err));
    }

    pub fn fail_submit(&self, err: vk::Result) {
        self.fail_submit.set(Some(err));
    }

    pub fn fail_present(&self, err: vk::Result) {
        self.fail_present.set(Some(err));
    }

    pub fn fail_create_image(&self, err: vk::Result) {
        self.fail_create_image.set(Some(err));
    }

    /// Lets `ok` image views through, then fails the next one.
    pub fn fail_image_view_after(&self, ok: u32, err: vk::Result) {
        self.fail_view_after.set(Some((ok, err)));
    }

    /// Upcoming acquires return these indices before falling back to
    /// round-robin.
    pub fn script_acquires(&self, indices: &[u32]) {
        self.acquire_script.borrow_mut().extend(indices);
    }

    /// Next acquire succeeds but reports a suboptimal swapchain.
    pub fn acquire_suboptimal(&self) {
        self.acquire_suboptimal.set(true);
    }

    pub fn take_fence_log(&self) -> Vec<FenceEvent> {
        std::mem::take(&mut *self.fence_log.borrow_mut())
    }

    /// Next present reports a suboptimal swapchain.
    pub fn present_suboptimal(&self) {
        self.suboptimal.set(true);
    }

    pub fn swapchains_created(&self) -> u32 {
        self.swapchains_created.get()
    }

    pub fn submits(&self) -> u32 {
        self.submits.get()
    }

    pub fn presents(&self) -> u32 {
        self.presents.get()
    }

    pub fn wait_idle_calls(&self) -> u32 {
        self.wait_idle.get()
    }

    pub fn fence_waits(&self) -> u32 {
        self.fence_waits.get()
    }

    pub fn fence_resets(&self, fence: vk::Fence) -> u32 {
        self.fence_resets
            .borrow()
            .get(&fence.as_raw())
            .copied()
            .unwrap_or(0)
    }

    pub fn last_viewport(&self) -> vk::Viewport {
        self.last_viewport.get()
    }

    pub fn last_render_area(&self) -> vk::Rect2D {
        self.last_render_area.get()
    }
}

impl Driver for MockDriver {
    fn swapchain_support(&self) -> VkResult<SwapchainSupportInfo> {
        Ok(self.support.borrow().clone())
    }

    fn detect_depth_format(&self) -> Option<vk::Format> {
        self.depth_format.get()
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        self.wait_idle.set(self.wait_idle.get() + 1);
        Ok(())
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> VkResult<vk::SwapchainKHR> {
        let handle: vk::SwapchainKHR = self.make();
        self.swapchain_images
            .borrow_mut()
            .insert(handle.as_raw(), info.min_image_count);
        self.swapchains_created.set(self.swapchains_created.get() + 1);
        Ok(handle)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let count = self
            .swapchain_images
            .borrow()
            .get(&swapchain.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        Ok((0..count).map(|_| vk::Image::from_raw(self.raw())).collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.swapchain_images.borrow_mut().remove(&swapchain.as_raw());
        self.release(swapchain);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        if let Some(err) = self.fail_acquire.take() {
            return Err(err);
        }
        let count = self
            .swapchain_images
            .borrow()
            .get(&swapchain.as_raw())
            .copied()
            .ok_or(vk::Result::ERROR_OUT_OF_DATE_KHR)?;
        let index = match self.acquire_script.borrow_mut().pop_front() {
            Some(index) => index,
            None => {
                let index = self.acquire_cursor.get() % count;
                self.acquire_cursor.set(index + 1);
                index
            }
        };
        if index >= count {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        Ok((index, self.acquire_suboptimal.replace(false)))
    }

    fn queue_present(&self, _queue: vk::Queue, _info: &vk::PresentInfoKHR<'_>) -> VkResult<bool> {
        if let Some(err) = self.fail_present.take() {
            return Err(err);
        }
        self.presents.set(self.presents.get() + 1);
        Ok(self.suboptimal.replace(false))
    }

    fn create_image(&self, _info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        if let Some(err) = self.fail_create_image.take() {
            return Err(err);
        }
        Ok(self.make())
    }

    fn allocate_image_memory(
        &self,
        _image: vk::Image,
        _flags: vk::MemoryPropertyFlags,
    ) -> VkResult<vk::DeviceMemory> {
        Ok(self.make())
    }

    fn destroy_image(&self, image: vk::Image) {
        self.release(image);
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.release(memory);
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        match self.fail_view_after.take() {
            Some((0, err)) => return Err(err),
            Some((n, err)) => self.fail_view_after.set(Some((n - 1, err))),
            None => {}
        }
        Ok(self.make())
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(view);
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo<'_>) -> VkResult<vk::RenderPass> {
        Ok(self.make())
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release(render_pass);
    }

    fn create_framebuffer(&self, _info: &vk::FramebufferCreateInfo<'_>) -> VkResult<vk::Framebuffer> {
        Ok(self.make())
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer);
    }

    fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool> {
        Ok(self.make())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.release(pool);
    }

    fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        Ok((0..info.command_buffer_count).map(|_| self.make()).collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for &cb in buffers {
            self.release(cb);
        }
    }

    fn begin_command_buffer(
        &self,
        _cmd: vk::CommandBuffer,
        _info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        self.last_viewport.set(*viewport);
    }

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, _scissor: &vk::Rect2D) {}

    fn cmd_begin_render_pass(&self, _cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>) {
        self.last_render_area.set(info.render_area);
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {}

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        _submit: &vk::SubmitInfo<'_>,
        fence: vk::Fence,
    ) -> VkResult<()> {
        if let Some(err) = self.fail_submit.take() {
            return Err(err);
        }
        self.submits.set(self.submits.get() + 1);
        self.fence_log
            .borrow_mut()
            .push(FenceEvent::Submit(fence.as_raw()));
        // work completes instantly
        if let Some(signaled) = self.fences.borrow_mut().get_mut(&fence.as_raw()) {
            *signaled = true;
        }
        Ok(())
    }

    fn create_fence(&self, info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        let fence: vk::Fence = self.make();
        self.fences.borrow_mut().insert(
            fence.as_raw(),
            info.flags.contains(vk::FenceCreateFlags::SIGNALED),
        );
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.fences.borrow_mut().remove(&fence.as_raw());
        self.release(fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        self.fence_waits.set(self.fence_waits.get() + 1);
        self.fence_log
            .borrow_mut()
            .push(FenceEvent::Wait(fence.as_raw()));
        if let Some(err) = self.fail_wait.take() {
            return Err(err);
        }
        match self.fences.borrow().get(&fence.as_raw()) {
            Some(true) => Ok(()),
            // never submitted, would block forever
            Some(false) => Err(vk::Result::TIMEOUT),
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.fence_log
            .borrow_mut()
            .push(FenceEvent::Reset(fence.as_raw()));
        if let Some(signaled) = self.fences.borrow_mut().get_mut(&fence.as_raw()) {
            *signaled = false;
        }
        *self
            .fence_resets
            .borrow_mut()
            .entry(fence.as_raw())
            .or_insert(0) += 1;
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(self.make())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore);
    }
}

/// A fake physical device for selection tests.
#[derive(Clone)]
pub struct MockGpu {
    name: String,
    device_type: vk::PhysicalDeviceType,
    families: Vec<vk::QueueFamilyProperties>,
    extensions: Vec<CString>,
    anisotropy: bool,
    support: SwapchainSupportInfo,
}

impl MockGpu {
    /// Discrete GPU with a single all-purpose family that can present.
    pub fn capable(name: &str) -> Self {
        MockGpu {
            name: name.to_owned(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            extensions: vec![CString::from(ash::khr::swapchain::NAME)],
            anisotropy: true,
            support: mock_support(),
        }
    }

    pub fn without_extensions(mut self) -> Self {
        self.extensions.clear();
        self
    }

    pub fn integrated(mut self) -> Self {
        self.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        self
    }

    pub fn without_anisotropy(mut self) -> Self {
        self.anisotropy = false;
        self
    }

    pub fn without_formats(mut self) -> Self {
        self.support.formats.clear();
        self
    }
}

pub struct MockProbe {
    gpus: Vec<MockGpu>,
}

impl MockProbe {
    pub fn new(gpus: Vec<MockGpu>) -> Self {
        MockProbe { gpus }
    }

    fn gpu(&self, pd: vk::PhysicalDevice) -> &MockGpu {
        &self.gpus[pd.as_raw() as usize - 1]
    }
}

impl DeviceProbe for MockProbe {
    fn physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        Ok((1..=self.gpus.len() as u64)
            .map(vk::PhysicalDevice::from_raw)
            .collect())
    }

    fn properties(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
        let gpu = self.gpu(pd);
        let mut props = vk::PhysicalDeviceProperties {
            device_type: gpu.device_type,
            api_version: vk::API_VERSION_1_2,
            ..Default::default()
        };
        let max = props.device_name.len() - 1;
        for (dst, b) in props.device_name.iter_mut().zip(gpu.name.bytes().take(max)) {
            *dst = b as c_char;
        }
        props
    }

    fn features(&self, pd: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures {
            sampler_anisotropy: self.gpu(pd).anisotropy.into(),
            ..Default::default()
        }
    }

    fn memory_properties(&self, _pd: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
        vk::PhysicalDeviceMemoryProperties::default()
    }

    fn queue_families(&self, pd: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.gpu(pd).families.clone()
    }

    fn surface_support(&self, _pd: vk::PhysicalDevice, _family: u32) -> bool {
        true
    }

    fn swapchain_support(&self, pd: vk::PhysicalDevice) -> VkResult<SwapchainSupportInfo> {
        Ok(self.gpu(pd).support.clone())
    }

    fn extensions(&self, pd: vk::PhysicalDevice) -> VkResult<Vec<CString>> {
        Ok(self.gpu(pd).extensions.clone())
    }
}
