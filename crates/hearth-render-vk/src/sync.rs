// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use tracing::{error, warn};

use crate::driver::Driver;

/// A fence plus a CPU-side mirror of whether it is known to be signaled.
#[derive(Debug)]
pub struct Fence {
    handle: vk::Fence,
    is_signaled: bool,
}

impl Fence {
    pub fn new<D: Driver>(driver: &D, signaled: bool) -> VkResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let handle = driver.create_fence(&vk::FenceCreateInfo::default().flags(flags))?;
        Ok(Fence {
            handle,
            is_signaled: signaled,
        })
    }

    /// Blocks until the fence signals. Returns immediately when it is
    /// already known to be signaled.
    pub fn wait<D: Driver>(&mut self, driver: &D, timeout_ns: u64) -> VkResult<()> {
        if self.is_signaled {
            return Ok(());
        }
        match driver.wait_for_fence(self.handle, timeout_ns) {
            Ok(()) => {
                self.is_signaled = true;
                Ok(())
            }
            Err(vk::Result::TIMEOUT) => {
                warn!("fence wait timed out after {timeout_ns} ns");
                Err(vk::Result::TIMEOUT)
            }
            Err(e @ vk::Result::ERROR_DEVICE_LOST) => {
                error!("fence wait: device lost");
                Err(e)
            }
            Err(e @ (vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)) => {
                error!("fence wait: out of memory ({e:?})");
                Err(e)
            }
            Err(e) => {
                error!("fence wait failed: {e:?}");
                Err(e)
            }
        }
    }

    /// Resets a signaled fence. Unsignaled fences are left alone.
    pub fn reset<D: Driver>(&mut self, driver: &D) -> VkResult<()> {
        if self.is_signaled {
            driver.reset_fence(self.handle)?;
            self.is_signaled = false;
        }
        Ok(())
    }

    pub fn destroy<D: Driver>(&mut self, driver: &D) {
        if self.handle != vk::Fence::null() {
            driver.destroy_fence(self.handle);
            self.handle = vk::Fence::null();
        }
        self.is_signaled = false;
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn is_signaled(&self) -> bool {
        self.is_signaled
    }
}

/// Per frame slot: one fence and the two semaphores ordering acquire, draw
/// and present.
#[derive(Debug, Default)]
pub struct SyncPrimitives {
    pub in_flight_fences: Vec<Fence>,
    pub image_available: Vec<vk::Semaphore>,
    pub queue_complete: Vec<vk::Semaphore>,
}

impl SyncPrimitives {
    /// Fences start signaled so the first wait on each slot returns at once.
    pub fn new<D: Driver>(driver: &D, frames_in_flight: usize) -> VkResult<Self> {
        let mut sync = SyncPrimitives::default();
        if let Err(e) = sync.fill(driver, frames_in_flight) {
            sync.destroy(driver);
            return Err(e);
        }
        Ok(sync)
    }

    fn fill<D: Driver>(&mut self, driver: &D, frames_in_flight: usize) -> VkResult<()> {
        for _ in 0..frames_in_flight {
            self.image_available.push(driver.create_semaphore()?);
            self.queue_complete.push(driver.create_semaphore()?);
            self.in_flight_fences.push(Fence::new(driver, true)?);
        }
        Ok(())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.in_flight_fences.len()
    }

    pub fn destroy<D: Driver>(&mut self, driver: &D) {
        for s in self.image_available.drain(..) {
            driver.destroy_semaphore(s);
        }
        for s in self.queue_complete.drain(..) {
            driver.destroy_semaphore(s);
        }
        for mut f in self.in_flight_fences.drain(..) {
            f.destroy(driver);
        }
    }
}

/// Which frame slot's fence currently guards each swapchain image.
///
/// Slots store an index into [`SyncPrimitives::in_flight_fences`], never the
/// fence itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImagesInFlight {
    slots: Vec<Option<usize>>,
}

impl ImagesInFlight {
    pub fn new(image_count: usize) -> Self {
        ImagesInFlight {
            slots: vec![None; image_count],
        }
    }

    pub fn get(&self, image: usize) -> Option<usize> {
        self.slots.get(image).copied().flatten()
    }

    pub fn bind(&mut self, image: usize, frame_slot: usize) {
        if let Some(slot) = self.slots.get_mut(image) {
            *slot = Some(frame_slot);
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    pub fn resize(&mut self, image_count: usize) {
        self.slots.clear();
        self.slots.resize(image_count, None);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<usize>> + '_ {
        self.slots.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[test]
    fn signaled_fence_skips_wait_and_reset_once() {
        let driver = MockDriver::new();
        let mut fence = Fence::new(&driver, true).unwrap();
        fence.wait(&driver, 1).unwrap();
        assert_eq!(driver.fence_waits(), 0);

        fence.reset(&driver).unwrap();
        fence.reset(&driver).unwrap();
        assert_eq!(driver.fence_resets(fence.handle()), 1);
        assert!(!fence.is_signaled());
        fence.destroy(&driver);
    }

    #[test]
    fn timeout_leaves_fence_unsignaled() {
        let driver = MockDriver::new();
        let mut fence = Fence::new(&driver, false).unwrap();
        driver.fail_wait(vk::Result::TIMEOUT);
        assert_eq!(fence.wait(&driver, 10), Err(vk::Result::TIMEOUT));
        assert!(!fence.is_signaled());
        fence.destroy(&driver);
    }

    #[test]
    fn primitives_have_one_of_each_per_frame() {
        let driver = MockDriver::new();
        let mut sync = SyncPrimitives::new(&driver, 3).unwrap();
        assert_eq!(sync.frames_in_flight(), 3);
        assert_eq!(sync.image_available.len(), 3);
        assert_eq!(sync.queue_complete.len(), 3);
        assert!(sync.in_flight_fences.iter().all(Fence::is_signaled));
        sync.destroy(&driver);
        assert_eq!(driver.live_count(), 0);
    }

    #[test]
    fn images_in_flight_bind_and_clear() {
        let mut table = ImagesInFlight::new(3);
        assert!(table.iter().all(|s| s.is_none()));
        table.bind(1, 0);
        table.bind(7, 0);
        assert_eq!(table.get(1), Some(0));
        assert_eq!(table.get(7), None);
        table.clear();
        assert_eq!(table.get(1), None);
        table.resize(4);
        assert_eq!(table.len(), 4);
    }
}
