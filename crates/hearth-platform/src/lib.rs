// SPDX-License-Identifier: CEPL-1.0
//! Platform glue: windowing via winit and the Vulkan surface hooks the
//! renderer needs from the native window.
use std::ffi::{c_char, CStr};

use anyhow::{Context, Result};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::debug;

pub use winit;

/// Appends the instance extensions the windowing system needs for
/// presentation (e.g. `VK_KHR_xlib_surface`) to `out`.
///
/// `VK_KHR_surface` itself is included by the platform list and is not
/// duplicated if the caller already pushed it. `out` must only hold pointers
/// to NUL-terminated names.
pub fn append_required_extensions(
    display: RawDisplayHandle,
    out: &mut Vec<*const c_char>,
) -> Result<()> {
    let exts = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?;
    for &ext in exts {
        // SAFETY: every pointer here names a static NUL-terminated string.
        let name = unsafe { CStr::from_ptr(ext) };
        if !out.iter().any(|&p| unsafe { CStr::from_ptr(p) } == name) {
            out.push(ext);
        }
    }
    debug!("platform requires {} instance extension(s)", exts.len());
    Ok(())
}

/// Creates a presentable surface bound to the native window.
pub fn create_surface(
    entry: &Entry,
    instance: &Instance,
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
) -> Result<vk::SurfaceKHR> {
    let dh = display
        .display_handle()
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .as_raw();

    // SAFETY: the handles come from a live window that outlives the surface;
    // the renderer destroys the surface before the window is dropped.
    let surface = unsafe { ash_window::create_surface(entry, instance, dh, wh, None) }
        .context("ash_window::create_surface")?;
    Ok(surface)
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::XlibDisplayHandle;

    fn names(exts: &[*const c_char]) -> Vec<String> {
        exts.iter()
            .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn required_extensions_are_appended_once() {
        let display = RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0));
        let mut exts = vec![ash::khr::surface::NAME.as_ptr()];
        append_required_extensions(display, &mut exts).unwrap();
        let first = names(&exts);
        assert!(first.iter().any(|n| n == "VK_KHR_xlib_surface"));
        assert_eq!(first.iter().filter(|n| *n == "VK_KHR_surface").count(), 1);

        append_required_extensions(display, &mut exts).unwrap();
        assert_eq!(names(&exts), first);
    }
}
