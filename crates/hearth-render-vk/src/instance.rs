// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, c_void, CStr, CString};

use anyhow::{bail, Context, Result};
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"Hearth";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes a valid callback data pointer for the
    // duration of the call; both pointers are checked for null.
    let msg = unsafe {
        if data.is_null() || (*data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

/// Validation output routed into `tracing`.
pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        let handle = unsafe { loader.create_debug_utils_messenger(&info, None) }
            .context("create_debug_utils_messenger")?;
        debug!("debug messenger installed");
        Ok(DebugMessenger { loader, handle })
    }

    pub fn destroy(&mut self) {
        if self.handle != vk::DebugUtilsMessengerEXT::null() {
            unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
            self.handle = vk::DebugUtilsMessengerEXT::null();
        }
    }
}

/// Whether `layer` is installed on this machine.
fn has_layer(entry: &Entry, layer: &CStr) -> Result<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }
        .context("enumerate_instance_layer_properties")?;
    Ok(layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == layer)))
}

/// Creates the instance with the platform surface extensions, plus the
/// validation layer and debug utils when `validation` is set in a debug build.
///
/// Returns the instance and whether validation ended up enabled.
pub fn create_instance(
    entry: &Entry,
    app_name: &str,
    display: RawDisplayHandle,
    validation: bool,
) -> Result<(Instance, bool)> {
    let app = CString::new(app_name).context("application name contains a NUL byte")?;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(ENGINE_NAME)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut exts: Vec<*const c_char> = vec![ash::khr::surface::NAME.as_ptr()];
    hearth_platform::append_required_extensions(display, &mut exts)?;

    let mut layers: Vec<*const c_char> = Vec::new();
    let validation = validation && cfg!(debug_assertions);
    if validation {
        if !has_layer(entry, VALIDATION_LAYER)? {
            bail!(
                "validation requested but {:?} is not installed (set render.validation = false)",
                VALIDATION_LAYER
            );
        }
        layers.push(VALIDATION_LAYER.as_ptr());
        exts.push(debug_utils::NAME.as_ptr());
    }

    let info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&exts)
        .enabled_layer_names(&layers);

    let instance = unsafe { entry.create_instance(&info, None) }.context("vkCreateInstance")?;
    info!(
        "Vulkan instance created for '{app_name}' ({} extension(s), validation {})",
        exts.len(),
        if validation { "on" } else { "off" }
    );
    Ok((instance, validation))
}
