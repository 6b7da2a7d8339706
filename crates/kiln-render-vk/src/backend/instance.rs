// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr};

use anyhow::{anyhow, Context, Result};
use ash::{ext::debug_utils, khr::surface, khr::swapchain, vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info, warn};

use crate::device::{plan_queue_families, DeviceIdentity, QueueFamilies, QueueRole};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub(super) type DebugState = Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>;

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "kiln::vulkan", "[{types:?}] {msg}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "kiln::vulkan", "[{types:?}] {msg}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::debug!(target: "kiln::vulkan", "[{types:?}] {msg}")
        }
        _ => tracing::trace!(target: "kiln::vulkan", "[{types:?}] {msg}"),
    }
    vk::FALSE
}

unsafe fn has_layer(entry: &Entry, name: &CStr) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
}

/// Returns the instance and whether validation ended up enabled.
pub(super) unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    validation: bool,
) -> Result<(Instance, bool)> {
    let app = c"Kiln";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?
        .to_vec();

    let validation = validation && {
        let present = has_layer(entry, VALIDATION_LAYER);
        if !present {
            warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        }
        present
    };
    let layers: Vec<*const c_char> = if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    let instance = entry
        .create_instance(&create_info, None)
        .context("vkCreateInstance")?;
    Ok((instance, validation))
}

pub(super) unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<DebugState> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("vkCreateDebugUtilsMessengerEXT")?;
    Ok(Some((loader, messenger)))
}

pub(super) unsafe fn create_surface(
    entry: &Entry,
    instance: &Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    ash_window::create_surface(entry, instance, display, window, None)
        .context("ash_window::create_surface")
}

pub(super) struct PhysicalChoice {
    pub physical: vk::PhysicalDevice,
    pub identity: DeviceIdentity,
    pub families: QueueFamilies,
}

fn type_rank(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Picks the highest-ranked device that can render and present to `surface`.
pub(super) unsafe fn pick_physical_device(
    instance: &Instance,
    surface_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<PhysicalChoice> {
    let mut best: Option<(u32, PhysicalChoice)> = None;
    for physical in instance
        .enumerate_physical_devices()
        .context("vkEnumeratePhysicalDevices")?
    {
        let props = instance.get_physical_device_properties(physical);
        let name = props
            .device_name_as_c_str()
            .unwrap_or(c"unknown")
            .to_string_lossy();

        let has_swapchain = instance
            .enumerate_device_extension_properties(physical)
            .unwrap_or_default()
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME));
        if !has_swapchain {
            debug!("{name}: no {swapchain:?}", swapchain = swapchain::NAME);
            continue;
        }

        let qprops = instance.get_physical_device_queue_family_properties(physical);
        let presents = |i: u32| {
            surface_i
                .get_physical_device_surface_support(physical, i, surface)
                .unwrap_or(false)
        };
        let Some(families) = QueueFamilies::find(&qprops, presents) else {
            debug!("{name}: no graphics + present queue families");
            continue;
        };

        let formats = surface_i
            .get_physical_device_surface_formats(physical, surface)
            .unwrap_or_default();
        let modes = surface_i
            .get_physical_device_surface_present_modes(physical, surface)
            .unwrap_or_default();
        if formats.is_empty() || modes.is_empty() {
            debug!("{name}: surface offers no formats or present modes");
            continue;
        }

        let rank = type_rank(props.device_type);
        debug!("{name}: suitable, rank {rank}, {families:?}");
        if best.as_ref().map_or(true, |(r, _)| rank > *r) {
            best = Some((
                rank,
                PhysicalChoice {
                    physical,
                    identity: DeviceIdentity::from_properties(&props),
                    families,
                },
            ));
        }
    }

    let (_, choice) = best.ok_or_else(|| anyhow!("no device can render and present to this surface"))?;
    let props = instance.get_physical_device_properties(choice.physical);
    info!(
        "using {} (vendor {:#06x}, device {:#06x}, driver {:#x})",
        props.device_name_as_c_str().unwrap_or(c"unknown").to_string_lossy(),
        choice.identity.vendor_id,
        choice.identity.device_id,
        choice.identity.driver_version
    );
    Ok(choice)
}

pub(super) struct DeviceQueues {
    pub device: ash::Device,
    /// Queue 0 of the family serving each role.
    pub queues: Vec<(QueueRole, vk::Queue)>,
}

// STRICT ORDER:
// 1) one VkDeviceQueueCreateInfo per distinct family (duplicates are invalid)
// 2) priorities must outlive vkCreateDevice
// 3) queues are fetched from the family each role was planned onto
pub(super) unsafe fn create_device(
    instance: &Instance,
    choice: &PhysicalChoice,
) -> Result<DeviceQueues> {
    let plans = plan_queue_families(&choice.families.assignments());
    let priorities: Vec<[f32; 1]> = plans.iter().map(|p| [p.priority]).collect();
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = plans
        .iter()
        .zip(&priorities)
        .map(|(plan, priority)| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: plan.family,
            queue_count: 1,
            p_queue_priorities: priority.as_ptr(),
            ..Default::default()
        })
        .collect();
    for plan in &plans {
        debug!(
            "queue family {}: {:?} at priority {}",
            plan.family, plan.roles, plan.priority
        );
    }

    let extensions = [swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();
    let info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    let device = instance
        .create_device(choice.physical, &info, None)
        .context("vkCreateDevice")?;

    let queues = plans
        .iter()
        .flat_map(|plan| {
            let queue = device.get_device_queue(plan.family, 0);
            plan.roles.iter().map(move |&role| (role, queue))
        })
        .collect();
    Ok(DeviceQueues { device, queues })
}
