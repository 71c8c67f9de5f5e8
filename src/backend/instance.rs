// Vulkan instance - library loading, layers, debug messenger
//
// Required layers and instance extensions are verified before creation so a
// missing one fails with its name instead of a bare VK_ERROR code.

use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct VulkanInstance {
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub instance: ash::Instance,
    pub entry: Entry,
}

impl VulkanInstance {
    /// Create a Vulkan 1.3 instance.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `surface_extensions` - Platform surface extensions (from `ash_window`), empty for headless use
    /// * `enable_validation` - Enable the Khronos validation layer and debug messenger
    pub fn new(
        app_name: &str,
        surface_extensions: &[*const c_char],
        enable_validation: bool,
    ) -> EngineResult<Arc<Self>> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| EngineError::Surface(format!("invalid application name {app_name:?}")))?;
        let engine_name = c"vk-frame-engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut layer_names = Vec::new();
        if enable_validation {
            layer_names.push(VALIDATION_LAYER.as_ptr());
        }
        check_layers(&entry, &layer_names)?;

        let mut extensions = surface_extensions.to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }
        check_instance_extensions(&entry, &extensions)?;

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extensions);

        let instance =
            unsafe { entry.create_instance(&create_info, None) }.op("vkCreateInstance")?;

        let debug_utils = if enable_validation {
            Some(setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        Ok(Arc::new(Self {
            debug_utils,
            instance,
            entry,
        }))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn check_layers(entry: &Entry, required: &[*const c_char]) -> EngineResult<()> {
    let available = entry
        .enumerate_instance_layer_properties()
        .op("vkEnumerateInstanceLayerProperties")?;

    for &layer in required {
        let wanted = unsafe { CStr::from_ptr(layer) };
        let found = available
            .iter()
            .any(|props| unsafe { CStr::from_ptr(props.layer_name.as_ptr()) } == wanted);
        if !found {
            return Err(EngineError::MissingLayer(wanted.to_string_lossy().into_owned()));
        }
    }
    Ok(())
}

fn check_instance_extensions(entry: &Entry, required: &[*const c_char]) -> EngineResult<()> {
    let available = entry
        .enumerate_instance_extension_properties(None)
        .op("vkEnumerateInstanceExtensionProperties")?;

    for &extension in required {
        let wanted = unsafe { CStr::from_ptr(extension) };
        let found = available
            .iter()
            .any(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) } == wanted);
        if !found {
            return Err(EngineError::MissingExtension(
                wanted.to_string_lossy().into_owned(),
            ));
        }
    }
    Ok(())
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> EngineResult<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .op("vkCreateDebugUtilsMessengerEXT")?;

    Ok((debug_utils, messenger))
}

// Validation layer output goes through the `log` facade
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan {:?}] {}", message_type, message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan {:?}] {}", message_type, message.to_string_lossy());
        }
        _ => {
            log::trace!("[Vulkan {:?}] {}", message_type, message.to_string_lossy());
        }
    }

    vk::FALSE
}
