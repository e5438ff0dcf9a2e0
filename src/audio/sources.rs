//! Input device enumeration

use super::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

/// Input device information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputDevice {
    /// Name to pass as the configured device
    pub name: String,

    /// Whether this is the host's default input
    pub is_default: bool,
}

/// List available input devices, default first
pub fn list_input_devices() -> Result<Vec<InputDevice>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let mut sources: Vec<InputDevice> = devices
        .filter_map(|device| match device.name() {
            Ok(name) => Some(InputDevice {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            }),
            Err(e) => {
                log::warn!("Skipping input device without a name: {}", e);
                None
            }
        })
        .collect();

    sources.sort_by_key(|d| !d.is_default);
    Ok(sources)
}
