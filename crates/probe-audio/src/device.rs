//! Audio device enumeration (see DESIGN.md for the device-listing filter
//! decision).

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SupportedStreamConfigRange};

use probe_core::DeviceDescriptor;

use crate::{AudioError, AudioResult};

pub fn get_host() -> Host {
    cpal::default_host()
}

/// Input-capable devices only (`inputs > 0`), matching the original
/// source's `list_devices` filter, but both channel counts are reported.
pub fn list_devices() -> AudioResult<Vec<DeviceDescriptor>> {
    let host = get_host();
    let mut out = Vec::new();

    for (idx, device) in host
        .input_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
        .enumerate()
    {
        let Ok(name) = device.name() else { continue };
        let inputs = max_channels(&device, true);
        if inputs == 0 {
            continue;
        }
        let outputs = max_channels(&device, false);
        out.push(DeviceDescriptor {
            id: idx.to_string(),
            name,
            inputs,
            outputs,
        });
    }

    Ok(out)
}

pub fn get_device_by_id(id: &str) -> AudioResult<Device> {
    let host = get_host();
    let idx: usize = id.parse().map_err(|_| AudioError::DeviceNotFound(id.to_string()))?;
    host.input_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
        .nth(idx)
        .ok_or_else(|| AudioError::DeviceNotFound(id.to_string()))
}

pub fn get_default_output_device() -> AudioResult<Device> {
    get_host().default_output_device().ok_or(AudioError::NoDevice)
}

fn max_channels(device: &Device, is_input: bool) -> u16 {
    let configs: Vec<SupportedStreamConfigRange> = if is_input {
        device.supported_input_configs().map(|c| c.collect()).unwrap_or_default()
    } else {
        device.supported_output_configs().map(|c| c.collect()).unwrap_or_default()
    };
    configs.iter().map(|c| c.channels()).max().unwrap_or(0)
}
