//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use super::error::AudioError;

/// Unique identifier for an audio device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(pub String);

impl From<&str> for DeviceId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Information about an audio device
#[derive(Debug, Clone, Serialize)]
pub struct AudioDevice {
    /// Device identifier
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Supported sample rates (Hz)
    pub supported_sample_rates: Vec<u32>,
    /// Supported channel counts
    pub supported_channels: Vec<u16>,
    /// Smallest callback size the device advertises, 0 if unknown
    pub min_buffer_frames: u32,
    /// Whether this is the default device
    pub is_default: bool,
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// List available input (capture) devices
pub fn list_input_devices() -> Result<Vec<AudioDevice>, AudioError> {
    list_devices(&cpal::default_host(), Direction::Input)
}

/// List available output (playback) devices
pub fn list_output_devices() -> Result<Vec<AudioDevice>, AudioError> {
    list_devices(&cpal::default_host(), Direction::Output)
}

fn list_devices(host: &cpal::Host, direction: Direction) -> Result<Vec<AudioDevice>, AudioError> {
    let default_device = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    let default_name = default_device.as_ref().and_then(|d| d.name().ok());

    let devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?;

    Ok(devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let is_default = default_name.as_ref() == Some(&name);
            let caps = device_capabilities(&device, direction);
            Some(AudioDevice {
                id: DeviceId(name.clone()),
                name,
                supported_sample_rates: caps.sample_rates,
                supported_channels: caps.channels,
                min_buffer_frames: caps.min_buffer_frames,
                is_default,
            })
        })
        .collect())
}

/// Resolve an input device by id, or the host default when `id` is `None`
pub(crate) fn find_input_device(
    host: &cpal::Host,
    id: Option<&DeviceId>,
) -> Result<cpal::Device, AudioError> {
    match id {
        Some(id) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(id.0.as_str()))
            .ok_or_else(|| AudioError::DeviceNotFound(id.0.clone())),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default input".to_string())),
    }
}

/// Resolve an output device by id, or the host default when `id` is `None`
pub(crate) fn find_output_device(
    host: &cpal::Host,
    id: Option<&DeviceId>,
) -> Result<cpal::Device, AudioError> {
    match id {
        Some(id) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceOpenFailed(e.to_string()))?
            .find(|d| d.name().ok().as_deref() == Some(id.0.as_str()))
            .ok_or_else(|| AudioError::DeviceNotFound(id.0.clone())),
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default output".to_string())),
    }
}

struct Capabilities {
    sample_rates: Vec<u32>,
    channels: Vec<u16>,
    min_buffer_frames: u32,
}

fn device_capabilities(device: &cpal::Device, direction: Direction) -> Capabilities {
    let configs: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map(|c| c.collect())
            .unwrap_or_default(),
        Direction::Output => device
            .supported_output_configs()
            .map(|c| c.collect())
            .unwrap_or_default(),
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();
    let mut min_buffer_frames = 0u32;

    for config in &configs {
        for rate in [44100u32, 48000, 96000, 192000] {
            if rate >= config.min_sample_rate().0
                && rate <= config.max_sample_rate().0
                && !sample_rates.contains(&rate)
            {
                sample_rates.push(rate);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
        if let cpal::SupportedBufferSize::Range { min, .. } = config.buffer_size() {
            if min_buffer_frames == 0 || *min < min_buffer_frames {
                min_buffer_frames = *min;
            }
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();

    Capabilities {
        sample_rates,
        channels,
        min_buffer_frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices_does_not_panic() {
        // Device availability depends on the system
        let _inputs = list_input_devices();
        let _outputs = list_output_devices();
    }

    #[test]
    fn test_unknown_device_is_reported() {
        let host = cpal::default_host();
        let id = DeviceId::from("no-such-device-fxrack");
        assert!(matches!(
            find_output_device(&host, Some(&id)),
            Err(AudioError::DeviceNotFound(_)) | Err(AudioError::DeviceOpenFailed(_))
        ));
    }
}
