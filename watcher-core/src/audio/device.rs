//! Host audio device enumeration and selection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about one host audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    /// Heuristic pick for the device to use when none is configured.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "virtual output",
];

const MIC_POSITIVE_KEYWORDS: &[&str] = &["microphone", "mic", "array", "headset", "usb", "webcam"];

/// Inputs that capture system output rather than a microphone.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is a better push-to-talk microphone.
pub fn mic_preference_score(name: &str, is_default: bool) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_POSITIVE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    if is_default {
        score += 2;
    }
    score
}

fn mark_recommended(list: &mut [DeviceInfo]) {
    let best = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| match d.direction {
            DeviceDirection::Input => mic_preference_score(&d.name, d.is_default),
            DeviceDirection::Output => i32::from(d.is_default),
        })
        .map(|(idx, _)| idx);
    if let Some(idx) = best {
        list[idx].is_recommended = true;
    }
}

#[cfg(feature = "audio-cpal")]
mod host {
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    use super::{mark_recommended, mic_preference_score, DeviceDirection, DeviceInfo};
    use crate::error::{Result, WatcherError};

    pub fn list(direction: DeviceDirection) -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let (default_name, devices) = match direction {
            DeviceDirection::Input => (
                host.default_input_device().and_then(|d| d.name().ok()),
                host.input_devices().map(|d| d.collect::<Vec<_>>()),
            ),
            DeviceDirection::Output => (
                host.default_output_device().and_then(|d| d.name().ok()),
                host.output_devices().map(|d| d.collect::<Vec<_>>()),
            ),
        };
        let devices = match devices {
            Ok(devices) => devices,
            Err(e) => {
                warn!(?direction, "failed to enumerate devices: {e}");
                return default_name
                    .map(|name| {
                        vec![DeviceInfo {
                            name,
                            direction,
                            is_default: true,
                            is_recommended: true,
                        }]
                    })
                    .unwrap_or_default();
            }
        };

        let mut list: Vec<DeviceInfo> = devices
            .iter()
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Device {}", idx + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo {
                    name,
                    direction,
                    is_default,
                    is_recommended: false,
                }
            })
            .collect();
        mark_recommended(&mut list);
        list.sort_by_key(|d| (!d.is_recommended, !d.is_default, d.name.to_ascii_lowercase()));
        list
    }

    /// Preferred input by name, else the default, else the best-scoring one.
    pub fn select_input(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(name) = preferred {
            match host.input_devices() {
                Ok(mut devices) => {
                    if let Some(device) =
                        devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    {
                        return Ok(device);
                    }
                    warn!(preferred = name, "input device not found, falling back");
                }
                Err(e) => warn!("failed to list input devices: {e}"),
            }
        }
        if let Some(device) = host.default_input_device() {
            return Ok(device);
        }
        host.input_devices()
            .map_err(|e| WatcherError::AudioDevice(e.to_string()))?
            .max_by_key(|d| mic_preference_score(&d.name().unwrap_or_default(), false))
            .ok_or_else(|| WatcherError::AudioDevice("no input device available".into()))
    }

    /// Preferred output by name, else the default.
    pub fn select_output(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(name) = preferred {
            match host.output_devices() {
                Ok(mut devices) => {
                    if let Some(device) =
                        devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    {
                        return Ok(device);
                    }
                    warn!(preferred = name, "output device not found, falling back");
                }
                Err(e) => warn!("failed to list output devices: {e}"),
            }
        }
        host.default_output_device()
            .ok_or_else(|| WatcherError::AudioDevice("no output device available".into()))
    }
}

#[cfg(feature = "audio-cpal")]
pub(crate) use host::{select_input, select_output};

/// All input devices, recommended first.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    host::list(DeviceDirection::Input)
}

/// All output devices, default first.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    host::list(DeviceDirection::Output)
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction: DeviceDirection::Input,
            is_default,
            is_recommended: false,
        }
    }

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(!is_loopback_like_name("USB Microphone"));
    }

    #[test]
    fn microphone_beats_default_loopback() {
        let mut list = vec![
            input("Stereo Mix (Realtek Audio)", true),
            input("Headset Microphone (USB)", false),
        ];
        mark_recommended(&mut list);
        assert!(!list[0].is_recommended);
        assert!(list[1].is_recommended);
    }

    #[test]
    fn default_breaks_ties() {
        assert!(mic_preference_score("Built-in Mic", true) > mic_preference_score("Built-in Mic", false));
    }
}
