use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

fn host() -> cpal::Host {
    let host = cpal::default_host();
    tracing::debug!("audio host: {:?}", host.id());
    host
}

pub fn default_input() -> anyhow::Result<Device> {
    host()
        .default_input_device()
        .context("no default input device")
}

pub fn default_output() -> anyhow::Result<Device> {
    host()
        .default_output_device()
        .context("no default output device")
}

pub fn input_by_name(name: &str) -> anyhow::Result<Device> {
    let devices = host()
        .input_devices()
        .context("failed to enumerate input devices")?;
    for device in devices {
        if device.name().is_ok_and(|n| n == name) {
            return Ok(device);
        }
    }
    anyhow::bail!("no input device named {:?}", name)
}

pub fn output_by_name(name: &str) -> anyhow::Result<Device> {
    let devices = host()
        .output_devices()
        .context("failed to enumerate output devices")?;
    for device in devices {
        if device.name().is_ok_and(|n| n == name) {
            return Ok(device);
        }
    }
    anyhow::bail!("no output device named {:?}", name)
}

/// One line per input device: name, channel count, sample rate, and a
/// `[default]` marker.
pub fn list_inputs() -> anyhow::Result<String> {
    let host = host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .context("failed to enumerate input devices")?;

    let mut lines = Vec::new();
    for device in devices {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        let Ok(config) = device.default_input_config() else {
            continue;
        };
        let mut line = format!(
            " * {}({}ch, {}hz)",
            name,
            config.channels(),
            config.sample_rate().0
        );
        if Some(&name) == default_name.as_ref() {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// One line per output device, same format as [`list_inputs`].
pub fn list_outputs() -> anyhow::Result<String> {
    let host = host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .context("failed to enumerate output devices")?;

    let mut lines = Vec::new();
    for device in devices {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        let Ok(config) = device.default_output_config() else {
            continue;
        };
        let mut line = format!(
            " * {}({}ch, {}hz)",
            name,
            config.channels(),
            config.sample_rate().0
        );
        if Some(&name) == default_name.as_ref() {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}
