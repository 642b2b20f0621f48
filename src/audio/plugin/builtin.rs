//! Built-in effects
//!
//! Small effects that ship with the host so a chain can be built without any
//! external plugin format. All share the same port layout: stereo audio in on
//! ports 0-1, stereo audio out on ports 2-3, control inputs from port 4.

use std::f32::consts::PI;
use std::sync::Arc;

use super::{ControlPorts, Plugin, PluginFactory, PluginInfo, PortInfo};
use super::{StereoInput, StereoOutput};
use crate::audio::AudioError;

/// Format tag of plugins created by [`BuiltinFactory`]
pub const BUILTIN_FORMAT: &str = "builtin";

const FIRST_CONTROL_PORT: u32 = 4;

fn stereo_ports(controls: Vec<PortInfo>) -> Vec<PortInfo> {
    let mut ports = vec![
        PortInfo::audio(0, "in_l", "Left In", true),
        PortInfo::audio(1, "in_r", "Right In", true),
        PortInfo::audio(2, "out_l", "Left Out", false),
        PortInfo::audio(3, "out_r", "Right Out", false),
    ];
    ports.extend(controls);
    ports
}

fn plugin_info(id: &str, name: &str, controls: Vec<PortInfo>) -> PluginInfo {
    PluginInfo {
        id: id.to_string(),
        name: name.to_string(),
        format: BUILTIN_FORMAT.to_string(),
        ports: stereo_ports(controls),
    }
}

/// Gain effect (volume adjustment)
pub struct Gain {
    info: PluginInfo,
    controls: Arc<ControlPorts>,
}

impl Gain {
    /// Port carrying gain in dB
    pub const GAIN_DB: u32 = FIRST_CONTROL_PORT;

    pub fn new() -> Self {
        let info = plugin_info(
            "gain",
            "Gain",
            vec![PortInfo::control(Self::GAIN_DB, "gain_db", "Gain (dB)", 0.0, -60.0, 24.0)],
        );
        Self {
            controls: Arc::new(ControlPorts::from_ports(&info.ports)),
            info,
        }
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for Gain {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn controls(&self) -> &Arc<ControlPorts> {
        &self.controls
    }

    fn activate(&mut self, _sample_rate: f32, _max_block_frames: u32) {}

    fn deactivate(&mut self) {}

    fn process(&mut self, inputs: StereoInput<'_>, outputs: StereoOutput<'_>) {
        let gain = db_to_linear(self.controls.get(Self::GAIN_DB));
        for (output, input) in outputs.into_iter().zip(inputs) {
            for (o, i) in output.iter_mut().zip(input) {
                *o = i * gain;
            }
        }
    }
}

/// One-pole low-pass filter
pub struct LowPass {
    info: PluginInfo,
    controls: Arc<ControlPorts>,
    sample_rate: f32,
    cutoff: f32,
    alpha: f32,
    prev: [f32; 2],
}

impl LowPass {
    /// Port carrying cutoff in Hz
    pub const CUTOFF_HZ: u32 = FIRST_CONTROL_PORT;

    pub fn new() -> Self {
        let info = plugin_info(
            "lowpass",
            "Low-Pass Filter",
            vec![PortInfo::control(Self::CUTOFF_HZ, "cutoff", "Cutoff (Hz)", 1000.0, 20.0, 20000.0)],
        );
        Self {
            controls: Arc::new(ControlPorts::from_ports(&info.ports)),
            info,
            sample_rate: 48000.0,
            cutoff: 0.0,
            alpha: 1.0,
            prev: [0.0; 2],
        }
    }

    fn update_alpha(&mut self, cutoff: f32) {
        self.cutoff = cutoff;
        // Below 40 Hz sample rates Nyquist falls under the 20 Hz floor
        let cutoff = cutoff.max(20.0).min(self.sample_rate * 0.5);
        let rc = 1.0 / (2.0 * PI * cutoff);
        let dt = 1.0 / self.sample_rate;
        self.alpha = dt / (rc + dt);
    }
}

impl Default for LowPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for LowPass {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn controls(&self) -> &Arc<ControlPorts> {
        &self.controls
    }

    fn activate(&mut self, sample_rate: f32, _max_block_frames: u32) {
        self.sample_rate = sample_rate;
        self.prev = [0.0; 2];
        self.update_alpha(self.controls.get(Self::CUTOFF_HZ));
    }

    fn deactivate(&mut self) {
        self.prev = [0.0; 2];
    }

    fn process(&mut self, inputs: StereoInput<'_>, outputs: StereoOutput<'_>) {
        let cutoff = self.controls.get(Self::CUTOFF_HZ);
        if cutoff != self.cutoff {
            self.update_alpha(cutoff);
        }
        let alpha = self.alpha;
        for ((output, input), prev) in outputs.into_iter().zip(inputs).zip(self.prev.iter_mut()) {
            for (o, i) in output.iter_mut().zip(input) {
                *prev += alpha * (i - *prev);
                *o = *prev;
            }
        }
    }
}

/// Feedback delay
pub struct Delay {
    info: PluginInfo,
    controls: Arc<ControlPorts>,
    sample_rate: f32,
    lines: [Vec<f32>; 2],
    write_pos: usize,
}

impl Delay {
    pub const TIME_MS: u32 = FIRST_CONTROL_PORT;
    pub const FEEDBACK: u32 = FIRST_CONTROL_PORT + 1;
    pub const MIX: u32 = FIRST_CONTROL_PORT + 2;

    /// Longest delay the line is sized for
    pub const MAX_TIME_MS: f32 = 2000.0;

    pub fn new() -> Self {
        let info = plugin_info(
            "delay",
            "Delay",
            vec![
                PortInfo::control(Self::TIME_MS, "time", "Time (ms)", 250.0, 1.0, Self::MAX_TIME_MS),
                PortInfo::control(Self::FEEDBACK, "feedback", "Feedback", 0.3, 0.0, 0.95),
                PortInfo::control(Self::MIX, "mix", "Mix", 0.5, 0.0, 1.0),
            ],
        );
        Self {
            controls: Arc::new(ControlPorts::from_ports(&info.ports)),
            info,
            sample_rate: 0.0,
            lines: [Vec::new(), Vec::new()],
            write_pos: 0,
        }
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for Delay {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn controls(&self) -> &Arc<ControlPorts> {
        &self.controls
    }

    fn activate(&mut self, sample_rate: f32, _max_block_frames: u32) {
        self.sample_rate = sample_rate;
        let len = (Self::MAX_TIME_MS * 0.001 * sample_rate) as usize + 1;
        for line in self.lines.iter_mut() {
            line.clear();
            line.resize(len, 0.0);
        }
        self.write_pos = 0;
    }

    fn deactivate(&mut self) {
        for line in self.lines.iter_mut() {
            line.fill(0.0);
        }
    }

    fn process(&mut self, inputs: StereoInput<'_>, outputs: StereoOutput<'_>) {
        let len = self.lines[0].len();
        if len == 0 {
            // Not activated yet
            for (output, input) in outputs.into_iter().zip(inputs) {
                output.copy_from_slice(input);
            }
            return;
        }

        let time_ms = self.controls.get(Self::TIME_MS).clamp(1.0, Self::MAX_TIME_MS);
        let delay = ((time_ms * 0.001 * self.sample_rate) as usize).clamp(1, len - 1);
        let feedback = self.controls.get(Self::FEEDBACK).clamp(0.0, 0.95);
        let mix = self.controls.get(Self::MIX).clamp(0.0, 1.0);

        let start = self.write_pos;
        for ((output, input), line) in outputs.into_iter().zip(inputs).zip(self.lines.iter_mut()) {
            let mut pos = start;
            for (o, &dry) in output.iter_mut().zip(input) {
                let wet = line[(pos + len - delay) % len];
                line[pos] = dry + wet * feedback;
                *o = dry * (1.0 - mix) + wet * mix;
                pos = (pos + 1) % len;
            }
        }
        let frames = inputs[0].len();
        self.write_pos = (start + frames) % len;
    }
}

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Factory for the built-in effects
#[derive(Debug, Default)]
pub struct BuiltinFactory;

impl BuiltinFactory {
    pub fn new() -> Self {
        Self
    }
}

impl PluginFactory for BuiltinFactory {
    fn format(&self) -> &str {
        BUILTIN_FORMAT
    }

    fn initialize(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn enumerate(&self) -> Vec<PluginInfo> {
        vec![
            Gain::new().info().clone(),
            LowPass::new().info().clone(),
            Delay::new().info().clone(),
        ]
    }

    fn create(&self, id: &str) -> Option<Box<dyn Plugin>> {
        match id {
            "gain" => Some(Box::new(Gain::new())),
            "lowpass" => Some(Box::new(LowPass::new())),
            "delay" => Some(Box::new(Delay::new())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(plugin: &mut dyn Plugin, input: &[f32]) -> Vec<f32> {
        let mut left = vec![0.0; input.len()];
        let mut right = vec![0.0; input.len()];
        plugin.process([input, input], [&mut left, &mut right]);
        assert_eq!(left, right);
        left
    }

    #[test]
    fn test_gain() {
        let mut gain = Gain::new();
        gain.set_parameter(Gain::GAIN_DB, 6.0);
        let out = process(&mut gain, &[0.5, -0.5, 0.25]);

        // +6 dB is roughly 2x
        assert!((out[0] - 1.0).abs() < 0.01);
        assert!((out[1] + 1.0).abs() < 0.01);
    }

    #[test]
    fn test_db_conversion() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 0.001);
        assert!((db_to_linear(6.0) - 2.0).abs() < 0.01);
        assert!((db_to_linear(-6.0) - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_low_pass_filter() {
        let mut lpf = LowPass::new();
        lpf.activate(48000.0, 1000);
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.1).sin()).collect();
        let out = process(&mut lpf, &input);

        assert!(out.iter().all(|s| s.abs() < 1.1));
        // Step response rises monotonically toward the input
        let step = process(&mut lpf, &[1.0; 64]);
        assert!(step.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_low_pass_at_very_low_sample_rate() {
        let mut lpf = LowPass::new();
        lpf.activate(30.0, 16);
        let out = process(&mut lpf, &[1.0; 16]);
        assert!(out.iter().all(|s| s.is_finite() && *s > 0.0 && *s <= 1.0));
    }

    #[test]
    fn test_delay() {
        let mut delay = Delay::new();
        delay.activate(1000.0, 16);
        delay.set_parameter(Delay::TIME_MS, 3.0);
        delay.set_parameter(Delay::MIX, 1.0);
        delay.set_parameter(Delay::FEEDBACK, 0.0);

        let out = process(&mut delay, &[1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_delay_before_activate_passes_through() {
        let mut delay = Delay::new();
        assert_eq!(process(&mut delay, &[0.3, 0.4]), vec![0.3, 0.4]);
    }

    #[test]
    fn test_factory_creates_known_ids() {
        let factory = BuiltinFactory::new();
        assert_eq!(factory.enumerate().len(), 3);
        assert!(factory.create("gain").is_some());
        assert!(factory.create("reverb").is_none());
        assert_eq!(factory.create("lowpass").map(|p| p.info().full_id()), Some("builtin:lowpass".to_string()));
    }
}
