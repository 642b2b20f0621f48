//! Audio plugin hosting module
//!
//! Defines the contract every hosted effect implements, the control port table
//! shared between the host and the audio thread, and the chain, registry and
//! state layers built on top of it.

mod builtin;
mod chain;
mod registry;
mod state;

pub use builtin::{BuiltinFactory, Delay, Gain, LowPass, BUILTIN_FORMAT};
pub use chain::PluginChain;
pub use registry::{PluginFactory, PluginRegistry};
pub use state::{
    deserialize_chain_state, serialize_chain_state, ChainState, PluginState, StateProperty,
    ATOM_PATH, ATOM_STRING, ATOM_URI, STATE_FORMAT_VERSION,
};

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Two input channels handed to [`Plugin::process`]
pub type StereoInput<'a> = [&'a [f32]; 2];

/// Two output channels handed to [`Plugin::process`]
pub type StereoOutput<'a> = [&'a mut [f32]; 2];

/// Kind of data a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Audio,
    Control,
    /// Event/message port
    Atom,
}

/// Named value of an enumerated control
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalePoint {
    pub label: String,
    pub value: f32,
}

/// Port description
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub index: u32,
    pub symbol: String,
    pub name: String,
    pub kind: PortKind,
    pub is_input: bool,
    pub is_toggle: bool,
    pub default_value: f32,
    pub min: f32,
    pub max: f32,
    pub scale_points: Vec<ScalePoint>,
}

impl PortInfo {
    /// Audio port with no range
    pub fn audio(index: u32, symbol: &str, name: &str, is_input: bool) -> Self {
        Self {
            index,
            symbol: symbol.to_string(),
            name: name.to_string(),
            kind: PortKind::Audio,
            is_input,
            is_toggle: false,
            default_value: 0.0,
            min: 0.0,
            max: 0.0,
            scale_points: Vec::new(),
        }
    }

    /// Control input with a default and range
    pub fn control(index: u32, symbol: &str, name: &str, default: f32, min: f32, max: f32) -> Self {
        Self {
            index,
            symbol: symbol.to_string(),
            name: name.to_string(),
            kind: PortKind::Control,
            is_input: true,
            is_toggle: false,
            default_value: default,
            min,
            max,
            scale_points: Vec::new(),
        }
    }

    pub fn is_control_input(&self) -> bool {
        self.kind == PortKind::Control && self.is_input
    }
}

/// Plugin information
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginInfo {
    /// Identifier unique within its format, also used as the state URI
    pub id: String,
    pub name: String,
    /// Format tag of the factory that produced it
    pub format: String,
    pub ports: Vec<PortInfo>,
}

impl PluginInfo {
    /// Registry key, `format:id`
    pub fn full_id(&self) -> String {
        format!("{}:{}", self.format, self.id)
    }

    pub fn control_inputs(&self) -> impl Iterator<Item = &PortInfo> {
        self.ports.iter().filter(|p| p.is_control_input())
    }
}

/// Message emitted by a plugin on one of its output event ports
#[derive(Debug, Clone, PartialEq)]
pub struct OutputAtom {
    pub port_index: u32,
    pub data: Vec<u8>,
}

/// Control port values readable and writable from any thread.
///
/// Each value is an `f32` stored as its bit pattern, so the host can set a
/// parameter while the audio thread is inside `process` without taking a lock.
#[derive(Debug)]
pub struct ControlPorts {
    values: Box<[AtomicU32]>,
    is_control: Box<[bool]>,
}

impl ControlPorts {
    /// One slot per port index, control ports seeded with their defaults.
    /// Slots of audio and atom ports reject reads and writes.
    pub fn from_ports(ports: &[PortInfo]) -> Self {
        let len = ports.iter().map(|p| p.index as usize + 1).max().unwrap_or(0);
        let values: Box<[AtomicU32]> = (0..len).map(|_| AtomicU32::new(0)).collect();
        let mut is_control = vec![false; len].into_boxed_slice();
        for port in ports.iter().filter(|p| p.kind == PortKind::Control) {
            values[port.index as usize].store(port.default_value.to_bits(), Ordering::Relaxed);
            is_control[port.index as usize] = true;
        }
        Self { values, is_control }
    }

    fn slot(&self, port: u32) -> Option<&AtomicU32> {
        let index = port as usize;
        match self.is_control.get(index) {
            Some(true) => self.values.get(index),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Current value, 0.0 for an unknown or non-control port
    pub fn get(&self, port: u32) -> f32 {
        self.slot(port)
            .map(|v| f32::from_bits(v.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    /// Store a value; returns false for an unknown or non-control port
    pub fn set(&self, port: u32, value: f32) -> bool {
        match self.slot(port) {
            Some(slot) => {
                slot.store(value.to_bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

/// A hosted effect.
///
/// The chain calls `process` on the audio thread and everything else from
/// control threads, never concurrently for the same instance.
pub trait Plugin: Send {
    /// Get plugin information
    fn info(&self) -> &PluginInfo;

    /// Shared control port table
    fn controls(&self) -> &Arc<ControlPorts>;

    /// Prepare for processing at the given rate and maximum block size
    fn activate(&mut self, sample_rate: f32, max_block_frames: u32);

    /// Release processing resources
    fn deactivate(&mut self);

    /// Render one block. All four slices have the same length.
    fn process(&mut self, inputs: StereoInput<'_>, outputs: StereoOutput<'_>);

    fn get_parameter(&self, port: u32) -> f32 {
        self.controls().get(port)
    }

    fn set_parameter(&self, port: u32, value: f32) -> bool {
        self.controls().set(port, value)
    }

    /// Point a file-valued property at `path`
    fn set_file_path(&mut self, _property_uri: &str, _path: &Path) {}

    /// Deliver a raw event to the plugin's input event port
    fn inject_atom(&mut self, _data: &[u8]) {}

    /// Pop events the plugin emitted since the last call
    fn drain_output_atoms(&mut self) -> Vec<OutputAtom> {
        Vec::new()
    }

    /// Snapshot control inputs and opaque properties
    fn save_state(&self) -> PluginState {
        let controls = self.controls();
        PluginState {
            uri: self.info().id.clone(),
            control_values: self
                .info()
                .control_inputs()
                .map(|p| (p.index, controls.get(p.index)))
                .collect(),
            properties: Vec::new(),
        }
    }

    /// Apply a snapshot. Returns false when the state could not be applied.
    fn restore_state(&mut self, state: &PluginState) -> bool {
        let controls = self.controls();
        for &(port, value) in &state.control_values {
            controls.set(port, value);
        }
        true
    }
}
