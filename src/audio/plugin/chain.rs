//! Ordered chain of plugin instances
//!
//! Structural edits take the chain's write lock. The audio thread only ever
//! *tries* the read lock and passes audio through untouched when it cannot
//! get it, so an edit never stalls the callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{ChainState, ControlPorts, OutputAtom, Plugin, PluginInfo, PluginRegistry, PluginState};
use super::{StereoInput, StereoOutput};

struct Slot {
    info: PluginInfo,
    controls: Arc<ControlPorts>,
    plugin: Mutex<Box<dyn Plugin>>,
}

impl Slot {
    fn new(plugin: Box<dyn Plugin>) -> Self {
        Self {
            info: plugin.info().clone(),
            controls: Arc::clone(plugin.controls()),
            plugin: Mutex::new(plugin),
        }
    }
}

#[derive(Default)]
struct ChainInner {
    slots: Vec<Slot>,
    sample_rate: f32,
    block_frames: u32,
}

/// Ping-pong buffers between stages
#[derive(Default)]
struct Scratch {
    ping: [Vec<f32>; 2],
    pong: [Vec<f32>; 2],
}

impl Scratch {
    fn ensure(&mut self, frames: usize) {
        for buffer in self.ping.iter_mut().chain(self.pong.iter_mut()) {
            if buffer.len() < frames {
                buffer.resize(frames, 0.0);
            }
        }
    }
}

/// Ordered list of plugins processed in series
#[derive(Default)]
pub struct PluginChain {
    inner: RwLock<ChainInner>,
    scratch: Mutex<Scratch>,
    contended: AtomicU64,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a plugin at `position`, or append when `None` or past the end.
    ///
    /// The plugin is activated immediately if the chain already has a sample
    /// rate. Returns the index it landed at.
    pub fn add_plugin(&self, plugin: Box<dyn Plugin>, position: Option<usize>) -> usize {
        let mut inner = self.inner.write();
        let (sample_rate, block_frames) = (inner.sample_rate, inner.block_frames);
        let mut slot = Slot::new(plugin);
        if sample_rate > 0.0 {
            slot.plugin.get_mut().activate(sample_rate, block_frames);
        }

        let name = slot.info.name.clone();
        let index = match position {
            Some(p) if p < inner.slots.len() => {
                inner.slots.insert(p, slot);
                p
            }
            _ => {
                inner.slots.push(slot);
                inner.slots.len() - 1
            }
        };
        info!("Added plugin {} at position {}", name, index);
        index
    }

    /// Deactivate and drop the plugin at `index`. False if out of range.
    pub fn remove_plugin(&self, index: usize) -> bool {
        let mut inner = self.inner.write();
        if index >= inner.slots.len() {
            debug!("remove_plugin: index {} out of range", index);
            return false;
        }
        let mut slot = inner.slots.remove(index);
        slot.plugin.get_mut().deactivate();
        info!("Removed plugin {} from position {}", slot.info.name, index);
        true
    }

    /// Move the plugin at `from` to `to`.
    ///
    /// False, with the chain unchanged, if either index is out of range or
    /// they are equal.
    pub fn reorder_plugins(&self, from: usize, to: usize) -> bool {
        let mut inner = self.inner.write();
        let len = inner.slots.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        let slot = inner.slots.remove(from);
        inner.slots.insert(to, slot);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deactivate and remove every plugin
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        for slot in inner.slots.iter_mut() {
            slot.plugin.get_mut().deactivate();
        }
        inner.slots.clear();
    }

    /// Store the processing configuration and re-activate every plugin with it
    pub fn set_sample_rate(&self, sample_rate: f32, block_frames: u32) {
        let mut inner = self.inner.write();
        inner.sample_rate = sample_rate;
        inner.block_frames = block_frames;
        for slot in inner.slots.iter_mut() {
            slot.plugin.get_mut().activate(sample_rate, block_frames);
        }
        self.scratch.lock().ensure(block_frames as usize);
    }

    pub fn deactivate(&self) {
        let mut inner = self.inner.write();
        for slot in inner.slots.iter_mut() {
            slot.plugin.get_mut().deactivate();
        }
    }

    /// Run `num_frames` frames of stereo audio through every plugin in order.
    ///
    /// Called from the audio thread. If the chain is being edited or a stage
    /// is busy on another thread, that audio is passed through instead.
    pub fn process(&self, inputs: StereoInput<'_>, outputs: StereoOutput<'_>, num_frames: usize) {
        let [in_l, in_r] = inputs;
        let [out_l, out_r] = outputs;
        let n = num_frames
            .min(in_l.len())
            .min(in_r.len())
            .min(out_l.len())
            .min(out_r.len());
        let inputs = [&in_l[..n], &in_r[..n]];
        let outputs = [&mut out_l[..n], &mut out_r[..n]];

        let Some(inner) = self.inner.try_read() else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            passthrough(inputs, outputs);
            return;
        };

        let Some((first, rest)) = inner.slots.split_first() else {
            passthrough(inputs, outputs);
            return;
        };
        let Some((last, middle)) = rest.split_last() else {
            self.run_stage(first, inputs, outputs);
            return;
        };

        let Some(mut scratch) = self.scratch.try_lock() else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            passthrough(inputs, outputs);
            return;
        };
        scratch.ensure(n);
        let Scratch { ping, pong } = &mut *scratch;
        let (mut src, mut dst) = (ping, pong);

        self.run_stage(first, inputs, frames_mut(src, n));
        for slot in middle {
            self.run_stage(slot, frames(src, n), frames_mut(dst, n));
            std::mem::swap(&mut src, &mut dst);
        }
        self.run_stage(last, frames(src, n), outputs);
    }

    fn run_stage(&self, slot: &Slot, inputs: StereoInput<'_>, outputs: StereoOutput<'_>) {
        match slot.plugin.try_lock() {
            Some(mut plugin) => plugin.process(inputs, outputs),
            None => {
                self.contended.fetch_add(1, Ordering::Relaxed);
                passthrough(inputs, outputs);
            }
        }
    }

    /// Buffers or stages that were passed through because a lock was held
    pub fn contended_buffers(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }

    pub fn plugin_info(&self, index: usize) -> Option<PluginInfo> {
        self.inner.read().slots.get(index).map(|s| s.info.clone())
    }

    /// Control port table of the plugin at `index`
    pub fn controls(&self, index: usize) -> Option<Arc<ControlPorts>> {
        self.inner.read().slots.get(index).map(|s| Arc::clone(&s.controls))
    }

    /// Set a control value. Safe while audio is running.
    pub fn set_parameter(&self, index: usize, port: u32, value: f32) -> bool {
        match self.controls(index) {
            Some(controls) => controls.set(port, value),
            None => false,
        }
    }

    /// Read a control value, 0.0 for an unknown plugin or port
    pub fn get_parameter(&self, index: usize, port: u32) -> f32 {
        self.controls(index).map(|c| c.get(port)).unwrap_or(0.0)
    }

    pub fn set_file_path(&self, index: usize, property_uri: &str, path: &std::path::Path) {
        if let Some(slot) = self.inner.read().slots.get(index) {
            slot.plugin.lock().set_file_path(property_uri, path);
        }
    }

    pub fn inject_atom(&self, index: usize, data: &[u8]) {
        if let Some(slot) = self.inner.read().slots.get(index) {
            slot.plugin.lock().inject_atom(data);
        }
    }

    /// Collect pending output events of the plugin at `index`
    pub fn drain_output_atoms(&self, index: usize) -> Vec<OutputAtom> {
        match self.inner.read().slots.get(index) {
            Some(slot) => slot.plugin.lock().drain_output_atoms(),
            None => Vec::new(),
        }
    }

    /// Snapshot every plugin in chain order
    pub fn save_chain_state(&self) -> ChainState {
        let inner = self.inner.read();
        ChainState {
            plugins: inner
                .slots
                .iter()
                .map(|slot| slot.plugin.lock().save_state())
                .collect(),
        }
    }

    /// Replace the chain with the plugins in `state`.
    ///
    /// Plugins the registry cannot create are skipped. Returns how many were
    /// created and accepted their saved state.
    pub fn rebuild_from_state(&self, registry: &PluginRegistry, state: &ChainState) -> usize {
        self.clear();
        let mut restored = 0;
        for plugin_state in &state.plugins {
            let Some(plugin) = registry.create(&plugin_state.uri) else {
                warn!("Unknown plugin {} in saved chain, skipped", plugin_state.uri);
                continue;
            };
            let index = self.add_plugin(plugin, None);
            if self.restore_plugin_state(index, plugin_state) {
                restored += 1;
            }
        }
        info!("Restored {} of {} plugins", restored, state.plugins.len());
        restored
    }

    /// Apply a snapshot to the plugin at `index`
    pub fn restore_plugin_state(&self, index: usize, state: &PluginState) -> bool {
        let mut inner = self.inner.write();
        let Some(slot) = inner.slots.get_mut(index) else {
            return false;
        };
        let restored = slot.plugin.get_mut().restore_state(state);
        if !restored {
            warn!("Plugin {} rejected restored state", slot.info.name);
        }
        restored
    }
}

fn frames(buffers: &[Vec<f32>; 2], n: usize) -> StereoInput<'_> {
    [&buffers[0][..n], &buffers[1][..n]]
}

fn frames_mut(buffers: &mut [Vec<f32>; 2], n: usize) -> StereoOutput<'_> {
    let [l, r] = buffers;
    [&mut l[..n], &mut r[..n]]
}

fn passthrough(inputs: StereoInput<'_>, outputs: StereoOutput<'_>) {
    for (output, input) in outputs.into_iter().zip(inputs) {
        let n = output.len().min(input.len());
        output[..n].copy_from_slice(&input[..n]);
    }
}
