//! Chain state save/restore tests
//!
//! Snapshots are taken from a live chain, written to JSON, read back and
//! applied to a freshly built chain through the plugin registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fxrack::audio::plugin::{
    deserialize_chain_state, serialize_chain_state, ControlPorts, Gain, LowPass, Plugin,
    PluginChain, PluginFactory, PluginInfo, PluginRegistry, PluginState, PortInfo, StateProperty,
    StereoInput, StereoOutput, ATOM_PATH,
};
use fxrack::audio::{AudioError, StateError};

const SAMPLE_PROPERTY: &str = "urn:fxrack:test#sample";

/// Plugin that remembers a file path, like a sample player would
struct Player {
    info: PluginInfo,
    controls: Arc<ControlPorts>,
    sample: Option<PathBuf>,
}

impl Player {
    fn new() -> Self {
        let info = PluginInfo {
            id: "player".to_string(),
            name: "Player".to_string(),
            format: "test".to_string(),
            ports: vec![PortInfo::control(0, "level", "Level", 1.0, 0.0, 1.0)],
        };
        Self {
            controls: Arc::new(ControlPorts::from_ports(&info.ports)),
            info,
            sample: None,
        }
    }
}

impl Plugin for Player {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn controls(&self) -> &Arc<ControlPorts> {
        &self.controls
    }

    fn activate(&mut self, _sample_rate: f32, _max_block_frames: u32) {}

    fn deactivate(&mut self) {}

    fn process(&mut self, inputs: StereoInput<'_>, outputs: StereoOutput<'_>) {
        for (output, input) in outputs.into_iter().zip(inputs) {
            output.copy_from_slice(input);
        }
    }

    fn set_file_path(&mut self, property_uri: &str, path: &Path) {
        if property_uri == SAMPLE_PROPERTY {
            self.sample = Some(path.to_path_buf());
        }
    }

    fn save_state(&self) -> PluginState {
        let mut value = self
            .sample
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned().into_bytes())
            .unwrap_or_default();
        value.push(0);
        PluginState {
            uri: self.info.id.clone(),
            control_values: vec![(0, self.controls.get(0))],
            properties: vec![StateProperty {
                key: SAMPLE_PROPERTY.to_string(),
                type_uri: ATOM_PATH.to_string(),
                value,
                flags: 1,
            }],
        }
    }

    fn restore_state(&mut self, state: &PluginState) -> bool {
        for &(port, value) in &state.control_values {
            self.controls.set(port, value);
        }
        let Some(property) = state.properties.iter().find(|p| p.key == SAMPLE_PROPERTY) else {
            return false;
        };
        let Some((_, body)) = property.value.split_last() else {
            return false;
        };
        match std::str::from_utf8(body) {
            Ok(path) => {
                self.sample = Some(PathBuf::from(path));
                true
            }
            Err(_) => false,
        }
    }
}

struct TestFactory;

impl PluginFactory for TestFactory {
    fn format(&self) -> &str {
        "test"
    }

    fn initialize(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn enumerate(&self) -> Vec<PluginInfo> {
        vec![Player::new().info]
    }

    fn create(&self, id: &str) -> Option<Box<dyn Plugin>> {
        (id == "player").then(|| Box::new(Player::new()) as Box<dyn Plugin>)
    }
}

fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    registry.register_factory(Box::new(TestFactory));
    assert!(registry.initialize_all());
    registry
}

/// Test: Chain state survives a JSON round trip
/// Given a chain of gain, low-pass and a player with a file path set
/// When the state is saved, serialized, parsed and rebuilt into a new chain
/// Then plugin order, parameters and the file path are restored
#[test]
fn test_chain_state_round_trip() {
    let registry = registry();
    let chain = PluginChain::new();
    chain.add_plugin(registry.create("builtin:gain").unwrap(), None);
    chain.add_plugin(registry.create("builtin:lowpass").unwrap(), None);
    chain.add_plugin(registry.create("test:player").unwrap(), None);
    chain.set_parameter(0, Gain::GAIN_DB, -12.5);
    chain.set_parameter(1, LowPass::CUTOFF_HZ, 3200.0);
    chain.set_parameter(2, 0, 0.25);
    chain.set_file_path(2, SAMPLE_PROPERTY, Path::new("/samples/kick.wav"));

    let json = serialize_chain_state(&chain.save_chain_state()).unwrap();
    assert!(json.contains("/samples/kick.wav"));

    let state = deserialize_chain_state(&json).unwrap();
    let restored = PluginChain::new();
    assert_eq!(restored.rebuild_from_state(&registry, &state), 3);

    assert_eq!(restored.len(), 3);
    assert_eq!(restored.plugin_info(2).unwrap().id, "player");
    assert_eq!(restored.get_parameter(0, Gain::GAIN_DB), -12.5);
    assert_eq!(restored.get_parameter(1, LowPass::CUTOFF_HZ), 3200.0);
    assert_eq!(restored.get_parameter(2, 0), 0.25);

    let path = &restored.save_chain_state().plugins[2].properties[0];
    assert_eq!(path.value, b"/samples/kick.wav\0".to_vec());
    assert_eq!(path.flags, 1);
}

/// Test: Unknown plugins are skipped on restore
/// Given a saved chain containing an id no factory provides
/// When rebuilding from it
/// Then the remaining plugins are created in order
#[test]
fn test_unknown_plugin_skipped() {
    let registry = registry();
    let state = deserialize_chain_state(
        r#"{
            "version": 1,
            "plugins": [
                { "uri": "gain", "controlPorts": [{ "index": 4, "value": 3.0 }] },
                { "uri": "vst:missing" },
                { "uri": "lowpass", "controlPorts": [] }
            ]
        }"#,
    )
    .unwrap();

    let chain = PluginChain::new();
    assert_eq!(chain.rebuild_from_state(&registry, &state), 2);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.get_parameter(0, Gain::GAIN_DB), 3.0);
    assert_eq!(chain.plugin_info(1).unwrap().id, "lowpass");
}

/// Test: Binary and unterminated properties use base64
/// Given a text-typed property without a terminating NUL and a binary one
/// When the state is serialized and parsed again
/// Then both values come back byte for byte
#[test]
fn test_non_text_properties_round_trip() {
    let state = fxrack::audio::plugin::ChainState {
        plugins: vec![PluginState {
            uri: "player".to_string(),
            control_values: vec![],
            properties: vec![
                StateProperty {
                    key: "name".to_string(),
                    type_uri: ATOM_PATH.to_string(),
                    value: b"no-terminator".to_vec(),
                    flags: 0,
                },
                StateProperty {
                    key: "blob".to_string(),
                    type_uri: "urn:fxrack:test#Blob".to_string(),
                    value: vec![0, 255, 1, 254, 0],
                    flags: 3,
                },
            ],
        }],
    };

    let json = serialize_chain_state(&state).unwrap();
    assert_eq!(json.matches("\"base64\"").count(), 2);
    assert_eq!(deserialize_chain_state(&json).unwrap(), state);
}

/// Test: Unsupported documents are rejected
/// Given documents with a future version, bad base64, or malformed JSON
/// When parsing them
/// Then each fails with the matching error
#[test]
fn test_invalid_documents_rejected() {
    let future = r#"{ "version": 2, "plugins": [] }"#;
    assert!(matches!(
        deserialize_chain_state(future),
        Err(StateError::UnsupportedVersion(2))
    ));

    let bad_base64 = r#"{
        "version": 1,
        "plugins": [{
            "uri": "gain",
            "stateProperties": [
                { "key": "k", "type": "t", "encoding": "base64", "value": "!!!" }
            ]
        }]
    }"#;
    assert!(matches!(
        deserialize_chain_state(bad_base64),
        Err(StateError::Base64 { .. })
    ));

    assert!(matches!(
        deserialize_chain_state("{ not json"),
        Err(StateError::Json(_))
    ));
}
