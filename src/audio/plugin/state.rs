//! Chain state snapshots and their JSON form
//!
//! A snapshot stores, per plugin, its id, every control input value and any
//! opaque properties the plugin saved. Text-typed properties are written as
//! plain strings when that is lossless; everything else is base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audio::StateError;

/// Current document version
pub const STATE_FORMAT_VERSION: u32 = 1;

pub const ATOM_STRING: &str = "http://lv2plug.in/ns/ext/atom#String";
pub const ATOM_PATH: &str = "http://lv2plug.in/ns/ext/atom#Path";
pub const ATOM_URI: &str = "http://lv2plug.in/ns/ext/atom#URI";

const BASE64_ENCODING: &str = "base64";

/// Opaque key/value saved by a plugin
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateProperty {
    pub key: String,
    pub type_uri: String,
    pub value: Vec<u8>,
    pub flags: u32,
}

/// Saved state of one plugin instance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PluginState {
    /// Plugin id used to re-create the instance
    pub uri: String,
    /// `(port index, value)` for every control input
    pub control_values: Vec<(u32, f32)>,
    pub properties: Vec<StateProperty>,
}

/// Saved state of a whole chain, in chain order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChainState {
    pub plugins: Vec<PluginState>,
}

#[derive(Serialize, Deserialize)]
struct ChainDocument {
    version: u32,
    plugins: Vec<PluginDocument>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginDocument {
    uri: String,
    #[serde(default)]
    control_ports: Vec<ControlPortDocument>,
    #[serde(default)]
    state_properties: Vec<PropertyDocument>,
}

#[derive(Serialize, Deserialize)]
struct ControlPortDocument {
    index: u32,
    value: f32,
}

#[derive(Serialize, Deserialize)]
struct PropertyDocument {
    key: String,
    #[serde(rename = "type")]
    type_uri: String,
    #[serde(default)]
    flags: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
    value: String,
}

fn is_text_type(type_uri: &str) -> bool {
    matches!(type_uri, ATOM_STRING | ATOM_PATH | ATOM_URI)
}

/// The UTF-8 body of a NUL-terminated string with no interior NUL
fn terminated_text(bytes: &[u8]) -> Option<&str> {
    let (&last, body) = bytes.split_last()?;
    if last != 0 || body.contains(&0) {
        return None;
    }
    std::str::from_utf8(body).ok()
}

impl PropertyDocument {
    fn encode(property: &StateProperty) -> Self {
        let text = is_text_type(&property.type_uri)
            .then(|| terminated_text(&property.value))
            .flatten();
        let (encoding, value) = match text {
            Some(text) => (None, text.to_string()),
            None => (Some(BASE64_ENCODING.to_string()), STANDARD.encode(&property.value)),
        };
        Self {
            key: property.key.clone(),
            type_uri: property.type_uri.clone(),
            flags: property.flags,
            encoding,
            value,
        }
    }

    fn decode(self) -> Result<StateProperty, StateError> {
        let value = match self.encoding.as_deref() {
            Some(BASE64_ENCODING) => {
                STANDARD
                    .decode(self.value.as_bytes())
                    .map_err(|source| StateError::Base64 {
                        key: self.key.clone(),
                        source,
                    })?
            }
            Some(other) => return Err(StateError::UnsupportedEncoding(other.to_string())),
            None if is_text_type(&self.type_uri) => {
                let mut bytes = self.value.into_bytes();
                bytes.push(0);
                bytes
            }
            None => self.value.into_bytes(),
        };
        Ok(StateProperty {
            key: self.key,
            type_uri: self.type_uri,
            value,
            flags: self.flags,
        })
    }
}

/// Render a chain snapshot as pretty-printed JSON
pub fn serialize_chain_state(state: &ChainState) -> Result<String, StateError> {
    let document = ChainDocument {
        version: STATE_FORMAT_VERSION,
        plugins: state
            .plugins
            .iter()
            .map(|plugin| PluginDocument {
                uri: plugin.uri.clone(),
                control_ports: plugin
                    .control_values
                    .iter()
                    .map(|&(index, value)| ControlPortDocument {
                        index,
                        value: finite_or_zero(&plugin.uri, index, value),
                    })
                    .collect(),
                state_properties: plugin.properties.iter().map(PropertyDocument::encode).collect(),
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Parse a document produced by [`serialize_chain_state`]
pub fn deserialize_chain_state(json: &str) -> Result<ChainState, StateError> {
    let document: ChainDocument = serde_json::from_str(json)?;
    if document.version != STATE_FORMAT_VERSION {
        return Err(StateError::UnsupportedVersion(document.version));
    }

    let plugins = document
        .plugins
        .into_iter()
        .map(|plugin| {
            Ok(PluginState {
                uri: plugin.uri,
                control_values: plugin
                    .control_ports
                    .into_iter()
                    .map(|port| (port.index, port.value))
                    .collect(),
                properties: plugin
                    .state_properties
                    .into_iter()
                    .map(PropertyDocument::decode)
                    .collect::<Result<_, _>>()?,
            })
        })
        .collect::<Result<_, StateError>>()?;

    Ok(ChainState { plugins })
}

// JSON has no NaN or infinity
fn finite_or_zero(uri: &str, index: u32, value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        warn!("{} port {}: non-finite value {} saved as 0", uri, index, value);
        0.0
    }
}
