//! Peer identity exchanged during registration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity of one process in the mesh.
///
/// `id` is unique across the mesh; `role` groups peers for broadcast and
/// batching policy. `attributes` carries free-form application data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Unique peer id.
    #[serde(default)]
    pub id: String,
    /// Role used for broadcast and per-role configuration.
    #[serde(default)]
    pub role: String,
    /// Application-defined attributes.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl PeerIdentity {
    /// Create an identity without attributes.
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            attributes: Map::new(),
        }
    }

    /// Add one attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Both id and role are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty() && !self.role.is_empty()
    }
}
