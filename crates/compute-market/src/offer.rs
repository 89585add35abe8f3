use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Human-readable node name a provider advertises.
pub const PROP_NODE_NAME: &str = "golem.node.id.name";
/// Subnet the provider's offer was published in.
pub const PROP_SUBNET: &str = "golem.node.debug.subnet";

/// A provider's published proposal. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: String,
    /// Provider identity.
    pub issuer: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl Offer {
    pub fn new(issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        Self {
            offer_id: format!("offer_{issuer}"),
            issuer,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_offer_id(mut self, offer_id: impl Into<String>) -> Self {
        self.offer_id = offer_id.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn node_name(&self) -> &str {
        self.property(PROP_NODE_NAME)
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
    }
}

/// Contract formed from an accepted offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    pub agreement_id: String,
    pub provider_id: String,
    pub node_name: String,
}

/// Live handle to an activity: reachable through `tunnel_base_url` with `token`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub activity_id: String,
    pub tunnel_base_url: String,
    pub token: String,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("activity_id", &self.activity_id)
            .field("tunnel_base_url", &self.tunnel_base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}
