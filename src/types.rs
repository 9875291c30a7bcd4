//! Core data model for amq-shadow
//!
//! Management DTOs deserialize directly from the RabbitMQ management API
//! JSON (snake_case field names). Topology records are immutable snapshots
//! taken at session start; mid-run topology changes are not tracked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Queue names starting with this prefix are broker-internal and never touched
pub const RESERVED_PREFIX: &str = "amq.";

/// Naming prefix the broker uses for server-named (anonymous) queues
///
/// Interception binds private response queues with broker-assigned names
/// under this prefix, so read access to it is required up front.
pub const AUTOGEN_PREFIX: &str = "amq.gen";

/// A virtual host on the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VhostInfo {
    pub name: String,
}

/// Per-(user, vhost) permission triple, as defined by the broker's
/// native regex authorization model
///
/// All three patterns are always present; absence of the whole record
/// for a vhost means no access at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permissions {
    pub user: String,
    pub vhost: String,
    pub configure: String,
    pub write: String,
    pub read: String,
}

/// Snapshot of a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub vhost: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: BTreeMap<String, serde_json::Value>,
}

/// Snapshot of an exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub name: String,
    pub vhost: String,
    /// Exchange type: "direct", "fanout", "topic", "headers"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub arguments: BTreeMap<String, serde_json::Value>,
}

/// A binding from a source exchange to a destination queue
///
/// Only consulted to derive routing keys for direct-type exchanges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingInfo {
    pub source: String,
    pub destination: String,
    pub destination_type: String,
    #[serde(default)]
    pub routing_key: String,
}

/// An advertised broker listener endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerInfo {
    pub protocol: String,
    #[serde(rename = "ip_address")]
    pub host: String,
    pub port: u16,
}

/// Broker identity from the overview endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerOverview {
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub product_version: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub management_version: String,
}

/// The authenticated user as reported by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoAmI {
    pub name: String,
    #[serde(default)]
    pub tags: serde_json::Value,
}

/// Fixed, fully-enumerated AMQP message property record
///
/// Copied by value on requeue; every field is preserved except `user_id`
/// (cleared when it does not match the authenticated identity) and
/// `headers` (the session marker key is added).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_mode: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

impl MessageProperties {
    /// Whether the header map contains the given marker key
    pub fn has_header(&self, key: &str) -> bool {
        self.headers
            .as_ref()
            .map(|h| h.contains_key(key))
            .unwrap_or(false)
    }

    /// Insert a header, creating the map if absent
    pub fn set_header(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
    }
}

/// One delivered message as observed by a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Exchange the message arrived through; empty for direct-to-queue
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

impl Delivery {
    /// True when the message was addressed straight to a named queue
    /// rather than routed through an exchange
    pub fn is_direct(&self) -> bool {
        self.exchange.is_empty()
    }
}

/// A queued-but-unconsumed message fetched over the management API
/// (fallback path only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub redelivered: bool,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub payload_encoding: String,
}
