//! In-memory management backend for tests and offline development
//!
//! Serves a canned topology snapshot. Since the live management API is
//! read-only from the engine's point of view, the canned data never
//! changes after construction.

use super::ManagementApi;
use crate::error::Result;
use crate::types::{
    BindingInfo, BrokerOverview, ExchangeInfo, ListenerInfo, Permissions, QueueInfo,
    QueuedMessage, VhostInfo, WhoAmI,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Canned-topology `ManagementApi` implementation
#[derive(Default)]
pub struct MemoryManagement {
    overview: BrokerOverview,
    user: String,
    vhosts: Vec<VhostInfo>,
    queues: HashMap<String, Vec<QueueInfo>>,
    exchanges: HashMap<String, Vec<ExchangeInfo>>,
    bindings: HashMap<String, Vec<BindingInfo>>,
    permissions: HashMap<(String, String), Permissions>,
    listeners: Vec<ListenerInfo>,
    messages: HashMap<(String, String), Vec<QueuedMessage>>,
}

impl MemoryManagement {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            overview: BrokerOverview {
                product_name: "RabbitMQ".to_string(),
                product_version: "3.13.0".to_string(),
                cluster_name: "rabbit@memory".to_string(),
                management_version: "3.13.0".to_string(),
            },
            ..Default::default()
        }
    }

    pub fn with_vhost(mut self, name: &str) -> Self {
        self.vhosts.push(VhostInfo {
            name: name.to_string(),
        });
        self
    }

    pub fn with_queue(mut self, vhost: &str, name: &str) -> Self {
        self.queues
            .entry(vhost.to_string())
            .or_default()
            .push(QueueInfo {
                name: name.to_string(),
                vhost: vhost.to_string(),
                durable: true,
                auto_delete: false,
                arguments: Default::default(),
            });
        self
    }

    pub fn with_exchange(mut self, vhost: &str, name: &str, kind: &str) -> Self {
        self.exchanges
            .entry(vhost.to_string())
            .or_default()
            .push(ExchangeInfo {
                name: name.to_string(),
                vhost: vhost.to_string(),
                kind: kind.to_string(),
                durable: true,
                auto_delete: false,
                internal: false,
                arguments: Default::default(),
            });
        self
    }

    pub fn with_binding(mut self, vhost: &str, source: &str, queue: &str, key: &str) -> Self {
        self.bindings
            .entry(vhost.to_string())
            .or_default()
            .push(BindingInfo {
                source: source.to_string(),
                destination: queue.to_string(),
                destination_type: "queue".to_string(),
                routing_key: key.to_string(),
            });
        self
    }

    pub fn with_permissions(
        mut self,
        vhost: &str,
        configure: &str,
        write: &str,
        read: &str,
    ) -> Self {
        self.permissions.insert(
            (vhost.to_string(), self.user.clone()),
            Permissions {
                user: self.user.clone(),
                vhost: vhost.to_string(),
                configure: configure.to_string(),
                write: write.to_string(),
                read: read.to_string(),
            },
        );
        self
    }

    pub fn with_listener(mut self, host: &str, port: u16) -> Self {
        self.listeners.push(ListenerInfo {
            protocol: "amqp".to_string(),
            host: host.to_string(),
            port,
        });
        self
    }

    pub fn with_queued_message(mut self, vhost: &str, queue: &str, payload: &str) -> Self {
        self.messages
            .entry((vhost.to_string(), queue.to_string()))
            .or_default()
            .push(QueuedMessage {
                exchange: String::new(),
                routing_key: queue.to_string(),
                redelivered: false,
                properties: serde_json::json!({}),
                payload: payload.to_string(),
                payload_encoding: "string".to_string(),
            });
        self
    }
}

#[async_trait]
impl ManagementApi for MemoryManagement {
    async fn overview(&self) -> Result<BrokerOverview> {
        Ok(self.overview.clone())
    }

    async fn whoami(&self) -> Result<WhoAmI> {
        Ok(WhoAmI {
            name: self.user.clone(),
            tags: serde_json::json!([]),
        })
    }

    async fn list_vhosts(&self) -> Result<Vec<VhostInfo>> {
        Ok(self.vhosts.clone())
    }

    async fn list_queues(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        Ok(self.queues.get(vhost).cloned().unwrap_or_default())
    }

    async fn list_exchanges(&self, vhost: &str) -> Result<Vec<ExchangeInfo>> {
        Ok(self.exchanges.get(vhost).cloned().unwrap_or_default())
    }

    async fn list_bindings(&self, vhost: &str) -> Result<Vec<BindingInfo>> {
        Ok(self.bindings.get(vhost).cloned().unwrap_or_default())
    }

    async fn permissions_for(&self, vhost: &str, user: &str) -> Result<Option<Permissions>> {
        Ok(self
            .permissions
            .get(&(vhost.to_string(), user.to_string()))
            .cloned())
    }

    async fn list_amqp_listeners(&self) -> Result<Vec<ListenerInfo>> {
        Ok(self.listeners.clone())
    }

    async fn get_messages(
        &self,
        vhost: &str,
        queue: &str,
        count: u32,
    ) -> Result<Vec<QueuedMessage>> {
        let backlog = self
            .messages
            .get(&(vhost.to_string(), queue.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(backlog.into_iter().take(count as usize).collect())
    }
}
