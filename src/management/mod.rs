//! Broker management interface: the query side of interception
//!
//! Everything the engine needs to know about a broker (vhosts, topology,
//! permissions, listeners, queued backlog) comes through `ManagementApi`.
//! The engine never mutates broker state through this interface; every
//! operation here is read-equivalent.

use crate::error::Result;
use crate::types::{
    BindingInfo, BrokerOverview, ExchangeInfo, ListenerInfo, Permissions, QueueInfo,
    QueuedMessage, VhostInfo, WhoAmI,
};
use async_trait::async_trait;

pub mod http;
pub mod memory;

/// Read-only management operations against the broker
///
/// Implementations handle transport details. Sessions receive a shared
/// reference and never construct one themselves.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Broker identity and versions
    async fn overview(&self) -> Result<BrokerOverview>;

    /// The user the broker sees for the current credentials
    async fn whoami(&self) -> Result<WhoAmI>;

    /// All virtual hosts visible to the credentials
    async fn list_vhosts(&self) -> Result<Vec<VhostInfo>>;

    /// Queues in one vhost
    async fn list_queues(&self, vhost: &str) -> Result<Vec<QueueInfo>>;

    /// Exchanges in one vhost
    async fn list_exchanges(&self, vhost: &str) -> Result<Vec<ExchangeInfo>>;

    /// Bindings in one vhost
    async fn list_bindings(&self, vhost: &str) -> Result<Vec<BindingInfo>>;

    /// Permission triple for (vhost, user); `None` means no access record
    async fn permissions_for(&self, vhost: &str, user: &str) -> Result<Option<Permissions>>;

    /// Advertised AMQP listener endpoints
    async fn list_amqp_listeners(&self) -> Result<Vec<ListenerInfo>>;

    /// Pull up to `count` queued, unconsumed messages (fallback path only)
    ///
    /// Uses requeueing ack semantics on the broker side so the poll
    /// leaves the queue untouched.
    async fn get_messages(
        &self,
        vhost: &str,
        queue: &str,
        count: u32,
    ) -> Result<Vec<QueuedMessage>>;
}
