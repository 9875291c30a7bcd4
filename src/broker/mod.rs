//! Wire-protocol broker seam
//!
//! `BrokerClient` is the core abstraction every backend implements: passive
//! declaration, binding, no-ack consumption, and publishing. One client
//! instance maps to one connection + channel, owned exclusively by a single
//! interception session.

use crate::error::Result;
use crate::types::{Delivery, MessageProperties};
use async_trait::async_trait;

pub mod amqp;
pub mod memory;

/// Core trait for broker wire-protocol backends
///
/// All declarations are passive: they assert existing broker state and
/// never create or modify server-side resources, with the sole exception
/// of `declare_private_queue` (an exclusive, broker-named, auto-delete
/// queue owned by this connection).
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Passively declare an existing queue
    async fn passive_declare_queue(&self, name: &str) -> Result<()>;

    /// Passively declare an existing exchange of the given type
    async fn passive_declare_exchange(&self, name: &str, kind: &str) -> Result<()>;

    /// Declare an exclusive, broker-named private queue; returns its name
    async fn declare_private_queue(&self) -> Result<String>;

    /// Bind a queue to an exchange with a routing key
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Attach a no-ack consumer to a queue
    ///
    /// Deliveries from every attached consumer surface on the single
    /// stream returned by `deliveries`.
    async fn consume(&self, queue: &str) -> Result<()>;

    /// Take the merged delivery stream for all attached consumers
    async fn deliveries(&self) -> Result<Box<dyn DeliveryStream>>;

    /// Publish a message with the full property record
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<()>;

    /// Cancel all attached consumers
    async fn stop_consuming(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Async handle yielding deliveries from a broker backend
///
/// `Ok(None)` means the stream ended (consumers cancelled or connection
/// closed); an `Err` is a broker-side failure.
#[async_trait]
pub trait DeliveryStream: Send {
    async fn next(&mut self) -> Result<Option<Delivery>>;
}
