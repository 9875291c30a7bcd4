//! In-memory broker for tests and single-process use
//!
//! Scripts deliveries into attached consumers, records every publish, and
//! echoes direct-to-queue publishes back to the queue's consumer, so a
//! requeued message is redelivered exactly the way a live broker would
//! redeliver it to the only consumer on the queue.

use super::{BrokerClient, DeliveryStream};
use crate::error::{Result, ShadowError};
use crate::types::{Delivery, MessageProperties};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One recorded publish call
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    declared_queues: Vec<String>,
    declared_exchanges: Vec<(String, String)>,
    bindings: Vec<(String, String, String)>,
    consumed: HashSet<String>,
    staged: HashMap<String, Vec<Delivery>>,
    published: Vec<PublishRecord>,
    tx: Option<mpsc::UnboundedSender<Delivery>>,
    private_seq: u64,
    fail_publish: Option<String>,
    closed: bool,
}

/// Scripted in-memory implementation of `BrokerClient`
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tx: Some(tx),
                ..Default::default()
            })),
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    /// Stage a delivery to surface as soon as a consumer attaches to `queue`
    pub async fn stage(&self, queue: &str, delivery: Delivery) {
        let mut inner = self.inner.lock().await;
        if inner.consumed.contains(queue) {
            if let Some(tx) = &inner.tx {
                let _ = tx.send(delivery);
            }
        } else {
            inner.staged.entry(queue.to_string()).or_default().push(delivery);
        }
    }

    /// Make every subsequent publish fail with the given broker reason
    pub async fn fail_publishes(&self, reason: &str) {
        self.inner.lock().await.fail_publish = Some(reason.to_string());
    }

    /// All publishes recorded so far
    pub async fn published(&self) -> Vec<PublishRecord> {
        self.inner.lock().await.published.clone()
    }

    /// Queues passively declared so far
    pub async fn declared_queues(&self) -> Vec<String> {
        self.inner.lock().await.declared_queues.clone()
    }

    /// (exchange, kind) pairs passively declared so far
    pub async fn declared_exchanges(&self) -> Vec<(String, String)> {
        self.inner.lock().await.declared_exchanges.clone()
    }

    /// (queue, exchange, routing_key) bindings created so far
    pub async fn bindings(&self) -> Vec<(String, String, String)> {
        self.inner.lock().await.bindings.clone()
    }

    /// Queues with an attached consumer
    pub async fn consumed_queues(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut queues: Vec<String> = inner.consumed.iter().cloned().collect();
        queues.sort();
        queues
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn passive_declare_queue(&self, name: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .declared_queues
            .push(name.to_string());
        Ok(())
    }

    async fn passive_declare_exchange(&self, name: &str, kind: &str) -> Result<()> {
        self.inner
            .lock()
            .await
            .declared_exchanges
            .push((name.to_string(), kind.to_string()));
        Ok(())
    }

    async fn declare_private_queue(&self) -> Result<String> {
        let mut inner = self.inner.lock().await;
        inner.private_seq += 1;
        Ok(format!("amq.gen-mem{}", inner.private_seq))
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.inner.lock().await.bindings.push((
            queue.to_string(),
            exchange.to_string(),
            routing_key.to_string(),
        ));
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.consumed.insert(queue.to_string());
        if let Some(staged) = inner.staged.remove(queue) {
            if let Some(tx) = &inner.tx {
                for delivery in staged {
                    let _ = tx.send(delivery);
                }
            }
        }
        Ok(())
    }

    async fn deliveries(&self) -> Result<Box<dyn DeliveryStream>> {
        let rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ShadowError::Broker("delivery stream already taken".to_string()))?;
        Ok(Box::new(MemoryDeliveryStream { rx }))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(reason) = &inner.fail_publish {
            return Err(ShadowError::PublishRejected {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                reason: reason.clone(),
            });
        }

        inner.published.push(PublishRecord {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: body.to_vec(),
        });

        // Direct-to-queue publish lands back on the queue's own consumer,
        // mirroring a live broker with this session as the only consumer.
        if exchange.is_empty() && inner.consumed.contains(routing_key) {
            if let Some(tx) = &inner.tx {
                let _ = tx.send(Delivery {
                    exchange: String::new(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                    properties: properties.clone(),
                    body: body.to_vec(),
                });
            }
        }
        Ok(())
    }

    async fn stop_consuming(&self) -> Result<()> {
        // Dropping the sender ends the delivery stream
        self.inner.lock().await.tx = None;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tx = None;
        inner.closed = true;
        Ok(())
    }
}

struct MemoryDeliveryStream {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl DeliveryStream for MemoryDeliveryStream {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_delivery(queue: &str, body: &[u8]) -> Delivery {
        Delivery {
            exchange: String::new(),
            routing_key: queue.to_string(),
            redelivered: false,
            properties: MessageProperties::default(),
            body: body.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_staged_delivery_surfaces_after_consume() {
        let broker = MemoryBroker::new();
        broker.stage("orders", direct_delivery("orders", b"hi")).await;

        broker.consume("orders").await.unwrap();
        let mut stream = broker.deliveries().await.unwrap();

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"hi");
    }

    #[tokio::test]
    async fn test_direct_publish_echoes_to_consumer() {
        let broker = MemoryBroker::new();
        broker.consume("orders").await.unwrap();
        let mut stream = broker.deliveries().await.unwrap();

        broker
            .publish("", "orders", &MessageProperties::default(), b"payload")
            .await
            .unwrap();

        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.routing_key, "orders");
        assert!(delivery.is_direct());
        assert_eq!(broker.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_exchange_publish_not_echoed() {
        let broker = MemoryBroker::new();
        broker.consume("orders").await.unwrap();

        broker
            .publish("logs", "info", &MessageProperties::default(), b"x")
            .await
            .unwrap();
        broker.stop_consuming().await.unwrap();

        let mut stream = broker.deliveries().await.unwrap();
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_consuming_ends_stream() {
        let broker = MemoryBroker::new();
        broker.consume("orders").await.unwrap();
        let mut stream = broker.deliveries().await.unwrap();

        broker.stop_consuming().await.unwrap();
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_publish_is_not_recorded() {
        let broker = MemoryBroker::new();
        broker.fail_publishes("PRECONDITION_FAILED").await;

        let err = broker
            .publish("", "orders", &MessageProperties::default(), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, ShadowError::PublishRejected { .. }));
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_private_queue_names_are_unique() {
        let broker = MemoryBroker::new();
        let a = broker.declare_private_queue().await.unwrap();
        let b = broker.declare_private_queue().await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("amq.gen"));
    }
}
