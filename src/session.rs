//! Interception session: the dedup/requeue protocol
//!
//! Consumption is no-ack throughout: once the broker hands a message to
//! our consumer it is settled, whatever we do next. Requeueing is therefore
//! the only thing standing between a directly-addressed message and loss.
//! Messages routed through an exchange were already fanned out to every
//! bound queue by the broker and are never republished.

use crate::broker::BrokerClient;
use crate::error::{Result, ShadowError};
use crate::gate::PermissionGate;
use crate::types::Delivery;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What the protocol did with one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Carried this session's marker: re-injected by us earlier, ignored
    AlreadySeen,
    /// New traffic via an exchange: logged only, broker already delivered it
    Observed,
    /// New direct traffic: republished with the marker stamped in
    Requeued,
    /// Direct traffic we lack write permission to requeue: dropped, logged
    RequeueDenied,
    /// The broker rejected the requeue publish: dropped, logged
    RequeueFailed,
}

/// One vhost-scoped interception session
///
/// Owns a single-use Session Marker: a per-session unique token used as a
/// header key. Presence of the key in a delivery's headers means the
/// message is our own re-injection; its value is never inspected.
pub struct Session {
    vhost: String,
    username: String,
    marker: String,
    gate: PermissionGate,
}

impl Session {
    pub fn new(vhost: impl Into<String>, username: impl Into<String>, gate: PermissionGate) -> Self {
        Self {
            vhost: vhost.into(),
            username: username.into(),
            marker: format!("shadow-{}", Uuid::new_v4()),
            gate,
        }
    }

    /// The session's dedup marker header key
    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn vhost(&self) -> &str {
        &self.vhost
    }

    /// Consume deliveries until the stream ends or cancellation is requested
    ///
    /// The cancellation token is observed at the only suspension point,
    /// waiting for the next delivery. Consumers are cancelled on every
    /// exit path; closing the connection is the caller's cleanup duty.
    pub async fn run(
        &self,
        broker: &dyn BrokerClient,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut stream = broker.deliveries().await?;

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(vhost = %self.vhost, "Shutdown requested, stopping consumers");
                    break Ok(());
                }
                next = stream.next() => match next {
                    Ok(Some(delivery)) => {
                        if let Err(e) = self.handle_delivery(broker, delivery).await {
                            break Err(e);
                        }
                    }
                    Ok(None) => {
                        tracing::info!(vhost = %self.vhost, "Delivery stream ended");
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                }
            }
        };

        if let Err(e) = broker.stop_consuming().await {
            tracing::debug!(vhost = %self.vhost, error = %e, "Consumer cancel after loop exit failed");
        }
        result
    }

    /// Apply the dedup/requeue protocol to one delivery
    pub async fn handle_delivery(
        &self,
        broker: &dyn BrokerClient,
        delivery: Delivery,
    ) -> Result<Outcome> {
        if delivery.properties.has_header(&self.marker) {
            tracing::trace!(
                vhost = %self.vhost,
                routing_key = %delivery.routing_key,
                "Own re-injection came back, ignoring"
            );
            return Ok(Outcome::AlreadySeen);
        }

        tracing::info!(
            vhost = %self.vhost,
            exchange = %delivery.exchange,
            routing_key = %delivery.routing_key,
            bytes = delivery.body.len(),
            content_type = delivery.properties.content_type.as_deref().unwrap_or("-"),
            message_id = delivery.properties.message_id.as_deref().unwrap_or("-"),
            "Intercepted message"
        );
        tracing::debug!(
            vhost = %self.vhost,
            properties = ?delivery.properties,
            "Full property set"
        );

        if !delivery.is_direct() {
            // Exchange-routed: the broker already delivered it to every
            // bound queue; republishing would duplicate delivery.
            return Ok(Outcome::Observed);
        }

        let mut properties = delivery.properties.clone();
        properties.set_header(self.marker.clone(), serde_json::json!(true));

        // The broker rejects publishes whose user_id does not match the
        // authenticated identity; sanitize or the requeue itself fails.
        if let Some(user_id) = &properties.user_id {
            if user_id != &self.username {
                tracing::debug!(
                    vhost = %self.vhost,
                    original_user_id = %user_id,
                    "Clearing mismatched user_id before requeue"
                );
                properties.user_id = None;
            }
        }

        if !self.gate.write_allows(&delivery.exchange) {
            tracing::warn!(
                vhost = %self.vhost,
                routing_key = %delivery.routing_key,
                "No write permission on default exchange; message cannot be requeued and is lost"
            );
            return Ok(Outcome::RequeueDenied);
        }

        match broker
            .publish(
                &delivery.exchange,
                &delivery.routing_key,
                &properties,
                &delivery.body,
            )
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    vhost = %self.vhost,
                    routing_key = %delivery.routing_key,
                    "Message requeued"
                );
                Ok(Outcome::Requeued)
            }
            Err(ShadowError::PublishRejected {
                routing_key,
                reason,
                ..
            }) => {
                tracing::warn!(
                    vhost = %self.vhost,
                    routing_key = %routing_key,
                    reason = %reason,
                    "Requeue rejected by broker; message is lost"
                );
                Ok(Outcome::RequeueFailed)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::broker::DeliveryStream;
    use crate::types::{MessageProperties, Permissions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Delegates to a memory broker, but every publish fails at the channel
    /// level and consumer cancellation is recorded
    struct BrokenChannel {
        inner: MemoryBroker,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl crate::broker::BrokerClient for BrokenChannel {
        async fn passive_declare_queue(&self, name: &str) -> Result<()> {
            self.inner.passive_declare_queue(name).await
        }

        async fn passive_declare_exchange(&self, name: &str, kind: &str) -> Result<()> {
            self.inner.passive_declare_exchange(name, kind).await
        }

        async fn declare_private_queue(&self) -> Result<String> {
            self.inner.declare_private_queue().await
        }

        async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
            self.inner.bind_queue(queue, exchange, routing_key).await
        }

        async fn consume(&self, queue: &str) -> Result<()> {
            self.inner.consume(queue).await
        }

        async fn deliveries(&self) -> Result<Box<dyn DeliveryStream>> {
            self.inner.deliveries().await
        }

        async fn publish(
            &self,
            _exchange: &str,
            _routing_key: &str,
            _properties: &MessageProperties,
            _body: &[u8],
        ) -> Result<()> {
            Err(ShadowError::Broker("channel gone".to_string()))
        }

        async fn stop_consuming(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            self.inner.stop_consuming().await
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }
    }

    fn gate(write: &str) -> PermissionGate {
        PermissionGate::compile(&Permissions {
            user: "guest".to_string(),
            vhost: "/".to_string(),
            configure: ".*".to_string(),
            write: write.to_string(),
            read: ".*".to_string(),
        })
        .unwrap()
    }

    fn session(write: &str) -> Session {
        Session::new("/", "guest", gate(write))
    }

    fn delivery(exchange: &str, routing_key: &str, properties: MessageProperties) -> Delivery {
        Delivery {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            redelivered: false,
            properties,
            body: b"hi".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_marked_message_is_never_republished() {
        let session = session(".*");
        let broker = MemoryBroker::new();

        let mut props = MessageProperties::default();
        props.set_header(session.marker().to_string(), serde_json::json!(true));

        let outcome = session
            .handle_delivery(&broker, delivery("", "orders", props))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::AlreadySeen);
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_direct_message_requeued_with_marker() {
        let session = session(".*");
        let broker = MemoryBroker::new();

        let props = MessageProperties {
            content_type: Some("text/plain".to_string()),
            correlation_id: Some("c-1".to_string()),
            delivery_mode: Some(2),
            ..Default::default()
        };

        let outcome = session
            .handle_delivery(&broker, delivery("", "orders", props))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Requeued);

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        let record = &published[0];
        assert_eq!(record.exchange, "");
        assert_eq!(record.routing_key, "orders");
        assert_eq!(record.body, b"hi");
        assert!(record.properties.has_header(session.marker()));
        // Original properties preserved
        assert_eq!(record.properties.content_type.as_deref(), Some("text/plain"));
        assert_eq!(record.properties.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(record.properties.delivery_mode, Some(2));
    }

    #[tokio::test]
    async fn test_mismatched_user_id_cleared_on_requeue() {
        let session = session(".*");
        let broker = MemoryBroker::new();

        let props = MessageProperties {
            user_id: Some("someone-else".to_string()),
            ..Default::default()
        };
        session
            .handle_delivery(&broker, delivery("", "orders", props))
            .await
            .unwrap();

        let published = broker.published().await;
        assert_eq!(published[0].properties.user_id, None);
    }

    #[tokio::test]
    async fn test_matching_user_id_preserved_on_requeue() {
        let session = session(".*");
        let broker = MemoryBroker::new();

        let props = MessageProperties {
            user_id: Some("guest".to_string()),
            ..Default::default()
        };
        session
            .handle_delivery(&broker, delivery("", "orders", props))
            .await
            .unwrap();

        let published = broker.published().await;
        assert_eq!(published[0].properties.user_id.as_deref(), Some("guest"));
    }

    #[tokio::test]
    async fn test_exchange_delivered_message_never_republished() {
        let session = session(".*");
        let broker = MemoryBroker::new();

        let outcome = session
            .handle_delivery(
                &broker,
                delivery("logs", "info.boot", MessageProperties::default()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Observed);
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_denied_without_write_permission() {
        let session = session("^nothing$");
        let broker = MemoryBroker::new();

        let outcome = session
            .handle_delivery(&broker, delivery("", "orders", MessageProperties::default()))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::RequeueDenied);
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_publish_drops_only_that_requeue() {
        let session = session(".*");
        let broker = MemoryBroker::new();
        broker.fail_publishes("PRECONDITION_FAILED").await;

        let outcome = session
            .handle_delivery(&broker, delivery("", "orders", MessageProperties::default()))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::RequeueFailed);
    }

    #[tokio::test]
    async fn test_run_dedups_own_reinjection() {
        let session = session(".*");
        let broker = MemoryBroker::new();
        broker.consume("orders").await.unwrap();
        broker
            .stage("orders", delivery("", "orders", MessageProperties::default()))
            .await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let broker = broker.clone();
            let cancel = cancel.clone();
            async move { session.run(&broker, cancel).await }
        });

        // The staged message gets requeued once; the echoed redelivery
        // carries the marker and must not be published again.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(broker.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_consumers_when_a_delivery_fails() {
        let session = session(".*");
        let inner = MemoryBroker::new();
        inner.consume("orders").await.unwrap();
        inner
            .stage("orders", delivery("", "orders", MessageProperties::default()))
            .await;

        let stopped = Arc::new(AtomicBool::new(false));
        let broker = BrokenChannel {
            inner,
            stopped: stopped.clone(),
        };

        let err = session
            .run(&broker, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ShadowError::Broker(_)));
        // The error path still cancels the consumers
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_ends_when_stream_ends() {
        let session = session(".*");
        let broker = MemoryBroker::new();
        broker.consume("orders").await.unwrap();
        broker.stop_consuming().await.unwrap();

        let cancel = CancellationToken::new();
        session.run(&broker, cancel).await.unwrap();
    }

    #[test]
    fn test_markers_are_unique_per_session() {
        let a = session(".*");
        let b = session(".*");
        assert_ne!(a.marker(), b.marker());
        assert!(a.marker().starts_with("shadow-"));
    }
}
