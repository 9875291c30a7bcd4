//! Topology discovery: what can be observed under one permission set
//!
//! Discovery is split into a pure planning step over management snapshots
//! and an application step that drives the broker client. The plan is
//! computed once per session; topology changes mid-run are not tracked.

use crate::broker::BrokerClient;
use crate::error::Result;
use crate::gate::PermissionGate;
use crate::types::{BindingInfo, ExchangeInfo, QueueInfo, AUTOGEN_PREFIX, RESERVED_PREFIX};

/// Routing key observing all traffic on non-direct exchanges
pub const WILDCARD_KEY: &str = "#";

/// An exchange retained for observation, with the routing keys needed
/// to see all of its traffic
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedExchange {
    pub name: String,
    pub kind: String,
    pub routing_keys: Vec<String>,
}

/// The declared/bound topology for one vhost
#[derive(Debug, Clone, Default)]
pub struct TopologyPlan {
    pub vhost: String,
    /// Queues to consume directly
    pub queues: Vec<String>,
    /// Queues readable but not interceptable (no write access to the
    /// default exchange, so requeue would be impossible)
    pub skipped_queues: Vec<String>,
    pub exchanges: Vec<ObservedExchange>,
}

impl TopologyPlan {
    /// Number of consumers the plan will attach
    pub fn consumer_count(&self) -> usize {
        self.queues.len()
            + self
                .exchanges
                .iter()
                .map(|e| e.routing_keys.len())
                .sum::<usize>()
    }
}

/// Compute the observable topology for one vhost
pub fn plan(
    vhost: &str,
    queues: &[QueueInfo],
    exchanges: &[ExchangeInfo],
    bindings: &[BindingInfo],
    gate: &PermissionGate,
) -> TopologyPlan {
    let mut out = TopologyPlan {
        vhost: vhost.to_string(),
        ..Default::default()
    };

    for queue in queues {
        if queue.name.starts_with(RESERVED_PREFIX) {
            continue;
        }
        if !gate.read_allows(&queue.name) {
            tracing::debug!(vhost = %vhost, queue = %queue.name, "Queue not readable, skipping");
            continue;
        }
        // Consuming with no-ack settles the message on delivery; without
        // write access to the default exchange it could never be requeued,
        // so intercepting it would swallow traffic from its real consumer.
        if !gate.write_allows("") {
            tracing::warn!(
                vhost = %vhost,
                queue = %queue.name,
                "Readable but not requeue-capable (no write on default exchange), skipping"
            );
            out.skipped_queues.push(queue.name.clone());
            continue;
        }
        out.queues.push(queue.name.clone());
    }

    for exchange in exchanges {
        if exchange.name.is_empty() || exchange.name.starts_with(RESERVED_PREFIX) {
            continue;
        }
        // The second read check anticipates the broker-named private
        // queues this session will bind under the amq.gen prefix.
        if !gate.read_allows(&exchange.name) || !gate.read_allows(AUTOGEN_PREFIX) {
            tracing::debug!(
                vhost = %vhost,
                exchange = %exchange.name,
                "Exchange not observable under read permissions, skipping"
            );
            continue;
        }

        let routing_keys = if exchange.kind == "direct" {
            distinct_routing_keys(&exchange.name, bindings)
        } else {
            vec![WILDCARD_KEY.to_string()]
        };

        out.exchanges.push(ObservedExchange {
            name: exchange.name.clone(),
            kind: exchange.kind.clone(),
            routing_keys,
        });
    }

    out
}

/// Distinct routing keys of bindings sourced from one exchange,
/// in first-seen order
fn distinct_routing_keys(exchange: &str, bindings: &[BindingInfo]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for binding in bindings {
        if binding.source == exchange && !keys.contains(&binding.routing_key) {
            keys.push(binding.routing_key.clone());
        }
    }
    keys
}

/// Declare, bind, and attach consumers for a computed plan
///
/// Returns the number of consumers attached. Declarations are passive
/// except the private queues bound to observed exchanges.
pub async fn apply(broker: &dyn BrokerClient, plan: &TopologyPlan) -> Result<usize> {
    let mut attached = 0;

    for queue in &plan.queues {
        broker.passive_declare_queue(queue).await?;
        broker.consume(queue).await?;
        attached += 1;
        tracing::info!(vhost = %plan.vhost, queue = %queue, "Intercepting queue");
    }

    for exchange in &plan.exchanges {
        broker
            .passive_declare_exchange(&exchange.name, &exchange.kind)
            .await?;
        for key in &exchange.routing_keys {
            let private = broker.declare_private_queue().await?;
            broker.bind_queue(&private, &exchange.name, key).await?;
            broker.consume(&private).await?;
            attached += 1;
            tracing::info!(
                vhost = %plan.vhost,
                exchange = %exchange.name,
                kind = %exchange.kind,
                routing_key = %key,
                "Intercepting exchange"
            );
        }
    }

    Ok(attached)
}
