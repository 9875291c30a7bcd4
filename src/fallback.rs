//! Fallback collector: management-API polling when the wire port is down
//!
//! When no advertised AMQP listener is reachable there is no live
//! interception. Instead the collector pulls a read-only snapshot of
//! queued, not-yet-consumed messages per queue over the management API.
//! The snapshot is documented-incomplete: anything consumed before this
//! run is invisible, and nothing is requeued because nothing is taken.

use crate::error::Result;
use crate::management::ManagementApi;
use crate::types::{ListenerInfo, RESERVED_PREFIX};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Upper bound on messages pulled per queue in one snapshot
pub const BACKLOG_FETCH_LIMIT: u32 = 65_535;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Snapshot size for one polled queue
#[derive(Debug, Clone)]
pub struct QueueBacklog {
    pub vhost: String,
    pub queue: String,
    pub messages: usize,
}

/// Find the first reachable AMQP listener, if any
///
/// Wildcard-bound listeners (`0.0.0.0`, `::`) advertise no usable host;
/// those are probed against the management host instead.
pub async fn probe_listeners(
    listeners: &[ListenerInfo],
    management_host: Option<&str>,
) -> Option<(String, u16)> {
    for listener in listeners {
        let host = if is_wildcard(&listener.host) {
            match management_host {
                Some(h) => h.to_string(),
                None => continue,
            }
        } else {
            listener.host.clone()
        };

        tracing::debug!(host = %host, port = listener.port, "Probing listener");
        let connect = TcpStream::connect((host.as_str(), listener.port));
        match tokio::time::timeout(PROBE_TIMEOUT, connect).await {
            Ok(Ok(_)) => {
                tracing::info!(host = %host, port = listener.port, "Listener reachable");
                return Some((host, listener.port));
            }
            Ok(Err(e)) => {
                tracing::debug!(host = %host, port = listener.port, error = %e, "Listener unreachable");
            }
            Err(_) => {
                tracing::debug!(host = %host, port = listener.port, "Listener probe timed out");
            }
        }
    }
    None
}

fn is_wildcard(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]" | "*")
}

/// Poll every non-reserved queue in every vhost for queued backlog
pub async fn collect(management: &Arc<dyn ManagementApi>) -> Result<Vec<QueueBacklog>> {
    let vhosts = management.list_vhosts().await?;
    let mut backlogs = Vec::new();

    for vhost in vhosts {
        let queues = match management.list_queues(&vhost.name).await {
            Ok(queues) => queues,
            Err(e) => {
                tracing::warn!(vhost = %vhost.name, error = %e, "Cannot list queues, skipping vhost");
                continue;
            }
        };

        for queue in queues {
            if queue.name.starts_with(RESERVED_PREFIX) {
                continue;
            }
            let messages = match management
                .get_messages(&vhost.name, &queue.name, BACKLOG_FETCH_LIMIT)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(
                        vhost = %vhost.name,
                        queue = %queue.name,
                        error = %e,
                        "Backlog fetch failed, skipping queue"
                    );
                    continue;
                }
            };

            for message in &messages {
                tracing::info!(
                    vhost = %vhost.name,
                    queue = %queue.name,
                    routing_key = %message.routing_key,
                    bytes = message.payload.len(),
                    "Queued message"
                );
                tracing::debug!(
                    vhost = %vhost.name,
                    queue = %queue.name,
                    properties = %message.properties,
                    payload = %message.payload,
                    "Queued message detail"
                );
            }

            backlogs.push(QueueBacklog {
                vhost: vhost.name.clone(),
                queue: queue.name.clone(),
                messages: messages.len(),
            });
        }
    }

    Ok(backlogs)
}
