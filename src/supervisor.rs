//! Session supervisor: one isolated interception session per vhost
//!
//! The supervisor fans out one task per authorized vhost and joins on all
//! of them. Each session owns its connection, channel, marker, and gate
//! exclusively; a failure in one session never touches its siblings. The
//! supervisor itself holds no broker connections.

use crate::broker::BrokerClient;
use crate::error::{Result, ShadowError};
use crate::gate::PermissionGate;
use crate::management::ManagementApi;
use crate::session::Session;
use crate::topology;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Session lifecycle states
///
/// `Starting → Running → {Stopping → Closed | Denied | BrokerClosed | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    /// Terminated cleanly (graceful shutdown or nothing left to consume)
    Closed,
    /// Broker refused access mid-setup or mid-run
    Denied,
    /// Broker closed the connection on us
    BrokerClosed,
    /// Unclassified error, caught at the session boundary
    Failed,
}

impl SessionState {
    /// Whether this terminal state counts as a successfully processed vhost
    pub fn is_success(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Terminal record for one vhost's session
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub vhost: String,
    pub state: SessionState,
    pub detail: Option<String>,
}

/// Opens one wire-protocol connection per vhost
///
/// The seam that lets the supervisor run against any broker backend.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, vhost: &str) -> Result<Box<dyn BrokerClient>>;
}

/// Runs interception sessions across all authorized vhosts
pub struct Supervisor {
    management: Arc<dyn ManagementApi>,
    connector: Arc<dyn BrokerConnector>,
    username: String,
}

impl Supervisor {
    pub fn new(
        management: Arc<dyn ManagementApi>,
        connector: Arc<dyn BrokerConnector>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            management,
            connector,
            username: username.into(),
        }
    }

    /// Fan out one session per authorized vhost and join on completion
    ///
    /// Cancelling `cancel` requests cooperative shutdown of every session;
    /// the call returns once all sessions reach a terminal state.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Vec<SessionReport>> {
        let vhosts = self.management.list_vhosts().await?;
        tracing::info!(count = vhosts.len(), "Discovered vhosts");

        let mut handles = Vec::new();
        for vhost in vhosts {
            // A lookup failure for one vhost must not take down siblings;
            // it is skipped exactly like a missing record.
            let perms = match self
                .management
                .permissions_for(&vhost.name, &self.username)
                .await
            {
                Ok(Some(perms)) => perms,
                Ok(None) => {
                    tracing::warn!(
                        vhost = %vhost.name,
                        user = %self.username,
                        "No permission record, skipping vhost"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        vhost = %vhost.name,
                        user = %self.username,
                        error = %e,
                        "Permission lookup failed, skipping vhost"
                    );
                    continue;
                }
            };

            let management = Arc::clone(&self.management);
            let connector = Arc::clone(&self.connector);
            let username = self.username.clone();
            let child_cancel = cancel.child_token();
            let name = vhost.name.clone();

            handles.push(tokio::spawn(async move {
                run_session(management, connector, &name, perms, &username, child_cancel).await
            }));
        }

        if handles.is_empty() {
            tracing::warn!(user = %self.username, "No authorized vhosts to intercept");
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                // A panicking session task is its own failure, not ours
                Err(e) => reports.push(SessionReport {
                    vhost: "<unknown>".to_string(),
                    state: SessionState::Failed,
                    detail: Some(format!("session task panicked: {}", e)),
                }),
            }
        }

        for report in &reports {
            tracing::info!(
                vhost = %report.vhost,
                state = ?report.state,
                detail = report.detail.as_deref().unwrap_or("-"),
                "Session terminated"
            );
        }
        Ok(reports)
    }
}

/// Run one vhost's session from connect to terminal state
///
/// Every error is absorbed here and classified into the report; nothing
/// propagates to sibling sessions. The connection is closed on all paths.
async fn run_session(
    management: Arc<dyn ManagementApi>,
    connector: Arc<dyn BrokerConnector>,
    vhost: &str,
    perms: crate::types::Permissions,
    username: &str,
    cancel: CancellationToken,
) -> SessionReport {
    tracing::info!(vhost = %vhost, state = ?SessionState::Starting, "Session starting");

    let gate = match PermissionGate::compile(&perms) {
        Ok(gate) => gate,
        Err(e) => return terminal(vhost, &e),
    };

    let broker = match connector.connect(vhost).await {
        Ok(broker) => broker,
        Err(e) => return terminal(vhost, &e),
    };

    let result = setup_and_run(&management, broker.as_ref(), vhost, gate, username, cancel).await;

    if let Err(e) = broker.close().await {
        tracing::debug!(vhost = %vhost, error = %e, "Connection close failed");
    }

    match result {
        Ok(()) => SessionReport {
            vhost: vhost.to_string(),
            state: SessionState::Closed,
            detail: None,
        },
        Err(e) => terminal(vhost, &e),
    }
}

async fn setup_and_run(
    management: &Arc<dyn ManagementApi>,
    broker: &dyn BrokerClient,
    vhost: &str,
    gate: PermissionGate,
    username: &str,
    cancel: CancellationToken,
) -> Result<()> {
    let queues = management.list_queues(vhost).await?;
    let exchanges = management.list_exchanges(vhost).await?;
    let bindings = management.list_bindings(vhost).await?;

    let plan = topology::plan(vhost, &queues, &exchanges, &bindings, &gate);
    if plan.consumer_count() == 0 {
        tracing::info!(vhost = %vhost, "Nothing observable under current permissions");
        return Ok(());
    }

    let attached = topology::apply(broker, &plan).await?;
    tracing::info!(vhost = %vhost, consumers = attached, state = ?SessionState::Running, "Session running");

    let session = Session::new(vhost, username, gate);
    session.run(broker, cancel).await
}

fn terminal(vhost: &str, err: &ShadowError) -> SessionReport {
    let (state, level_is_warn) = match err {
        ShadowError::AccessDenied { .. } => (SessionState::Denied, true),
        ShadowError::ConnectionClosed(_) => (SessionState::BrokerClosed, true),
        _ => (SessionState::Failed, false),
    };
    if level_is_warn {
        tracing::warn!(vhost = %vhost, error = %err, "Session ended");
    } else {
        tracing::error!(vhost = %vhost, error = %err, "Session failed");
    }
    SessionReport {
        vhost: vhost.to_string(),
        state,
        detail: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::management::memory::MemoryManagement;
    use crate::types::{
        BindingInfo, BrokerOverview, ExchangeInfo, ListenerInfo, Permissions, QueueInfo,
        QueuedMessage, VhostInfo, WhoAmI,
    };
    use std::collections::HashMap;
    use std::time::Duration;

    /// Hands out pre-built memory brokers; vhosts in `deny` refuse access
    struct MemoryConnector {
        brokers: HashMap<String, MemoryBroker>,
        deny: Vec<String>,
    }

    #[async_trait]
    impl BrokerConnector for MemoryConnector {
        async fn connect(&self, vhost: &str) -> Result<Box<dyn BrokerClient>> {
            if self.deny.contains(&vhost.to_string()) {
                return Err(ShadowError::AccessDenied {
                    vhost: vhost.to_string(),
                    reason: "ACCESS_REFUSED".to_string(),
                });
            }
            self.brokers
                .get(vhost)
                .map(|b| Box::new(b.clone()) as Box<dyn BrokerClient>)
                .ok_or_else(|| ShadowError::Connection(format!("no broker for {}", vhost)))
        }
    }

    /// Delegates to a canned backend but fails permission lookups for one vhost
    struct FaultyPermissions {
        inner: MemoryManagement,
        fail_vhost: String,
    }

    #[async_trait]
    impl ManagementApi for FaultyPermissions {
        async fn overview(&self) -> Result<BrokerOverview> {
            self.inner.overview().await
        }

        async fn whoami(&self) -> Result<WhoAmI> {
            self.inner.whoami().await
        }

        async fn list_vhosts(&self) -> Result<Vec<VhostInfo>> {
            self.inner.list_vhosts().await
        }

        async fn list_queues(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
            self.inner.list_queues(vhost).await
        }

        async fn list_exchanges(&self, vhost: &str) -> Result<Vec<ExchangeInfo>> {
            self.inner.list_exchanges(vhost).await
        }

        async fn list_bindings(&self, vhost: &str) -> Result<Vec<BindingInfo>> {
            self.inner.list_bindings(vhost).await
        }

        async fn permissions_for(&self, vhost: &str, user: &str) -> Result<Option<Permissions>> {
            if vhost == self.fail_vhost {
                return Err(ShadowError::Management(
                    "permission endpoint returned 500".to_string(),
                ));
            }
            self.inner.permissions_for(vhost, user).await
        }

        async fn list_amqp_listeners(&self) -> Result<Vec<ListenerInfo>> {
            self.inner.list_amqp_listeners().await
        }

        async fn get_messages(
            &self,
            vhost: &str,
            queue: &str,
            count: u32,
        ) -> Result<Vec<QueuedMessage>> {
            self.inner.get_messages(vhost, queue, count).await
        }
    }

    #[tokio::test]
    async fn test_vhost_without_permission_record_gets_no_session() {
        let mgmt = Arc::new(
            MemoryManagement::new("guest")
                .with_vhost("allowed")
                .with_vhost("forbidden")
                .with_permissions("allowed", ".*", ".*", ".*")
                .with_queue("allowed", "orders"),
        );
        let connector = Arc::new(MemoryConnector {
            brokers: HashMap::from([("allowed".to_string(), MemoryBroker::new())]),
            deny: vec![],
        });

        let supervisor = Supervisor::new(mgmt, connector.clone(), "guest");
        let cancel = CancellationToken::new();
        let cancel_in = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_in.cancel();
        });

        let reports = supervisor.run(cancel).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].vhost, "allowed");
        assert_eq!(reports[0].state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_denied_session_does_not_affect_siblings() {
        let mgmt = Arc::new(
            MemoryManagement::new("guest")
                .with_vhost("good")
                .with_vhost("bad")
                .with_permissions("good", ".*", ".*", ".*")
                .with_permissions("bad", ".*", ".*", ".*")
                .with_queue("good", "orders")
                .with_queue("bad", "orders"),
        );
        let good_broker = MemoryBroker::new();
        let connector = Arc::new(MemoryConnector {
            brokers: HashMap::from([("good".to_string(), good_broker)]),
            deny: vec!["bad".to_string()],
        });

        let supervisor = Supervisor::new(mgmt, connector, "guest");
        let cancel = CancellationToken::new();
        let cancel_in = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_in.cancel();
        });

        let mut reports = supervisor.run(cancel).await.unwrap();
        reports.sort_by(|a, b| a.vhost.cmp(&b.vhost));
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].state, SessionState::Denied);
        assert_eq!(reports[1].state, SessionState::Closed);
        assert!(reports[1].state.is_success());
        assert!(!reports[0].state.is_success());
    }

    #[tokio::test]
    async fn test_permission_lookup_failure_skips_only_that_vhost() {
        let inner = MemoryManagement::new("guest")
            .with_vhost("good")
            .with_vhost("bad")
            .with_permissions("good", ".*", ".*", ".*")
            .with_permissions("bad", ".*", ".*", ".*")
            .with_queue("good", "orders");
        let mgmt = Arc::new(FaultyPermissions {
            inner,
            fail_vhost: "bad".to_string(),
        });

        let broker = MemoryBroker::new();
        let connector = Arc::new(MemoryConnector {
            brokers: HashMap::from([("good".to_string(), broker.clone())]),
            deny: vec![],
        });

        let supervisor = Supervisor::new(mgmt, connector, "guest");
        let cancel = CancellationToken::new();
        let cancel_in = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_in.cancel();
        });

        // The run completes and the healthy vhost still gets its session
        let reports = supervisor.run(cancel).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].vhost, "good");
        assert_eq!(reports[0].state, SessionState::Closed);
        assert!(broker.is_closed().await);
    }

    #[tokio::test]
    async fn test_nothing_observable_closes_immediately() {
        // Readable queues exist but write on the default exchange is denied,
        // so no consumer is attached and the session closes without running
        let mgmt = Arc::new(
            MemoryManagement::new("guest")
                .with_vhost("v1")
                .with_permissions("v1", ".*", "^nothing$", ".*")
                .with_queue("v1", "orders"),
        );
        let broker = MemoryBroker::new();
        let connector = Arc::new(MemoryConnector {
            brokers: HashMap::from([("v1".to_string(), broker.clone())]),
            deny: vec![],
        });

        let supervisor = Supervisor::new(mgmt, connector, "guest");
        let reports = supervisor.run(CancellationToken::new()).await.unwrap();
        assert_eq!(reports[0].state, SessionState::Closed);
        assert!(broker.consumed_queues().await.is_empty());
        assert!(broker.is_closed().await);
    }
}
