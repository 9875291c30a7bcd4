//! # amq-shadow
//!
//! Passive interception and safe-requeue engine for AMQP broker security
//! assessment.
//!
//! ## Overview
//!
//! Given a single authenticated credential, `amq-shadow` discovers every
//! queue and exchange that credential can read, attaches covert no-ack
//! consumers to them, observes the traffic flowing through, and
//! transparently re-injects each directly-addressed message so its
//! intended consumer still receives it exactly once. Messages routed
//! through exchanges are observed but never republished, since the broker
//! already fans them out.
//!
//! ## Architecture
//!
//! - **PermissionGate**: the single authorization boundary, the broker's
//!   regex permission triple evaluated anchored at position 0
//! - **ManagementApi** trait: read-only broker queries (vhosts, topology,
//!   permissions, listeners, backlog); HTTP and in-memory backends
//! - **BrokerClient** trait: the wire-protocol seam (passive declare,
//!   bind, no-ack consume, publish); lapin and in-memory backends
//! - **Topology discovery**: a pure plan over management snapshots plus
//!   a broker application step
//! - **Session**: the dedup/requeue protocol, one per vhost, keyed by a
//!   per-session marker header
//! - **Supervisor**: one isolated session task per authorized vhost,
//!   joined on cooperative shutdown
//! - **Fallback collector**: read-only backlog polling when no AMQP
//!   listener is reachable

pub mod broker;
pub mod config;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod management;
pub mod session;
pub mod supervisor;
pub mod topology;
pub mod types;

// Re-export core types
pub use broker::amqp::{AmqpBroker, AmqpConfig, AmqpConnector};
pub use broker::memory::MemoryBroker;
pub use broker::{BrokerClient, DeliveryStream};
pub use error::{Result, ShadowError};
pub use fallback::{collect, probe_listeners, QueueBacklog, BACKLOG_FETCH_LIMIT};
pub use gate::PermissionGate;
pub use management::http::HttpManagementClient;
pub use management::memory::MemoryManagement;
pub use management::ManagementApi;
pub use session::{Outcome, Session};
pub use supervisor::{BrokerConnector, SessionReport, SessionState, Supervisor};
pub use topology::{ObservedExchange, TopologyPlan, WILDCARD_KEY};
pub use types::{
    BindingInfo, BrokerOverview, Delivery, ExchangeInfo, ListenerInfo, MessageProperties,
    Permissions, QueueInfo, QueuedMessage, VhostInfo, WhoAmI, AUTOGEN_PREFIX, RESERVED_PREFIX,
};
