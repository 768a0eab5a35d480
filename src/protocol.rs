//! # Control-protocol messages.
//!
//! The request/reply shapes of the callbacks a worker invokes through its
//! envelope. Framing and serialization of the worker wire protocol are
//! the envelope's business; these are the in-memory forms the supervisor
//! handles, kept serde-serializable so envelope implementations can put
//! them on any wire.

use serde::{Deserialize, Serialize};

/// `StartComponent`: a worker announced that `component` must be running
/// in `group`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentToStart {
    /// Fully-qualified component name.
    pub component: String,
    /// Co-location group the component is partitioned into.
    pub group: String,
    /// Whether clients route calls to this component by key.
    pub is_routed: bool,
}

/// `RegisterReplica`: a worker finished initializing and can be dialed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaToRegister {
    /// The worker's co-location group.
    pub group: String,
    /// Dialable address of the replica.
    pub address: String,
    /// OS process id of the worker.
    pub pid: i64,
}

/// `GetComponentsToStart`: long-poll for the group's component set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetComponentsRequest {
    pub group: String,
    /// Version the worker last observed; the reply waits until the set's
    /// version exceeds it.
    pub version: u64,
}

/// Reply to [`GetComponentsRequest`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentsToStart {
    pub version: u64,
    /// Every component announced for the group so far.
    pub components: Vec<String>,
}

/// `GetRoutingInfo`: long-poll for the group's routing table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetRoutingRequest {
    pub group: String,
    /// Version the worker last observed.
    pub version: u64,
}

/// `GetAddress`: where a worker should bind a listener it is about to
/// export.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetAddressRequest {
    /// Listener name.
    pub name: String,
}

/// Reply to [`GetAddressRequest`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetAddressReply {
    /// Address to bind; always ephemeral on a single machine.
    pub address: String,
}

/// A named network listener a worker wants exposed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Listener name, shared by every replica exporting it.
    pub name: String,
    /// Address the worker bound locally (the proxy backend).
    pub addr: String,
}

/// `ExportListener`: route external traffic for `listener` to the worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportListenerRequest {
    pub listener: Listener,
    /// Where the worker wants the supervisor-side accept socket bound
    /// (port 0 permitted).
    pub local_address: String,
}

/// Reply to [`ExportListenerRequest`].
///
/// A requested address that is already bound is a user error, reported in
/// `error` on an otherwise successful reply; the supervisor stays
/// healthy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportListenerReply {
    /// External address clients should dial. Every replica exporting the
    /// same listener name receives the same address.
    pub proxy_address: String,
    /// Present when the requested local address could not be used.
    pub error: Option<String>,
}

/// `ReportLoad`: per-component load observed by one replica.
///
/// Accepted and discarded today; retained as the extension point for
/// load-aware slice reassignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoadReport {
    pub group: String,
    /// Address of the reporting replica.
    pub address: String,
    /// Load per component, keyed by fully-qualified name.
    pub load: std::collections::BTreeMap<String, f64>,
}
