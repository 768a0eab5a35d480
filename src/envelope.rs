//! # Envelope: the per-worker control channel, as a collaborator seam.
//!
//! The supervisor does not speak the worker wire protocol itself. For
//! each replica it asks an [`EnvelopeFactory`] for an [`Envelope`]: the
//! bidirectional control channel that launches the subprocess, relays the
//! worker's callbacks to an [`EnvelopeHandler`] (the supervisor), and
//! serves the supervisor's outbound requests (metrics, profiles).
//!
//! ```text
//!              make(info, config, handler, options)
//!   Supervisor ────────────────► EnvelopeFactory
//!        ▲                             │
//!        │ callbacks                   ▼
//!        └──────────────────────── Envelope ◄──► worker subprocess
//!              (EnvelopeHandler)
//! ```
//!
//! Implementations decide everything about process management and
//! framing; the supervisor only requires the three methods of
//! [`Envelope`] and that `run` honors its cancellation token.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{EnvelopeError, SupervisorError};
use crate::logging::LogEntry;
use crate::metrics::MetricSnapshot;
use crate::policy::RestartPolicy;
use crate::profile::ProfileRequest;
use crate::protocol::{
    ComponentToStart, ComponentsToStart, ExportListenerReply, ExportListenerRequest,
    GetAddressReply, GetAddressRequest, GetComponentsRequest, GetRoutingRequest, LoadReport,
    ReplicaToRegister,
};
use crate::routing::RoutingInfo;
use crate::strategy::BackoffStrategy;
use crate::traces::TraceSpan;

/// Identity and inherited configuration of one worker.
///
/// Every field except the per-worker ids is identical across a group's
/// replicas.
#[derive(Clone, Debug)]
pub struct WorkerInfo {
    /// Application name.
    pub app: String,
    /// Deployment the worker belongs to.
    pub deployment_id: Uuid,
    /// Name of the worker's co-location group.
    pub group: String,
    /// Fresh id for the group replica.
    pub group_id: Uuid,
    /// Fresh id for the worker itself.
    pub id: Uuid,
    /// Forwarded from the deployment descriptor.
    pub same_process: bool,
    /// Forwarded from the deployment descriptor.
    pub sections: BTreeMap<String, String>,
    /// Forwarded from the deployment descriptor.
    pub single_process: bool,
    /// Always true: this supervisor manages one machine.
    pub single_machine: bool,
}

/// Options the supervisor pins on every envelope it creates.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvelopeOptions {
    /// Worker relaunch policy; the supervisor uses
    /// [`RestartPolicy::Never`].
    pub restart: RestartPolicy,
    /// Backoff for transient control-channel retries.
    pub retry: BackoffStrategy,
}

/// Shared handle to an envelope.
pub type EnvelopeRef = Arc<dyn Envelope>;

/// The per-worker control channel.
#[async_trait]
pub trait Envelope: Send + Sync + 'static {
    /// Drives the worker: blocks until the subprocess exits or `ctx` is
    /// cancelled. Callbacks arrive at the handler the envelope was
    /// created with for as long as this runs.
    async fn run(&self, ctx: CancellationToken) -> Result<(), EnvelopeError>;

    /// Pulls a snapshot of every metric series the worker exports.
    async fn read_metrics(&self) -> Result<Vec<MetricSnapshot>, EnvelopeError>;

    /// Runs one profiling session on the worker and returns the raw
    /// profile bytes.
    async fn run_profiling(
        &self,
        ctx: CancellationToken,
        req: ProfileRequest,
    ) -> Result<Vec<u8>, EnvelopeError>;
}

/// Creates envelopes; supplied by the host process.
pub trait EnvelopeFactory: Send + Sync + 'static {
    /// Builds the envelope for one worker. Called with the group mutex
    /// held, so it must not block; launching the subprocess belongs in
    /// [`Envelope::run`].
    fn make(
        &self,
        info: WorkerInfo,
        config: AppConfig,
        handler: Arc<dyn EnvelopeHandler>,
        options: EnvelopeOptions,
    ) -> Result<EnvelopeRef, EnvelopeError>;
}

/// The callbacks a worker invokes through its envelope.
///
/// The supervisor implements this; envelope implementations call it as
/// worker messages arrive. Methods that serve worker requests return
/// their errors synchronously to that worker.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + 'static {
    /// Records a component as needed in its group, appends a routing
    /// assignment when the component is routed, and spawns the group's
    /// workers if they are not yet running.
    async fn start_component(&self, req: ComponentToStart) -> Result<(), SupervisorError>;

    /// Adds a dialable replica to its group and recomputes every
    /// assignment in the group. Duplicate addresses are no-ops.
    async fn register_replica(&self, req: ReplicaToRegister) -> Result<(), SupervisorError>;

    /// Long-polls the group's component set past the observed version.
    async fn get_components_to_start(
        &self,
        req: GetComponentsRequest,
    ) -> Result<ComponentsToStart, SupervisorError>;

    /// Long-polls the group's routing info past the observed version.
    async fn get_routing_info(&self, req: GetRoutingRequest)
        -> Result<RoutingInfo, SupervisorError>;

    /// Address a worker should bind an exported listener on.
    async fn get_address(&self, req: GetAddressRequest) -> Result<GetAddressReply, SupervisorError>;

    /// Exposes a worker listener behind a shared proxy.
    async fn export_listener(
        &self,
        req: ExportListenerRequest,
    ) -> Result<ExportListenerReply, SupervisorError>;

    /// Hands a worker log entry to the configured sink. Thread-safe,
    /// never fails.
    fn recv_log_entry(&self, entry: LogEntry);

    /// Forwards worker trace spans to the trace sink, when one is
    /// configured.
    async fn recv_trace_spans(&self, spans: Vec<TraceSpan>) -> Result<(), SupervisorError>;

    /// Accepts a load report. Currently discarded.
    async fn report_load(&self, report: LoadReport) -> Result<(), SupervisorError>;
}
