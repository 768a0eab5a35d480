//! # The supervisor.
//!
//! [`Supervisor`] manages one deployment on one machine: it lazily
//! creates co-location group records, spawns each group's fixed set of
//! worker replicas through the envelope factory, serves the worker
//! callbacks ([`EnvelopeHandler`]), keeps the routing cells current, and
//! answers the status/metrics/profile queries.
//!
//! # High-level architecture
//!
//! ```text
//!                      ┌────────────────────────────┐
//!   worker callbacks ─►│         Supervisor         │──► LogSink / TraceSink
//!   (via Envelope)     │  groups: name → Group      │
//!                      │  proxies: name → ProxyInfo │──► Proxy accept loops
//!                      │  stats, registry, logger   │
//!                      └─────────────┬──────────────┘
//!                         long-polls │ versioned cells
//!                                    ▼
//!                        workers (GetRoutingInfo,
//!                         GetComponentsToStart)
//! ```
//!
//! The supervisor mutex guards only the two maps, never their contents;
//! each group carries its own locks. Lock order is supervisor mutex →
//! group mutex → versioned-cell lock, and no lock is ever held across an
//! envelope RPC. Everything long-running selects on the root
//! cancellation token; no supervisor state survives a restart.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Deployment;
use crate::envelope::{
    EnvelopeFactory, EnvelopeHandler, EnvelopeOptions, WorkerInfo,
};
use crate::error::SupervisorError;
use crate::group::{Group, WorkerHandle};
use crate::logging::{LogEntry, LogSink, Logger, LoggerOptions, shorten_component};
use crate::metrics::{Counter, MetricRegistry, MetricSnapshot};
use crate::profile::{Profile, ProfileMerger, ProfileRequest, ProfileThunk};
use crate::protocol::{
    ComponentToStart, ComponentsToStart, ExportListenerReply, ExportListenerRequest,
    GetAddressReply, GetAddressRequest, GetComponentsRequest, GetRoutingRequest, Listener,
    LoadReport, ReplicaToRegister,
};
use crate::proxy::Proxy;
use crate::routing::{routing_algo, Assignment, RoutingInfo};
use crate::stats::StatsProcessor;
use crate::status::{Component, Metrics, Replica, Status};
use crate::traces::{TraceSink, TraceSpan};

/// The number of worker replicas every co-location group runs.
pub const DEFAULT_REPLICATION: usize = 2;

/// Collaborators and inputs the supervisor is constructed with.
///
/// No CLI, env vars, or on-disk state: the host process supplies
/// everything here.
pub struct SupervisorConfig {
    /// The deployment to manage.
    pub deployment: Deployment,
    /// Creates the per-worker control channels.
    pub envelopes: Arc<dyn EnvelopeFactory>,
    /// Destination for every log entry (workers' and the supervisor's
    /// own).
    pub log_sink: Arc<dyn LogSink>,
    /// Destination for worker trace spans; spans are dropped when
    /// `None`.
    pub trace_sink: Option<Arc<dyn TraceSink>>,
    /// Merges fanned-out worker profiles.
    pub profiles: Arc<dyn ProfileMerger>,
    /// Where the host serves the status surface, for the status message.
    pub status_addr: String,
}

impl SupervisorConfig {
    /// Config with default collaborators: stderr logging, no trace sink,
    /// concatenating profile merger.
    pub fn new(deployment: Deployment, envelopes: Arc<dyn EnvelopeFactory>) -> Self {
        Self {
            deployment,
            envelopes,
            log_sink: Arc::new(crate::logging::StderrSink),
            trace_sink: None,
            profiles: Arc::new(crate::profile::ConcatMerger),
            status_addr: String::new(),
        }
    }
}

/// A proxy serving one exported listener name.
#[derive(Clone)]
struct ProxyInfo {
    /// Listener name the proxy serves.
    listener: String,
    proxy: Arc<Proxy>,
    /// External (supervisor-side) accept address.
    addr: String,
}

/// Maps guarded by the supervisor mutex. The mutex protects the maps
/// only, never the records inside them.
#[derive(Default)]
struct SupervisorState {
    groups: BTreeMap<String, Arc<Group>>,
    proxies: BTreeMap<String, ProxyInfo>,
}

/// Manages an application deployment on a single machine.
pub struct Supervisor {
    dep: Deployment,
    started: SystemTime,
    token: CancellationToken,
    options: EnvelopeOptions,
    logger: Logger,
    log_sink: Arc<dyn LogSink>,
    trace_sink: Option<Arc<dyn TraceSink>>,
    profiles: Arc<dyn ProfileMerger>,
    envelopes: Arc<dyn EnvelopeFactory>,
    registry: MetricRegistry,
    components_started: Counter,
    replicas_registered: Counter,
    listeners_exported: Counter,
    stats: Arc<StatsProcessor>,
    status_addr: String,
    state: Mutex<SupervisorState>,
    // Self-handle for the envelope factory; envelopes are created from
    // `&self` but need the supervisor as an `Arc<dyn EnvelopeHandler>`.
    weak: Weak<Supervisor>,
}

impl Supervisor {
    /// Creates the supervisor and starts its stats collection task.
    ///
    /// The supervisor owns the root cancellation scope; call
    /// [`shutdown`](Self::shutdown) to stop every background task it
    /// spawned.
    pub fn new(cfg: SupervisorConfig) -> Arc<Self> {
        let logger = Logger::new(
            LoggerOptions {
                app: cfg.deployment.app.name.clone(),
                component: "supervisor".to_string(),
                node: Uuid::new_v4().to_string(),
                version: cfg.deployment.id.to_string(),
                attrs: vec![("appvisor/system".to_string(), String::new())],
            },
            Arc::clone(&cfg.log_sink),
        );

        let registry = MetricRegistry::new();
        let components_started = registry.counter("appvisor_components_started", &[]);
        let replicas_registered = registry.counter("appvisor_replicas_registered", &[]);
        let listeners_exported = registry.counter("appvisor_listeners_exported", &[]);

        let supervisor = Arc::new_cyclic(|weak| Self {
            dep: cfg.deployment,
            started: SystemTime::now(),
            token: CancellationToken::new(),
            options: EnvelopeOptions::default(),
            logger,
            log_sink: cfg.log_sink,
            trace_sink: cfg.trace_sink,
            profiles: cfg.profiles,
            envelopes: cfg.envelopes,
            registry,
            components_started,
            replicas_registered,
            listeners_exported,
            stats: Arc::new(StatsProcessor::new()),
            status_addr: cfg.status_addr,
            state: Mutex::new(SupervisorState::default()),
            weak: weak.clone(),
        });

        let collector = Arc::clone(&supervisor);
        let ctx = supervisor.token.child_token();
        tokio::spawn(async move {
            let reader = {
                let supervisor = Arc::clone(&collector);
                move || {
                    let supervisor = Arc::clone(&supervisor);
                    async move { supervisor.read_metrics().await }
                }
            };
            collector.stats.collect(ctx, reader).await;
        });

        supervisor
    }

    /// The root cancellation token every background task honors.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// The stats processor feeding the status surface.
    pub fn stats(&self) -> &StatsProcessor {
        &self.stats
    }

    /// Cancels the root scope: wakes every long-poll, stops the proxies
    /// and the stats collector, and cancels worker envelopes.
    pub fn shutdown(&self) {
        tracing::debug!(app = %self.dep.app.name, "supervisor shutting down");
        self.token.cancel();
    }

    /// The status router (`/statusz`, `/metricsz`, `/profilez`), ready to
    /// mount on whatever mux the host serves.
    pub fn router(self: &Arc<Self>) -> axum::Router {
        crate::status::router(Arc::clone(self))
    }

    /// Returns the named co-location group, creating its record on first
    /// mention.
    pub fn group(&self, name: &str) -> Arc<Group> {
        let mut state = self.state.lock();
        Arc::clone(
            state
                .groups
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Group::new(name))),
        )
    }

    /// All managed groups, in name order.
    pub fn all_groups(&self) -> Vec<Arc<Group>> {
        self.state.lock().groups.values().cloned().collect()
    }

    fn all_proxies(&self) -> Vec<ProxyInfo> {
        self.state.lock().proxies.values().cloned().collect()
    }

    /// Spawns the group's workers if they are not already running.
    ///
    /// All-or-nothing under the group mutex: on success the group has
    /// exactly [`DEFAULT_REPLICATION`] envelopes, on failure it is left
    /// untouched, so repeated calls are idempotent. A worker that later
    /// dies is logged and not replaced.
    pub fn start_group(&self, group: &Group) -> Result<(), SupervisorError> {
        let mut state = group.state();
        if state.envelopes.len() == DEFAULT_REPLICATION {
            // Already started.
            return Ok(());
        }

        let Some(handler) = self.weak.upgrade() else {
            return Err(SupervisorError::Canceled);
        };
        let handler: Arc<dyn EnvelopeHandler> = handler;

        let mut handles = Vec::with_capacity(DEFAULT_REPLICATION);
        for _ in 0..DEFAULT_REPLICATION {
            let info = WorkerInfo {
                app: self.dep.app.name.clone(),
                deployment_id: self.dep.id,
                group: group.name.clone(),
                group_id: Uuid::new_v4(),
                id: Uuid::new_v4(),
                same_process: self.dep.app.same_process,
                sections: self.dep.app.sections.clone(),
                single_process: self.dep.single_process,
                single_machine: true,
            };
            let envelope = self
                .envelopes
                .make(
                    info.clone(),
                    self.dep.app.clone(),
                    Arc::clone(&handler),
                    self.options,
                )
                .map_err(|source| SupervisorError::Spawn {
                    group: group.name.clone(),
                    source,
                })?;
            handles.push(WorkerHandle { info, envelope });
        }

        for handle in handles {
            let run = Arc::clone(&handle.envelope);
            let ctx = self.token.child_token();
            let logger = self.logger.clone();
            let group_name = group.name.clone();
            tokio::spawn(async move {
                if let Err(err) = run.run(ctx).await {
                    logger.error("worker run", &err, &[("group", group_name.as_str())]);
                }
            });
            state.envelopes.push(handle);
        }
        Ok(())
    }

    /// Metric snapshots from every live worker plus the supervisor's own
    /// registry. Worker handles are cloned out before any RPC so no lock
    /// spans an await.
    pub async fn read_metrics(&self) -> Vec<MetricSnapshot> {
        let mut workers: Vec<WorkerHandle> = Vec::new();
        for group in self.all_groups() {
            workers.extend(group.workers());
        }

        let mut snapshots = Vec::new();
        for worker in workers {
            match worker.envelope.read_metrics().await {
                Ok(batch) => snapshots.extend(batch),
                // A dead worker just skips this round.
                Err(err) => {
                    tracing::debug!(err = %err, "skipping worker metrics");
                    continue;
                }
            }
        }
        snapshots.extend(self.registry.snapshot());
        snapshots
    }

    /// Status snapshot: groups joined with pids, per-method stats, and
    /// exported listeners.
    pub fn status(&self) -> Status {
        let stats = self.stats.statusz_snapshot();
        let mut components = Vec::new();
        for group in self.all_groups() {
            let (_, started) = group.components.read();
            let (handles, pids) = {
                let state = group.state();
                (state.envelopes.clone(), state.pids.clone())
            };
            let replicas: Vec<Replica> = pids
                .iter()
                .zip(handles.iter())
                .map(|(&pid, handle)| Replica {
                    pid,
                    worker_id: handle.info.id,
                })
                .collect();

            for component in started {
                let methods = stats
                    .get(shorten_component(&component))
                    .cloned()
                    .unwrap_or_default();
                components.push(Component {
                    name: component,
                    group: group.name.clone(),
                    replicas: replicas.clone(),
                    methods,
                });
            }
        }

        let listeners = self
            .all_proxies()
            .into_iter()
            .map(|p| Listener {
                name: p.listener,
                addr: p.addr,
            })
            .collect();

        Status {
            app: self.dep.app.name.clone(),
            deployment_id: self.dep.id,
            submission_time: self.started,
            status_addr: self.status_addr.clone(),
            components,
            listeners,
            config: self.dep.app.clone(),
        }
    }

    /// Current metric export.
    pub async fn metrics(&self) -> Metrics {
        Metrics {
            metrics: self.read_metrics().await,
        }
    }

    /// Fans a profiling request out to every worker and merges the
    /// results.
    ///
    /// Envelope handles are copied out per group first: a profile can
    /// run for minutes and must not block `StartComponent` or
    /// `RegisterReplica`.
    pub async fn profile(&self, req: ProfileRequest) -> Result<Profile, SupervisorError> {
        let mut groups: Vec<Vec<ProfileThunk>> = Vec::new();
        for group in self.all_groups() {
            let thunks = group
                .workers()
                .into_iter()
                .map(|handle| {
                    let ctx = self.token.child_token();
                    let req = req.clone();
                    let envelope = handle.envelope;
                    async move { envelope.run_profiling(ctx, req).await }.boxed()
                })
                .collect();
            groups.push(thunks);
        }

        let data = self.profiles.merge(groups).await?;
        Ok(Profile {
            app: self.dep.app.name.clone(),
            deployment_id: self.dep.id,
            data,
        })
    }
}

#[async_trait]
impl EnvelopeHandler for Supervisor {
    async fn start_component(&self, req: ComponentToStart) -> Result<(), SupervisorError> {
        let group = self.group(&req.group);

        // Record the component. A second announcement (or a concurrent
        // one racing this call) sees `insert` return false and stops
        // here.
        let already = group
            .components
            .write(|set| !set.insert(req.component.clone()));
        if already {
            return Ok(());
        }
        self.components_started.inc();

        // The assignment must be in place before any worker this call
        // spawns can long-poll the routing cell.
        if req.is_routed {
            let fresh = Assignment::new(&self.dep.app.name, self.dep.id, &req.component);
            group.routing.write(|routing| {
                let assignment = routing_algo(&fresh, &routing.replicas);
                routing.assignments.push(assignment);
            });
        }

        self.start_group(&group)
    }

    async fn register_replica(&self, req: ReplicaToRegister) -> Result<(), SupervisorError> {
        let group = self.group(&req.group);

        // Replica-set mutation and assignment recomputation are one
        // write: a long-poller can never observe the new replica with
        // stale assignments.
        let duplicate = group.routing.write(|routing| {
            if routing.replicas.iter().any(|a| *a == req.address) {
                return true;
            }
            routing.replicas.push(req.address.clone());
            let replicas = routing.replicas.clone();
            for assignment in &mut routing.assignments {
                *assignment = routing_algo(assignment, &replicas);
            }
            false
        });
        if duplicate {
            return Ok(());
        }
        self.replicas_registered.inc();

        group.state().pids.push(req.pid);
        Ok(())
    }

    async fn get_components_to_start(
        &self,
        req: GetComponentsRequest,
    ) -> Result<ComponentsToStart, SupervisorError> {
        let group = self.group(&req.group);
        let (version, components) = group.components.read_after(req.version, &self.token).await?;
        Ok(ComponentsToStart {
            version,
            components: components.into_iter().collect(),
        })
    }

    async fn get_routing_info(
        &self,
        req: GetRoutingRequest,
    ) -> Result<RoutingInfo, SupervisorError> {
        let group = self.group(&req.group);
        let (version, mut routing) = group.routing.read_after(req.version, &self.token).await?;
        routing.version = version;
        Ok(routing)
    }

    async fn get_address(
        &self,
        _req: GetAddressRequest,
    ) -> Result<GetAddressReply, SupervisorError> {
        // Listeners bind ephemerally; the proxy is the stable address.
        Ok(GetAddressReply {
            address: "localhost:0".to_string(),
        })
    }

    async fn export_listener(
        &self,
        req: ExportListenerRequest,
    ) -> Result<ExportListenerReply, SupervisorError> {
        let mut state = self.state.lock();

        if let Some(existing) = state.proxies.get(&req.listener.name) {
            existing.proxy.add_backend(req.listener.addr.clone());
            return Ok(ExportListenerReply {
                proxy_address: existing.addr.clone(),
                error: None,
            });
        }

        let std_listener = match std::net::TcpListener::bind(&req.local_address) {
            Ok(listener) => listener,
            // A taken address is the user's to fix; don't retry, don't
            // fail the supervisor.
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                return Ok(ExportListenerReply {
                    proxy_address: String::new(),
                    error: Some(err.to_string()),
                });
            }
            Err(source) => {
                return Err(SupervisorError::ProxyListen {
                    addr: req.local_address.clone(),
                    source,
                });
            }
        };
        if let Err(source) = std_listener.set_nonblocking(true) {
            return Err(SupervisorError::ProxyListen {
                addr: req.local_address.clone(),
                source,
            });
        }
        let listener = tokio::net::TcpListener::from_std(std_listener).map_err(|source| {
            SupervisorError::ProxyListen {
                addr: req.local_address.clone(),
                source,
            }
        })?;
        let addr = listener
            .local_addr()
            .map_err(|source| SupervisorError::ProxyListen {
                addr: req.local_address.clone(),
                source,
            })?
            .to_string();

        self.logger.info(
            "proxy listening",
            &[
                ("listener", req.listener.name.as_str()),
                ("address", addr.as_str()),
            ],
        );
        self.listeners_exported.inc();

        let proxy = Proxy::new(self.logger.clone());
        proxy.add_backend(req.listener.addr.clone());
        state.proxies.insert(
            req.listener.name.clone(),
            ProxyInfo {
                listener: req.listener.name.clone(),
                proxy: Arc::clone(&proxy),
                addr: addr.clone(),
            },
        );

        let ctx = self.token.child_token();
        let logger = self.logger.clone();
        let listener_name = req.listener.name.clone();
        tokio::spawn(async move {
            if let Err(err) = proxy.serve(listener, ctx).await {
                logger.error("proxy serve", &err, &[("listener", listener_name.as_str())]);
            }
        });

        Ok(ExportListenerReply {
            proxy_address: addr,
            error: None,
        })
    }

    fn recv_log_entry(&self, entry: LogEntry) {
        self.log_sink.send(entry);
    }

    async fn recv_trace_spans(&self, spans: Vec<TraceSpan>) -> Result<(), SupervisorError> {
        let Some(sink) = &self.trace_sink else {
            return Ok(());
        };
        sink.store(&self.dep.app.name, self.dep.id, &spans)
            .await
            .map_err(|err| SupervisorError::TraceSink {
                reason: err.to_string(),
            })
    }

    async fn report_load(&self, _report: LoadReport) -> Result<(), SupervisorError> {
        Ok(())
    }
}
