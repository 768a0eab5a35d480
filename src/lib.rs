//! # appvisor
//!
//! **Appvisor** is a single-machine application supervisor.
//!
//! It manages one deployment of a multi-component application whose
//! components are partitioned into named co-location groups: it spawns a
//! fixed number of worker subprocesses per group, tracks which components
//! each group hosts, maintains the key-space routing assignments workers
//! long-poll, proxies externally-exported listeners, and aggregates
//! per-method stats into a status surface.
//!
//! ## Features
//!
//! | Area            | Description                                                      | Key types / traits                        |
//! |-----------------|------------------------------------------------------------------|-------------------------------------------|
//! | **Supervision** | Lazily created groups, all-or-nothing replica spawn, no restart. | [`Supervisor`], [`Group`]                 |
//! | **Routing**     | Deterministic slice assignments over the 64-bit key space.       | [`Assignment`], [`routing_algo`]          |
//! | **Long-poll**   | Versioned cells readers block on until something new appears.    | [`Versioned`]                             |
//! | **Proxying**    | One shared reverse proxy per exported listener name.             | [`Proxy`]                                 |
//! | **Callbacks**   | The contract workers drive through their envelopes.              | [`EnvelopeHandler`], [`Envelope`]         |
//! | **Stats**       | Minute/hour/total per-method windows for the status page.        | [`StatsProcessor`], [`MethodStats`]       |
//! | **Status**      | Snapshot join of groups, stats, and proxies; HTTP adapter.       | [`Status`], [`status::router`]            |
//!
//! ## Collaborator seams
//!
//! The worker wire protocol, trace persistence, log formatting, and
//! profile merging stay outside this crate, behind [`EnvelopeFactory`],
//! [`TraceSink`], [`LogSink`], and [`ProfileMerger`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use appvisor::{AppConfig, Deployment, EnvelopeFactory, Supervisor, SupervisorConfig};
//!
//! # fn factory() -> Arc<dyn EnvelopeFactory> { unimplemented!() }
//! #[tokio::main]
//! async fn main() {
//!     let deployment = Deployment::new(AppConfig {
//!         name: "collatz".to_string(),
//!         ..AppConfig::default()
//!     });
//!
//!     // The host supplies the envelope implementation (subprocess
//!     // management and wire protocol).
//!     let supervisor = Supervisor::new(SupervisorConfig::new(deployment, factory()));
//!
//!     // Serve the status surface.
//!     let router = appvisor::status::router(Arc::clone(&supervisor));
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

mod config;
mod envelope;
mod error;
mod group;
mod logging;
mod metrics;
mod policy;
mod profile;
mod protocol;
mod proxy;
mod routing;
mod stats;
pub mod status;
mod strategy;
mod supervisor;
mod traces;
mod versioned;

// ---- Public re-exports ----

pub use config::{AppConfig, Deployment};
pub use envelope::{
    Envelope, EnvelopeFactory, EnvelopeHandler, EnvelopeOptions, EnvelopeRef, WorkerInfo,
};
pub use error::{EnvelopeError, SupervisorError};
pub use group::{Group, WorkerHandle};
pub use logging::{shorten_component, Level, LogEntry, LogSink, Logger, LoggerOptions, StderrSink};
pub use metrics::{
    Counter, MetricRegistry, MetricSnapshot, MetricType, METHOD_BYTES_REPLY, METHOD_BYTES_REQUEST,
    METHOD_CALLS, METHOD_LATENCY_MICROS,
};
pub use policy::RestartPolicy;
pub use profile::{ConcatMerger, Profile, ProfileMerger, ProfileRequest, ProfileThunk, ProfileType};
pub use protocol::{
    ComponentToStart, ComponentsToStart, ExportListenerReply, ExportListenerRequest,
    GetAddressReply, GetAddressRequest, GetComponentsRequest, GetRoutingRequest, Listener,
    LoadReport, ReplicaToRegister,
};
pub use proxy::Proxy;
pub use routing::{routing_algo, Assignment, RoutingInfo, Slice};
pub use stats::{MethodStats, MethodSummary, StatsProcessor};
pub use status::{Component, Metrics, Replica, Status};
pub use strategy::BackoffStrategy;
pub use supervisor::{Supervisor, SupervisorConfig, DEFAULT_REPLICATION};
pub use traces::{BoxError, SpanKind, TraceSink, TraceSpan};
pub use versioned::Versioned;
