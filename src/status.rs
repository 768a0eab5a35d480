//! # Status surface: external messages and the HTTP adapter.
//!
//! [`Status`] joins the supervisor's group state, the proxy registry, and
//! the stats processor into one snapshot; [`Metrics`] exports the raw
//! metric snapshots. Both are plain serde messages; rendering them is
//! the host's concern.
//!
//! [`router`] is the thin adapter that registers the status handlers on
//! an HTTP mux: each handler is one call into the corresponding
//! [`Supervisor`](crate::Supervisor) query.

use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::metrics::MetricSnapshot;
use crate::profile::{Profile, ProfileRequest};
use crate::stats::MethodSummary;
use crate::supervisor::Supervisor;

pub use crate::protocol::Listener;

/// One replica of a component's group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Replica {
    /// OS pid the replica registered with.
    pub pid: i64,
    /// Id the worker was spawned with.
    pub worker_id: Uuid,
}

/// One component and where it runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Component {
    /// Fully-qualified component name.
    pub name: String,
    /// Co-location group the component runs in.
    pub group: String,
    /// Registered replicas of the group.
    pub replicas: Vec<Replica>,
    /// Per-method stats, present once the stats processor has samples.
    pub methods: Vec<MethodSummary>,
}

/// Full deployment status snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    /// Application name.
    pub app: String,
    pub deployment_id: Uuid,
    /// When the supervisor was constructed.
    pub submission_time: SystemTime,
    /// Where the status surface itself is served, when the host mounted
    /// it.
    pub status_addr: String,
    pub components: Vec<Component>,
    /// Exported listeners and their external addresses.
    pub listeners: Vec<Listener>,
    /// The deployed application config.
    pub config: AppConfig,
}

/// Raw metric export.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub metrics: Vec<MetricSnapshot>,
}

/// Builds the status router: `GET /statusz`, `GET /metricsz`,
/// `POST /profilez`. Mount it wherever the host serves HTTP.
pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/statusz", get(statusz))
        .route("/metricsz", get(metricsz))
        .route("/profilez", post(profilez))
        .with_state(supervisor)
}

async fn statusz(State(supervisor): State<Arc<Supervisor>>) -> Json<Status> {
    Json(supervisor.status())
}

async fn metricsz(State(supervisor): State<Arc<Supervisor>>) -> Json<Metrics> {
    Json(supervisor.metrics().await)
}

async fn profilez(
    State(supervisor): State<Arc<Supervisor>>,
    Json(req): Json<ProfileRequest>,
) -> Result<Json<Profile>, (StatusCode, String)> {
    supervisor
        .profile(req)
        .await
        .map(Json)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}
