//! # Trace span plumbing.
//!
//! Workers export finished spans through their envelope; the supervisor
//! forwards each batch to the configured [`TraceSink`]. When no sink is
//! configured, spans are dropped. Sink errors propagate to the worker
//! that shipped the batch; they never terminate the supervisor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of the span in a request, as the worker recorded it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
}

/// One finished span, ready for persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TraceSpan {
    /// Operation name.
    pub name: String,
    /// 16-byte trace id, hex encoded.
    pub trace_id: String,
    /// 8-byte span id, hex encoded.
    pub span_id: String,
    /// Parent span id, empty for a root span.
    pub parent_span_id: String,
    pub kind: SpanKind,
    /// Start time, microseconds since the Unix epoch.
    pub start_micros: i64,
    /// End time, microseconds since the Unix epoch.
    pub end_micros: i64,
    /// Key/value attributes.
    pub attrs: Vec<(String, String)>,
}

/// Boxed error for collaborator seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Persists trace spans for one deployment.
#[async_trait]
pub trait TraceSink: Send + Sync + 'static {
    /// Stores a batch of spans under `(app, deployment_id)`.
    async fn store(
        &self,
        app: &str,
        deployment_id: Uuid,
        spans: &[TraceSpan],
    ) -> Result<(), BoxError>;
}
