//! # Error types used by the supervisor and the envelope seam.
//!
//! This module defines two main error enums:
//!
//! - [`SupervisorError`] errors raised by the supervisor itself.
//! - [`EnvelopeError`] errors raised by a worker's envelope (spawn, run,
//!   metrics, profiling).
//!
//! Both types provide `as_label` helpers for logs/metrics.
//!
//! Note that a rejected listener address (port already bound) is *not* a
//! [`SupervisorError`]: it is reported to the worker inside a successful
//! [`ExportListenerReply`](crate::protocol::ExportListenerReply).

use thiserror::Error;

/// # Errors produced by the supervisor.
///
/// These represent failures while handling a worker callback or while
/// operating the supervisor's own machinery. Worker-facing callbacks return
/// these synchronously; failures on background tasks are logged and
/// swallowed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The supervisor's root scope was cancelled while an operation was
    /// suspended (e.g. a long-poll on a versioned cell).
    ///
    /// This is **not an error** in the traditional sense, but signals
    /// intentional shutdown.
    #[error("supervisor canceled")]
    Canceled,

    /// Constructing an envelope for a group replica failed.
    #[error("spawning worker for group '{group}': {source}")]
    Spawn {
        /// The co-location group being started.
        group: String,
        /// The underlying envelope failure.
        #[source]
        source: EnvelopeError,
    },

    /// Binding the accept socket for an exported listener failed for a
    /// reason other than the address being in use.
    #[error("proxy listen on {addr}: {source}")]
    ProxyListen {
        /// The requested local address.
        addr: String,
        /// The underlying bind error.
        #[source]
        source: std::io::Error,
    },

    /// The configured trace sink rejected a batch of spans.
    #[error("trace sink: {reason}")]
    TraceSink { reason: String },

    /// A profile fan-out could not be assembled or merged.
    #[error("profiling: {reason}")]
    Profile { reason: String },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Canceled => "supervisor_canceled",
            SupervisorError::Spawn { .. } => "supervisor_spawn",
            SupervisorError::ProxyListen { .. } => "supervisor_proxy_listen",
            SupervisorError::TraceSink { .. } => "supervisor_trace_sink",
            SupervisorError::Profile { .. } => "supervisor_profile",
        }
    }
}

/// # Errors produced by an envelope.
///
/// The envelope is an external collaborator; these are the failure shapes
/// the supervisor is prepared to observe from it. A worker death surfaces
/// as [`EnvelopeError::WorkerExited`] from `run` and is terminal for that
/// replica: the supervisor logs it and does not respawn.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The worker subprocess exited (crash or clean exit before shutdown).
    #[error("worker exited: {reason}")]
    WorkerExited { reason: String },

    /// I/O on the worker control channel failed.
    #[error("envelope i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The worker sent something the control protocol does not allow.
    #[error("envelope protocol: {reason}")]
    Protocol { reason: String },

    /// The envelope was cancelled by the supervisor's root scope.
    #[error("envelope canceled")]
    Canceled,
}

impl EnvelopeError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            EnvelopeError::WorkerExited { .. } => "envelope_worker_exited",
            EnvelopeError::Io(_) => "envelope_io",
            EnvelopeError::Protocol { .. } => "envelope_protocol",
            EnvelopeError::Canceled => "envelope_canceled",
        }
    }

    /// Indicates whether the failure ended the worker for good.
    ///
    /// The supervisor never restarts workers, so every variant except
    /// [`EnvelopeError::Canceled`] is terminal for the replica.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EnvelopeError::Canceled)
    }
}
