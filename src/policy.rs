//! # Restart policies for worker envelopes.
//!
//! [`RestartPolicy`] determines whether an envelope relaunches its worker
//! subprocess after the process exits.
//!
//! # Variants
//! - [`RestartPolicy::Never`]: the worker runs once; its death is terminal
//!   for that replica (default, and the policy the supervisor pins).
//! - [`RestartPolicy::Always`]: the worker is relaunched unconditionally.
//! - [`RestartPolicy::OnFailure`]: the worker is relaunched only after an
//!   abnormal exit.
//!
//! The supervisor always runs with `Never`: replica churn is handled by
//! operator re-deploy, which keeps slice-assignment churn predictable.
//!
//! # Example
//! ```
//! use appvisor::RestartPolicy;
//!
//! assert!(matches!(RestartPolicy::default(), RestartPolicy::Never));
//! ```

/// Policy controlling whether a worker subprocess is relaunched after it
/// exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never relaunch: one subprocess per replica, death is terminal
    /// (default).
    Never,
    /// Relaunch unconditionally after any exit.
    Always,
    /// Relaunch only after an abnormal exit.
    OnFailure,
}

impl Default for RestartPolicy {
    /// Returns [`RestartPolicy::Never`].
    fn default() -> Self {
        RestartPolicy::Never
    }
}
