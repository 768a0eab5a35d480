//! # Profile fan-out.
//!
//! A profile request fans out to every worker of every group. The
//! supervisor assembles one thunk per worker (a boxed future that runs
//! the profiling session over that worker's envelope) and hands the
//! per-group thunk lists to a [`ProfileMerger`]. Merging policy (how raw
//! profile payloads combine within a group and across groups) belongs to
//! the merger collaborator.
//!
//! Profiles can take seconds to minutes; thunks are built from cloned
//! envelope handles so no supervisor or group lock is held while they
//! run.

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EnvelopeError, SupervisorError};

/// What to profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileType {
    Cpu,
    Heap,
}

/// One profiling session request, fanned out to every worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileRequest {
    pub typ: ProfileType,
    /// Sampling duration; meaningful for CPU profiles.
    pub duration_ms: u64,
}

/// A merged profile for the whole deployment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    /// Application name, stamped by the supervisor.
    pub app: String,
    /// Deployment id, stamped by the supervisor.
    pub deployment_id: Uuid,
    /// Raw merged profile bytes.
    pub data: Vec<u8>,
}

/// One deferred per-worker profiling run.
pub type ProfileThunk = BoxFuture<'static, Result<Vec<u8>, EnvelopeError>>;

/// Merges per-worker profiles into one payload.
///
/// `groups` carries one inner list per co-location group; the merger
/// invokes each group's thunks concurrently.
#[async_trait]
pub trait ProfileMerger: Send + Sync + 'static {
    async fn merge(&self, groups: Vec<Vec<ProfileThunk>>) -> Result<Vec<u8>, SupervisorError>;
}

/// Fallback merger: concatenates whatever payloads the workers return.
///
/// Format-aware merging (folding samples of identical stacks, say) is the
/// host's concern; this merger only guarantees the fan-out contract:
/// thunks of one group run concurrently, groups are visited in order, and
/// a failed worker skips its contribution without failing the profile,
/// unless every worker fails, which surfaces the first error.
pub struct ConcatMerger;

#[async_trait]
impl ProfileMerger for ConcatMerger {
    async fn merge(&self, groups: Vec<Vec<ProfileThunk>>) -> Result<Vec<u8>, SupervisorError> {
        let mut merged = Vec::new();
        let mut attempted = 0usize;
        let mut first_err: Option<EnvelopeError> = None;
        for group in groups {
            attempted += group.len();
            for result in join_all(group).await {
                match result {
                    Ok(data) => merged.extend_from_slice(&data),
                    Err(err) => first_err = first_err.or(Some(err)),
                }
            }
        }
        if merged.is_empty() && attempted > 0 {
            if let Some(err) = first_err {
                return Err(SupervisorError::Profile {
                    reason: err.to_string(),
                });
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn ok_thunk(bytes: &'static [u8]) -> ProfileThunk {
        async move { Ok(bytes.to_vec()) }.boxed()
    }

    fn err_thunk(reason: &'static str) -> ProfileThunk {
        async move {
            Err(EnvelopeError::WorkerExited {
                reason: reason.to_string(),
            })
        }
        .boxed()
    }

    #[tokio::test]
    async fn concatenates_group_profiles() {
        let groups = vec![
            vec![ok_thunk(b"aa"), ok_thunk(b"bb")],
            vec![ok_thunk(b"cc")],
        ];
        let merged = ConcatMerger.merge(groups).await.unwrap();
        assert_eq!(merged, b"aabbcc");
    }

    #[tokio::test]
    async fn failed_worker_is_skipped() {
        let groups = vec![vec![ok_thunk(b"aa"), err_thunk("crash")]];
        let merged = ConcatMerger.merge(groups).await.unwrap();
        assert_eq!(merged, b"aa");
    }

    #[tokio::test]
    async fn all_workers_failing_is_an_error() {
        let groups = vec![vec![err_thunk("crash")], vec![err_thunk("crash")]];
        let err = ConcatMerger.merge(groups).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Profile { .. }));
    }

    #[tokio::test]
    async fn empty_fanout_yields_empty_profile() {
        let merged = ConcatMerger.merge(Vec::new()).await.unwrap();
        assert!(merged.is_empty());
    }
}
