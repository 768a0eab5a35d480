//! # Co-location group records.
//!
//! A [`Group`] is the supervisor's per-group state: the versioned set of
//! announced components, the versioned routing info, and the
//! mutex-guarded worker handles and pids. The record holds no reference
//! back to the supervisor; everything that needs supervisor context
//! (spawning, callbacks) lives on [`Supervisor`](crate::Supervisor) and
//! takes the group as a parameter.
//!
//! Lock discipline (see the crate docs): the group mutex guards only the
//! `envelopes`/`pids` lists; the two cells have their own locks; no lock
//! is held across an envelope RPC; callers clone the handle lists first.

use std::collections::BTreeSet;

use parking_lot::{Mutex, MutexGuard};

use crate::envelope::{EnvelopeRef, WorkerInfo};
use crate::routing::RoutingInfo;
use crate::versioned::Versioned;

/// One spawned worker: its identity and its control channel.
#[derive(Clone)]
pub struct WorkerHandle {
    /// The descriptor the worker was spawned with.
    pub info: WorkerInfo,
    /// The worker's envelope.
    pub envelope: EnvelopeRef,
}

/// Lists guarded by the group mutex.
#[derive(Default)]
pub(crate) struct GroupState {
    /// Worker handles, one per replica; empty or exactly
    /// `DEFAULT_REPLICATION` long.
    pub envelopes: Vec<WorkerHandle>,
    /// Worker OS pids, appended as replicas register (not as they
    /// spawn).
    pub pids: Vec<i64>,
}

/// A co-location group.
pub struct Group {
    /// Stable group name.
    pub name: String,
    /// Components announced as needed in this group.
    pub components: Versioned<BTreeSet<String>>,
    /// Replica addresses and per-component assignments.
    pub routing: Versioned<RoutingInfo>,
    state: Mutex<GroupState>,
}

impl Group {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Versioned::new(BTreeSet::new()),
            routing: Versioned::new(RoutingInfo::default()),
            state: Mutex::new(GroupState::default()),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock()
    }

    /// Snapshot of the worker handles (cheap clones; taken so callers
    /// never hold the group mutex across envelope RPCs).
    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.state.lock().envelopes.clone()
    }

    /// Snapshot of the registered pids.
    pub fn pids(&self) -> Vec<i64> {
        self.state.lock().pids.clone()
    }
}
