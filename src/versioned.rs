//! # Versioned cell: a value with a monotone version and blocking reads.
//!
//! [`Versioned`] holds a value together with a version counter that is
//! bumped on every write. Readers either take a cheap snapshot with
//! [`Versioned::read`], or long-poll with [`Versioned::read_after`], which
//! suspends until the stored version exceeds the one the caller already
//! observed.
//!
//! The supervisor keeps two cells per co-location group (the started
//! component set and the routing info); workers present their last-seen
//! version and are woken exactly when something new appears. There is no
//! backlog to retain and no per-subscriber state: a worker can reconnect
//! with any observed version and catch up in one read.
//!
//! # High-level architecture
//!
//! ```text
//!   writer ──► write(f) ──► value mutated, version += 1
//!                               │
//!                        watch channel bump
//!                               ▼
//!   reader ──► read_after(v) ── suspended while version <= v ──► (version', snapshot)
//! ```
//!
//! Version wake-ups ride a [`tokio::sync::watch`] channel; the value itself
//! sits behind a plain mutex that is never held across an await point.

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;

/// A value guarded by a monotonically increasing version.
///
/// The version starts at 0 and equals the number of successful writes.
/// Snapshots are clones; the cell never hands out references to its
/// interior.
pub struct Versioned<T> {
    value: Mutex<T>,
    version: watch::Sender<u64>,
}

impl<T: Clone> Versioned<T> {
    /// Creates a cell at version 0 holding `value`.
    pub fn new(value: T) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            value: Mutex::new(value),
            version,
        }
    }

    /// Runs `f` against the value under the write lock, then bumps the
    /// version and wakes every suspended [`read_after`](Self::read_after).
    ///
    /// The bump happens exactly once per call, after `f` returns. The
    /// version is published while the value lock is still held, so a
    /// concurrent [`read`](Self::read) always sees a `(version, value)`
    /// pair produced by the same write.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut value = self.value.lock();
        let out = f(&mut value);
        self.version.send_modify(|v| *v += 1);
        out
    }

    /// Returns the current `(version, value)` snapshot without blocking.
    pub fn read(&self) -> (u64, T) {
        let value = self.value.lock();
        (*self.version.borrow(), value.clone())
    }

    /// Suspends until the version exceeds `observed`, then returns a fresh
    /// `(version, value)` snapshot.
    ///
    /// An `observed` version at or ahead of the cell's current version
    /// waits for any future write rather than returning immediately. When
    /// `ctx` is cancelled the call returns [`SupervisorError::Canceled`]
    /// without a stale snapshot.
    pub async fn read_after(
        &self,
        observed: u64,
        ctx: &CancellationToken,
    ) -> Result<(u64, T), SupervisorError> {
        let mut rx = self.version.subscribe();
        // A caller claiming a version from the future (say, after a
        // supervisor restart) is woken by the next write, whatever its
        // number.
        let threshold = observed.min(*rx.borrow_and_update());
        tokio::select! {
            reached = async { rx.wait_for(|v| *v > threshold).await.is_ok() } => {
                if !reached {
                    // The sender lives as long as the cell; this arm only
                    // fires if the cell is torn down mid-wait.
                    return Err(SupervisorError::Canceled);
                }
            }
            _ = ctx.cancelled() => return Err(SupervisorError::Canceled),
        }
        Ok(self.read())
    }

    /// Current version without a snapshot.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}

impl<T: Clone + Default> Default for Versioned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn version_counts_writes() {
        let cell = Versioned::new(0u32);
        assert_eq!(cell.read(), (0, 0));
        for i in 1..=5 {
            cell.write(|v| *v += 1);
            assert_eq!(cell.read(), (i, i as u32));
        }
    }

    #[test]
    fn write_returns_closure_result() {
        let cell = Versioned::new(vec![1, 2]);
        let popped = cell.write(|v| v.pop());
        assert_eq!(popped, Some(2));
        assert_eq!(cell.read(), (1, vec![1]));
    }

    #[tokio::test]
    async fn read_after_wakes_on_write() {
        let cell = Arc::new(Versioned::new(String::from("a")));
        let ctx = CancellationToken::new();

        let reader = {
            let cell = Arc::clone(&cell);
            let ctx = ctx.clone();
            tokio::spawn(async move { cell.read_after(0, &ctx).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cell.write(|v| v.push('b'));

        let (version, value) = reader.await.unwrap().unwrap();
        assert_eq!(version, 1);
        assert_eq!(value, "ab");
    }

    #[tokio::test]
    async fn read_after_current_version_blocks_until_next_write() {
        let cell = Arc::new(Versioned::new(0u32));
        cell.write(|v| *v = 7);
        let ctx = CancellationToken::new();

        // Already satisfied: observed 0 < version 1.
        let (version, value) = cell.read_after(0, &ctx).await.unwrap();
        assert_eq!((version, value), (1, 7));

        // Observed == current: must wait for the next write.
        let waiter = {
            let cell = Arc::clone(&cell);
            let ctx = ctx.clone();
            tokio::spawn(async move { cell.read_after(1, &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        cell.write(|v| *v = 8);
        let (version, value) = waiter.await.unwrap().unwrap();
        assert_eq!((version, value), (2, 8));
    }

    #[tokio::test]
    async fn read_after_future_version_waits_for_any_write() {
        let cell = Arc::new(Versioned::new(0u32));
        let ctx = CancellationToken::new();

        let waiter = {
            let cell = Arc::clone(&cell);
            let ctx = ctx.clone();
            tokio::spawn(async move { cell.read_after(100, &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A write wakes the reader even though 1 <= 100: the reader asked
        // for "anything newer than what I claim to have seen".
        cell.write(|v| *v = 1);
        let (version, value) = waiter.await.unwrap().unwrap();
        assert_eq!((version, value), (1, 1));
    }

    #[tokio::test]
    async fn read_after_cancellation_returns_no_snapshot() {
        let cell = Versioned::new(1u32);
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = cell.read_after(5, &ctx).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Canceled));
    }
}
