// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::{LockBackendKind, PlangateConfig};
use crate::error::Result;
use crate::locking::file::FileLockStore;
use crate::locking::key::LockKey;
use crate::locking::memory::InMemoryLockStore;
use crate::models::LockRecord;
use log::info;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Result of a lock attempt. Contention is an expected outcome, not an
/// error; callers branch on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The candidate record now holds the lock.
    Acquired(LockRecord),
    /// Another run holds the lock; carries the current holder so callers
    /// can report who is in the way.
    AlreadyHeld(LockRecord),
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }

    /// The record describing whoever holds the lock after this attempt.
    pub fn record(&self) -> &LockRecord {
        match self {
            AcquireOutcome::Acquired(record) | AcquireOutcome::AlreadyHeld(record) => record,
        }
    }
}

/// Capability interface for the shared lock store. The automation engine
/// calls `try_acquire` before starting a run, `release` when the run ends
/// or a user unlocks, and `release_by_pull` when a pull request closes.
///
/// Implementations must be stateless and safe to share across threads;
/// correctness is delegated to the backing store's strongly consistent
/// point reads and insert-if-absent conditional writes.
pub trait LockStore: Send + Sync {
    /// One atomic acquisition decision. Never blocks, never retries the
    /// acquisition; a lost race against a concurrent writer surfaces as
    /// `AlreadyHeld`, never as success.
    fn try_acquire(&self, candidate: LockRecord) -> Result<AcquireOutcome>;

    /// Unconditionally deletes the lock and returns the record that was
    /// held, or `None` when nothing was held. `None` is not an error;
    /// release is idempotent-safe. Ownership is not checked, the caller
    /// is trusted to supply the right key.
    fn release(&self, key: &LockKey) -> Result<Option<LockRecord>>;

    /// Strongly consistent point read of a single lock.
    fn get(&self, key: &LockKey) -> Result<Option<LockRecord>>;

    /// Best-effort inventory of every held lock, keyed by identity.
    /// Consistency is only as strong as the backing store's scan.
    fn list(&self) -> Result<BTreeMap<LockKey, LockRecord>>;

    /// Keys of every lock the given pull request holds on the repository.
    fn find_by_pull(&self, repository: &str, pull_request_number: u64) -> Result<BTreeSet<LockKey>>;

    /// Releases every lock the pull request holds and returns the records
    /// that were actually released. Not transactional: each key is
    /// released individually, and a lock released concurrently by someone
    /// else is simply absent from the result.
    fn release_by_pull(
        &self,
        repository: &str,
        pull_request_number: u64,
    ) -> Result<Vec<LockRecord>> {
        let mut released = Vec::new();
        for key in self.find_by_pull(repository, pull_request_number)? {
            if let Some(record) = self.release(&key)? {
                released.push(record);
            }
        }
        Ok(released)
    }
}

/// Builds the lock store selected by configuration. The handle is passed
/// explicitly to whoever needs it; there is no process-global store.
pub fn new_lock_store(config: &PlangateConfig, data_dir: &Path) -> Arc<dyn LockStore> {
    match config.locking.backend {
        LockBackendKind::Filesystem => {
            info!(
                "Using filesystem lock store under {}",
                data_dir.join("locks").display()
            );
            Arc::new(FileLockStore::new(data_dir))
        }
        LockBackendKind::Memory => {
            info!("Using in-memory lock store (single-process only)");
            Arc::new(InMemoryLockStore::new())
        }
    }
}
