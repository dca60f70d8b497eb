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

//! In-memory lock store: a mutex-guarded table. Suitable for tests and
//! single-process deployments; locks do not survive a restart and are not
//! visible to other processes.

use crate::error::{PlangateError, Result};
use crate::locking::key::{self, LockKey};
use crate::locking::store::{AcquireOutcome, LockStore};
use crate::models::LockRecord;
use log::debug;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    table: Mutex<BTreeMap<LockKey, LockRecord>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, BTreeMap<LockKey, LockRecord>>> {
        self.table
            .lock()
            .map_err(|_| PlangateError::StoreUnavailable {
                details: "lock table mutex poisoned".to_string(),
            })
    }
}

impl LockStore for InMemoryLockStore {
    fn try_acquire(&self, candidate: LockRecord) -> Result<AcquireOutcome> {
        let mut table = self.table()?;
        // Probe and insert happen under one guard, so the decision is atomic.
        match table.entry(candidate.key().clone()) {
            Entry::Occupied(entry) => {
                debug!("Lock contention on {}", entry.key());
                Ok(AcquireOutcome::AlreadyHeld(entry.get().clone()))
            }
            Entry::Vacant(entry) => {
                debug!("Acquired lock {}", entry.key());
                entry.insert(candidate.clone());
                Ok(AcquireOutcome::Acquired(candidate))
            }
        }
    }

    fn release(&self, key: &LockKey) -> Result<Option<LockRecord>> {
        let released = self.table()?.remove(key);
        if released.is_some() {
            debug!("Released lock {key}");
        }
        Ok(released)
    }

    fn get(&self, key: &LockKey) -> Result<Option<LockRecord>> {
        Ok(self.table()?.get(key).cloned())
    }

    fn list(&self) -> Result<BTreeMap<LockKey, LockRecord>> {
        Ok(self.table()?.clone())
    }

    fn find_by_pull(&self, repository: &str, pull_request_number: u64) -> Result<BTreeSet<LockKey>> {
        key::validate_repository(repository)?;
        Ok(self
            .table()?
            .values()
            .filter(|record| {
                record.repository() == repository
                    && record.pull_request_number() == pull_request_number
            })
            .map(|record| record.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str, workspace: &str) -> LockKey {
        LockKey::new("org/infra", path, workspace).unwrap()
    }

    #[test]
    fn acquire_then_contend_then_release() {
        let store = InMemoryLockStore::new();
        let first = LockRecord::new(key("prod/vpc", "default"), 42, "alice");

        let outcome = store.try_acquire(first.clone()).unwrap();
        assert!(outcome.is_acquired());

        let second = LockRecord::new(key("prod/vpc", "default"), 43, "bob");
        let outcome = store.try_acquire(second).unwrap();
        match outcome {
            AcquireOutcome::AlreadyHeld(existing) => assert_eq!(existing, first),
            other => panic!("expected AlreadyHeld, got {other:?}"),
        }

        let released = store.release(first.key()).unwrap();
        assert_eq!(released, Some(first));
    }

    #[test]
    fn release_of_absent_key_is_not_an_error() {
        let store = InMemoryLockStore::new();
        assert_eq!(store.release(&key("prod/vpc", "default")).unwrap(), None);
    }

    #[test]
    fn workspaces_lock_independently() {
        let store = InMemoryLockStore::new();
        store
            .try_acquire(LockRecord::new(key("prod/vpc", "default"), 42, "alice"))
            .unwrap();
        let outcome = store
            .try_acquire(LockRecord::new(key("prod/vpc", "staging"), 42, "alice"))
            .unwrap();
        assert!(outcome.is_acquired());
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn find_by_pull_rejects_malformed_repository() {
        let store = InMemoryLockStore::new();
        assert!(store.find_by_pull("not-a-repo", 42).is_err());
    }
}
