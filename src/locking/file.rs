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

//! Filesystem lock store: one record file per held lock.
//!
//! Acquisition probes the key's file, stages the complete record in an
//! adjacent staging file, and publishes it by hard-linking the staged
//! file into the key's path. The link only succeeds if the key is still
//! absent at publish time, and the key's file only ever appears with
//! full contents, so a concurrent reader sees either no lock or the
//! winner's whole record, never a partial write. A writer that loses the
//! link race re-reads the winner's record and reports it as the current
//! holder.

use crate::error::{PlangateError, Result};
use crate::locking::key::{self, LockKey};
use crate::locking::store::{AcquireOutcome, LockStore};
use crate::models::LockRecord;
use crate::paths::locking::{LOCK_FILE_EXTENSION, lock_file_path, locks_root};
use chrono::Utc;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub struct FileLockStore {
    data_dir: PathBuf,
}

impl FileLockStore {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Reads and decodes the record file, distinguishing "no lock held"
    /// from transport failures and corruption.
    fn read_record(&self, path: &Path, key_label: &str) -> Result<Option<LockRecord>> {
        match fs::read(path) {
            Ok(bytes) => LockRecord::decode(&bytes, key_label).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(store_unavailable(format!(
                "failed to read lock {}: {err}",
                path.display()
            ))),
        }
    }

    /// Scans every record under the locks root. `filter` prunes records
    /// before they are collected; decoding failures abort the scan and
    /// name the offending file, since a corrupt record means a held lock
    /// the scan can no longer see.
    fn scan<F>(&self, mut filter: F) -> Result<Vec<LockRecord>>
    where
        F: FnMut(&LockRecord) -> bool,
    {
        let root = locks_root(&self.data_dir);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(store_unavailable(format!(
                    "failed to scan locks directory {}: {err}",
                    root.display()
                )));
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                store_unavailable(format!(
                    "failed to scan locks directory {}: {err}",
                    root.display()
                ))
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOCK_FILE_EXTENSION) {
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // Released between the directory read and ours.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(store_unavailable(format!(
                        "failed to read lock {}: {err}",
                        path.display()
                    )));
                }
            };
            let record = LockRecord::decode(&bytes, &path.display().to_string())?;
            if filter(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl LockStore for FileLockStore {
    fn try_acquire(&self, candidate: LockRecord) -> Result<AcquireOutcome> {
        let key_label = candidate.key().to_string();
        let path = lock_file_path(&self.data_dir, candidate.key());
        let root = locks_root(&self.data_dir);
        fs::create_dir_all(&root).map_err(|err| {
            store_unavailable(format!(
                "failed to create locks directory {}: {err}",
                root.display()
            ))
        })?;
        let bytes = candidate.encode()?;

        loop {
            if let Some(existing) = self.read_record(&path, &key_label)? {
                debug!("Lock contention on {key_label}: {existing}");
                return Ok(AcquireOutcome::AlreadyHeld(existing));
            }

            // Stage the full record first, then publish it with a link
            // conditioned on the key still being absent. Writing through
            // the final path directly would expose a window where the key
            // exists with partial contents.
            let staging = staging_path(&root, candidate.key());
            write_staged_record(&staging, &bytes)?;

            match fs::hard_link(&staging, &path) {
                Ok(()) => {
                    remove_staging(&staging);
                    debug!("Acquired lock {key_label}");
                    return Ok(AcquireOutcome::Acquired(candidate));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    // A concurrent writer won between probe and publish.
                    // Re-read to report the winner; if it already released,
                    // the next probe gets a fresh decision.
                    remove_staging(&staging);
                    debug!("Lost acquisition race on {key_label}; re-reading holder");
                    continue;
                }
                Err(err) => {
                    remove_staging(&staging);
                    return Err(store_unavailable(format!(
                        "failed to publish lock {}: {err}",
                        path.display()
                    )));
                }
            }
        }
    }

    fn release(&self, key: &LockKey) -> Result<Option<LockRecord>> {
        let path = lock_file_path(&self.data_dir, key);
        let Some(record) = self.read_record(&path, &key.to_string())? else {
            return Ok(None);
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            // Someone else deleted it first; the lock is gone either way.
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(store_unavailable(format!(
                    "failed to delete lock {}: {err}",
                    path.display()
                )));
            }
        }
        debug!("Released lock {key}");
        Ok(Some(record))
    }

    fn get(&self, key: &LockKey) -> Result<Option<LockRecord>> {
        let path = lock_file_path(&self.data_dir, key);
        self.read_record(&path, &key.to_string())
    }

    fn list(&self) -> Result<BTreeMap<LockKey, LockRecord>> {
        let records = self.scan(|_| true)?;
        Ok(records
            .into_iter()
            .map(|record| (record.key().clone(), record))
            .collect())
    }

    fn find_by_pull(&self, repository: &str, pull_request_number: u64) -> Result<BTreeSet<LockKey>> {
        key::validate_repository(repository)?;
        let records = self.scan(|record| {
            record.repository() == repository
                && record.pull_request_number() == pull_request_number
        })?;
        Ok(records
            .into_iter()
            .map(|record| record.key().clone())
            .collect())
    }
}

fn store_unavailable(details: String) -> PlangateError {
    PlangateError::StoreUnavailable { details }
}

/// Substring marking staging artifacts of in-flight acquisitions. Scans
/// ignore them: only the `.lock` extension counts as a held lock.
const STAGING_SEGMENT: &str = ".staging-";

/// Disambiguates staging names within one process; the timestamp alone
/// can collide for threads racing on the same key.
static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

fn staging_path(root: &Path, key: &LockKey) -> PathBuf {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    root.join(format!(
        "{}{STAGING_SEGMENT}{}-{nanos}-{seq}",
        key.digest(),
        std::process::id()
    ))
}

fn write_staged_record(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| {
            store_unavailable(format!("failed to stage lock {}: {err}", path.display()))
        })?;
    if let Err(err) = file.write_all(bytes).and_then(|()| file.sync_all()) {
        drop(file);
        remove_staging(path);
        return Err(store_unavailable(format!(
            "failed to stage lock {}: {err}",
            path.display()
        )));
    }
    Ok(())
}

fn remove_staging(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("Failed to clean up staging file {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(path: &str, workspace: &str) -> LockKey {
        LockKey::new("org/infra", path, workspace).unwrap()
    }

    #[test]
    fn acquire_writes_one_record_file() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path());
        let record = LockRecord::new(key("prod/vpc", "default"), 42, "alice");

        let outcome = store.try_acquire(record.clone()).unwrap();
        assert!(outcome.is_acquired());

        let files: Vec<_> = fs::read_dir(temp.path().join("locks"))
            .unwrap()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(store.get(record.key()).unwrap(), Some(record));
    }

    #[test]
    fn contention_reports_the_holder() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path());
        let first = LockRecord::new(key("prod/vpc", "default"), 42, "alice");
        store.try_acquire(first.clone()).unwrap();

        let second = LockRecord::new(key("prod/vpc", "default"), 43, "bob");
        match store.try_acquire(second).unwrap() {
            AcquireOutcome::AlreadyHeld(existing) => assert_eq!(existing, first),
            other => panic!("expected AlreadyHeld, got {other:?}"),
        }
    }

    #[test]
    fn release_is_idempotent_safe() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path());
        let record = LockRecord::new(key("prod/vpc", "default"), 42, "alice");
        store.try_acquire(record.clone()).unwrap();

        assert_eq!(store.release(record.key()).unwrap(), Some(record.clone()));
        assert_eq!(store.release(record.key()).unwrap(), None);
        assert_eq!(store.get(record.key()).unwrap(), None);
    }

    #[test]
    fn corrupt_record_fails_the_scan_naming_the_file() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path());
        let record = LockRecord::new(key("prod/vpc", "default"), 42, "alice");
        store.try_acquire(record).unwrap();

        let bad = temp.path().join("locks").join("deadbeef.lock");
        fs::write(&bad, b"{ not json").unwrap();

        match store.list().unwrap_err() {
            PlangateError::CorruptRecord { key, .. } => {
                assert!(key.contains("deadbeef.lock"));
            }
            other => panic!("expected CorruptRecord, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_record_fails_get_for_that_key() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path());
        let record = LockRecord::new(key("prod/vpc", "default"), 42, "alice");
        store.try_acquire(record.clone()).unwrap();

        let path = lock_file_path(temp.path(), record.key());
        fs::write(&path, b"tampered").unwrap();

        match store.get(record.key()).unwrap_err() {
            PlangateError::CorruptRecord { key: named, .. } => {
                assert_eq!(named, record.key().to_string());
            }
            other => panic!("expected CorruptRecord, got {other:?}"),
        }
    }

    #[test]
    fn list_on_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn publish_is_atomic_and_leaves_only_the_record_file() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path());
        let record = LockRecord::new(key("prod/vpc", "default"), 42, "alice");
        store.try_acquire(record.clone()).unwrap();

        // No staging artifact may survive an acquisition, and the one
        // published file must carry the complete record.
        let names: Vec<String> = fs::read_dir(temp.path().join("locks"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".lock"), "unexpected file {names:?}");
        assert_eq!(store.get(record.key()).unwrap(), Some(record));
    }

    #[test]
    fn in_flight_staging_artifacts_never_surface_as_contention_or_corruption() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path());
        let lock_key = key("prod/vpc", "default");

        // Another writer mid-acquisition: record staged but not yet
        // published. The key is still absent, so acquisition and scans
        // must proceed as if no lock exists.
        let root = temp.path().join("locks");
        fs::create_dir_all(&root).unwrap();
        let staged = root.join(format!("{}.staging-999-1", lock_key.digest()));
        fs::write(&staged, b"{ \"version\"").unwrap();

        let record = LockRecord::new(lock_key.clone(), 42, "alice");
        let outcome = store.try_acquire(record.clone()).unwrap();
        assert!(outcome.is_acquired());

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed.get(&lock_key), Some(&record));
        assert_eq!(store.get(&lock_key).unwrap(), Some(record));
    }

    #[test]
    fn io_failures_surface_as_store_unavailable() {
        let temp = TempDir::new().unwrap();
        // Occupy the locks root with a regular file so every directory
        // operation fails with a transport-style error.
        fs::write(temp.path().join("locks"), b"not a directory").unwrap();
        let store = FileLockStore::new(temp.path());
        let record = LockRecord::new(key("prod/vpc", "default"), 42, "alice");

        match store.try_acquire(record.clone()).unwrap_err() {
            PlangateError::StoreUnavailable { .. } => {}
            other => panic!("expected StoreUnavailable, got {other:?}"),
        }
        match store.list().unwrap_err() {
            PlangateError::StoreUnavailable { .. } => {}
            other => panic!("expected StoreUnavailable, got {other:?}"),
        }
        match store.get(record.key()).unwrap_err() {
            PlangateError::StoreUnavailable { .. } => {}
            other => panic!("expected StoreUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn scan_skips_foreign_files() {
        let temp = TempDir::new().unwrap();
        let store = FileLockStore::new(temp.path());
        let record = LockRecord::new(key("prod/vpc", "default"), 42, "alice");
        store.try_acquire(record).unwrap();

        fs::write(temp.path().join("locks").join("README"), b"not a lock").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
