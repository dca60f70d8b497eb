use crate::error::{PlangateError, Result};
use crate::locking::key::LockKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workspace used when a run does not name one explicitly.
pub const DEFAULT_WORKSPACE: &str = "default";

/// Version stamped into every persisted lock record. Other processes read
/// these records, so bump this only together with a migration.
const LOCK_RECORD_VERSION: u32 = 1;

/// A Terraform project: a directory within a repository. Since one
/// repository may contain many projects, the relative path is part of the
/// identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    /// Owner and repository name, e.g. `org/infra`.
    pub repo_full_name: String,
    /// Path to the project root relative to the repository root. `.` when
    /// the project is at the root. Never ends in `/`.
    pub path: String,
}

impl Project {
    /// Constructs a project, normalizing `path` so equal directories
    /// always compare equal (`""` and `./` become `.`, trailing slashes
    /// are stripped).
    pub fn new<R: Into<String>, P: Into<String>>(repo_full_name: R, path: P) -> Self {
        let mut path = path.into();
        if let Some(stripped) = path.strip_prefix("./") {
            path = stripped.to_string();
        }
        while path.ends_with('/') {
            path.pop();
        }
        if path.is_empty() {
            path = ".".to_string();
        }
        Self {
            repo_full_name: repo_full_name.into(),
            path,
        }
    }

    /// Derives the lock identity for this project in the given workspace.
    /// The artifact store derives the same key for plan files, so the two
    /// stores stay addressed consistently.
    pub fn lock_key(&self, workspace: &str) -> Result<LockKey> {
        LockKey::new(self.repo_full_name.clone(), self.path.clone(), workspace)
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repofullname={} path={}", self.repo_full_name, self.path)
    }
}

/// The persisted claim that a project+workspace is in use by a specific
/// pull request's automation run. Immutable once created; only ever
/// deleted, never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    key: LockKey,
    pull_request_number: u64,
    requested_by: String,
    created_at: DateTime<Utc>,
}

impl LockRecord {
    /// Builds a candidate record stamped with the current time.
    pub fn new<S: Into<String>>(key: LockKey, pull_request_number: u64, requested_by: S) -> Self {
        Self {
            key,
            pull_request_number,
            requested_by: requested_by.into(),
            created_at: Utc::now(),
        }
    }

    /// Overrides the creation timestamp. Mostly useful in tests.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn repository(&self) -> &str {
        self.key.repository()
    }

    pub fn path(&self) -> &str {
        self.key.path()
    }

    pub fn workspace(&self) -> &str {
        self.key.workspace()
    }

    pub fn pull_request_number(&self) -> u64 {
        self.pull_request_number
    }

    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Serializes the record into its versioned wire form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = LockRecordWire {
            version: LOCK_RECORD_VERSION,
            key: self.key.to_string(),
            repository: self.key.repository().to_string(),
            path: self.key.path().to_string(),
            workspace: self.key.workspace().to_string(),
            pull_request_number: self.pull_request_number,
            requested_by: self.requested_by.clone(),
            created_at: self.created_at,
        };
        serde_json::to_vec_pretty(&wire).map_err(|err| PlangateError::StoreUnavailable {
            details: format!("failed to serialize lock record: {err}"),
        })
    }

    /// Deserializes a stored record, verifying the version and that the
    /// stored key agrees with the key re-derived from the identity fields.
    /// Any disagreement is reported as corruption naming `key_hint`.
    pub fn decode(bytes: &[u8], key_hint: &str) -> Result<Self> {
        let corrupt = |details: String| PlangateError::CorruptRecord {
            key: key_hint.to_string(),
            details,
        };

        let wire: LockRecordWire =
            serde_json::from_slice(bytes).map_err(|err| corrupt(err.to_string()))?;

        if wire.version != LOCK_RECORD_VERSION {
            return Err(corrupt(format!(
                "unsupported record version {} (expected {})",
                wire.version, LOCK_RECORD_VERSION
            )));
        }

        let key = LockKey::new(wire.repository, wire.path, wire.workspace)
            .map_err(|err| corrupt(err.to_string()))?;
        if key.to_string() != wire.key {
            return Err(corrupt(format!(
                "stored key '{}' disagrees with identity fields '{key}'",
                wire.key
            )));
        }

        Ok(Self {
            key,
            pull_request_number: wire.pull_request_number,
            requested_by: wire.requested_by,
            created_at: wire.created_at,
        })
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is locked by PR #{} ({})",
            self.key, self.pull_request_number, self.requested_by
        )
    }
}

/// On-disk shape of a lock record. Field names are a persisted wire
/// format; keep them stable.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockRecordWire {
    version: u32,
    key: String,
    repository: String,
    path: String,
    workspace: String,
    pull_request_number: u64,
    requested_by: String,
    created_at: DateTime<Utc>,
}
