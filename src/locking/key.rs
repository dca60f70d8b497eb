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

use crate::error::{PlangateError, Result};
use sha2::{Digest, Sha256};
use std::fmt;

/// Composite identity of a lock: the (repository, path, workspace) triple
/// that must never run more than one plan/apply at a time.
///
/// The collapsed string form (`Display`) is the uniqueness boundary the
/// backing store enforces and is persisted inside every record, so its
/// format is a wire contract: `{repository}/{path}/{workspace}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    repository: String,
    path: String,
    workspace: String,
}

impl LockKey {
    /// Builds a key from its parts, rejecting malformed identity inputs
    /// before any store I/O happens.
    pub fn new<R, P, W>(repository: R, path: P, workspace: W) -> Result<Self>
    where
        R: Into<String>,
        P: Into<String>,
        W: Into<String>,
    {
        let repository = repository.into();
        let path = path.into();
        let workspace = workspace.into();

        validate_repository(&repository)?;
        validate_path(&path)?;
        validate_workspace(&workspace)?;

        Ok(Self {
            repository,
            path,
            workspace,
        })
    }

    /// Repository full name, e.g. `owner/repo`.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Project directory relative to the repository root. `.` means the
    /// repository root itself.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Terraform workspace name.
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// Hex SHA-256 of the collapsed key, used as the on-disk file name by
    /// the filesystem adapter. Distinct keys never map to the same digest,
    /// which a lossy slug of the raw segments could not guarantee.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.repository, self.path, self.workspace)
    }
}

/// A repository full name has at least an owner and a name, with no empty
/// or relative segments.
pub(crate) fn validate_repository(repository: &str) -> Result<()> {
    let segments: Vec<&str> = repository.split('/').collect();
    if segments.len() < 2 {
        return Err(PlangateError::InvalidIdentity(format!(
            "repository '{repository}' is not in 'owner/repo' form"
        )));
    }
    for segment in segments {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(PlangateError::InvalidIdentity(format!(
                "repository '{repository}' contains an invalid segment"
            )));
        }
    }
    if repository.contains('\\') {
        return Err(PlangateError::InvalidIdentity(format!(
            "repository '{repository}' contains a backslash"
        )));
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<()> {
    if path == "." {
        return Ok(());
    }
    if path.is_empty() {
        return Err(PlangateError::InvalidIdentity(
            "project path must not be empty; use '.' for the repository root".to_string(),
        ));
    }
    if path.contains('\\') {
        return Err(PlangateError::InvalidIdentity(format!(
            "project path '{path}' contains a backslash"
        )));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(PlangateError::InvalidIdentity(format!(
                "project path '{path}' is not a clean relative path"
            )));
        }
    }
    Ok(())
}

fn validate_workspace(workspace: &str) -> Result<()> {
    if workspace.is_empty() {
        return Err(PlangateError::InvalidIdentity(
            "workspace name must not be empty".to_string(),
        ));
    }
    if workspace.contains('/') || workspace.contains('\\') {
        return Err(PlangateError::InvalidIdentity(format!(
            "workspace '{workspace}' contains a path separator"
        )));
    }
    Ok(())
}
