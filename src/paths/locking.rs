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

use crate::locking::key::LockKey;
use std::path::{Path, PathBuf};

const LOCKS_DIR: &str = "locks";
pub(crate) const LOCK_FILE_EXTENSION: &str = "lock";

pub fn locks_root(data_dir: &Path) -> PathBuf {
    data_dir.join(LOCKS_DIR)
}

/// One flat file per held lock, named by the key digest. The digest keeps
/// the mapping bijective for every valid key, including unicode segments
/// and path separators the raw key contains.
pub fn lock_file_path(data_dir: &Path, key: &LockKey) -> PathBuf {
    locks_root(data_dir).join(format!("{}.{LOCK_FILE_EXTENSION}", key.digest()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_root_joins_directory() {
        let data_dir = Path::new("/var/lib/plangate");
        assert_eq!(locks_root(data_dir), Path::new("/var/lib/plangate/locks"));
    }

    #[test]
    fn lock_file_path_is_deterministic() {
        let data_dir = Path::new("/var/lib/plangate");
        let key = LockKey::new("org/infra", "prod/vpc", "default").unwrap();
        let first = lock_file_path(data_dir, &key);
        let second = lock_file_path(data_dir, &key);
        assert_eq!(first, second);
        assert!(first.starts_with("/var/lib/plangate/locks"));
        assert_eq!(first.extension().and_then(|e| e.to_str()), Some("lock"));
    }

    #[test]
    fn distinct_keys_use_distinct_files() {
        let data_dir = Path::new("/var/lib/plangate");
        let first = LockKey::new("org/infra", "prod", "default").unwrap();
        let second = LockKey::new("org/infra", ".", "default").unwrap();
        assert_ne!(
            lock_file_path(data_dir, &first),
            lock_file_path(data_dir, &second)
        );
    }
}
