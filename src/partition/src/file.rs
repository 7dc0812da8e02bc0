// Copyright 2023 Greptime Team
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

use serde::{Deserialize, Serialize};

/// A candidate data file chosen by planning, identified by id within its
/// org/stream scope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileKey {
    pub id: i64,
    /// Object storage key of the file.
    pub key: String,
    #[serde(default)]
    pub meta: FileMeta,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Smallest row timestamp in the file, microsecond epoch.
    pub min_ts: i64,
    /// Largest row timestamp in the file, microsecond epoch.
    pub max_ts: i64,
    pub records: i64,
    pub original_size: i64,
    /// Size of the file's inverted index, 0 when the file has none.
    pub index_size: i64,
}

impl FileKey {
    pub fn new(id: i64, key: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            meta: FileMeta::default(),
        }
    }

    /// Whether an inverted index file exists alongside this data file.
    pub fn has_index(&self) -> bool {
        self.meta.index_size > 0
    }
}
