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

use std::collections::HashMap;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use common_error::ext::BoxedError;
use partition::FileKey;

/// Worker-local file access. The assigner guarantees every file it routes
/// here is locally present; a miss indicates a stale topology snapshot
/// upstream, not a normal condition.
pub trait FileStore: Send + Sync {
    fn lookup(&self, file_id: i64) -> Option<FileKey>;

    /// Reads a file's rows as record batches. Files are read-only from the
    /// protocol's perspective.
    fn read(&self, file: &FileKey) -> std::result::Result<Vec<RecordBatch>, BoxedError>;
}

pub type FileStoreRef = Arc<dyn FileStore>;

/// In-memory file store, the backing of the memory scan engine.
#[derive(Default)]
pub struct MemoryFileStore {
    files: HashMap<i64, (FileKey, Vec<RecordBatch>)>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, file: FileKey, batches: Vec<RecordBatch>) {
        self.files.insert(file.id, (file, batches));
    }

    pub fn with_file(mut self, file: FileKey, batches: Vec<RecordBatch>) -> Self {
        self.put(file, batches);
        self
    }
}

impl FileStore for MemoryFileStore {
    fn lookup(&self, file_id: i64) -> Option<FileKey> {
        self.files.get(&file_id).map(|(file, _)| file.clone())
    }

    fn read(&self, file: &FileKey) -> std::result::Result<Vec<RecordBatch>, BoxedError> {
        Ok(self
            .files
            .get(&file.id)
            .map(|(_, batches)| batches.clone())
            .unwrap_or_default())
    }
}
