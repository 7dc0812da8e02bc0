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

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use api::v1::IdxFileName;
use common_error::ext::BoxedError;

/// Inverted index seam. The index is additive: it can only shrink the file
/// set a scan must touch, never change results, so the handler falls back to
/// a full scan whenever the index cannot answer.
pub trait IndexReader: Send + Sync {
    /// Returns the ids of indexed files that may contain rows matching all
    /// `tokens`, or `None` when the index cannot answer for these files.
    fn prune(
        &self,
        idx_files: &[IdxFileName],
        tokens: &[String],
    ) -> std::result::Result<Option<HashSet<i64>>, BoxedError>;
}

pub type IndexReaderRef = Arc<dyn IndexReader>;

/// An index reader that never answers; scans always run unpruned.
#[derive(Clone, Debug, Default)]
pub struct NoopIndexReader;

impl IndexReader for NoopIndexReader {
    fn prune(
        &self,
        _idx_files: &[IdxFileName],
        _tokens: &[String],
    ) -> std::result::Result<Option<HashSet<i64>>, BoxedError> {
        Ok(None)
    }
}

/// In-memory postings, token to file ids. Authoritative for the files it
/// indexes: a token with no posting matches no indexed file.
#[derive(Clone, Debug, Default)]
pub struct MemoryIndexReader {
    postings: HashMap<String, HashSet<i64>>,
}

impl MemoryIndexReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posting(mut self, token: impl Into<String>, file_ids: &[i64]) -> Self {
        self.postings
            .entry(token.into().to_lowercase())
            .or_default()
            .extend(file_ids);
        self
    }
}

impl IndexReader for MemoryIndexReader {
    fn prune(
        &self,
        idx_files: &[IdxFileName],
        tokens: &[String],
    ) -> std::result::Result<Option<HashSet<i64>>, BoxedError> {
        if idx_files.is_empty() || tokens.is_empty() {
            return Ok(None);
        }
        let mut result: Option<HashSet<i64>> = None;
        for token in tokens {
            let posting = self
                .postings
                .get(&token.to_lowercase())
                .cloned()
                .unwrap_or_default();
            result = Some(match result {
                None => posting,
                Some(acc) => acc.intersection(&posting).copied().collect(),
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(name: &str) -> IdxFileName {
        IdxFileName {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_prune_intersects_tokens() {
        let reader = MemoryIndexReader::new()
            .with_posting("error", &[10, 11])
            .with_posting("timeout", &[11, 12]);
        let pruned = reader
            .prune(
                &[idx("a.idx")],
                &["error".to_string(), "timeout".to_string()],
            )
            .unwrap()
            .unwrap();
        assert_eq!(pruned, HashSet::from([11]));
    }

    #[test]
    fn test_no_tokens_means_no_answer() {
        let reader = MemoryIndexReader::new().with_posting("error", &[10]);
        assert_eq!(reader.prune(&[idx("a.idx")], &[]).unwrap(), None);
    }
}
