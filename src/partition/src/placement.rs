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

use api::v1::IdxFileName;

use crate::file::FileKey;
use crate::peer::Peer;

/// Placement seam: which worker currently owns a file.
///
/// Implementations are expected to be snapshots, so that assigning the same
/// file set twice against the same snapshot reproduces the same partitioning.
pub trait Placement: Send + Sync {
    fn owner_of(&self, file_id: i64) -> Option<&Peer>;
}

/// A fixed file-to-worker mapping, the common case when the coordinator has
/// just fetched the topology for a query.
#[derive(Clone, Debug, Default)]
pub struct StaticPlacement {
    owners: HashMap<i64, Peer>,
}

impl StaticPlacement {
    pub fn new(owners: HashMap<i64, Peer>) -> Self {
        Self { owners }
    }

    /// Assigns every file to the peer at `file.id % peers.len()`, a cheap
    /// deterministic spread for tests and single-cluster demos. With no
    /// peers the placement is empty and every file is unplaced.
    pub fn round_robin(file_ids: impl IntoIterator<Item = i64>, peers: &[Peer]) -> Self {
        if peers.is_empty() {
            return Self::default();
        }
        let owners = file_ids
            .into_iter()
            .map(|id| (id, peers[(id as usize) % peers.len()].clone()))
            .collect();
        Self { owners }
    }
}

impl Placement for StaticPlacement {
    fn owner_of(&self, file_id: i64) -> Option<&Peer> {
        self.owners.get(&file_id)
    }
}

/// Index-format seam: resolves the inverted index file backing a data file.
/// The returned name is treated as an opaque identifier by the protocol.
pub trait IndexResolver: Send + Sync {
    fn resolve(&self, file: &FileKey) -> Option<IdxFileName>;
}

/// Derives the index file name by swapping the data file extension, the
/// convention used by the on-disk layout. Files without an index resolve to
/// `None` regardless of name.
#[derive(Clone, Debug, Default)]
pub struct ExtensionIndexResolver;

impl IndexResolver for ExtensionIndexResolver {
    fn resolve(&self, file: &FileKey) -> Option<IdxFileName> {
        if !file.has_index() {
            return None;
        }
        let name = match file.key.rsplit_once('.') {
            Some((stem, _ext)) => format!("{stem}.idx"),
            None => format!("{}.idx", file.key),
        };
        Some(IdxFileName { name })
    }
}

#[cfg(test)]
mod tests {
    use crate::file::FileMeta;

    use super::*;

    #[test]
    fn test_round_robin_without_peers_places_nothing() {
        let placement = StaticPlacement::round_robin(0..4, &[]);
        assert!(placement.owner_of(0).is_none());
    }

    #[test]
    fn test_extension_resolver() {
        let resolver = ExtensionIndexResolver;

        let mut file = FileKey::new(1, "files/logs/0001.parquet");
        assert_eq!(resolver.resolve(&file), None);

        file.meta = FileMeta {
            index_size: 128,
            ..Default::default()
        };
        assert_eq!(
            resolver.resolve(&file).unwrap().name,
            "files/logs/0001.idx"
        );
    }
}
