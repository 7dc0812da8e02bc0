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

//! Splits a query's candidate file set into per-worker partitions based on a
//! placement snapshot, so each worker only scans files it holds locally.

pub mod assigner;
pub mod error;
pub mod file;
pub mod peer;
pub mod placement;

pub use assigner::{PartitionAssigner, PartitionEntry, PartitionMap};
pub use file::{FileKey, FileMeta};
pub use peer::Peer;
pub use placement::{ExtensionIndexResolver, IndexResolver, Placement, StaticPlacement};
