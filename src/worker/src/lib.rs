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

//! Worker side of search dispatch: decodes a plan from a Flight ticket,
//! binds it to locally held files, executes with pushdown filters, and
//! streams batches back under the request's deadline. Also hosts the
//! super-cluster gateway, which relays a request to this cluster's workers
//! over the same protocol.

pub mod config;
pub mod engine;
pub mod error;
pub mod flight;
pub mod gateway;
pub mod handler;
pub mod index;
pub mod server;
pub mod store;

pub use config::WorkerConfig;
pub use engine::{BoundScan, MemoryScanEngine, ScanEngine, ScanEngineRef, TIMESTAMP_COLUMN};
pub use error::{Error, Result};
pub use gateway::{FileCatalog, FileCatalogRef, StaticFileCatalog, SuperClusterGateway};
pub use handler::{ScanStats, SearchHandler, SearchState};
pub use index::{IndexReader, IndexReaderRef, MemoryIndexReader, NoopIndexReader};
pub use server::{build_server, WorkerServer};
pub use store::{FileStore, FileStoreRef, MemoryFileStore};
