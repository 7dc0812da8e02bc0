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

//! Helpers for end-to-end tests: real worker servers on ephemeral ports,
//! talked to through the real dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use api::v1::{ColumnDataType, ColumnSchema, ScanNode};
use arrow::array::{StringArray, TimestampMicrosecondArray};
use arrow::record_batch::RecordBatch;
use client::{Client, Dispatcher, FlightSearchCaller};
use common_grpc::channel_manager::ChannelManager;
use partition::{
    ExtensionIndexResolver, FileKey, PartitionAssigner, Peer, Placement, StaticPlacement,
};
use worker::{
    build_server, MemoryFileStore, MemoryScanEngine, NoopIndexReader, StaticFileCatalog,
    SuperClusterGateway, WorkerConfig, WorkerServer, TIMESTAMP_COLUMN,
};

pub fn test_scan_node() -> ScanNode {
    ScanNode {
        name: "logs".to_string(),
        schema: vec![
            ColumnSchema::new(TIMESTAMP_COLUMN, ColumnDataType::TimestampMicrosecond, false),
            ColumnSchema::new("region", ColumnDataType::String, true),
            ColumnSchema::new("message", ColumnDataType::String, true),
        ],
        projection: None,
        filters: vec![],
        limit: None,
        sorted_by_time: true,
    }
}

pub fn log_batch(rows: &[(i64, &str, &str)]) -> RecordBatch {
    let schema = plan_codec::full_arrow_schema(&test_scan_node()).unwrap();
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(TimestampMicrosecondArray::from(
                rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(|r| r.2).collect::<Vec<_>>(),
            )),
        ],
    )
    .unwrap()
}

pub struct TestWorker {
    pub peer: Peer,
    pub addr: SocketAddr,
    server: WorkerServer,
}

impl TestWorker {
    pub async fn shutdown(&self) {
        self.server.shutdown().await;
    }
}

/// Starts a worker holding `files` in memory, bound to an ephemeral port.
pub async fn start_worker(node_id: u64, files: Vec<(FileKey, Vec<RecordBatch>)>) -> TestWorker {
    let mut store = MemoryFileStore::new();
    for (file, batches) in files {
        store.put(file, batches);
    }
    let store = Arc::new(store);
    let engine = Arc::new(MemoryScanEngine::new(store.clone()));
    let config = WorkerConfig {
        node_id,
        ..Default::default()
    };
    let server = build_server(config, store, engine, Arc::new(NoopIndexReader), None);
    let addr = server
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    TestWorker {
        peer: Peer::new(node_id, addr.to_string()),
        addr,
        server,
    }
}

/// Starts a gateway node fronting `placement` over already-running workers.
/// It holds no data itself; super-cluster requests are relayed.
pub async fn start_gateway(
    node_id: u64,
    catalog_files: Vec<FileKey>,
    placement: StaticPlacement,
) -> TestWorker {
    let store = Arc::new(MemoryFileStore::new());
    let engine = Arc::new(MemoryScanEngine::new(store.clone()));
    let gateway = SuperClusterGateway::new(
        Arc::new(StaticFileCatalog::new(catalog_files)),
        Arc::new(placement) as Arc<dyn Placement>,
        Arc::new(ExtensionIndexResolver),
        PartitionAssigner::default(),
        new_dispatcher(),
    );
    let config = WorkerConfig {
        node_id,
        ..Default::default()
    };
    let server = build_server(
        config,
        store,
        engine,
        Arc::new(NoopIndexReader),
        Some(Arc::new(gateway)),
    );
    let addr = server
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    TestWorker {
        peer: Peer::new(node_id, addr.to_string()),
        addr,
        server,
    }
}

pub fn new_dispatcher() -> Dispatcher {
    let client = Client::new(ChannelManager::new());
    Dispatcher::new(Arc::new(FlightSearchCaller::new(client)))
}
