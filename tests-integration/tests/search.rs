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

use arrow::array::StringArray;
use arrow::record_batch::RecordBatch;
use client::{Dispatch, PartitionStatus, QuerySession, SearchRequestBuilder};
use common_telemetry::logging::init_default_ut_logging;
use partition::{FileKey, PartitionEntry, Peer, StaticPlacement};
use tests_integration::{log_batch, new_dispatcher, start_worker, test_scan_node};
use tokio_util::sync::CancellationToken;

fn file(id: i64) -> FileKey {
    FileKey::new(id, format!("files/{id:04}.parquet"))
}

fn entry(partition: u32, peer: &Peer, files: Vec<FileKey>) -> PartitionEntry {
    PartitionEntry {
        partition,
        peer: peer.clone(),
        files,
        idx_files: vec![],
    }
}

fn messages(batches: &[RecordBatch]) -> Vec<String> {
    let mut out: Vec<String> = batches
        .iter()
        .flat_map(|b| {
            b.column_by_name("message")
                .unwrap()
                .as_any()
                .downcast_ref::<StringArray>()
                .unwrap()
                .iter()
                .map(|v| v.unwrap().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    out.sort();
    out
}

#[tokio::test]
async fn test_single_partition_scan() {
    init_default_ut_logging();

    let worker = start_worker(
        1,
        vec![
            (file(10), vec![log_batch(&[(1500, "us", "in-window")])]),
            (
                file(11),
                vec![log_batch(&[(500, "us", "too-early"), (1999, "us", "late-hit")])],
            ),
        ],
    )
    .await;

    let node = test_scan_node();
    let builder = SearchRequestBuilder::new("q1", "default", "logs", &node)
        .time_window(1000, 2000)
        .timeout_secs(30);
    let request = builder
        .build(&entry(0, &worker.peer, vec![file(10), file(11)]))
        .unwrap();

    let dispatcher = new_dispatcher();
    let rx = dispatcher.dispatch(
        vec![Dispatch {
            peer: worker.peer.clone(),
            request,
        }],
        CancellationToken::new(),
    );
    let mut session = QuerySession::new("q1", 1, true);
    let batches = session.collect(rx).await;

    assert!(session.succeeded());
    assert_eq!(messages(&batches), vec!["in-window", "late-hit"]);
    worker.shutdown().await;
}

#[tokio::test]
async fn test_partitioning_is_observationally_transparent() {
    init_default_ut_logging();

    let data_10 = vec![log_batch(&[(1100, "us", "a"), (1200, "eu", "b")])];
    let data_11 = vec![log_batch(&[(1300, "us", "c")])];

    // Same file set once on a single worker, once split across two.
    let single = start_worker(1, vec![(file(10), data_10.clone()), (file(11), data_11.clone())])
        .await;
    let left = start_worker(2, vec![(file(10), data_10)]).await;
    let right = start_worker(3, vec![(file(11), data_11)]).await;

    let node = test_scan_node();
    let builder = SearchRequestBuilder::new("q2", "default", "logs", &node)
        .time_window(1000, 2000)
        .timeout_secs(30);
    let dispatcher = new_dispatcher();

    let rx = dispatcher.dispatch(
        vec![Dispatch {
            peer: single.peer.clone(),
            request: builder
                .build(&entry(0, &single.peer, vec![file(10), file(11)]))
                .unwrap(),
        }],
        CancellationToken::new(),
    );
    let mut session = QuerySession::new("q2", 1, true);
    let combined_single = messages(&session.collect(rx).await);
    assert!(session.succeeded());

    let rx = dispatcher.dispatch(
        vec![
            Dispatch {
                peer: left.peer.clone(),
                request: builder.build(&entry(0, &left.peer, vec![file(10)])).unwrap(),
            },
            Dispatch {
                peer: right.peer.clone(),
                request: builder.build(&entry(1, &right.peer, vec![file(11)])).unwrap(),
            },
        ],
        CancellationToken::new(),
    );
    let mut session = QuerySession::new("q2", 2, true);
    let combined_split = messages(&session.collect(rx).await);
    assert!(session.succeeded());

    assert_eq!(combined_single, combined_split);

    single.shutdown().await;
    left.shutdown().await;
    right.shutdown().await;
}

#[tokio::test]
async fn test_missing_file_fails_only_its_partition() {
    init_default_ut_logging();

    let worker = start_worker(1, vec![(file(10), vec![log_batch(&[(1, "us", "ok")])])]).await;

    let node = test_scan_node();
    let builder = SearchRequestBuilder::new("q3", "default", "logs", &node).timeout_secs(30);
    let dispatcher = new_dispatcher();

    let rx = dispatcher.dispatch(
        vec![
            Dispatch {
                peer: worker.peer.clone(),
                request: builder.build(&entry(0, &worker.peer, vec![file(10)])).unwrap(),
            },
            Dispatch {
                peer: worker.peer.clone(),
                // File 99 is not on the worker: a topology staleness bug.
                request: builder.build(&entry(1, &worker.peer, vec![file(99)])).unwrap(),
            },
        ],
        CancellationToken::new(),
    );
    let mut session = QuerySession::new("q3", 2, true);
    session.collect(rx).await;

    assert!(!session.succeeded());
    assert_eq!(session.status(0), Some(PartitionStatus::Completed));
    // Stale placement is not retriable as-is.
    assert_eq!(
        session.status(1),
        Some(PartitionStatus::Failed { retriable: false })
    );
    worker.shutdown().await;
}

#[tokio::test]
async fn test_super_cluster_gateway_is_transparent() {
    init_default_ut_logging();

    let left = start_worker(1, vec![(file(10), vec![log_batch(&[(1100, "us", "remote-a")])])])
        .await;
    let right = start_worker(2, vec![(file(11), vec![log_batch(&[(1200, "us", "remote-b")])])])
        .await;

    let placement = StaticPlacement::new(
        [(10, left.peer.clone()), (11, right.peer.clone())]
            .into_iter()
            .collect(),
    );
    let gateway =
        tests_integration::start_gateway(3, vec![file(10), file(11)], placement).await;

    // One dispatch to the gateway, exactly as if it were a single worker.
    let node = test_scan_node();
    let request = SearchRequestBuilder::new("q4", "default", "logs", &node)
        .time_window(1000, 2000)
        .timeout_secs(30)
        .super_cluster(true)
        .build(&entry(0, &gateway.peer, vec![file(10), file(11)]))
        .unwrap();

    let dispatcher = new_dispatcher();
    let rx = dispatcher.dispatch(
        vec![Dispatch {
            peer: gateway.peer.clone(),
            request,
        }],
        CancellationToken::new(),
    );
    let mut session = QuerySession::new("q4", 1, true);
    let batches = session.collect(rx).await;

    assert!(session.succeeded());
    assert_eq!(messages(&batches), vec!["remote-a", "remote-b"]);

    gateway.shutdown().await;
    left.shutdown().await;
    right.shutdown().await;
}
