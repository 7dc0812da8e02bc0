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

use std::sync::Arc;
use std::time::Duration;

use api::v1::SearchRequest;
use arrow::record_batch::RecordBatch;
use arrow_flight::error::FlightError;
use arrow_flight::Ticket;
use common_error::ext::{BoxedError, ErrorExt};
use common_grpc::flight::{decode_flight_stream, SendableBatchStream};
use common_telemetry::{debug, warn};
use partition::Peer;
use prost::Message;
use snafu::IntoError;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::error::{ConvertFlightDataSnafu, Error, Result};

/// One unit of dispatch: a request and the worker (or super-cluster gateway)
/// that owns its partition's data. The dispatcher treats both targets
/// identically.
#[derive(Clone, Debug)]
pub struct Dispatch {
    pub peer: Peer,
    pub request: SearchRequest,
}

/// What the dispatcher reports back per partition. Each partition emits zero
/// or more `Batch` events followed by exactly one terminal event.
#[derive(Debug)]
pub enum PartitionEvent {
    Batch {
        partition: u32,
        batch: RecordBatch,
    },
    Completed {
        partition: u32,
        batches: usize,
        rows: usize,
    },
    Failed {
        partition: u32,
        /// Transport-level failures are worth a retry by the caller; decode
        /// and validation failures are not.
        retriable: bool,
        error: BoxedError,
    },
    TimedOut {
        partition: u32,
    },
    Cancelled {
        partition: u32,
    },
}

impl PartitionEvent {
    pub fn partition(&self) -> u32 {
        match self {
            PartitionEvent::Batch { partition, .. }
            | PartitionEvent::Completed { partition, .. }
            | PartitionEvent::Failed { partition, .. }
            | PartitionEvent::TimedOut { partition }
            | PartitionEvent::Cancelled { partition } => *partition,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PartitionEvent::Batch { .. })
    }
}

/// Transport seam of the dispatcher. Production uses [FlightSearchCaller];
/// tests substitute a mock to exercise timeout and failure paths without a
/// server.
#[async_trait::async_trait]
pub trait SearchCaller: Send + Sync {
    async fn do_search(&self, peer: &Peer, request: SearchRequest) -> Result<SendableBatchStream>;
}

/// Sends a [SearchRequest] as a Flight `do_get` ticket and decodes the framed
/// response back into record batches.
#[derive(Clone, Debug, Default)]
pub struct FlightSearchCaller {
    client: Client,
}

impl FlightSearchCaller {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SearchCaller for FlightSearchCaller {
    async fn do_search(&self, peer: &Peer, request: SearchRequest) -> Result<SendableBatchStream> {
        let mut flight_client = self.client.make_flight_client(&peer.addr)?;
        let ticket = Ticket {
            ticket: request.encode_to_vec().into(),
        };
        let response = flight_client
            .do_get(ticket)
            .await
            .map_err(|status| Error::from_tonic_status(&peer.addr, status))?;

        let addr = peer.addr.clone();
        let stream = decode_flight_stream(response.into_inner()).map(move |item| {
            item.map_err(|e| match e {
                // A mid-stream status carries the worker-side failure.
                FlightError::Tonic(status) => {
                    BoxedError::new(Error::from_tonic_status(&addr, status))
                }
                other => BoxedError::new(
                    ConvertFlightDataSnafu.into_error(
                        common_grpc::error::ConvertFlightDataSnafu.into_error(other),
                    ),
                ),
            })
        });
        Ok(Box::pin(stream))
    }
}

const DEFAULT_EVENT_BUFFER: usize = 16;

/// Fans a query's requests out to their owning workers, one concurrent
/// streaming call per partition, each under its own hard deadline.
///
/// The dispatcher never retries; it reports which partitions failed and
/// whether a retry is worth attempting, and leaves the policy to the caller.
pub struct Dispatcher {
    caller: Arc<dyn SearchCaller>,
    event_buffer: usize,
}

impl Dispatcher {
    pub fn new(caller: Arc<dyn SearchCaller>) -> Self {
        Self {
            caller,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Starts all partition calls and returns the merged event stream.
    ///
    /// Events from different partitions interleave in arrival order; no
    /// ordering is guaranteed between partitions. The bounded channel exerts
    /// backpressure on every partition stream when the consumer lags.
    /// Cancelling `cancel` abandons all partitions still in flight.
    pub fn dispatch(
        &self,
        dispatches: Vec<Dispatch>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<PartitionEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        for dispatch in dispatches {
            let caller = self.caller.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            let _handle = tokio::spawn(run_partition(caller, dispatch, tx, cancel));
        }
        rx
    }
}

async fn run_partition(
    caller: Arc<dyn SearchCaller>,
    dispatch: Dispatch,
    tx: mpsc::Sender<PartitionEvent>,
    cancel: CancellationToken,
) {
    let partition = dispatch.request.partition;
    let trace_id = dispatch.request.trace_id.clone();
    let peer = dispatch.peer.clone();
    let budget = Duration::from_secs(dispatch.request.timeout.max(0) as u64);

    let event = tokio::select! {
        _ = cancel.cancelled() => PartitionEvent::Cancelled { partition },
        result = tokio::time::timeout(
            budget,
            stream_partition(caller, dispatch, partition, &tx),
        ) => match result {
            Err(_elapsed) => PartitionEvent::TimedOut { partition },
            Ok(Ok((batches, rows))) => PartitionEvent::Completed {
                partition,
                batches,
                rows,
            },
            Ok(Err(error)) => PartitionEvent::Failed {
                partition,
                retriable: error.status_code().is_retryable(),
                error,
            },
        },
    };

    match &event {
        PartitionEvent::Completed { batches, rows, .. } => {
            debug!(
                "[trace_id {trace_id}] partition {partition} on {peer} completed, \
                 {batches} batches, {rows} rows"
            );
        }
        PartitionEvent::Failed { error, retriable, .. } => {
            warn!(
                "[trace_id {trace_id}] partition {partition} on {peer} failed \
                 (retriable: {retriable}): {error}"
            );
        }
        PartitionEvent::TimedOut { .. } => {
            warn!("[trace_id {trace_id}] partition {partition} on {peer} timed out");
        }
        PartitionEvent::Cancelled { .. } => {
            debug!("[trace_id {trace_id}] partition {partition} on {peer} cancelled");
        }
        PartitionEvent::Batch { .. } => {}
    }

    // Receiver may have been dropped; nothing to report to then.
    let _ = tx.send(event).await;
}

async fn stream_partition(
    caller: Arc<dyn SearchCaller>,
    dispatch: Dispatch,
    partition: u32,
    tx: &mpsc::Sender<PartitionEvent>,
) -> std::result::Result<(usize, usize), BoxedError> {
    let mut stream = caller
        .do_search(&dispatch.peer, dispatch.request)
        .await
        .map_err(BoxedError::new)?;

    let mut batches = 0;
    let mut rows = 0;
    while let Some(item) = stream.next().await {
        let batch = item?;
        batches += 1;
        rows += batch.num_rows();
        if tx
            .send(PartitionEvent::Batch { partition, batch })
            .await
            .is_err()
        {
            break;
        }
    }
    Ok((batches, rows))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow_schema::{DataType, Field, Schema};
    use common_error::ext::PlainError;
    use common_error::status_code::StatusCode;

    use super::*;

    fn request(partition: u32, timeout: i64) -> SearchRequest {
        SearchRequest {
            trace_id: "q1".to_string(),
            partition,
            timeout,
            ..Default::default()
        }
    }

    fn dispatch(partition: u32, timeout: i64) -> Dispatch {
        Dispatch {
            peer: Peer::new(u64::from(partition), format!("127.0.0.1:{}", 4001 + partition)),
            request: request(partition, timeout),
        }
    }

    fn batch(values: Vec<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()
    }

    /// Per-partition canned behavior keyed by partition id.
    enum Behavior {
        Batches(Vec<RecordBatch>),
        Unavailable,
        Hang,
    }

    struct MockCaller {
        behaviors: std::collections::HashMap<u32, Behavior>,
    }

    #[async_trait::async_trait]
    impl SearchCaller for MockCaller {
        async fn do_search(
            &self,
            peer: &Peer,
            request: SearchRequest,
        ) -> Result<SendableBatchStream> {
            match self.behaviors.get(&request.partition).unwrap() {
                Behavior::Batches(batches) => {
                    let items: Vec<_> = batches.iter().cloned().map(Ok).collect();
                    Ok(Box::pin(futures::stream::iter(items)))
                }
                Behavior::Unavailable => Err(Error::from_tonic_status(
                    &peer.addr,
                    tonic::Status::unavailable("connection refused"),
                )),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    fn dispatcher(behaviors: Vec<(u32, Behavior)>) -> Dispatcher {
        Dispatcher::new(Arc::new(MockCaller {
            behaviors: behaviors.into_iter().collect(),
        }))
    }

    async fn collect_events(mut rx: mpsc::Receiver<PartitionEvent>) -> Vec<PartitionEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_all_partitions_complete() {
        let dispatcher = dispatcher(vec![
            (0, Behavior::Batches(vec![batch(vec![1, 2])])),
            (1, Behavior::Batches(vec![batch(vec![3])])),
        ]);
        let rx = dispatcher.dispatch(
            vec![dispatch(0, 30), dispatch(1, 30)],
            CancellationToken::new(),
        );
        let events = collect_events(rx).await;

        let mut total_rows = 0;
        let mut completed = 0;
        for event in &events {
            match event {
                PartitionEvent::Batch { batch, .. } => total_rows += batch.num_rows(),
                PartitionEvent::Completed { .. } => completed += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(total_rows, 3);
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn test_failed_partition_does_not_fail_siblings() {
        let dispatcher = dispatcher(vec![
            (0, Behavior::Batches(vec![batch(vec![1])])),
            (1, Behavior::Unavailable),
        ]);
        let rx = dispatcher.dispatch(
            vec![dispatch(0, 30), dispatch(1, 30)],
            CancellationToken::new(),
        );
        let events = collect_events(rx).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, PartitionEvent::Completed { partition: 0, .. })));
        let failed = events
            .iter()
            .find(|e| matches!(e, PartitionEvent::Failed { partition: 1, .. }))
            .unwrap();
        let PartitionEvent::Failed { retriable, .. } = failed else {
            unreachable!()
        };
        assert!(*retriable);
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let dispatcher = dispatcher(vec![(0, Behavior::Hang)]);
        let rx = dispatcher.dispatch(vec![dispatch(0, 1)], CancellationToken::new());
        let events = collect_events(rx).await;
        assert!(matches!(
            events.as_slice(),
            [PartitionEvent::TimedOut { partition: 0 }]
        ));
    }

    #[tokio::test]
    async fn test_cancellation_abandons_in_flight_partitions() {
        let dispatcher = dispatcher(vec![(0, Behavior::Hang), (1, Behavior::Hang)]);
        let cancel = CancellationToken::new();
        let rx = dispatcher.dispatch(vec![dispatch(0, 3600), dispatch(1, 3600)], cancel.clone());
        cancel.cancel();
        let events = collect_events(rx).await;
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, PartitionEvent::Cancelled { .. })));
    }

    #[test]
    fn test_retriable_classification() {
        let unavailable = BoxedError::new(PlainError::new(
            "gone".to_string(),
            StatusCode::WorkerUnavailable,
        ));
        assert!(unavailable.status_code().is_retryable());

        let decode = BoxedError::new(PlainError::new(
            "bad plan".to_string(),
            StatusCode::PlanDecode,
        ));
        assert!(!decode.status_code().is_retryable());
    }
}
