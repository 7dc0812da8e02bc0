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
use std::time::{Duration, Instant};

use api::v1::SearchRequest;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use async_stream::try_stream;
use client::{Dispatch, Dispatcher, PartitionEvent};
use common_error::ext::BoxedError;
use common_grpc::flight::SendableBatchStream;
use common_telemetry::debug;
use partition::{FileKey, IndexResolver, PartitionAssigner, Placement};
use plan_codec::PlanPayload;
use snafu::{ensure, IntoError, ResultExt};
use tokio_util::sync::CancellationToken;

use crate::error::{
    DecodePlanSnafu, FilesNotLocalSnafu, RelayPartitionSnafu, RequestCancelledSnafu,
    RequestTimedOutSnafu, Result, UnsupportedPlanVersionSnafu,
};

/// Cluster-wide file metadata as the gateway sees it. Unlike a worker's file
/// store this holds no data, only enough to re-partition.
pub trait FileCatalog: Send + Sync {
    fn lookup(&self, file_id: i64) -> Option<FileKey>;
}

pub type FileCatalogRef = Arc<dyn FileCatalog>;

#[derive(Clone, Debug, Default)]
pub struct StaticFileCatalog {
    files: HashMap<i64, FileKey>,
}

impl StaticFileCatalog {
    pub fn new(files: impl IntoIterator<Item = FileKey>) -> Self {
        Self {
            files: files.into_iter().map(|f| (f.id, f)).collect(),
        }
    }
}

impl FileCatalog for StaticFileCatalog {
    fn lookup(&self, file_id: i64) -> Option<FileKey> {
        self.files.get(&file_id).cloned()
    }
}

/// Receives a super-cluster request and fans it out to this cluster's own
/// workers with the same protocol, relaying the combined stream back. To the
/// remote dispatcher the gateway is indistinguishable from a single worker.
pub struct SuperClusterGateway {
    catalog: FileCatalogRef,
    placement: Arc<dyn Placement>,
    index_resolver: Arc<dyn IndexResolver>,
    assigner: PartitionAssigner,
    dispatcher: Dispatcher,
}

impl SuperClusterGateway {
    pub fn new(
        catalog: FileCatalogRef,
        placement: Arc<dyn Placement>,
        index_resolver: Arc<dyn IndexResolver>,
        assigner: PartitionAssigner,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            catalog,
            placement,
            index_resolver,
            assigner,
            dispatcher,
        }
    }

    /// Re-partitions the request's file set over the local cluster topology
    /// and dispatches one sub-request per partition. The relayed stream fails
    /// on the first failed partition and cancels the rest; partial relay
    /// results are never presented as success.
    pub async fn relay(
        &self,
        request: SearchRequest,
        cancel: CancellationToken,
    ) -> Result<(SchemaRef, SendableBatchStream)> {
        let started = Instant::now();
        let node = match plan_codec::decode(&request.plan).context(DecodePlanSnafu)? {
            PlanPayload::V1(node) => node,
            PlanPayload::Unknown { version, .. } => {
                return UnsupportedPlanVersionSnafu { version }.fail();
            }
        };
        let schema = plan_codec::output_arrow_schema(&node).context(DecodePlanSnafu)?;

        let mut files = Vec::with_capacity(request.file_id_list.len());
        let mut missing = Vec::new();
        for file_id in &request.file_id_list {
            match self.catalog.lookup(*file_id) {
                Some(file) => files.push(file),
                None => missing.push(*file_id),
            }
        }
        ensure!(missing.is_empty(), FilesNotLocalSnafu { file_ids: missing });

        let map = self
            .assigner
            .assign(
                files,
                self.placement.as_ref(),
                request.use_inverted_index,
                self.index_resolver.as_ref(),
            )
            .map_err(BoxedError::new)
            .with_context(|_| RelayPartitionSnafu {
                partition: request.partition,
            })?;

        debug!(
            "[trace_id {}] gateway fanning partition {} out to {} local partitions",
            request.trace_id,
            request.partition,
            map.len()
        );

        let sub_timeout = remaining_timeout(request.timeout, started.elapsed());
        let dispatches = map
            .into_entries()
            .into_iter()
            .map(|entry| {
                let mut sub = request.clone();
                sub.partition = entry.partition;
                sub.file_id_list = entry.files.iter().map(|f| f.id).collect();
                sub.idx_file_list = entry.idx_files.clone();
                // Sub-requests are ordinary worker requests; a nested gateway
                // target would set the flag again for its own hop.
                sub.is_super_cluster = false;
                // A relayed partition gets the hop's remaining budget only.
                sub.timeout = sub_timeout;
                Dispatch {
                    peer: entry.peer,
                    request: sub,
                }
            })
            .collect();

        let child = cancel.child_token();
        let mut rx = self.dispatcher.dispatch(dispatches, child.clone());
        let timeout = request.timeout;
        let stream = try_stream! {
            while let Some(event) = rx.recv().await {
                match event {
                    PartitionEvent::Batch { batch, .. } => yield batch,
                    PartitionEvent::Completed { .. } => {}
                    PartitionEvent::Failed { partition, error, .. } => {
                        child.cancel();
                        Err::<RecordBatch, _>(BoxedError::new(
                            RelayPartitionSnafu { partition }.into_error(error),
                        ))?;
                        break;
                    }
                    PartitionEvent::TimedOut { .. } => {
                        child.cancel();
                        Err::<RecordBatch, _>(BoxedError::new(
                            RequestTimedOutSnafu { timeout }.build(),
                        ))?;
                        break;
                    }
                    PartitionEvent::Cancelled { .. } => {
                        Err::<RecordBatch, _>(BoxedError::new(RequestCancelledSnafu.build()))?;
                        break;
                    }
                }
            }
        };
        Ok((schema, Box::pin(stream)))
    }
}

/// Timeout budget left for sub-requests after `elapsed` has been spent on
/// this hop, floored at one second so the sub-request stays valid.
fn remaining_timeout(timeout: i64, elapsed: Duration) -> i64 {
    (timeout - elapsed.as_secs() as i64).max(1)
}
