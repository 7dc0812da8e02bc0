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

use std::time::{Duration, Instant};

use api::v1::SearchRequest;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use async_stream::try_stream;
use common_error::ext::BoxedError;
use common_grpc::flight::SendableBatchStream;
use common_telemetry::{debug, warn};
use partition::FileKey;
use plan_codec::PlanPayload;
use snafu::{ensure, ResultExt};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::engine::{BoundScan, ScanEngineRef};
use crate::error::{
    DecodePlanSnafu, ExecuteScanSnafu, FilesNotLocalSnafu, RequestCancelledSnafu,
    RequestTimedOutSnafu, Result, UnsupportedPlanVersionSnafu,
};
use crate::index::IndexReaderRef;
use crate::store::FileStoreRef;

/// Per-request lifecycle. Transitions are strictly ordered up to `Streaming`;
/// every state can fall to one of the terminal states on the right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchState {
    Received,
    Decoding,
    Bound,
    Executing,
    Streaming,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

/// Per-request scan accounting, filled in while binding files and reported
/// in the terminal log line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub files: usize,
    pub records: i64,
    pub original_size: i64,
    pub index_size: i64,
    /// Wall time spent in the inverted-index lookup.
    pub idx_took: Duration,
}

impl ScanStats {
    fn observe(&mut self, file: &FileKey) {
        self.files += 1;
        self.records += file.meta.records;
        self.original_size += file.meta.original_size;
        self.index_size += file.meta.index_size;
    }
}

struct RequestTracker {
    trace_id: String,
    partition: u32,
    state: SearchState,
    started: Instant,
}

impl RequestTracker {
    fn new(request: &SearchRequest) -> Self {
        Self {
            trace_id: request.trace_id.clone(),
            partition: request.partition,
            state: SearchState::Received,
            started: Instant::now(),
        }
    }

    fn transition(&mut self, next: SearchState) {
        debug!(
            "[trace_id {}] partition {} {:?} -> {:?}, elapsed {:?}",
            self.trace_id,
            self.partition,
            self.state,
            next,
            self.started.elapsed()
        );
        self.state = next;
    }
}

/// Server-side request handling: decode the plan, bind it to local files,
/// execute, and stream results under the request's deadline.
pub struct SearchHandler {
    config: WorkerConfig,
    store: FileStoreRef,
    engine: ScanEngineRef,
    index: IndexReaderRef,
}

impl SearchHandler {
    pub fn new(
        config: WorkerConfig,
        store: FileStoreRef,
        engine: ScanEngineRef,
        index: IndexReaderRef,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            index,
        }
    }

    /// Runs a request up to the `Streaming` state. Failures before any batch
    /// is produced surface as an error here; failures mid-stream surface as
    /// an error item in the returned stream. `cancel` is observed at every
    /// state transition and between batches.
    pub async fn handle(
        &self,
        request: SearchRequest,
        cancel: CancellationToken,
    ) -> Result<(SchemaRef, SendableBatchStream)> {
        let mut tracker = RequestTracker::new(&request);
        let deadline = tracker.started + self.config.effective_timeout(request.timeout);

        tracker.transition(SearchState::Decoding);
        let node = match plan_codec::decode(&request.plan).context(DecodePlanSnafu)? {
            PlanPayload::V1(node) => node,
            PlanPayload::Unknown { version, .. } => {
                return UnsupportedPlanVersionSnafu { version }.fail();
            }
        };
        let schema = plan_codec::output_arrow_schema(&node).context(DecodePlanSnafu)?;

        check_budget(deadline, request.timeout, &cancel)?;
        tracker.transition(SearchState::Bound);
        let (files, stats) = self.bind_files(&request)?;

        check_budget(deadline, request.timeout, &cancel)?;
        tracker.transition(SearchState::Executing);
        let scan = BoundScan {
            node,
            files,
            start_time: request.start_time,
            end_time: request.end_time,
            equal_keys: request.equal_keys.clone(),
            match_all_keys: request.match_all_keys.clone(),
        };
        let inner = self
            .engine
            .scan(scan)
            .await
            .context(ExecuteScanSnafu)?;

        check_budget(deadline, request.timeout, &cancel)?;
        tracker.transition(SearchState::Streaming);
        let timeout = request.timeout;
        let stream = try_stream! {
            let mut inner = inner;
            let mut batches = 0_usize;
            let mut rows = 0_usize;
            loop {
                // The select arms only pick a branch; error propagation has
                // to happen out here where `?` is rewritten by the stream.
                let polled = tokio::select! {
                    _ = cancel.cancelled() => None,
                    next = tokio::time::timeout_at(deadline.into(), inner.next()) => Some(next),
                };
                let next = match polled {
                    None => {
                        tracker.transition(SearchState::Cancelled);
                        Err::<RecordBatch, _>(BoxedError::new(RequestCancelledSnafu.build()))?;
                        break;
                    }
                    Some(next) => next,
                };
                let item = match next {
                    Err(_elapsed) => {
                        // Dropping the inner stream here releases the scan.
                        tracker.transition(SearchState::TimedOut);
                        Err::<RecordBatch, _>(BoxedError::new(
                            RequestTimedOutSnafu { timeout }.build(),
                        ))?;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(item)) => item,
                };
                match item {
                    Ok(batch) => {
                        batches += 1;
                        rows += batch.num_rows();
                        yield batch;
                    }
                    Err(error) => {
                        tracker.transition(SearchState::Failed);
                        Err::<RecordBatch, _>(error)?;
                        break;
                    }
                }
            }
            tracker.transition(SearchState::Completed);
            debug!(
                "[trace_id {}] partition {} streamed {} batches, {} rows; scanned \
                 {} files, {} records, {} bytes data, {} bytes index, idx took {:?}",
                tracker.trace_id,
                tracker.partition,
                batches,
                rows,
                stats.files,
                stats.records,
                stats.original_size,
                stats.index_size,
                stats.idx_took
            );
        };
        Ok((schema, Box::pin(stream)))
    }

    /// Resolves the request's file ids against the local store, pruning with
    /// the inverted index when enabled. Missing files mean the coordinator's
    /// topology snapshot went stale.
    fn bind_files(&self, request: &SearchRequest) -> Result<(Vec<FileKey>, ScanStats)> {
        let mut files = Vec::with_capacity(request.file_id_list.len());
        let mut missing = Vec::new();
        for file_id in &request.file_id_list {
            match self.store.lookup(*file_id) {
                Some(file) => files.push(file),
                None => missing.push(*file_id),
            }
        }
        ensure!(missing.is_empty(), FilesNotLocalSnafu { file_ids: missing });

        let mut stats = ScanStats::default();
        if request.use_inverted_index && !request.idx_file_list.is_empty() {
            // Only the full-text tokens are index conditions. Equality keys
            // are not in the index vocabulary, and feeding them in would let
            // the index drop files that do contain matching rows.
            let tokens = request.match_all_keys.clone();
            let idx_start = Instant::now();
            match self.index.prune(&request.idx_file_list, &tokens) {
                Ok(Some(allowed)) => {
                    // Files without an index are never pruned; the scan
                    // filters still apply to everything that remains.
                    files.retain(|f| !f.has_index() || allowed.contains(&f.id));
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        "[trace_id {}] partition {} index lookup failed, falling back \
                         to full scan: {error}",
                        request.trace_id, request.partition
                    );
                }
            }
            stats.idx_took = idx_start.elapsed();
        }

        for file in &files {
            stats.observe(file);
        }
        Ok((files, stats))
    }
}

/// Observed at every state transition boundary, so a cancelled or expired
/// request never advances to the next phase.
fn check_budget(deadline: Instant, timeout: i64, cancel: &CancellationToken) -> Result<()> {
    ensure!(!cancel.is_cancelled(), RequestCancelledSnafu);
    ensure!(Instant::now() < deadline, RequestTimedOutSnafu { timeout });
    Ok(())
}
