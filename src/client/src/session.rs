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

use arrow::record_batch::RecordBatch;
use tokio::sync::mpsc;

use crate::dispatcher::PartitionEvent;

/// Per-partition progress as seen by the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionStatus {
    Pending,
    Completed,
    Failed { retriable: bool },
    TimedOut,
    Cancelled,
}

impl PartitionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PartitionStatus::Pending)
    }
}

/// Bookkeeping for one logical query's fan-out, owned by whoever drives the
/// dispatch. There is no global registry of in-flight queries; dropping the
/// session drops all of its state.
///
/// `require_all_partitions` decides whether the query as a whole succeeds
/// only when every partition completes, or tolerates partial results as long
/// as at least one partition completes.
#[derive(Debug)]
pub struct QuerySession {
    trace_id: String,
    require_all_partitions: bool,
    statuses: Vec<PartitionStatus>,
}

impl QuerySession {
    pub fn new(trace_id: impl Into<String>, partitions: usize, require_all_partitions: bool) -> Self {
        Self {
            trace_id: trace_id.into(),
            require_all_partitions,
            statuses: vec![PartitionStatus::Pending; partitions],
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn observe(&mut self, event: &PartitionEvent) {
        let Some(status) = self.statuses.get_mut(event.partition() as usize) else {
            return;
        };
        match event {
            PartitionEvent::Batch { .. } => {}
            PartitionEvent::Completed { .. } => *status = PartitionStatus::Completed,
            PartitionEvent::Failed { retriable, .. } => {
                *status = PartitionStatus::Failed {
                    retriable: *retriable,
                }
            }
            PartitionEvent::TimedOut { .. } => *status = PartitionStatus::TimedOut,
            PartitionEvent::Cancelled { .. } => *status = PartitionStatus::Cancelled,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.statuses.iter().all(|s| s.is_terminal())
    }

    pub fn status(&self, partition: u32) -> Option<PartitionStatus> {
        self.statuses.get(partition as usize).copied()
    }

    /// Partitions that did not complete, with their terminal status.
    pub fn failed_partitions(&self) -> Vec<(u32, PartitionStatus)> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| !matches!(s, PartitionStatus::Completed | PartitionStatus::Pending))
            .map(|(i, s)| (i as u32, *s))
            .collect()
    }

    pub fn succeeded(&self) -> bool {
        if !self.is_finished() {
            return false;
        }
        let completed = self
            .statuses
            .iter()
            .filter(|s| matches!(s, PartitionStatus::Completed))
            .count();
        if self.require_all_partitions {
            completed == self.statuses.len()
        } else {
            completed > 0
        }
    }

    /// Drains the dispatcher's event stream to completion, buffering result
    /// batches. Callers that merge incrementally should consume the receiver
    /// themselves and feed [QuerySession::observe] instead.
    pub async fn collect(
        &mut self,
        mut rx: mpsc::Receiver<PartitionEvent>,
    ) -> Vec<RecordBatch> {
        let mut batches = Vec::new();
        while let Some(event) = rx.recv().await {
            self.observe(&event);
            if let PartitionEvent::Batch { batch, .. } = event {
                batches.push(batch);
            }
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use common_error::ext::{BoxedError, PlainError};
    use common_error::status_code::StatusCode;

    use super::*;

    fn failed(partition: u32, retriable: bool) -> PartitionEvent {
        PartitionEvent::Failed {
            partition,
            retriable,
            error: BoxedError::new(PlainError::new("boom".to_string(), StatusCode::Internal)),
        }
    }

    fn completed(partition: u32) -> PartitionEvent {
        PartitionEvent::Completed {
            partition,
            batches: 1,
            rows: 1,
        }
    }

    #[test]
    fn test_require_all_partitions() {
        let mut session = QuerySession::new("q1", 2, true);
        session.observe(&completed(0));
        assert!(!session.is_finished());
        session.observe(&failed(1, true));
        assert!(session.is_finished());
        assert!(!session.succeeded());
        assert_eq!(
            session.failed_partitions(),
            vec![(1, PartitionStatus::Failed { retriable: true })]
        );
    }

    #[test]
    fn test_partial_success_tolerated() {
        let mut session = QuerySession::new("q1", 2, false);
        session.observe(&completed(0));
        session.observe(&failed(1, false));
        assert!(session.succeeded());
    }

    #[test]
    fn test_all_partitions_failed_is_never_success() {
        let mut session = QuerySession::new("q1", 2, false);
        session.observe(&failed(0, false));
        session.observe(&PartitionEvent::TimedOut { partition: 1 });
        assert!(!session.succeeded());
    }
}
