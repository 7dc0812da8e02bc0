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

use api::v1::{KeyValue, ScanNode, SearchRequest};
use partition::PartitionEntry;
use snafu::ensure;

use crate::error::{
    InvalidTimeWindowSnafu, NonPositiveTimeoutSnafu, OrphanIndexFilesSnafu, Result,
};

/// Assembles one [SearchRequest] per partition. The plan, scoping, filters
/// and routing hints are set once; `build` is then called with each
/// partition's assignment entry. Building is pure, nothing is sent.
#[derive(Clone, Debug)]
pub struct SearchRequestBuilder {
    trace_id: String,
    org_id: String,
    stream_type: String,
    plan: Vec<u8>,
    start_time: i64,
    end_time: i64,
    timeout: i64,
    equal_keys: Vec<KeyValue>,
    match_all_keys: Vec<String>,
    is_super_cluster: bool,
    use_inverted_index: bool,
    work_group: Option<String>,
    index_type: Option<String>,
    user_id: Option<String>,
    search_event_type: Option<String>,
}

impl SearchRequestBuilder {
    pub fn new(
        trace_id: impl Into<String>,
        org_id: impl Into<String>,
        stream_type: impl Into<String>,
        scan_node: &ScanNode,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            org_id: org_id.into(),
            stream_type: stream_type.into(),
            plan: plan_codec::encode(scan_node),
            start_time: 0,
            end_time: i64::MAX,
            timeout: 30,
            equal_keys: Vec::new(),
            match_all_keys: Vec::new(),
            is_super_cluster: false,
            use_inverted_index: false,
            work_group: None,
            index_type: None,
            user_id: None,
            search_event_type: None,
        }
    }

    /// Row time bound, `[start_time, end_time)` in microsecond epoch units.
    pub fn time_window(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    /// Per-partition wall clock budget in seconds.
    pub fn timeout_secs(mut self, timeout: i64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn equal_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equal_keys.push(KeyValue::new(key, value));
        self
    }

    pub fn match_all_key(mut self, token: impl Into<String>) -> Self {
        self.match_all_keys.push(token.into());
        self
    }

    pub fn super_cluster(mut self, is_super_cluster: bool) -> Self {
        self.is_super_cluster = is_super_cluster;
        self
    }

    pub fn use_inverted_index(mut self, use_inverted_index: bool) -> Self {
        self.use_inverted_index = use_inverted_index;
        self
    }

    pub fn work_group(mut self, work_group: Option<String>) -> Self {
        self.work_group = work_group;
        self
    }

    pub fn index_type(mut self, index_type: Option<String>) -> Self {
        self.index_type = index_type;
        self
    }

    pub fn user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn search_event_type(mut self, search_event_type: Option<String>) -> Self {
        self.search_event_type = search_event_type;
        self
    }

    pub fn build(&self, entry: &PartitionEntry) -> Result<SearchRequest> {
        ensure!(
            self.start_time <= self.end_time,
            InvalidTimeWindowSnafu {
                start_time: self.start_time,
                end_time: self.end_time,
            }
        );
        ensure!(
            self.timeout > 0,
            NonPositiveTimeoutSnafu {
                timeout: self.timeout
            }
        );
        // Index entries with no backing data file are never valid.
        ensure!(
            !entry.files.is_empty() || entry.idx_files.is_empty(),
            OrphanIndexFilesSnafu {
                idx_files: entry.idx_files.len()
            }
        );

        Ok(SearchRequest {
            trace_id: self.trace_id.clone(),
            partition: entry.partition,
            org_id: self.org_id.clone(),
            stream_type: self.stream_type.clone(),
            plan: self.plan.clone(),
            file_id_list: entry.files.iter().map(|f| f.id).collect(),
            idx_file_list: entry.idx_files.clone(),
            equal_keys: self.equal_keys.clone(),
            match_all_keys: self.match_all_keys.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            timeout: self.timeout,
            is_super_cluster: self.is_super_cluster,
            use_inverted_index: self.use_inverted_index,
            work_group: self.work_group.clone(),
            index_type: self.index_type.clone(),
            user_id: self.user_id.clone(),
            search_event_type: self.search_event_type.clone(),
        })
    }
}
