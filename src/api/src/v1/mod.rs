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

//! Wire messages of the search dispatch protocol, version 1.
//!
//! The messages are written by hand with prost derives so the crate does not
//! need `protoc` at build time. Field numbers are frozen: adding a field means
//! taking a fresh number, never reusing one.

/// A key/value pair, used for equality pushdown and tag-style metadata.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Reference to an inverted index file. The internal shape of index files is
/// owned by the index-format component; the protocol treats the name as an
/// opaque identifier.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct IdxFileName {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// Unit of dispatch: one partition of one logical query, sent to exactly one
/// worker. Constructed once, transmitted once, never mutated.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchRequest {
    /// Correlation id shared by all partitions of one logical query.
    #[prost(string, tag = "1")]
    pub trace_id: String,
    /// Partition id, unique among requests of the same trace_id.
    #[prost(uint32, tag = "2")]
    pub partition: u32,
    #[prost(string, tag = "3")]
    pub org_id: String,
    #[prost(string, tag = "4")]
    pub stream_type: String,
    /// Versioned plan envelope, see `PlanEnvelope`.
    #[prost(bytes = "vec", tag = "5")]
    pub plan: Vec<u8>,
    /// File ids this partition must scan. Disjoint across partitions of the
    /// same trace_id.
    #[prost(int64, repeated, tag = "6")]
    pub file_id_list: Vec<i64>,
    /// Inverted index files backing a subset of `file_id_list`. Empty unless
    /// `use_inverted_index` is set.
    #[prost(message, repeated, tag = "7")]
    pub idx_file_list: Vec<IdxFileName>,
    /// Equality pushdown; a key's effective value is its last occurrence.
    #[prost(message, repeated, tag = "8")]
    pub equal_keys: Vec<KeyValue>,
    /// Full-text pushdown tokens that must all match. Empty means no filter.
    #[prost(string, repeated, tag = "9")]
    pub match_all_keys: Vec<String>,
    /// Inclusive lower bound, microsecond epoch.
    #[prost(int64, tag = "10")]
    pub start_time: i64,
    /// Exclusive upper bound, microsecond epoch.
    #[prost(int64, tag = "11")]
    pub end_time: i64,
    /// Wall-clock budget in seconds for the whole partition.
    #[prost(int64, tag = "12")]
    pub timeout: i64,
    #[prost(bool, tag = "13")]
    pub is_super_cluster: bool,
    #[prost(bool, tag = "14")]
    pub use_inverted_index: bool,
    // The following metadata fields are tri-state: absent, present-empty and
    // present-value are all distinct and must round-trip.
    #[prost(string, optional, tag = "15")]
    pub work_group: Option<String>,
    #[prost(string, optional, tag = "16")]
    pub index_type: Option<String>,
    #[prost(string, optional, tag = "17")]
    pub user_id: Option<String>,
    #[prost(string, optional, tag = "18")]
    pub search_event_type: Option<String>,
}

/// Self-describing envelope around an encoded scan plan. Decoders built
/// before a version existed see only `{version, payload}` and can refuse it
/// without misparsing.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanEnvelope {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

/// Data types a scan schema may carry. A closed set by design: workers must
/// be able to materialize any column they are asked to stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ColumnDataType {
    Boolean = 0,
    Int64 = 1,
    Float64 = 2,
    String = 3,
    TimestampMicrosecond = 4,
    Binary = 5,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ColumnSchema {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "ColumnDataType", tag = "2")]
    pub data_type: i32,
    #[prost(bool, tag = "3")]
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: ColumnDataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type as i32,
            nullable,
        }
    }
}

/// Comparison operators supported in filter pushdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CompareOp {
    Eq = 0,
    NotEq = 1,
    Lt = 2,
    LtEq = 3,
    Gt = 4,
    GtEq = 5,
}

/// A single pushdown predicate, `field <op> value`. The literal is carried
/// as a string and parsed against the column type on the worker.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FilterExpr {
    #[prost(string, tag = "1")]
    pub field: String,
    #[prost(enumeration = "CompareOp", tag = "2")]
    pub op: i32,
    #[prost(string, tag = "3")]
    pub value: String,
}

/// Column ordinals to project, wrapped in a message so that "no projection"
/// and "empty projection" stay distinguishable on the wire.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Projection {
    #[prost(uint32, repeated, tag = "1")]
    pub ordinals: Vec<u32>,
}

/// The physical scan node, version 1. Carries its own schema so workers can
/// run plans they have never seen without an out-of-band schema registry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScanNode {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub schema: Vec<ColumnSchema>,
    #[prost(message, optional, tag = "3")]
    pub projection: Option<Projection>,
    #[prost(message, repeated, tag = "4")]
    pub filters: Vec<FilterExpr>,
    #[prost(uint64, optional, tag = "5")]
    pub limit: Option<u64>,
    /// Set when the underlying files are already ordered by timestamp, which
    /// lets the worker skip a local sort step.
    #[prost(bool, tag = "6")]
    pub sorted_by_time: bool,
}
