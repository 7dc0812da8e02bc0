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

use std::cmp::Ordering;
use std::sync::Arc;

use api::v1::{ColumnDataType, CompareOp, FilterExpr, KeyValue, ScanNode};
use arrow::array::{
    Array, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::compute::{filter_record_batch, sort_to_indices, take};
use arrow::record_batch::RecordBatch;
use async_stream::try_stream;
use common_error::ext::{BoxedError, PlainError};
use common_error::status_code::StatusCode;
use common_grpc::flight::SendableBatchStream;
use partition::FileKey;

use crate::store::FileStoreRef;

/// Timestamp column every stream schema carries; the `[start_time, end_time)`
/// bound applies to it.
pub const TIMESTAMP_COLUMN: &str = "_timestamp";

/// A scan node bound to the worker-local file subset and the request's
/// pushdown filters, ready to execute.
#[derive(Clone, Debug)]
pub struct BoundScan {
    pub node: ScanNode,
    pub files: Vec<FileKey>,
    pub start_time: i64,
    pub end_time: i64,
    pub equal_keys: Vec<KeyValue>,
    pub match_all_keys: Vec<String>,
}

/// Execution seam of the worker. Implementations must emit batches lazily:
/// the transport polls the stream, and a slow consumer must pause the scan
/// rather than pile up buffered batches.
#[async_trait::async_trait]
pub trait ScanEngine: Send + Sync {
    async fn scan(&self, scan: BoundScan) -> std::result::Result<SendableBatchStream, BoxedError>;
}

pub type ScanEngineRef = Arc<dyn ScanEngine>;

/// Scans batches held by a [crate::store::MemoryFileStore], applying the
/// request's pushdown filters row by row. One output batch per non-empty
/// input batch, files visited in id order.
pub struct MemoryScanEngine {
    store: FileStoreRef,
}

impl MemoryScanEngine {
    pub fn new(store: FileStoreRef) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ScanEngine for MemoryScanEngine {
    async fn scan(&self, scan: BoundScan) -> std::result::Result<SendableBatchStream, BoxedError> {
        let store = self.store.clone();
        let mut files = scan.files.clone();
        files.sort_unstable_by_key(|f| f.id);

        let stream = try_stream! {
            let mut remaining = scan.node.limit.map(|l| l as usize);
            'files: for file in files {
                for batch in store.read(&file)? {
                    let filtered = apply_scan(&batch, &scan)?;
                    let Some(mut out) = filtered else { continue };
                    if let Some(remaining) = remaining.as_mut() {
                        if out.num_rows() > *remaining {
                            out = out.slice(0, *remaining);
                        }
                        *remaining -= out.num_rows();
                    }
                    let done = remaining == Some(0);
                    // A limit hit mid-batch can slice down to zero rows;
                    // never emit an empty batch for that.
                    if out.num_rows() > 0 {
                        yield out;
                    }
                    if done {
                        break 'files;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

fn engine_error(msg: String) -> BoxedError {
    BoxedError::new(PlainError::new(msg, StatusCode::EngineExecuteQuery))
}

fn arrow_error(error: arrow::error::ArrowError) -> BoxedError {
    engine_error(format!("arrow compute failed: {error}"))
}

/// Runs the whole per-batch pipeline: predicate mask, filter, optional sort
/// by timestamp, projection. Returns `None` for batches with no surviving
/// rows.
fn apply_scan(
    batch: &RecordBatch,
    scan: &BoundScan,
) -> std::result::Result<Option<RecordBatch>, BoxedError> {
    let mut mask = vec![true; batch.num_rows()];
    apply_time_range(batch, scan.start_time, scan.end_time, &mut mask)?;
    apply_equal_keys(batch, &scan.equal_keys, &mut mask);
    apply_match_all(batch, &scan.match_all_keys, &mut mask);
    for filter in &scan.node.filters {
        apply_filter(batch, &scan.node, filter, &mut mask)?;
    }

    if !mask.iter().any(|m| *m) {
        return Ok(None);
    }
    let mut batch = filter_record_batch(batch, &BooleanArray::from(mask)).map_err(arrow_error)?;

    if !scan.node.sorted_by_time {
        batch = sort_by_timestamp(&batch)?;
    }

    if let Some(projection) = &scan.node.projection {
        let ordinals: Vec<usize> = projection.ordinals.iter().map(|o| *o as usize).collect();
        batch = batch.project(&ordinals).map_err(arrow_error)?;
    }
    Ok(Some(batch))
}

/// Microsecond timestamp of a row, whichever physical type the column uses.
fn timestamp_at(column: &dyn Array, row: usize) -> Option<i64> {
    if let Some(ts) = column.as_any().downcast_ref::<TimestampMicrosecondArray>() {
        (!ts.is_null(row)).then(|| ts.value(row))
    } else if let Some(ts) = column.as_any().downcast_ref::<Int64Array>() {
        (!ts.is_null(row)).then(|| ts.value(row))
    } else {
        None
    }
}

fn apply_time_range(
    batch: &RecordBatch,
    start_time: i64,
    end_time: i64,
    mask: &mut [bool],
) -> std::result::Result<(), BoxedError> {
    let Some(column) = batch.column_by_name(TIMESTAMP_COLUMN) else {
        return Ok(());
    };
    for (row, keep) in mask.iter_mut().enumerate() {
        if !*keep {
            continue;
        }
        match timestamp_at(column.as_ref(), row) {
            Some(ts) => *keep = ts >= start_time && ts < end_time,
            None => *keep = false,
        }
    }
    Ok(())
}

fn apply_equal_keys(batch: &RecordBatch, equal_keys: &[KeyValue], mask: &mut [bool]) {
    // A repeated key's effective value is its last occurrence.
    for (key, value) in api::helper::effective_equal_keys(equal_keys) {
        match batch
            .column_by_name(key)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned())
        {
            Some(column) => {
                for (row, keep) in mask.iter_mut().enumerate() {
                    if *keep {
                        *keep = !column.is_null(row) && column.value(row) == value;
                    }
                }
            }
            // A key the batch has no column for matches nothing.
            None => mask.fill(false),
        }
    }
}

fn apply_match_all(batch: &RecordBatch, tokens: &[String], mask: &mut [bool]) {
    if tokens.is_empty() {
        return;
    }
    let text_columns: Vec<&StringArray> = batch
        .columns()
        .iter()
        .filter_map(|c| c.as_any().downcast_ref::<StringArray>())
        .collect();
    let tokens: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

    for (row, keep) in mask.iter_mut().enumerate() {
        if !*keep {
            continue;
        }
        *keep = tokens.iter().all(|token| {
            text_columns.iter().any(|column| {
                !column.is_null(row) && column.value(row).to_lowercase().contains(token)
            })
        });
    }
}

fn apply_filter(
    batch: &RecordBatch,
    node: &ScanNode,
    filter: &FilterExpr,
    mask: &mut [bool],
) -> std::result::Result<(), BoxedError> {
    let op = CompareOp::try_from(filter.op)
        .map_err(|_| engine_error(format!("unknown compare op {}", filter.op)))?;
    let column_schema = node
        .schema
        .iter()
        .find(|c| c.name == filter.field)
        .ok_or_else(|| engine_error(format!("filter on unknown column {}", filter.field)))?;
    let data_type = ColumnDataType::try_from(column_schema.data_type)
        .map_err(|_| engine_error(format!("unknown data type {}", column_schema.data_type)))?;
    let Some(column) = batch.column_by_name(&filter.field) else {
        mask.fill(false);
        return Ok(());
    };

    for (row, keep) in mask.iter_mut().enumerate() {
        if !*keep {
            continue;
        }
        let ordering = compare_cell(column.as_ref(), row, data_type, &filter.value)?;
        *keep = match ordering {
            None => false,
            Some(ordering) => match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::NotEq => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::LtEq => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::GtEq => ordering != Ordering::Less,
            },
        };
    }
    Ok(())
}

/// Compares one cell to the filter literal. `None` means the cell is null or
/// incomparable, which never satisfies a predicate.
fn compare_cell(
    column: &dyn Array,
    row: usize,
    data_type: ColumnDataType,
    literal: &str,
) -> std::result::Result<Option<Ordering>, BoxedError> {
    if column.is_null(row) {
        return Ok(None);
    }
    let ordering = match data_type {
        ColumnDataType::Int64 | ColumnDataType::TimestampMicrosecond => {
            let literal: i64 = literal
                .parse()
                .map_err(|_| engine_error(format!("filter literal {literal:?} is not an i64")))?;
            timestamp_at(column, row).map(|v| v.cmp(&literal))
        }
        ColumnDataType::Float64 => {
            let literal: f64 = literal
                .parse()
                .map_err(|_| engine_error(format!("filter literal {literal:?} is not an f64")))?;
            column
                .as_any()
                .downcast_ref::<Float64Array>()
                .and_then(|c| c.value(row).partial_cmp(&literal))
        }
        ColumnDataType::String => column
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|c| c.value(row).cmp(literal)),
        ColumnDataType::Boolean => {
            let literal: bool = literal
                .parse()
                .map_err(|_| engine_error(format!("filter literal {literal:?} is not a bool")))?;
            column
                .as_any()
                .downcast_ref::<BooleanArray>()
                .map(|c| c.value(row).cmp(&literal))
        }
        ColumnDataType::Binary => {
            return Err(engine_error(
                "filter pushdown on binary columns is not supported".to_string(),
            ))
        }
    };
    Ok(ordering)
}

fn sort_by_timestamp(batch: &RecordBatch) -> std::result::Result<RecordBatch, BoxedError> {
    let Some(column) = batch.column_by_name(TIMESTAMP_COLUMN) else {
        return Ok(batch.clone());
    };
    let indices = sort_to_indices(column.as_ref(), None, None).map_err(arrow_error)?;
    let columns = batch
        .columns()
        .iter()
        .map(|c| take(c.as_ref(), &indices, None))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(arrow_error)?;
    RecordBatch::try_new(batch.schema(), columns).map_err(arrow_error)
}

#[cfg(test)]
mod tests {
    use api::v1::{ColumnSchema, Projection};
    use futures::TryStreamExt;

    use crate::store::MemoryFileStore;

    use super::*;

    fn test_node() -> ScanNode {
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

    fn test_batch(rows: Vec<(i64, &str, &str)>) -> RecordBatch {
        let schema = plan_codec::full_arrow_schema(&test_node()).unwrap();
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

    fn engine_with(batches: Vec<RecordBatch>) -> (MemoryScanEngine, Vec<FileKey>) {
        let file = FileKey::new(10, "files/0010.parquet");
        let store = MemoryFileStore::new().with_file(file.clone(), batches);
        (MemoryScanEngine::new(Arc::new(store)), vec![file])
    }

    fn scan_with(node: ScanNode, files: Vec<FileKey>) -> BoundScan {
        BoundScan {
            node,
            files,
            start_time: 0,
            end_time: i64::MAX,
            equal_keys: vec![],
            match_all_keys: vec![],
        }
    }

    async fn collect(engine: &MemoryScanEngine, scan: BoundScan) -> Vec<RecordBatch> {
        engine.scan(scan).await.unwrap().try_collect().await.unwrap()
    }

    fn region_column(batch: &RecordBatch) -> Vec<String> {
        batch
            .column_by_name("region")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .iter()
            .map(|v| v.unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_equal_keys_filter_rows() {
        let (engine, files) = engine_with(vec![test_batch(vec![
            (1500, "us", "ok"),
            (1600, "eu", "ok"),
            (1700, "us", "ok"),
        ])]);
        let mut scan = scan_with(test_node(), files);
        scan.equal_keys = vec![KeyValue::new("region", "us")];

        let batches = collect(&engine, scan).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(region_column(&batches[0]), vec!["us", "us"]);
    }

    #[tokio::test]
    async fn test_repeated_equal_key_last_occurrence_wins() {
        let (engine, files) = engine_with(vec![test_batch(vec![
            (1, "us", "a"),
            (2, "eu", "b"),
        ])]);
        let mut scan = scan_with(test_node(), files);
        scan.equal_keys = vec![KeyValue::new("region", "us"), KeyValue::new("region", "eu")];

        let batches = collect(&engine, scan).await;
        assert_eq!(region_column(&batches[0]), vec!["eu"]);
    }

    #[tokio::test]
    async fn test_time_range_is_half_open() {
        let (engine, files) = engine_with(vec![test_batch(vec![
            (999, "us", "before"),
            (1000, "us", "start"),
            (1999, "us", "last"),
            (2000, "us", "end"),
        ])]);
        let mut scan = scan_with(test_node(), files);
        scan.start_time = 1000;
        scan.end_time = 2000;

        let batches = collect(&engine, scan).await;
        assert_eq!(batches[0].num_rows(), 2);
    }

    #[tokio::test]
    async fn test_match_all_requires_every_token() {
        let (engine, files) = engine_with(vec![test_batch(vec![
            (1, "us", "Error: timeout at gateway"),
            (2, "us", "error in parser"),
            (3, "us", "all good"),
        ])]);
        let mut scan = scan_with(test_node(), files);
        scan.match_all_keys = vec!["error".to_string(), "timeout".to_string()];

        let batches = collect(&engine, scan).await;
        assert_eq!(batches[0].num_rows(), 1);
    }

    #[tokio::test]
    async fn test_plan_filters_and_projection() {
        let (engine, files) = engine_with(vec![test_batch(vec![
            (1, "us", "a"),
            (2, "eu", "b"),
            (3, "apac", "c"),
        ])]);
        let mut node = test_node();
        node.filters = vec![FilterExpr {
            field: "region".to_string(),
            op: CompareOp::NotEq as i32,
            value: "eu".to_string(),
        }];
        node.projection = Some(Projection { ordinals: vec![1] });
        let scan = scan_with(node, files);

        let batches = collect(&engine, scan).await;
        assert_eq!(batches[0].num_columns(), 1);
        assert_eq!(region_column(&batches[0]), vec!["us", "apac"]);
    }

    #[tokio::test]
    async fn test_limit_truncates_stream() {
        let (engine, files) = engine_with(vec![
            test_batch(vec![(1, "us", "a"), (2, "us", "b")]),
            test_batch(vec![(3, "us", "c")]),
        ]);
        let mut node = test_node();
        node.limit = Some(2);
        let scan = scan_with(node, files);

        let batches = collect(&engine, scan).await;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn test_zero_limit_yields_no_batches() {
        let (engine, files) = engine_with(vec![test_batch(vec![(1, "us", "a")])]);
        let mut node = test_node();
        node.limit = Some(0);
        let scan = scan_with(node, files);

        let batches = collect(&engine, scan).await;
        assert!(batches.is_empty());
    }

    #[tokio::test]
    async fn test_unsorted_input_is_sorted_by_timestamp() {
        let (engine, files) = engine_with(vec![test_batch(vec![
            (300, "us", "c"),
            (100, "us", "a"),
            (200, "us", "b"),
        ])]);
        let mut node = test_node();
        node.sorted_by_time = false;
        let scan = scan_with(node, files);

        let batches = collect(&engine, scan).await;
        let ts: Vec<i64> = (0..batches[0].num_rows())
            .map(|row| {
                timestamp_at(
                    batches[0].column_by_name(TIMESTAMP_COLUMN).unwrap().as_ref(),
                    row,
                )
                .unwrap()
            })
            .collect();
        assert_eq!(ts, vec![100, 200, 300]);
    }
}
