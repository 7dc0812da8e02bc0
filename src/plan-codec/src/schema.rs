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

use api::v1::{ColumnDataType, ColumnSchema, ScanNode};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use snafu::OptionExt;

use crate::error::{InvalidScanNodeSnafu, Result};

/// Maps a wire column type to its arrow representation.
pub fn to_arrow_type(data_type: ColumnDataType) -> DataType {
    match data_type {
        ColumnDataType::Boolean => DataType::Boolean,
        ColumnDataType::Int64 => DataType::Int64,
        ColumnDataType::Float64 => DataType::Float64,
        ColumnDataType::String => DataType::Utf8,
        ColumnDataType::TimestampMicrosecond => {
            DataType::Timestamp(TimeUnit::Microsecond, None)
        }
        ColumnDataType::Binary => DataType::Binary,
    }
}

fn to_arrow_field(column: &ColumnSchema) -> Result<Field> {
    let data_type = ColumnDataType::try_from(column.data_type)
        .ok()
        .with_context(|| InvalidScanNodeSnafu {
            reason: format!(
                "column {} has unknown data type {}",
                column.name, column.data_type
            ),
        })?;
    Ok(Field::new(
        &column.name,
        to_arrow_type(data_type),
        column.nullable,
    ))
}

/// The arrow schema of the batches a worker streams back for this scan node,
/// with the projection applied (order preserving).
///
/// Expects a validated node, see [crate::codec::decode].
pub fn output_arrow_schema(node: &ScanNode) -> Result<SchemaRef> {
    let fields: Vec<Field> = match &node.projection {
        Some(projection) => projection
            .ordinals
            .iter()
            .map(|ordinal| {
                let column = node.schema.get(*ordinal as usize).with_context(|| {
                    InvalidScanNodeSnafu {
                        reason: format!("projection ordinal {} out of range", ordinal),
                    }
                })?;
                to_arrow_field(column)
            })
            .collect::<Result<_>>()?,
        None => node
            .schema
            .iter()
            .map(to_arrow_field)
            .collect::<Result<_>>()?,
    };
    Ok(Arc::new(Schema::new(fields)))
}

/// The arrow schema of the full (unprojected) scan input.
pub fn full_arrow_schema(node: &ScanNode) -> Result<SchemaRef> {
    let fields: Vec<Field> = node
        .schema
        .iter()
        .map(to_arrow_field)
        .collect::<Result<_>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

#[cfg(test)]
mod tests {
    use api::v1::Projection;

    use super::*;

    fn test_node() -> ScanNode {
        ScanNode {
            name: "scan".to_string(),
            schema: vec![
                ColumnSchema::new("_timestamp", ColumnDataType::TimestampMicrosecond, false),
                ColumnSchema::new("region", ColumnDataType::String, true),
                ColumnSchema::new("value", ColumnDataType::Float64, true),
            ],
            projection: None,
            filters: vec![],
            limit: None,
            sorted_by_time: false,
        }
    }

    #[test]
    fn test_output_schema_without_projection() {
        let schema = output_arrow_schema(&test_node()).unwrap();
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.field(1).name(), "region");
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
    }

    #[test]
    fn test_output_schema_preserves_projection_order() {
        let mut node = test_node();
        node.projection = Some(Projection {
            ordinals: vec![2, 0],
        });
        let schema = output_arrow_schema(&node).unwrap();
        assert_eq!(schema.fields().len(), 2);
        assert_eq!(schema.field(0).name(), "value");
        assert_eq!(schema.field(1).name(), "_timestamp");
    }
}
