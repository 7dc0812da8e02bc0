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

use std::collections::HashSet;

use api::prost::Message;
use api::v1::{ColumnDataType, CompareOp, PlanEnvelope, ScanNode};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::{
    DeserializeEnvelopeSnafu, DeserializeScanNodeSnafu, InvalidScanNodeSnafu, MissingMagicSnafu,
    Result,
};

/// Binary prefix that marks plan bytes produced by this codec, so that
/// arbitrary foreign payloads fail fast instead of being misparsed.
const PLAN_MAGIC: &[u8] = b"splan:";

/// Version tag of the current scan node encoding.
pub const PLAN_VERSION_V1: u32 = 1;

/// A decoded plan payload. Versions this build does not understand surface as
/// [PlanPayload::Unknown] so callers can reject them with a precise error
/// instead of a best-effort parse.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanPayload {
    V1(ScanNode),
    Unknown { version: u32, payload: Vec<u8> },
}

/// Serializes a scan node into self-describing, versioned plan bytes.
///
/// The same bytes are carried by every partition of a query; only the bound
/// file list differs per partition.
pub fn encode(node: &ScanNode) -> Vec<u8> {
    let envelope = PlanEnvelope {
        version: PLAN_VERSION_V1,
        payload: node.encode_to_vec(),
    };
    let mut buf = Vec::with_capacity(PLAN_MAGIC.len() + envelope.encoded_len());
    buf.extend_from_slice(PLAN_MAGIC);
    buf.extend_from_slice(&envelope.encode_to_vec());
    buf
}

/// Deserializes plan bytes. Pure: equal inputs decode to equal payloads.
pub fn decode(buf: &[u8]) -> Result<PlanPayload> {
    let payload = buf.strip_prefix(PLAN_MAGIC).context(MissingMagicSnafu)?;
    let envelope = PlanEnvelope::decode(payload).context(DeserializeEnvelopeSnafu)?;

    match envelope.version {
        PLAN_VERSION_V1 => {
            let node = ScanNode::decode(envelope.payload.as_slice())
                .context(DeserializeScanNodeSnafu)?;
            validate(&node)?;
            Ok(PlanPayload::V1(node))
        }
        version => Ok(PlanPayload::Unknown {
            version,
            payload: envelope.payload,
        }),
    }
}

/// Checks the structural invariants a v1 scan node must satisfy before a
/// worker may bind it.
fn validate(node: &ScanNode) -> Result<()> {
    ensure!(
        !node.schema.is_empty(),
        InvalidScanNodeSnafu {
            reason: "schema must not be empty",
        }
    );

    for column in &node.schema {
        ensure!(
            ColumnDataType::try_from(column.data_type).is_ok(),
            InvalidScanNodeSnafu {
                reason: format!(
                    "column {} has unknown data type {}",
                    column.name, column.data_type
                ),
            }
        );
    }

    if let Some(projection) = &node.projection {
        let mut seen = HashSet::with_capacity(projection.ordinals.len());
        for ordinal in &projection.ordinals {
            ensure!(
                (*ordinal as usize) < node.schema.len(),
                InvalidScanNodeSnafu {
                    reason: format!(
                        "projection ordinal {} out of range, schema has {} columns",
                        ordinal,
                        node.schema.len()
                    ),
                }
            );
            ensure!(
                seen.insert(*ordinal),
                InvalidScanNodeSnafu {
                    reason: format!("duplicated projection ordinal {}", ordinal),
                }
            );
        }
    }

    for filter in &node.filters {
        ensure!(
            CompareOp::try_from(filter.op).is_ok(),
            InvalidScanNodeSnafu {
                reason: format!("filter on {} has unknown operator {}", filter.field, filter.op),
            }
        );
        ensure!(
            node.schema.iter().any(|c| c.name == filter.field),
            InvalidScanNodeSnafu {
                reason: format!("filter field {} not found in schema", filter.field),
            }
        );
    }

    Ok(())
}
