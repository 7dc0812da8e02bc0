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

//! Arrow Flight plumbing shared by the dispatcher client and the worker
//! server: record batch streams in, `FlightData` frames out, and back.

use std::pin::Pin;

use arrow::record_batch::RecordBatch;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::FlightData;
use arrow_schema::SchemaRef;
use common_error::ext::BoxedError;
use futures::{Stream, StreamExt, TryStreamExt};

/// A stream of result batches crossing a component seam.
pub type SendableBatchStream =
    Pin<Box<dyn Stream<Item = std::result::Result<RecordBatch, BoxedError>> + Send>>;

/// Encodes a record batch stream into flight frames for a `do_get` response.
///
/// The first frame carries the schema, so the receiver can decode batches it
/// has never seen the shape of. Frames are produced lazily: the encoder pulls
/// the next batch only when the transport asks for the next frame, which is
/// how worker-side backpressure reaches the scan loop.
pub fn encode_flight_stream(
    schema: SchemaRef,
    batches: SendableBatchStream,
) -> impl Stream<Item = std::result::Result<FlightData, FlightError>> + Send {
    let input = batches.map(|item| item.map_err(|e| FlightError::ExternalError(Box::new(e))));
    FlightDataEncoderBuilder::new().with_schema(schema).build(input)
}

/// Decodes a flight `do_get` response back into record batches.
pub fn decode_flight_stream<S>(stream: S) -> FlightRecordBatchStream
where
    S: Stream<Item = std::result::Result<FlightData, tonic::Status>> + Send + 'static,
{
    FlightRecordBatchStream::new_from_flight_data(stream.map_err(FlightError::Tonic))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow_schema::{DataType, Field, Schema};

    use super::*;

    fn test_batch(schema: SchemaRef) -> RecordBatch {
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_encode_decode_roundtrip() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = test_batch(schema.clone());

        let input: SendableBatchStream =
            Box::pin(futures::stream::iter(vec![Ok(batch.clone()), Ok(batch.clone())]));
        let frames: Vec<_> = encode_flight_stream(schema.clone(), input)
            .map_ok(|data| data)
            .try_collect()
            .await
            .unwrap();
        // schema frame + two batch frames
        assert!(frames.len() >= 3);

        let decoded: Vec<RecordBatch> =
            decode_flight_stream(futures::stream::iter(frames.into_iter().map(Ok)))
                .try_collect()
                .await
                .unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], batch);
    }
}
