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

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use api::v1::SearchRequest;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_server::FlightService;
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use async_trait::async_trait;
use common_error::ext::{BoxedError, ErrorExt};
use common_grpc::flight::encode_flight_stream;
use futures::Stream;
use prost::Message;
use snafu::{OptionExt, ResultExt};
use tokio_stream::StreamExt;
use tokio_util::sync::{CancellationToken, DropGuard};
use tonic::{Request, Response, Status, Streaming};

use crate::error::{to_tonic_status, GatewayNotConfiguredSnafu, InvalidFlightTicketSnafu};
use crate::gateway::SuperClusterGateway;
use crate::handler::SearchHandler;

type TonicResult<T> = std::result::Result<T, Status>;
type TonicStream<T> = Pin<Box<dyn Stream<Item = TonicResult<T>> + Send + 'static>>;

/// The worker's transport face. A search request arrives as a `do_get`
/// ticket; the response is a flight-framed batch stream. All other flight
/// methods are unused by this protocol.
pub struct SearchFlightService {
    handler: Arc<SearchHandler>,
    gateway: Option<Arc<SuperClusterGateway>>,
}

impl SearchFlightService {
    pub fn new(handler: Arc<SearchHandler>, gateway: Option<Arc<SuperClusterGateway>>) -> Self {
        Self { handler, gateway }
    }
}

/// Cancels the request's token when the transport drops the response stream,
/// which is how a coordinator-side give-up reaches the scan.
struct GuardedStream {
    inner: TonicStream<FlightData>,
    _guard: DropGuard,
}

impl Stream for GuardedStream {
    type Item = TonicResult<FlightData>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

fn flight_error_to_status(error: FlightError) -> Status {
    match error {
        FlightError::Tonic(status) => status,
        FlightError::ExternalError(external) => match external.downcast::<BoxedError>() {
            Ok(boxed) => to_tonic_status(boxed.status_code(), boxed.output_msg()),
            Err(other) => Status::internal(other.to_string()),
        },
        other => Status::internal(other.to_string()),
    }
}

#[async_trait]
impl FlightService for SearchFlightService {
    type HandshakeStream = TonicStream<HandshakeResponse>;

    async fn handshake(
        &self,
        _: Request<Streaming<HandshakeRequest>>,
    ) -> TonicResult<Response<Self::HandshakeStream>> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    type ListFlightsStream = TonicStream<FlightInfo>;

    async fn list_flights(
        &self,
        _: Request<Criteria>,
    ) -> TonicResult<Response<Self::ListFlightsStream>> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    async fn get_flight_info(
        &self,
        _: Request<FlightDescriptor>,
    ) -> TonicResult<Response<FlightInfo>> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    async fn poll_flight_info(
        &self,
        _: Request<FlightDescriptor>,
    ) -> TonicResult<Response<PollInfo>> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    async fn get_schema(
        &self,
        _: Request<FlightDescriptor>,
    ) -> TonicResult<Response<SchemaResult>> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    type DoGetStream = TonicStream<FlightData>;

    async fn do_get(&self, request: Request<Ticket>) -> TonicResult<Response<Self::DoGetStream>> {
        let ticket = request.into_inner().ticket;
        let search =
            SearchRequest::decode(ticket.as_ref()).context(InvalidFlightTicketSnafu)?;

        let cancel = CancellationToken::new();
        let (schema, batches) = if search.is_super_cluster {
            let gateway = self
                .gateway
                .as_ref()
                .context(GatewayNotConfiguredSnafu)?;
            gateway.relay(search, cancel.clone()).await?
        } else {
            self.handler.handle(search, cancel.clone()).await?
        };

        let frames = encode_flight_stream(schema, batches).map(|f| f.map_err(flight_error_to_status));
        let stream = GuardedStream {
            inner: Box::pin(frames),
            _guard: cancel.drop_guard(),
        };
        Ok(Response::new(Box::pin(stream)))
    }

    type DoPutStream = TonicStream<PutResult>;

    async fn do_put(
        &self,
        _: Request<Streaming<FlightData>>,
    ) -> TonicResult<Response<Self::DoPutStream>> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    type DoExchangeStream = TonicStream<FlightData>;

    async fn do_exchange(
        &self,
        _: Request<Streaming<FlightData>>,
    ) -> TonicResult<Response<Self::DoExchangeStream>> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    type DoActionStream = TonicStream<arrow_flight::Result>;

    async fn do_action(&self, _: Request<Action>) -> TonicResult<Response<Self::DoActionStream>> {
        Err(Status::unimplemented("Not yet implemented"))
    }

    type ListActionsStream = TonicStream<ActionType>;

    async fn list_actions(
        &self,
        _: Request<Empty>,
    ) -> TonicResult<Response<Self::ListActionsStream>> {
        Err(Status::unimplemented("Not yet implemented"))
    }
}
