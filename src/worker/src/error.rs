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

use std::any::Any;
use std::net::SocketAddr;

use common_error::ext::{BoxedError, ErrorExt};
use common_error::status_code::{status_to_tonic_code, StatusCode};
use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to decode Flight ticket"))]
    InvalidFlightTicket {
        #[snafu(source)]
        error: api::prost::DecodeError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to decode search plan"))]
    DecodePlan {
        #[snafu(implicit)]
        location: Location,
        source: plan_codec::Error,
    },

    #[snafu(display("Unsupported plan version {}", version))]
    UnsupportedPlanVersion {
        version: u32,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Files {:?} assigned to this worker are not present locally",
        file_ids
    ))]
    FilesNotLocal {
        file_ids: Vec<i64>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to execute scan"))]
    ExecuteScan {
        #[snafu(implicit)]
        location: Location,
        source: BoxedError,
    },

    #[snafu(display("Request exceeded its {}s budget", timeout))]
    RequestTimedOut {
        timeout: i64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Request was cancelled by the caller"))]
    RequestCancelled {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Super-cluster relay failed for partition {}", partition))]
    RelayPartition {
        partition: u32,
        #[snafu(implicit)]
        location: Location,
        source: BoxedError,
    },

    #[snafu(display("No gateway configured for super-cluster request"))]
    GatewayNotConfigured {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to bind address {}", addr))]
    TcpBind {
        addr: SocketAddr,
        #[snafu(source)]
        error: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to convert to TcpIncoming"))]
    TcpIncoming {
        #[snafu(source)]
        error: Box<dyn std::error::Error + Send + Sync>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to start gRPC server"))]
    StartGrpc {
        #[snafu(source)]
        error: tonic::transport::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("gRPC server is already started"))]
    AlreadyStarted {
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidFlightTicket { .. } => StatusCode::InvalidArguments,
            Error::DecodePlan { source, .. } => source.status_code(),
            Error::UnsupportedPlanVersion { .. } => StatusCode::PlanDecode,
            Error::FilesNotLocal { .. } => StatusCode::FileNotFound,
            Error::ExecuteScan { .. } => StatusCode::EngineExecuteQuery,
            Error::RequestTimedOut { .. } => StatusCode::TimedOut,
            Error::RequestCancelled { .. } => StatusCode::Cancelled,
            Error::RelayPartition { source, .. } => source.status_code(),
            Error::GatewayNotConfigured { .. } => StatusCode::Unsupported,
            Error::TcpBind { .. }
            | Error::TcpIncoming { .. }
            | Error::StartGrpc { .. }
            | Error::AlreadyStarted { .. } => StatusCode::Internal,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        to_tonic_status(err.status_code(), err.output_msg())
    }
}

/// Builds a [tonic::Status] that carries the exact [StatusCode] in response
/// metadata next to the (lossy) tonic code mapping.
pub fn to_tonic_status(status_code: StatusCode, msg: String) -> tonic::Status {
    use common_error::{HEADER_ERROR_CODE, HEADER_ERROR_MSG};
    use tonic::codegen::http::{HeaderMap, HeaderValue};
    use tonic::metadata::MetadataMap;

    let mut headers = HeaderMap::<HeaderValue>::with_capacity(2);
    headers.insert(HEADER_ERROR_CODE, HeaderValue::from(status_code as u32));
    // An error message that is not a valid header value is simply not
    // mirrored into metadata; the status message still carries it.
    if let Ok(err_msg) = HeaderValue::from_bytes(msg.as_bytes()) {
        let _ = headers.insert(HEADER_ERROR_MSG, err_msg);
    }

    tonic::Status::with_metadata(
        status_to_tonic_code(status_code),
        msg,
        MetadataMap::from_headers(headers),
    )
}
