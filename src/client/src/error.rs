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

use common_error::ext::{BoxedError, ErrorExt};
use common_error::status_code::StatusCode;
use snafu::{IntoError, Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid time window: start {} > end {}", start_time, end_time))]
    InvalidTimeWindow {
        start_time: i64,
        end_time: i64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display(
        "Request carries {} index files but no data files to back them",
        idx_files
    ))]
    OrphanIndexFiles {
        idx_files: usize,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Request timeout must be positive, got {}", timeout))]
    NonPositiveTimeout {
        timeout: i64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("Failed to create channel to {}", addr))]
    CreateChannel {
        addr: String,
        #[snafu(implicit)]
        location: Location,
        source: common_grpc::error::Error,
    },

    #[snafu(display("Failed to do Flight get, addr: {}, code: {}", addr, tonic_code))]
    FlightGet {
        addr: String,
        tonic_code: tonic::Code,
        #[snafu(implicit)]
        location: Location,
        source: BoxedError,
    },

    #[snafu(display("Failed to convert FlightData"))]
    ConvertFlightData {
        #[snafu(implicit)]
        location: Location,
        source: common_grpc::error::Error,
    },

    #[snafu(display("Worker returned error, code: {}, msg: {}", code, msg))]
    Worker {
        code: StatusCode,
        msg: String,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds an error from a transport status, recovering the worker-side
    /// status code from response metadata when present.
    pub fn from_tonic_status(addr: &str, status: tonic::Status) -> Self {
        let tonic_code = status.code();
        let code = status_from_metadata(&status).unwrap_or_else(|| tonic_code_to_status(tonic_code));
        let plain = common_error::ext::PlainError::new(status.message().to_string(), code);
        FlightGetSnafu {
            addr: addr.to_string(),
            tonic_code,
        }
        .into_error(BoxedError::new(plain))
    }
}

/// Reads the exact status code the worker put into response metadata. The
/// tonic code is a lossy projection, used only as a fallback.
fn status_from_metadata(status: &tonic::Status) -> Option<StatusCode> {
    let value = status.metadata().get(common_error::HEADER_ERROR_CODE)?;
    let code = value.to_str().ok()?.parse::<u32>().ok()?;
    StatusCode::from_u32(code)
}

fn tonic_code_to_status(code: tonic::Code) -> StatusCode {
    match code {
        tonic::Code::Unavailable => StatusCode::WorkerUnavailable,
        tonic::Code::DeadlineExceeded => StatusCode::TimedOut,
        tonic::Code::Cancelled => StatusCode::Cancelled,
        tonic::Code::NotFound => StatusCode::FileNotFound,
        tonic::Code::InvalidArgument => StatusCode::InvalidArguments,
        tonic::Code::ResourceExhausted => StatusCode::RuntimeResourcesExhausted,
        _ => StatusCode::Internal,
    }
}

impl ErrorExt for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidTimeWindow { .. }
            | Error::OrphanIndexFiles { .. }
            | Error::NonPositiveTimeout { .. } => StatusCode::InvalidArguments,
            Error::CreateChannel { source, .. } | Error::ConvertFlightData { source, .. } => {
                source.status_code()
            }
            Error::FlightGet { source, .. } => source.status_code(),
            Error::Worker { code, .. } => *code,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tonic_status_maps_to_retryable_code() {
        let status = tonic::Status::unavailable("worker draining");
        let err = Error::from_tonic_status("127.0.0.1:4001", status);
        assert_eq!(err.status_code(), StatusCode::WorkerUnavailable);
        assert!(err.status_code().is_retryable());
    }

    #[test]
    fn test_metadata_code_wins_over_tonic_code() {
        let mut status = tonic::Status::invalid_argument("bad plan bytes");
        status.metadata_mut().insert(
            common_error::HEADER_ERROR_CODE,
            (StatusCode::PlanDecode as u32).to_string().parse().unwrap(),
        );
        let err = Error::from_tonic_status("127.0.0.1:4001", status);
        assert_eq!(err.status_code(), StatusCode::PlanDecode);
    }

    #[test]
    fn test_validation_errors_are_not_retryable() {
        let err = InvalidTimeWindowSnafu {
            start_time: 10_i64,
            end_time: 5_i64,
        }
        .build();
        assert_eq!(err.status_code(), StatusCode::InvalidArguments);
        assert!(!err.status_code().is_retryable());
    }
}
