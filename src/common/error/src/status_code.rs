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

use std::fmt;

use strum::{AsRefStr, EnumIter, EnumString, FromRepr};
use tonic::Code;

/// Common status code for public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, EnumIter, FromRepr)]
pub enum StatusCode {
    // ====== Begin of common status code ==============
    /// Success.
    Success = 0,

    /// Unknown error.
    Unknown = 1000,
    /// Unsupported operation.
    Unsupported = 1001,
    /// Unexpected error, maybe there is a BUG.
    Unexpected = 1002,
    /// Internal server error.
    Internal = 1003,
    /// Invalid arguments.
    InvalidArguments = 1004,
    /// The request is cancelled by the caller.
    Cancelled = 1005,
    // ====== End of common status code ================

    // ====== Begin of plan related status code ========
    /// The plan bytes are corrupt or carry an unsupported version.
    PlanDecode = 2000,
    /// Fail to serialize a scan plan.
    PlanEncode = 2001,
    // ====== End of plan related status code ==========

    // ====== Begin of dispatch related status code ====
    /// Files assigned to a partition are not present on the worker.
    FileNotFound = 3000,
    /// The worker cannot be reached, the partition may be re-dispatched.
    WorkerUnavailable = 3001,
    /// The partition exceeded its wall-clock budget.
    TimedOut = 3002,
    /// The scan engine failed to execute the bound plan.
    EngineExecuteQuery = 3003,
    // ====== End of dispatch related status code ======

    // ====== Begin of server related status code ======
    /// Runtime resources exhausted, like creating threads failed.
    RuntimeResourcesExhausted = 6000,
    /// Rate limit exceeded.
    RateLimited = 6001,
    // ====== End of server related status code ========
}

impl StatusCode {
    /// Returns `true` if `code` is success.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Returns `true` if the error with this code is retryable.
    ///
    /// A failed partition may only be re-dispatched as-is when its failure
    /// does not depend on the request content itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            StatusCode::WorkerUnavailable
            | StatusCode::RuntimeResourcesExhausted
            | StatusCode::RateLimited => true,

            StatusCode::Success
            | StatusCode::Unknown
            | StatusCode::Unsupported
            | StatusCode::Unexpected
            | StatusCode::Internal
            | StatusCode::InvalidArguments
            | StatusCode::Cancelled
            | StatusCode::PlanDecode
            | StatusCode::PlanEncode
            | StatusCode::FileNotFound
            | StatusCode::TimedOut
            | StatusCode::EngineExecuteQuery => false,
        }
    }

    /// Returns `true` if we should print an error log for an error with
    /// this status code.
    pub fn should_log_error(&self) -> bool {
        match self {
            StatusCode::Unknown
            | StatusCode::Unexpected
            | StatusCode::Internal
            | StatusCode::FileNotFound
            | StatusCode::EngineExecuteQuery
            | StatusCode::RuntimeResourcesExhausted => true,

            StatusCode::Success
            | StatusCode::Unsupported
            | StatusCode::InvalidArguments
            | StatusCode::Cancelled
            | StatusCode::PlanDecode
            | StatusCode::PlanEncode
            | StatusCode::WorkerUnavailable
            | StatusCode::TimedOut
            | StatusCode::RateLimited => false,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        StatusCode::from_repr(value as usize)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The current debug format is suitable to display.
        write!(f, "{self:?}")
    }
}

/// Maps our [StatusCode] to the closest tonic [Code] for the wire.
pub fn status_to_tonic_code(status_code: StatusCode) -> Code {
    match status_code {
        StatusCode::Success => Code::Ok,
        StatusCode::Unknown => Code::Unknown,
        StatusCode::Unsupported => Code::Unimplemented,
        StatusCode::Unexpected | StatusCode::Internal | StatusCode::EngineExecuteQuery => {
            Code::Internal
        }
        StatusCode::InvalidArguments | StatusCode::PlanDecode | StatusCode::PlanEncode => {
            Code::InvalidArgument
        }
        StatusCode::Cancelled => Code::Cancelled,
        StatusCode::FileNotFound => Code::NotFound,
        StatusCode::WorkerUnavailable => Code::Unavailable,
        StatusCode::TimedOut => Code::DeadlineExceeded,
        StatusCode::RuntimeResourcesExhausted | StatusCode::RateLimited => Code::ResourceExhausted,
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    fn assert_status_code_display(code: StatusCode, msg: &str) {
        let code_msg = format!("{code}");
        assert_eq!(msg, code_msg);
    }

    #[test]
    fn test_display_status_code() {
        assert_status_code_display(StatusCode::Unknown, "Unknown");
        assert_status_code_display(StatusCode::FileNotFound, "FileNotFound");
    }

    #[test]
    fn test_from_u32() {
        for code in StatusCode::iter() {
            let num = code as u32;
            assert_eq!(StatusCode::from_u32(num), Some(code));
        }

        assert_eq!(StatusCode::from_u32(10000), None);
    }

    #[test]
    fn test_is_success() {
        assert!(StatusCode::is_success(0));
        assert!(!StatusCode::is_success(1));
        assert!(!StatusCode::is_success(1000));
    }

    #[test]
    fn test_retryable() {
        assert!(StatusCode::WorkerUnavailable.is_retryable());
        assert!(!StatusCode::PlanDecode.is_retryable());
        assert!(!StatusCode::TimedOut.is_retryable());
    }
}
