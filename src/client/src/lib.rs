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

//! Coordinator side of search dispatch: builds one request per partition,
//! fans them out to their owning workers over Arrow Flight, and tracks each
//! partition to a terminal state.

mod client;
pub mod dispatcher;
mod error;
mod request;
mod session;

pub use client::Client;
pub use dispatcher::{Dispatch, Dispatcher, FlightSearchCaller, PartitionEvent, SearchCaller};
pub use error::{Error, Result};
pub use request::SearchRequestBuilder;
pub use session::{PartitionStatus, QuerySession};
