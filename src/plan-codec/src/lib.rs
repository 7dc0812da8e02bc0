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

//! Versioned, self-describing serialization of the physical scan node.
//!
//! The plan bytes carried by a [api::v1::SearchRequest] decode deterministically
//! to the same logical scan on every partition; only the bound file list
//! differs. Workers never consult an out-of-band schema registry.

pub mod codec;
pub mod error;
pub mod schema;

pub use codec::{decode, encode, PlanPayload, PLAN_VERSION_V1};
pub use error::{Error, Result};
pub use schema::{full_arrow_schema, output_arrow_schema};
