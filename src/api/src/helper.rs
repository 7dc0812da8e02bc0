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

use std::collections::HashMap;

use crate::v1::{CompareOp, FilterExpr, KeyValue};

impl FilterExpr {
    pub fn new(field: impl Into<String>, op: CompareOp, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: op as i32,
            value: value.into(),
        }
    }
}

/// Collapses `equal_keys` into the effective mapping: keys may repeat, and a
/// key's effective value is its last occurrence.
pub fn effective_equal_keys(equal_keys: &[KeyValue]) -> HashMap<&str, &str> {
    let mut map = HashMap::with_capacity(equal_keys.len());
    for kv in equal_keys {
        map.insert(kv.key.as_str(), kv.value.as_str());
    }
    map
}
