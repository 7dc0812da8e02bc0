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

use std::time::Duration;

use common_grpc::channel_manager::DEFAULT_MAX_GRPC_MESSAGE_SIZE;
use common_telemetry::logging::LoggingOptions;
use serde::{Deserialize, Serialize};

/// Worker node configuration, deserialized from a toml file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// gRPC listen address.
    pub bind_addr: String,
    /// Node id reported in the cluster topology.
    pub node_id: u64,
    /// Upper bound applied when a request asks for a longer timeout.
    #[serde(with = "humantime_serde")]
    pub max_request_timeout: Duration,
    pub max_grpc_message_size: usize,
    pub logging: LoggingOptions,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4001".to_string(),
            node_id: 0,
            max_request_timeout: Duration::from_secs(600),
            max_grpc_message_size: DEFAULT_MAX_GRPC_MESSAGE_SIZE,
            logging: LoggingOptions::default(),
        }
    }
}

impl WorkerConfig {
    /// Clamps a request's timeout (seconds) to the configured ceiling.
    pub fn effective_timeout(&self, requested_secs: i64) -> Duration {
        let requested = Duration::from_secs(requested_secs.max(0) as u64);
        requested.min(self.max_request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml() {
        let config: WorkerConfig = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:14001"
            node_id = 42
            max_request_timeout = "2m"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:14001");
        assert_eq!(config.node_id, 42);
        assert_eq!(config.max_request_timeout, Duration::from_secs(120));
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        // Unset fields fall back to defaults.
        assert_eq!(
            config.max_grpc_message_size,
            WorkerConfig::default().max_grpc_message_size
        );
    }

    #[test]
    fn test_effective_timeout_is_clamped() {
        let config = WorkerConfig {
            max_request_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(config.effective_timeout(30), Duration::from_secs(30));
        assert_eq!(config.effective_timeout(3600), Duration::from_secs(60));
        assert_eq!(config.effective_timeout(-5), Duration::from_secs(0));
    }
}
