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

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common_telemetry::debug;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use snafu::ResultExt;
use tonic::transport::{Channel as InnerChannel, Endpoint};

use crate::error::{CreateChannelSnafu, Result};

const RECYCLE_CHANNEL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_GRPC_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_GRPC_CONNECT_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_MAX_GRPC_MESSAGE_SIZE: usize = 512 * 1024 * 1024;

/// A pool of lazily connected tonic channels, one per worker address.
///
/// Channels unused for a full recycle interval are dropped so a long-lived
/// coordinator does not accumulate connections to departed workers.
#[derive(Clone, Debug)]
pub struct ChannelManager {
    config: ChannelConfig,
    pool: Arc<Pool>,
    channel_recycle_started: Arc<AtomicBool>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        ChannelManager::with_config(ChannelConfig::default())
    }
}

impl ChannelManager {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            config,
            pool: Arc::new(Pool::default()),
            channel_recycle_started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn get(&self, addr: impl AsRef<str>) -> Result<InnerChannel> {
        self.trigger_channel_recycling();

        let addr = addr.as_ref();
        // It will acquire the read lock.
        if let Some(inner_ch) = self.pool.get(addr) {
            return Ok(inner_ch);
        }

        // It will acquire the write lock.
        let entry = match self.pool.channels.entry(addr.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().increase_access();
                entry.into_ref()
            }
            Entry::Vacant(entry) => {
                let endpoint = self.build_endpoint(addr)?;
                let inner_channel = endpoint.connect_lazy();
                entry.insert(Channel {
                    channel: inner_channel,
                    access: AtomicUsize::new(1),
                })
            }
        };
        Ok(entry.channel.clone())
    }

    fn build_endpoint(&self, addr: &str) -> Result<Endpoint> {
        let mut endpoint = Endpoint::new(format!("http://{addr}")).context(CreateChannelSnafu {
            addr: addr.to_string(),
        })?;

        if let Some(dur) = self.config.timeout {
            endpoint = endpoint.timeout(dur);
        }
        if let Some(dur) = self.config.connect_timeout {
            endpoint = endpoint.connect_timeout(dur);
        }
        if let Some(dur) = self.config.http2_keep_alive_interval {
            endpoint = endpoint.http2_keep_alive_interval(dur);
        }
        endpoint = endpoint
            .tcp_keepalive(self.config.tcp_keepalive)
            .tcp_nodelay(self.config.tcp_nodelay);

        Ok(endpoint)
    }

    fn trigger_channel_recycling(&self) {
        if self
            .channel_recycle_started
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let pool = self.pool.clone();
        let _handle = tokio::spawn(async move {
            recycle_channel_in_loop(pool, RECYCLE_CHANNEL_INTERVAL_SECS).await;
        });
        debug!("channel recycle task started");
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub http2_keep_alive_interval: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
    pub tcp_nodelay: bool,
    pub max_message_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(DEFAULT_GRPC_REQUEST_TIMEOUT_SECS)),
            connect_timeout: Some(Duration::from_secs(DEFAULT_GRPC_CONNECT_TIMEOUT_SECS)),
            http2_keep_alive_interval: Some(Duration::from_secs(30)),
            tcp_keepalive: None,
            tcp_nodelay: true,
            max_message_size: DEFAULT_MAX_GRPC_MESSAGE_SIZE,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Default::default()
    }

    /// A timeout to each request. Streaming calls outlive this; their
    /// deadline is enforced by the caller instead.
    pub fn timeout(self, timeout: Option<Duration>) -> Self {
        Self { timeout, ..self }
    }

    /// A timeout to connecting to the uri.
    pub fn connect_timeout(self, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..self
        }
    }

    pub fn max_message_size(self, size: usize) -> Self {
        Self {
            max_message_size: size,
            ..self
        }
    }
}

#[derive(Debug)]
struct Channel {
    channel: InnerChannel,
    access: AtomicUsize,
}

impl Channel {
    fn increase_access(&self) {
        self.access.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Pool {
    channels: DashMap<String, Channel>,
}

impl Pool {
    fn get(&self, addr: &str) -> Option<InnerChannel> {
        let channel = self.channels.get(addr);
        channel.map(|ch| {
            ch.increase_access();
            ch.channel.clone()
        })
    }

    fn retain_channel<F>(&self, f: F)
    where
        F: FnMut(&String, &mut Channel) -> bool,
    {
        self.channels.retain(f);
    }
}

async fn recycle_channel_in_loop(pool: Arc<Pool>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        pool.retain_channel(|_, c| c.access.swap(0, Ordering::Relaxed) > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_channel_reuses_pool_entry() {
        let mgr = ChannelManager::new();
        let _ = mgr.get("127.0.0.1:3001").unwrap();
        let _ = mgr.get("127.0.0.1:3001").unwrap();
        let _ = mgr.get("127.0.0.1:3002").unwrap();

        assert_eq!(mgr.pool.channels.len(), 2);
        let access = mgr
            .pool
            .channels
            .get("127.0.0.1:3001")
            .unwrap()
            .access
            .load(Ordering::Relaxed);
        assert_eq!(access, 2);
    }

    #[tokio::test]
    async fn test_access_counter_reset_on_recycle() {
        let mgr = ChannelManager::new();
        let _ = mgr.get("127.0.0.1:3001").unwrap();

        mgr.pool
            .retain_channel(|_, c| c.access.swap(0, Ordering::Relaxed) > 0);
        assert_eq!(mgr.pool.channels.len(), 1);

        // Second sweep sees no access since the last one and drops the entry.
        mgr.pool
            .retain_channel(|_, c| c.access.swap(0, Ordering::Relaxed) > 0);
        assert_eq!(mgr.pool.channels.len(), 0);
    }

    #[test]
    fn test_config_builder() {
        let config = ChannelConfig::new()
            .timeout(Some(Duration::from_secs(3)))
            .connect_timeout(Duration::from_secs(5))
            .max_message_size(1024);
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_message_size, 1024);
    }
}
