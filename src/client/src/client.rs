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

use arrow_flight::flight_service_client::FlightServiceClient;
use common_grpc::channel_manager::ChannelManager;
use snafu::ResultExt;
use tonic::transport::Channel;

use crate::error::{CreateChannelSnafu, Result};

/// Shared handle for talking Flight to workers. Cheap to clone; channels are
/// pooled per address underneath.
#[derive(Clone, Debug, Default)]
pub struct Client {
    channel_manager: ChannelManager,
}

impl Client {
    pub fn new(channel_manager: ChannelManager) -> Self {
        Self { channel_manager }
    }

    pub fn make_flight_client(&self, addr: &str) -> Result<FlightServiceClient<Channel>> {
        let channel = self
            .channel_manager
            .get(addr)
            .context(CreateChannelSnafu { addr })?;

        let max_message_size = self.channel_manager.config().max_message_size;
        Ok(FlightServiceClient::new(channel)
            .max_decoding_message_size(max_message_size)
            .max_encoding_message_size(max_message_size))
    }
}
