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

use std::net::SocketAddr;
use std::sync::Arc;

use arrow_flight::flight_service_server::FlightServiceServer;
use common_telemetry::info;
use futures::FutureExt;
use snafu::{ensure, ResultExt};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tonic::transport::server::TcpIncoming;

use crate::config::WorkerConfig;
use crate::error::{AlreadyStartedSnafu, Result, StartGrpcSnafu, TcpBindSnafu, TcpIncomingSnafu};
use crate::flight::SearchFlightService;

/// gRPC server hosting the flight search service on one worker node.
pub struct WorkerServer {
    config: WorkerConfig,
    service: Mutex<Option<SearchFlightService>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl WorkerServer {
    pub fn new(config: WorkerConfig, service: SearchFlightService) -> Self {
        Self {
            config,
            service: Mutex::new(Some(service)),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Binds `addr` and serves in a background task. Returns the bound
    /// address, which differs from `addr` when port 0 was requested.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let service = {
            let mut service = self.service.lock().await;
            let Some(service) = service.take() else {
                return AlreadyStartedSnafu.fail();
            };
            service
        };

        let (tx, rx) = oneshot::channel();
        let (incoming, addr) = {
            let mut shutdown_tx = self.shutdown_tx.lock().await;
            ensure!(shutdown_tx.is_none(), AlreadyStartedSnafu);

            let listener = TcpListener::bind(addr)
                .await
                .context(TcpBindSnafu { addr })?;
            let addr = listener.local_addr().context(TcpBindSnafu { addr })?;
            let incoming =
                TcpIncoming::from_listener(listener, true, None).context(TcpIncomingSnafu)?;
            info!("worker gRPC server is bound to {}", addr);

            *shutdown_tx = Some(tx);

            (incoming, addr)
        };

        let max_message_size = self.config.max_grpc_message_size;
        let flight_service = FlightServiceServer::new(service)
            .max_decoding_message_size(max_message_size)
            .max_encoding_message_size(max_message_size);

        let builder = tonic::transport::Server::builder().add_service(flight_service);
        let _handle = tokio::spawn(async move {
            if let Err(e) = builder
                .serve_with_incoming_shutdown(incoming, rx.map(drop))
                .await
                .context(StartGrpcSnafu)
            {
                common_telemetry::error!("worker gRPC server exited with error: {e}");
            }
        });
        Ok(addr)
    }

    pub async fn shutdown(&self) {
        let mut shutdown_tx = self.shutdown_tx.lock().await;
        if let Some(tx) = shutdown_tx.take() {
            if tx.send(()).is_err() {
                info!("Receiver dropped, the worker gRPC server has already exited");
            }
        }
        info!("Shutdown worker gRPC server");
    }
}

/// Convenience wiring for a whole worker process: store, engine, index,
/// handler, flight service, server.
pub fn build_server(
    config: WorkerConfig,
    store: crate::store::FileStoreRef,
    engine: crate::engine::ScanEngineRef,
    index: crate::index::IndexReaderRef,
    gateway: Option<Arc<crate::gateway::SuperClusterGateway>>,
) -> WorkerServer {
    let handler = Arc::new(crate::handler::SearchHandler::new(
        config.clone(),
        store,
        engine,
        index,
    ));
    let service = SearchFlightService::new(handler, gateway);
    WorkerServer::new(config, service)
}
