//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::gatekeeper::v1::gatekeeper_server::GatekeeperServer;
use super::service::GatekeeperService;
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::LimiterRegistry;

/// gRPC server for the Gatekeeper service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The limiter registry served to clients
    registry: Arc<LimiterRegistry>,
}

impl GrpcServer {
    /// Create a new gRPC server over a limiter registry.
    pub fn new(addr: SocketAddr, registry: Arc<LimiterRegistry>) -> Self {
        Self { addr, registry }
    }

    /// The address the server binds to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = GatekeeperService::new(self.registry);

        info!(
            addr = %self.addr,
            "Starting gRPC server for Gatekeeper with graceful shutdown"
        );

        Server::builder()
            .add_service(GatekeeperServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                GatekeeperError::Grpc(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{LimiterPolicies, MemoryStore, SystemClock};
    use std::time::Duration;

    fn create_registry() -> Arc<LimiterRegistry> {
        Arc::new(
            LimiterRegistry::from_policies(
                &LimiterPolicies::default(),
                Arc::new(MemoryStore::new()),
                Arc::new(SystemClock),
                false,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8082".parse().unwrap();
        let server = GrpcServer::new(addr, create_registry());
        assert_eq!(server.addr(), addr);
    }

    #[tokio::test]
    async fn test_server_shuts_down_on_signal() {
        let addr: SocketAddr = "127.0.0.1:18082".parse().unwrap();
        let server = GrpcServer::new(addr, create_registry());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server.serve_with_shutdown(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await;

        assert!(result.is_ok(), "server did not stop after the shutdown signal");
        tokio_test::assert_ok!(result.unwrap());
    }
}
