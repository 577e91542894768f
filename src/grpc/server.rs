//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::throttle_server::ThrottleServer;
use super::service::ThrottleServiceImpl;
use crate::config::RemoteConfig;
use crate::error::{Result, ThrottleError};
use crate::throttle::Engine;

/// gRPC server for the throttle service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The throttle engine
    engine: Arc<Engine>,
    /// Remote method settings
    remote: RemoteConfig,
}

impl GrpcServer {
    /// Create a new gRPC server.
    pub fn new(addr: SocketAddr, engine: Arc<Engine>, remote: RemoteConfig) -> Self {
        Self {
            addr,
            engine,
            remote,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn service(&self) -> ThrottleServer<ThrottleServiceImpl> {
        ThrottleServer::new(ThrottleServiceImpl::new(
            self.engine.clone(),
            self.remote.clone(),
        ))
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.addr, "Starting gRPC server for Throttle");

        Server::builder()
            .add_service(self.service())
            .serve(self.addr)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                ThrottleError::Grpc(e)
            })
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        info!(
            addr = %self.addr,
            "Starting gRPC server for Throttle with graceful shutdown"
        );

        Server::builder()
            .add_service(self.service())
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                ThrottleError::Grpc(e)
            })
    }

    /// Serve on an already bound listener until `signal` resolves.
    ///
    /// The configured address is ignored.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        info!(addr = ?listener.local_addr().ok(), "Starting gRPC server for Throttle on listener");

        Server::builder()
            .add_service(self.service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                ThrottleError::Grpc(e)
            })
    }
}
