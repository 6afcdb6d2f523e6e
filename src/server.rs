//! TCP front end for a simulated controller.
//!
//! Every accepted connection becomes one session of the shared device.
//! Requests on a connection are answered strictly in order; a line that is
//! not a valid request is answered with a driver error and the connection
//! stays open.

use crate::error::{AmcError, AmcResult};
use crate::protocol::{decode_request, RpcResponse};
use crate::simulator::{SessionId, SimulatedDevice};
use crate::transport::SharedDevice;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Serves one simulated device over line-delimited JSON-RPC.
pub struct SimulatorServer {
    listener: TcpListener,
    device: SharedDevice,
}

impl SimulatorServer {
    /// Bind `addr` and serve `device`.
    pub async fn bind(addr: &str, device: SimulatedDevice) -> AmcResult<Self> {
        Self::bind_shared(addr, Arc::new(Mutex::new(device))).await
    }

    /// Bind `addr` and serve a device that is also reachable elsewhere.
    pub async fn bind_shared(addr: &str, device: SharedDevice) -> AmcResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AmcError::NetworkError(format!("failed to bind {addr}: {e}")))?;
        info!("Simulator listening on {}", addr);
        Ok(Self { listener, device })
    }

    /// Address actually bound, useful with port 0.
    pub fn local_addr(&self) -> AmcResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Device served by this server.
    pub fn device(&self) -> SharedDevice {
        self.device.clone()
    }

    /// Serve until the task is dropped.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` completes. Open connections keep running.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let device = self.device.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_client(socket, addr, device).await {
                                    warn!("Client {} error: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Simulator shutting down");
                    break;
                }
            }
        }
    }

    /// Run in the background.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn handle_client(
        socket: TcpStream,
        addr: SocketAddr,
        device: SharedDevice,
    ) -> AmcResult<()> {
        info!("Client connected: {}", addr);
        let session = device.lock().await.open_session();

        let result = Self::serve_session(socket, addr, &device, session).await;

        device.lock().await.close_session(session);
        info!("Client {} session closed", addr);
        result
    }

    async fn serve_session(
        socket: TcpStream,
        addr: SocketAddr,
        device: &SharedDevice,
        session: SessionId,
    ) -> AmcResult<()> {
        let mut socket = BufReader::new(socket);
        let mut line = String::new();

        loop {
            line.clear();
            if socket.read_line(&mut line).await? == 0 {
                info!("Client {} disconnected", addr);
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }

            let response = match decode_request(line.trim()) {
                Ok((id, request)) => {
                    debug!(%addr, id, method = request.method(), "request");
                    let outcome = device.lock().await.handle(session, &request);
                    RpcResponse::from_outcome(id, &outcome)
                }
                Err((id, e)) => {
                    warn!("Failed to decode request from {}: {}", addr, e);
                    RpcResponse::from_outcome(id.unwrap_or(0), &Err(e))
                }
            };

            let mut encoded = serde_json::to_string(&response)
                .map_err(|e| AmcError::Protocol(format!("failed to encode response: {e}")))?;
            encoded.push('\n');
            socket.get_mut().write_all(encoded.as_bytes()).await?;
        }
    }
}
