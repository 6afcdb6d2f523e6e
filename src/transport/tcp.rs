//! Line-delimited JSON-RPC client over TCP.
//!
//! Each request is written as one line and answered by one line carrying the
//! same id. Connection set-up and every reply are bounded by timeouts.

use super::{split_address, Link, Transport};
use crate::error::{AmcError, AmcResult};
use crate::protocol::{encode_request, Request, RpcResponse, Value};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};

/// Default port of the JSON-RPC service.
pub const DEFAULT_PORT: u16 = 9090;

/// Default reply timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Opens JSON-RPC links to controllers on the network.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    default_port: u16,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl TcpTransport {
    /// Transport with default port and timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Port used when an address carries none.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Upper bound for establishing the connection.
    pub fn with_connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = duration;
        self
    }

    /// Upper bound for each reply.
    pub fn with_request_timeout(mut self, duration: Duration) -> Self {
        self.request_timeout = duration;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, address: &str) -> AmcResult<Box<dyn Link>> {
        let (host, port) = split_address(address, self.default_port)
            .ok_or_else(|| AmcError::BadAddress(address.to_string()))?;

        let stream = match timeout(self.connect_timeout, TcpStream::connect((host.as_str(), port)))
            .await
        {
            Err(_) => {
                return Err(AmcError::ConnectionTimeout(format!(
                    "no answer from {host}:{port} within {:?}",
                    self.connect_timeout
                )))
            }
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                return Err(AmcError::NoDeviceFound(format!("{host}:{port}")))
            }
            Ok(Err(e)) => {
                return Err(AmcError::NetworkError(format!(
                    "failed to connect to {host}:{port}: {e}"
                )))
            }
            Ok(Ok(stream)) => stream,
        };

        // Requests are small and latency bound.
        stream
            .set_nodelay(true)
            .map_err(|e| AmcError::NetworkError(format!("set_nodelay failed: {e}")))?;

        tracing::info!("Connected to AMC100 at {}:{}", host, port);

        Ok(Box::new(TcpLink {
            stream: Some(BufReader::new(stream)),
            peer: format!("{host}:{port}"),
            next_id: 1,
            pending: String::new(),
            timeout: self.request_timeout,
        }))
    }
}

struct TcpLink {
    stream: Option<BufReader<TcpStream>>,
    peer: String,
    next_id: u64,
    /// Partial reply line left by a timed-out read.
    pending: String,
    timeout: Duration,
}

#[async_trait]
impl Link for TcpLink {
    async fn exchange(&mut self, request: Request) -> AmcResult<Value> {
        let stream = self.stream.as_mut().ok_or(AmcError::NotConnected)?;
        let id = self.next_id;
        self.next_id += 1;

        let mut line = encode_request(id, &request)?;
        tracing::debug!(peer = %self.peer, id, method = request.method(), "request");
        line.push('\n');

        stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| AmcError::NetworkError(format!("failed to send request: {e}")))?;
        stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| AmcError::NetworkError(format!("failed to flush stream: {e}")))?;

        // Replies to requests that timed out earlier may still be queued
        // ahead of ours; they carry lower ids and are dropped.
        let deadline = Instant::now() + self.timeout;
        let response = loop {
            match timeout_at(deadline, stream.read_line(&mut self.pending)).await {
                Ok(Ok(0)) => {
                    return Err(AmcError::NetworkError(
                        "connection closed by device".to_string(),
                    ));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    return Err(AmcError::NetworkError(format!("failed to read reply: {e}")))
                }
                Err(_) => {
                    return Err(AmcError::ConnectionTimeout(format!(
                        "no reply to '{}' within {:?}",
                        request.method(),
                        self.timeout
                    )))
                }
            }

            let reply = std::mem::take(&mut self.pending);
            let response: RpcResponse = serde_json::from_str(reply.trim())
                .map_err(|e| AmcError::DriverError(format!("malformed reply: {e}")))?;
            if response.id < id {
                tracing::debug!(peer = %self.peer, id = response.id, "dropping stale reply");
                continue;
            }
            if response.id != id {
                return Err(AmcError::DriverError(format!(
                    "reply id {} does not match request id {id}",
                    response.id
                )));
            }
            break response;
        };
        tracing::debug!(peer = %self.peer, id, ok = response.error.is_none(), "reply");
        response.into_outcome()
    }

    async fn close(&mut self) -> AmcResult<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.get_mut().shutdown().await {
                tracing::warn!(peer = %self.peer, "shutdown failed: {}", e);
            }
            tracing::info!("Disconnected from AMC100 at {}", self.peer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn refused_connection_is_no_device() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TcpTransport::new().open(&addr.to_string()).await;
        assert!(matches!(result, Err(AmcError::NoDeviceFound(_))));
    }

    #[tokio::test]
    async fn malformed_address_is_rejected() {
        let result = TcpTransport::new().open("127.0.0.1:99999").await;
        assert!(matches!(result, Err(AmcError::BadAddress(_))));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let holder = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let transport = TcpTransport::new().with_request_timeout(Duration::from_millis(100));
        let mut link = transport.open(&addr.to_string()).await.unwrap();
        let result = link.exchange(Request::Positioners).await;
        assert!(matches!(result, Err(AmcError::ConnectionTimeout(_))));
        holder.abort();
    }

    #[tokio::test]
    async fn late_reply_is_skipped_after_timeout() {
        use crate::protocol::{decode_request, RpcResponse};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut first = true;
            loop {
                let mut line = String::new();
                if socket.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let (id, _) = decode_request(line.trim()).unwrap();
                if first {
                    first = false;
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                let reply = RpcResponse::from_outcome(id, &Ok(Value::Int(id as i32)));
                let mut reply = serde_json::to_string(&reply).unwrap();
                reply.push('\n');
                socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let transport = TcpTransport::new().with_request_timeout(Duration::from_millis(100));
        let mut link = transport.open(&addr.to_string()).await.unwrap();

        let err = link.exchange(Request::Positioners).await.unwrap_err();
        assert!(matches!(err, AmcError::ConnectionTimeout(_)));
        assert_eq!(err.recovery(), crate::error::Recovery::Retry);

        tokio::time::sleep(Duration::from_millis(400)).await;
        for expected in 2..=4 {
            let value = link.exchange(Request::Positioners).await.unwrap();
            assert_eq!(value, Value::Int(expected));
        }
    }

    #[tokio::test]
    async fn garbage_reply_is_driver_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut line = String::new();
            socket.read_line(&mut line).await.unwrap();
            socket.get_mut().write_all(b"hello\n").await.unwrap();
        });

        let mut link = TcpTransport::new().open(&addr.to_string()).await.unwrap();
        let result = link.exchange(Request::Reboot).await;
        assert!(matches!(result, Err(AmcError::DriverError(_))));
    }
}
