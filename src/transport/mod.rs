//! Links between the facade and a controller.
//!
//! [`Transport`] opens a [`Link`] to the device at an address; a link carries
//! one [`Request`] at a time and returns the device's answer. The facade only
//! ever sees these two traits, so the simulated controller and a real socket
//! are interchangeable.

mod simulated;
mod tcp;

pub use simulated::{SharedDevice, SimulatedTransport};
pub use tcp::{TcpTransport, DEFAULT_PORT, DEFAULT_TIMEOUT_MS};

use crate::error::AmcResult;
use crate::protocol::{Request, Value};
use async_trait::async_trait;

/// Opens links to devices.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the device at `address`.
    async fn open(&self, address: &str) -> AmcResult<Box<dyn Link>>;
}

/// An open connection to one device.
#[async_trait]
pub trait Link: Send {
    /// Send one request and wait for its answer.
    async fn exchange(&mut self, request: Request) -> AmcResult<Value>;

    /// End the session. Further exchanges fail with `NotConnected`.
    async fn close(&mut self) -> AmcResult<()>;
}

/// Split `host[:port]`, checking that the host part is usable.
pub(crate) fn split_address(address: &str, default_port: u16) -> Option<(String, u16)> {
    let address = address.trim();
    if address.is_empty() || address.chars().any(char::is_whitespace) {
        return None;
    }
    match address.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() || host.contains(':') {
                return None;
            }
            let port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
            Some((host.to_string(), port))
        }
        None => Some((address.to_string(), default_port)),
    }
}
