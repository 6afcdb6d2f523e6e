//! In-process transport backed by [`SimulatedDevice`]s.

use super::{split_address, Link, Transport};
use crate::error::{AmcError, AmcResult};
use crate::protocol::{Request, Value};
use crate::simulator::{SessionId, SimulatedDevice};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Shared handle to one simulated device.
pub type SharedDevice = Arc<Mutex<SimulatedDevice>>;

/// Transport that reaches devices living in this process.
///
/// Devices are registered under an address; several links to the same
/// address share the device, each as its own session.
#[derive(Clone, Default)]
pub struct SimulatedTransport {
    devices: HashMap<String, SharedDevice>,
}

impl SimulatedTransport {
    /// Transport with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport with one device at `address`.
    pub fn single(address: &str, serial_number: &str) -> Self {
        let mut transport = Self::new();
        transport.add_device(address, SimulatedDevice::new(serial_number));
        transport
    }

    /// Register `device` under `address` and return the shared handle.
    pub fn add_device(&mut self, address: &str, device: SimulatedDevice) -> SharedDevice {
        let shared = Arc::new(Mutex::new(device));
        self.devices.insert(address.to_string(), shared.clone());
        shared
    }

    /// Device registered under `address`.
    pub fn device(&self, address: &str) -> Option<SharedDevice> {
        self.devices.get(address).cloned()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn open(&self, address: &str) -> AmcResult<Box<dyn Link>> {
        if split_address(address, super::DEFAULT_PORT).is_none() {
            return Err(AmcError::BadAddress(address.to_string()));
        }
        let device = self
            .devices
            .get(address)
            .cloned()
            .ok_or_else(|| AmcError::NoDeviceFound(address.to_string()))?;
        let session = device.lock().await.open_session();
        debug!(address, session, "simulated link opened");
        Ok(Box::new(SimulatedLink {
            device,
            session: Some(session),
        }))
    }
}

struct SimulatedLink {
    device: SharedDevice,
    session: Option<SessionId>,
}

#[async_trait]
impl Link for SimulatedLink {
    async fn exchange(&mut self, request: Request) -> AmcResult<Value> {
        let session = self.session.ok_or(AmcError::NotConnected)?;
        self.device.lock().await.handle(session, &request)
    }

    async fn close(&mut self) -> AmcResult<()> {
        if let Some(session) = self.session.take() {
            self.device.lock().await.close_session(session);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusKey;

    #[tokio::test]
    async fn open_checks_address() {
        let transport = SimulatedTransport::single("10.0.0.5", "SIM-1");
        assert!(matches!(
            transport.open("10.0.0.6").await,
            Err(AmcError::NoDeviceFound(_))
        ));
        assert!(matches!(
            transport.open("bad address").await,
            Err(AmcError::BadAddress(_))
        ));
        assert!(transport.open("10.0.0.5").await.is_ok());
    }

    #[tokio::test]
    async fn closed_link_is_not_connected() {
        let transport = SimulatedTransport::single("sim", "SIM-2");
        let mut link = transport.open("sim").await.unwrap();
        let serial = link
            .exchange(Request::Status {
                axis: None,
                status: StatusKey::SerialNumber,
            })
            .await
            .unwrap();
        assert_eq!(serial, Value::Text("SIM-2".into()));

        link.close().await.unwrap();
        assert!(matches!(
            link.exchange(Request::Positioners).await,
            Err(AmcError::NotConnected)
        ));
    }
}
