//! # AMC100 Client Library
//!
//! Typed async client for the AMC100 piezo positioning controller, together
//! with a simulated controller that answers the same request/response
//! protocol in process or over TCP.
//!
//! ## Crate Structure
//!
//! - **`device`**: The `Amc100` facade. Opens sessions, hands out
//!   `DeviceHandle`s and exposes one query and one command per parameter.
//! - **`transport`**: The `Transport`/`Link` seam with a TCP (JSON-RPC) and an
//!   in-process simulated implementation.
//! - **`protocol`**: Requests, values, parameter keys and the wire envelope.
//! - **`simulator`**: Simulated device state, actor presets, lock handling.
//! - **`server`**: TCP server exposing a simulated device.
//! - **`stage`**: The `Movable` capability implemented on one axis.
//! - **`compat`**: Blocking mirror of the vendor C conventions (integer codes,
//!   value slot plus `set` flag, caller-supplied string buffers).
//! - **`error`**: `AmcError`, the fixed `NcbCode` taxonomy and `Recovery`.
//! - **`types`**: Handles, axes, enumerations, actor parameters.
//! - **`config`**: Figment-based configuration (`amc100.toml` + `AMC100_` env).
//! - **`logging`**: `tracing-subscriber` setup.
//!
//! ## Quick start
//!
//! ```no_run
//! use amc100::{Amc100, TcpTransport};
//!
//! # async fn demo() -> amc100::AmcResult<()> {
//! let amc = Amc100::new(TcpTransport::new());
//! let handle = amc.connect("192.168.1.1").await?;
//! let accepted = amc.set_amplitude(handle, 0, 45_000).await?;
//! println!("amplitude now {accepted} mV");
//! amc.close(handle).await?;
//! # Ok(())
//! # }
//! ```

pub mod compat;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod simulator;
pub mod stage;
pub mod transport;
pub mod types;

pub use compat::CompatApi;
pub use config::Amc100Config;
pub use device::Amc100;
pub use error::{AmcError, AmcResult, NcbCode, Recovery};
pub use protocol::{Setting, StatusKey, Value};
pub use server::SimulatorServer;
pub use simulator::SimulatedDevice;
pub use stage::{AxisStage, Movable};
pub use transport::{Link, SimulatedTransport, TcpTransport, Transport};
pub use types::{
    ActorParameters, ActorType, Axis, DeviceHandle, LockStatus, MovingStatus, RtInLoopMode,
    RtInMode, RtOutMode,
};
