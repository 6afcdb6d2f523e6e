//! Device control facade.
//!
//! [`Amc100`] keeps a table of open sessions keyed by [`DeviceHandle`] and
//! turns every typed call into one request/response exchange over the
//! session's [`Link`]. Calls on the same handle are serialized; different
//! handles proceed concurrently.
//!
//! Every tunable quantity is split into a query (`amplitude`) and a command
//! (`set_amplitude`). Commands return the value the device actually
//! accepted, which may differ from the requested one when the device clamps.
//!
//! ```rust,ignore
//! let amc = Amc100::new(TcpTransport::new());
//! let handle = amc.connect("192.168.1.1").await?;
//! amc.set_amplitude(handle, 0, 45_000).await?;
//! amc.set_output(handle, 0, true).await?;
//! amc.close(handle).await?;
//! ```

use crate::error::{AmcError, AmcResult};
use crate::protocol::{Request, Setting, StatusKey, Value};
use crate::transport::{Link, Transport};
use crate::types::{
    ActorParameters, ActorType, Axis, DeviceHandle, LockStatus, MovingStatus, RtInLoopMode,
    RtInMode, RtOutMode,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

type SharedLink = Arc<Mutex<Box<dyn Link>>>;

/// Generates the query/command pair of an axis-scoped integer setting.
macro_rules! int_setting {
    ($(#[$doc:meta])* $get:ident, $set:ident, $setting:expr) => {
        $(#[$doc])*
        pub async fn $get(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<i32> {
            self.read_setting(handle, Some(axis), $setting).await?.into_int()
        }

        $(#[$doc])*
        ///
        /// Returns the accepted value.
        pub async fn $set(&self, handle: DeviceHandle, axis: Axis, value: i32) -> AmcResult<i32> {
            self.write_setting(handle, Some(axis), $setting, Value::Int(value))
                .await?
                .into_int()
        }
    };
}

/// Generates the query/command pair of an axis-scoped flag.
macro_rules! bool_setting {
    ($(#[$doc:meta])* $get:ident, $set:ident, $setting:expr) => {
        $(#[$doc])*
        pub async fn $get(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<bool> {
            self.read_setting(handle, Some(axis), $setting).await?.into_bool()
        }

        $(#[$doc])*
        ///
        /// Returns the accepted value.
        pub async fn $set(
            &self,
            handle: DeviceHandle,
            axis: Axis,
            enable: bool,
        ) -> AmcResult<bool> {
            self.write_setting(handle, Some(axis), $setting, Value::Bool(enable))
                .await?
                .into_bool()
        }
    };
}

/// Client for one or more AMC100 controllers.
pub struct Amc100 {
    transport: Arc<dyn Transport>,
    sessions: RwLock<HashMap<DeviceHandle, SharedLink>>,
    next_handle: AtomicI32,
}

impl Amc100 {
    /// Facade that opens sessions through `transport`.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_transport(Arc::new(transport))
    }

    /// Facade over an already shared transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sessions: RwLock::new(HashMap::new()),
            next_handle: AtomicI32::new(1),
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Open a session to the device at `address`.
    pub async fn connect(&self, address: &str) -> AmcResult<DeviceHandle> {
        let link = self.transport.open(address).await?;
        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.sessions
            .write()
            .await
            .insert(handle, Arc::new(Mutex::new(link)));
        info!(%handle, address, "connected");
        Ok(handle)
    }

    /// Close a session. The handle is never handed out again.
    pub async fn close(&self, handle: DeviceHandle) -> AmcResult<()> {
        let link = self
            .sessions
            .write()
            .await
            .remove(&handle)
            .ok_or(AmcError::NotConnected)?;
        let result = link.lock().await.close().await;
        if let Err(e) = &result {
            warn!(%handle, "close reported {}", e);
        }
        info!(%handle, "closed");
        result
    }

    /// Whether `handle` refers to an open session.
    pub async fn is_open(&self, handle: DeviceHandle) -> bool {
        self.sessions.read().await.contains_key(&handle)
    }

    /// Handles of all open sessions, in ascending order.
    pub async fn handles(&self) -> Vec<DeviceHandle> {
        let mut handles: Vec<_> = self.sessions.read().await.keys().copied().collect();
        handles.sort();
        handles
    }

    async fn request(&self, handle: DeviceHandle, request: Request) -> AmcResult<Value> {
        let link = self
            .sessions
            .read()
            .await
            .get(&handle)
            .cloned()
            .ok_or(AmcError::NotConnected)?;
        let method = request.method();
        let outcome = link.lock().await.exchange(request).await;
        match &outcome {
            Ok(_) => debug!(%handle, method, "ok"),
            Err(e) => debug!(%handle, method, code = e.code().as_i32(), "failed: {}", e),
        }
        outcome
    }

    // ========================================================================
    // Generic access
    // ========================================================================

    /// Read any setting. `axis` must be given exactly for axis-scoped ones.
    pub async fn read_setting(
        &self,
        handle: DeviceHandle,
        axis: Option<Axis>,
        setting: Setting,
    ) -> AmcResult<Value> {
        self.request(handle, Request::Read { axis, setting }).await
    }

    /// Write any setting and return the accepted value.
    pub async fn write_setting(
        &self,
        handle: DeviceHandle,
        axis: Option<Axis>,
        setting: Setting,
        value: Value,
    ) -> AmcResult<Value> {
        self.request(
            handle,
            Request::Write {
                axis,
                setting,
                value,
            },
        )
        .await
    }

    /// Read any status quantity.
    pub async fn read_status(
        &self,
        handle: DeviceHandle,
        axis: Option<Axis>,
        status: StatusKey,
    ) -> AmcResult<Value> {
        self.request(handle, Request::Status { axis, status }).await
    }

    async fn axis_status(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        key: StatusKey,
    ) -> AmcResult<Value> {
        self.read_status(handle, Some(axis), key).await
    }

    async fn device_string(&self, handle: DeviceHandle, key: StatusKey) -> AmcResult<String> {
        self.read_status(handle, None, key).await?.into_text()
    }

    // ========================================================================
    // Access control
    // ========================================================================

    /// Lock state as seen by this session.
    pub async fn lock_status(&self, handle: DeviceHandle) -> AmcResult<LockStatus> {
        self.request(handle, Request::LockStatus).await?.into_lock()
    }

    /// Lock the device with `password`. This session stays authorized.
    pub async fn lock(&self, handle: DeviceHandle, password: &str) -> AmcResult<()> {
        self.request(
            handle,
            Request::Lock {
                password: password.to_string(),
            },
        )
        .await?
        .into_unit()
    }

    /// Authorize this session on a locked device.
    pub async fn grant_access(&self, handle: DeviceHandle, password: &str) -> AmcResult<()> {
        self.request(
            handle,
            Request::GrantAccess {
                password: password.to_string(),
            },
        )
        .await?
        .into_unit()
    }

    /// Remove the lock.
    pub async fn unlock(&self, handle: DeviceHandle) -> AmcResult<()> {
        self.request(handle, Request::Unlock).await?.into_unit()
    }

    /// Text for a result code as provided by the device. `lang` 0 is
    /// English, 1 German.
    pub async fn error_text(
        &self,
        handle: DeviceHandle,
        lang: i32,
        code: i32,
    ) -> AmcResult<String> {
        self.request(handle, Request::ErrorText { lang, code })
            .await?
            .into_text()
    }

    // ========================================================================
    // Axis control
    // ========================================================================

    bool_setting!(
        /// Output relay of the axis.
        output, set_output, Setting::Output
    );
    int_setting!(
        /// Drive amplitude in mV.
        amplitude, set_amplitude, Setting::Amplitude
    );
    int_setting!(
        /// Drive frequency in mHz.
        frequency, set_frequency, Setting::Frequency
    );
    int_setting!(
        /// Index of the actor preset loaded on the axis.
        actor_selection, set_actor_selection, Setting::ActorSelection
    );
    bool_setting!(
        /// Approach to the target position.
        approach, set_approach, Setting::Move
    );
    bool_setting!(
        /// Continuous motion forward.
        continuous_forward, set_continuous_forward, Setting::ContinuousFwd
    );
    bool_setting!(
        /// Continuous motion backward.
        continuous_backward, set_continuous_backward, Setting::ContinuousBkwd
    );
    int_setting!(
        /// Target position in nm (linear) or µ° (goniometer, rotator).
        target_position, set_target_position, Setting::TargetPosition
    );
    bool_setting!(
        /// Update the reference position every time the mark is passed.
        reference_auto_update, set_reference_auto_update, Setting::ReferenceAutoUpdate
    );
    bool_setting!(
        /// Reset the position every time the reference is passed.
        auto_reset, set_auto_reset, Setting::AutoReset
    );
    int_setting!(
        /// Window around the target for the in-range flag, nm or µ°.
        target_range, set_target_range, Setting::TargetRange
    );
    bool_setting!(
        /// Deactivate the output when end of travel is detected.
        eot_output_deactivate, set_eot_output_deactivate, Setting::EotOutputDeactivate
    );
    int_setting!(
        /// DC output level in µV.
        fix_output_voltage, set_fix_output_voltage, Setting::FixOutputVoltage
    );
    int_setting!(
        /// AQuadB input resolution in nm.
        aquadb_in_resolution, set_aquadb_in_resolution, Setting::AquadbInResolution
    );
    bool_setting!(
        /// AQuadB position output.
        aquadb_out, set_aquadb_out, Setting::AquadbOut
    );
    int_setting!(
        /// AQuadB output resolution in nm.
        aquadb_out_resolution, set_aquadb_out_resolution, Setting::AquadbOutResolution
    );
    int_setting!(
        /// AQuadB output clock in multiples of 20 ns.
        aquadb_out_clock, set_aquadb_out_clock, Setting::AquadbOutClock
    );
    int_setting!(
        /// Closed-loop position change per real-time input pulse, nm.
        rt_in_change_per_pulse, set_rt_in_change_per_pulse, Setting::RtInChangePerPulse
    );
    int_setting!(
        /// Open-loop steps per real-time input pulse.
        rt_in_steps_per_pulse, set_rt_in_steps_per_pulse, Setting::RtInStepsPerPulse
    );
    bool_setting!(
        /// Motion driven by the real-time input.
        rt_in_move, set_rt_in_move, Setting::RtInMove
    );

    /// Real-time input mode.
    pub async fn rt_in_mode(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<RtInMode> {
        let raw = self
            .read_setting(handle, Some(axis), Setting::RtInMode)
            .await?
            .into_int()?;
        reply_enum(raw)
    }

    /// Set the real-time input mode. Returns the accepted mode.
    pub async fn set_rt_in_mode(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        mode: RtInMode,
    ) -> AmcResult<RtInMode> {
        let raw = self
            .write_setting(handle, Some(axis), Setting::RtInMode, Value::Int(mode.into()))
            .await?
            .into_int()?;
        reply_enum(raw)
    }

    /// Real-time input loop mode.
    pub async fn rt_in_loop_mode(
        &self,
        handle: DeviceHandle,
        axis: Axis,
    ) -> AmcResult<RtInLoopMode> {
        let raw = self
            .read_setting(handle, Some(axis), Setting::RtInLoopMode)
            .await?
            .into_int()?;
        reply_enum(raw)
    }

    /// Set the real-time input loop mode. Returns the accepted mode.
    pub async fn set_rt_in_loop_mode(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        mode: RtInLoopMode,
    ) -> AmcResult<RtInLoopMode> {
        let raw = self
            .write_setting(handle, Some(axis), Setting::RtInLoopMode, Value::Int(mode.into()))
            .await?
            .into_int()?;
        reply_enum(raw)
    }

    /// Zero the position and invalidate the reference.
    pub async fn reset_position(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<()> {
        self.request(handle, Request::ResetPosition { axis })
            .await?
            .into_unit()
    }

    /// Trigger `count` single steps forward or backward.
    pub async fn step(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        backward: bool,
        count: i32,
    ) -> AmcResult<()> {
        self.request(
            handle,
            Request::Step {
                axis,
                backward,
                count,
            },
        )
        .await?
        .into_unit()
    }

    /// Step count of the last step command.
    pub async fn n_steps(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<i32> {
        self.axis_status(handle, axis, StatusKey::NSteps)
            .await?
            .into_int()
    }

    // ========================================================================
    // Actor configuration
    // ========================================================================

    /// Name of the actor on the axis.
    pub async fn actor_name(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<String> {
        self.axis_status(handle, axis, StatusKey::ActorName)
            .await?
            .into_text()
    }

    /// Type of the actor on the axis.
    pub async fn actor_type(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<ActorType> {
        let raw = self
            .axis_status(handle, axis, StatusKey::ActorType)
            .await?
            .into_int()?;
        reply_enum(raw)
    }

    /// Load the preset named `name`.
    pub async fn select_actor_by_name(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        name: &str,
    ) -> AmcResult<()> {
        self.request(
            handle,
            Request::SelectActorByName {
                axis,
                name: name.to_string(),
            },
        )
        .await?
        .into_unit()
    }

    /// Describe the actor completely.
    pub async fn set_actor_parameters(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        parameters: ActorParameters,
    ) -> AmcResult<()> {
        self.request(handle, Request::SetActorParameters { axis, parameters })
            .await?
            .into_unit()
    }

    /// Full description of the actor.
    pub async fn actor_parameters(
        &self,
        handle: DeviceHandle,
        axis: Axis,
    ) -> AmcResult<ActorParameters> {
        self.request(handle, Request::ActorParameters { axis })
            .await?
            .into_actor()
    }

    /// Write one actor parameter as an integer. Direction flags take any
    /// non-zero value as true.
    pub async fn set_actor_parameter(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        name: &str,
        value: i32,
    ) -> AmcResult<()> {
        self.request(
            handle,
            Request::SetActorParameter {
                axis,
                name: name.to_string(),
                value: Value::Int(value),
            },
        )
        .await?
        .into_unit()
    }

    /// Write one boolean actor parameter (`sensor_dir`, `actor_dir`).
    pub async fn set_actor_parameter_bool(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        name: &str,
        value: bool,
    ) -> AmcResult<()> {
        self.request(
            handle,
            Request::SetActorParameter {
                axis,
                name: name.to_string(),
                value: Value::Bool(value),
            },
        )
        .await?
        .into_unit()
    }

    /// Read one actor parameter, rendered as text.
    pub async fn actor_parameter(
        &self,
        handle: DeviceHandle,
        axis: Axis,
        name: &str,
    ) -> AmcResult<String> {
        self.request(
            handle,
            Request::ActorParameter {
                axis,
                name: name.to_string(),
            },
        )
        .await?
        .into_text()
    }

    /// Names of all actor presets, one per line.
    pub async fn positioners(&self, handle: DeviceHandle) -> AmcResult<String> {
        self.request(handle, Request::Positioners).await?.into_text()
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Whether the reference position is valid.
    pub async fn reference_valid(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<bool> {
        self.axis_status(handle, axis, StatusKey::ReferenceValid)
            .await?
            .into_bool()
    }

    /// Output stage state: idle, moving or pending.
    pub async fn moving_status(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<MovingStatus> {
        let raw = self
            .axis_status(handle, axis, StatusKey::Moving)
            .await?
            .into_int()?;
        reply_enum(raw)
    }

    /// Whether an actor is electrically connected.
    pub async fn actor_connected(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<bool> {
        self.axis_status(handle, axis, StatusKey::Connected)
            .await?
            .into_bool()
    }

    /// Reference position in nm or µ°.
    pub async fn reference_position(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<i32> {
        self.axis_status(handle, axis, StatusKey::ReferencePosition)
            .await?
            .into_int()
    }

    /// Actor position in nm or µ°.
    pub async fn position(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<i32> {
        self.axis_status(handle, axis, StatusKey::Position)
            .await?
            .into_int()
    }

    /// Whether the position is within the target range.
    pub async fn in_target_range(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<bool> {
        self.axis_status(handle, axis, StatusKey::InTargetRange)
            .await?
            .into_bool()
    }

    /// End of travel detected in forward direction.
    pub async fn eot_forward(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<bool> {
        self.axis_status(handle, axis, StatusKey::EotFwd)
            .await?
            .into_bool()
    }

    /// End of travel detected in backward direction.
    pub async fn eot_backward(&self, handle: DeviceHandle, axis: Axis) -> AmcResult<bool> {
        self.axis_status(handle, axis, StatusKey::EotBkwd)
            .await?
            .into_bool()
    }

    // ========================================================================
    // Device
    // ========================================================================

    /// Firmware version string.
    pub async fn firmware_version(&self, handle: DeviceHandle) -> AmcResult<String> {
        self.device_string(handle, StatusKey::FirmwareVersion).await
    }

    /// FPGA version string.
    pub async fn fpga_version(&self, handle: DeviceHandle) -> AmcResult<String> {
        self.device_string(handle, StatusKey::FpgaVersion).await
    }

    /// MAC address.
    pub async fn mac_address(&self, handle: DeviceHandle) -> AmcResult<String> {
        self.device_string(handle, StatusKey::MacAddress).await
    }

    /// IP address.
    pub async fn ip_address(&self, handle: DeviceHandle) -> AmcResult<String> {
        self.device_string(handle, StatusKey::IpAddress).await
    }

    /// Device type from the EEPROM.
    pub async fn device_type(&self, handle: DeviceHandle) -> AmcResult<String> {
        self.device_string(handle, StatusKey::DeviceType).await
    }

    /// Serial number.
    pub async fn serial_number(&self, handle: DeviceHandle) -> AmcResult<String> {
        self.device_string(handle, StatusKey::SerialNumber).await
    }

    /// Friendly device name.
    pub async fn device_name(&self, handle: DeviceHandle) -> AmcResult<String> {
        self.device_string(handle, StatusKey::DeviceName).await
    }

    /// Change the friendly device name.
    pub async fn set_device_name(&self, handle: DeviceHandle, name: &str) -> AmcResult<()> {
        self.request(
            handle,
            Request::SetDeviceName {
                name: name.to_string(),
            },
        )
        .await?
        .into_unit()
    }

    /// Device identifier.
    pub async fn device_id(&self, handle: DeviceHandle) -> AmcResult<i32> {
        self.read_setting(handle, None, Setting::DeviceId)
            .await?
            .into_int()
    }

    /// Write the device identifier to flash. Returns the stored value.
    pub async fn set_device_id(&self, handle: DeviceHandle, id: i32) -> AmcResult<i32> {
        self.write_setting(handle, None, Setting::DeviceId, Value::Int(id))
            .await?
            .into_int()
    }

    /// Real-time output signal mode.
    pub async fn rt_output_mode(&self, handle: DeviceHandle) -> AmcResult<RtOutMode> {
        let raw = self
            .read_setting(handle, None, Setting::RtOutMode)
            .await?
            .into_int()?;
        reply_enum(raw)
    }

    /// Set the real-time output signal mode. Returns the accepted mode.
    pub async fn set_rt_output_mode(
        &self,
        handle: DeviceHandle,
        mode: RtOutMode,
    ) -> AmcResult<RtOutMode> {
        let raw = self
            .write_setting(handle, None, Setting::RtOutMode, Value::Int(mode.into()))
            .await?
            .into_int()?;
        reply_enum(raw)
    }

    /// Restart the controller. Volatile settings return to their defaults.
    pub async fn reboot(&self, handle: DeviceHandle) -> AmcResult<()> {
        self.request(handle, Request::Reboot).await?.into_unit()
    }

    /// Restore factory settings at the next reboot.
    pub async fn factory_reset(&self, handle: DeviceHandle) -> AmcResult<()> {
        self.request(handle, Request::FactoryReset).await?.into_unit()
    }
}

/// Enum values sent by the device that do not decode are a driver fault,
/// not a caller mistake.
fn reply_enum<T: TryFrom<i32, Error = AmcError>>(raw: i32) -> AmcResult<T> {
    T::try_from(raw).map_err(|e| AmcError::DriverError(format!("device replied {raw}: {e}")))
}
