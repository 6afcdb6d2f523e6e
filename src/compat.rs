//! C-convention mirror of the controller interface.
//!
//! [`CompatApi`] exposes the facade the way the vendor header does: every
//! call blocks until the device answered and returns an `i32` result code,
//! handles and axes are plain integers, `control_*` calls take a value slot
//! plus a `set` flag, and strings are written NUL-terminated into
//! caller-supplied buffers.
//!
//! A `control_*` call with `set == false` only reads; with `set == true` it
//! writes and then stores the value the device accepted back into the slot.
//! The slot is left untouched when the call fails.
//!
//! A string that does not fit the buffer including its terminator yields
//! `NCB_InvalidParam` and the buffer is not modified.
//!
//! The calls must not be made from inside an async runtime; use
//! [`crate::Amc100`] there.

use crate::device::Amc100;
use crate::error::{AmcError, AmcResult, NcbCode};
use crate::protocol::{Setting, Value};
use crate::types::{ActorParameters, Axis, DeviceHandle};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

const OK: i32 = NcbCode::Ok as i32;

/// Blocking, integer-coded front end over an [`Amc100`].
pub struct CompatApi {
    amc: Arc<Amc100>,
    runtime: Runtime,
}

fn code_of<T>(result: AmcResult<T>) -> i32 {
    match result {
        Ok(_) => OK,
        Err(e) => e.code().as_i32(),
    }
}

fn axis_of(axis: i32) -> AmcResult<Axis> {
    Axis::try_from(axis).map_err(|_| AmcError::invalid(format!("axis {axis} is negative")))
}

/// Copy `text` plus a NUL terminator into `buffer`.
pub fn write_c_string(text: &str, buffer: &mut [u8]) -> i32 {
    let bytes = text.as_bytes();
    if buffer.len() < bytes.len() + 1 {
        return NcbCode::InvalidParam.as_i32();
    }
    buffer[..bytes.len()].copy_from_slice(bytes);
    buffer[bytes.len()] = 0;
    OK
}

/// Text stored in a NUL-terminated buffer, up to the first NUL.
pub fn read_c_string(buffer: &[u8]) -> Option<&str> {
    let end = buffer.iter().position(|b| *b == 0)?;
    std::str::from_utf8(&buffer[..end]).ok()
}

impl CompatApi {
    /// Wrap `amc` with a dedicated runtime.
    pub fn new(amc: Amc100) -> AmcResult<Self> {
        Self::with_shared(Arc::new(amc))
    }

    /// Wrap a facade that is shared with async code.
    pub fn with_shared(amc: Arc<Amc100>) -> AmcResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("amc100-compat")
            .enable_all()
            .build()?;
        Ok(Self { amc, runtime })
    }

    /// The wrapped facade.
    pub fn facade(&self) -> Arc<Amc100> {
        self.amc.clone()
    }

    /// Runtime the calls execute on, e.g. to spawn a local server.
    pub fn runtime(&self) -> Handle {
        self.runtime.handle().clone()
    }

    fn block<F, T>(&self, future: F) -> AmcResult<T>
    where
        F: Future<Output = AmcResult<T>>,
    {
        self.runtime.block_on(future)
    }

    /// Resolve a handle and an axis index. An unknown handle wins over a bad
    /// axis so callers always see `NotConnected` for stale handles.
    fn locate(&self, handle: i32, axis: i32) -> AmcResult<(DeviceHandle, Axis)> {
        let handle = DeviceHandle(handle);
        if !self.runtime.block_on(self.amc.is_open(handle)) {
            return Err(AmcError::NotConnected);
        }
        Ok((handle, axis_of(axis)?))
    }

    fn control_value(
        &self,
        handle: i32,
        axis: Option<i32>,
        setting: Setting,
        value: Value,
        set: bool,
    ) -> AmcResult<Value> {
        let (handle, axis) = match axis {
            Some(axis) => self.locate(handle, axis).map(|(h, a)| (h, Some(a)))?,
            None => (DeviceHandle(handle), None),
        };
        self.block(async {
            if set {
                self.amc.write_setting(handle, axis, setting, value).await
            } else {
                self.amc.read_setting(handle, axis, setting).await
            }
        })
    }

    fn control_int(
        &self,
        handle: i32,
        axis: Option<i32>,
        setting: Setting,
        value: &mut i32,
        set: bool,
    ) -> i32 {
        match self
            .control_value(handle, axis, setting, Value::Int(*value), set)
            .and_then(Value::into_int)
        {
            Ok(accepted) => {
                *value = accepted;
                OK
            }
            Err(e) => e.code().as_i32(),
        }
    }

    fn control_bool(
        &self,
        handle: i32,
        axis: i32,
        setting: Setting,
        value: &mut bool,
        set: bool,
    ) -> i32 {
        match self
            .control_value(handle, Some(axis), setting, Value::Bool(*value), set)
            .and_then(Value::into_bool)
        {
            Ok(accepted) => {
                *value = accepted;
                OK
            }
            Err(e) => e.code().as_i32(),
        }
    }

    fn axis_call<T, F, Fut>(&self, handle: i32, axis: i32, query: F) -> AmcResult<T>
    where
        F: FnOnce(Arc<Amc100>, DeviceHandle, Axis) -> Fut,
        Fut: Future<Output = AmcResult<T>>,
    {
        let (handle, axis) = self.locate(handle, axis)?;
        self.block(query(self.amc.clone(), handle, axis))
    }

    fn get_with<T, F, Fut>(&self, handle: i32, axis: i32, out: &mut T, query: F) -> i32
    where
        F: FnOnce(Arc<Amc100>, DeviceHandle, Axis) -> Fut,
        Fut: Future<Output = AmcResult<T>>,
    {
        match self.axis_call(handle, axis, query) {
            Ok(value) => {
                *out = value;
                OK
            }
            Err(e) => e.code().as_i32(),
        }
    }

    fn string_with<F, Fut>(&self, handle: i32, buffer: &mut [u8], query: F) -> i32
    where
        F: FnOnce(Arc<Amc100>, DeviceHandle) -> Fut,
        Fut: Future<Output = AmcResult<String>>,
    {
        match self.block(query(self.amc.clone(), DeviceHandle(handle))) {
            Ok(text) => write_c_string(&text, buffer),
            Err(e) => e.code().as_i32(),
        }
    }

    // ========================================================================
    // Session and access
    // ========================================================================

    /// Connect to `address` and store the new handle.
    pub fn connect(&self, address: &str, handle: &mut i32) -> i32 {
        match self.block(self.amc.connect(address)) {
            Ok(h) => {
                *handle = h.raw();
                OK
            }
            Err(e) => e.code().as_i32(),
        }
    }

    /// Close a session.
    pub fn close(&self, handle: i32) -> i32 {
        code_of(self.block(self.amc.close(DeviceHandle(handle))))
    }

    /// Lock and authorization state.
    pub fn get_lock_status(&self, handle: i32, locked: &mut bool, authorized: &mut bool) -> i32 {
        match self.block(self.amc.lock_status(DeviceHandle(handle))) {
            Ok(status) => {
                *locked = status.locked;
                *authorized = status.authorized;
                OK
            }
            Err(e) => e.code().as_i32(),
        }
    }

    /// Lock the device.
    pub fn lock(&self, handle: i32, password: &str) -> i32 {
        code_of(self.block(self.amc.lock(DeviceHandle(handle), password)))
    }

    /// Ask for access to a locked device.
    pub fn grant_access(&self, handle: i32, password: &str) -> i32 {
        code_of(self.block(self.amc.grant_access(DeviceHandle(handle), password)))
    }

    /// Remove the lock.
    pub fn unlock(&self, handle: i32) -> i32 {
        code_of(self.block(self.amc.unlock(DeviceHandle(handle))))
    }

    /// Text for `errcode` in `lang` (0 English, 1 German).
    pub fn error_number_to_string(
        &self,
        handle: i32,
        lang: i32,
        errcode: i32,
        buffer: &mut [u8],
    ) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move {
            amc.error_text(h, lang, errcode).await
        })
    }

    // ========================================================================
    // Axis control
    // ========================================================================

    /// Output relay.
    pub fn control_output(&self, handle: i32, axis: i32, enable: &mut bool, set: bool) -> i32 {
        self.control_bool(handle, axis, Setting::Output, enable, set)
    }

    /// Amplitude in mV.
    pub fn control_amplitude(&self, handle: i32, axis: i32, amplitude: &mut i32, set: bool) -> i32 {
        self.control_int(handle, Some(axis), Setting::Amplitude, amplitude, set)
    }

    /// Frequency in mHz.
    pub fn control_frequency(&self, handle: i32, axis: i32, frequency: &mut i32, set: bool) -> i32 {
        self.control_int(handle, Some(axis), Setting::Frequency, frequency, set)
    }

    /// Actor preset index.
    pub fn control_actor_selection(
        &self,
        handle: i32,
        axis: i32,
        actor: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::ActorSelection, actor, set)
    }

    /// Name of the selected actor.
    pub fn get_actor_name(&self, handle: i32, axis: i32, buffer: &mut [u8]) -> i32 {
        let axis = match self.locate(handle, axis) {
            Ok((_, axis)) => axis,
            Err(e) => return e.code().as_i32(),
        };
        self.string_with(handle, buffer, |amc, h| async move { amc.actor_name(h, axis).await })
    }

    /// Type of the selected actor.
    pub fn get_actor_type(&self, handle: i32, axis: i32, actor_type: &mut i32) -> i32 {
        self.get_with(handle, axis, actor_type, |amc, h, a| async move {
            amc.actor_type(h, a).await.map(i32::from)
        })
    }

    /// Zero the position and invalidate the reference.
    pub fn set_reset(&self, handle: i32, axis: i32) -> i32 {
        code_of(self.axis_call(handle, axis, |amc, h, a| async move {
            amc.reset_position(h, a).await
        }))
    }

    /// Approach to the target position.
    pub fn control_move(&self, handle: i32, axis: i32, enable: &mut bool, set: bool) -> i32 {
        self.control_bool(handle, axis, Setting::Move, enable, set)
    }

    /// Trigger `n` steps.
    pub fn set_n_steps(&self, handle: i32, axis: i32, backward: bool, n: i32) -> i32 {
        code_of(self.axis_call(handle, axis, |amc, h, a| async move {
            amc.step(h, a, backward, n).await
        }))
    }

    /// Step count of the last step command.
    pub fn get_n_steps(&self, handle: i32, axis: i32, n: &mut i32) -> i32 {
        self.get_with(handle, axis, n, |amc, h, a| async move { amc.n_steps(h, a).await })
    }

    /// Continuous motion forward.
    pub fn control_continuous_fwd(
        &self,
        handle: i32,
        axis: i32,
        enable: &mut bool,
        set: bool,
    ) -> i32 {
        self.control_bool(handle, axis, Setting::ContinuousFwd, enable, set)
    }

    /// Continuous motion backward.
    pub fn control_continuous_bkwd(
        &self,
        handle: i32,
        axis: i32,
        enable: &mut bool,
        set: bool,
    ) -> i32 {
        self.control_bool(handle, axis, Setting::ContinuousBkwd, enable, set)
    }

    /// Target position in nm or µ°.
    pub fn control_target_position(
        &self,
        handle: i32,
        axis: i32,
        target: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::TargetPosition, target, set)
    }

    /// Reference validity.
    pub fn get_status_reference(&self, handle: i32, axis: i32, valid: &mut bool) -> i32 {
        self.get_with(handle, axis, valid, |amc, h, a| async move {
            amc.reference_valid(h, a).await
        })
    }

    /// 0 idle, 1 moving, 2 pending.
    pub fn get_status_moving(&self, handle: i32, axis: i32, moving: &mut i32) -> i32 {
        self.get_with(handle, axis, moving, |amc, h, a| async move {
            amc.moving_status(h, a).await.map(i32::from)
        })
    }

    /// Whether an actor is connected.
    pub fn get_status_connected(&self, handle: i32, axis: i32, connected: &mut bool) -> i32 {
        self.get_with(handle, axis, connected, |amc, h, a| async move {
            amc.actor_connected(h, a).await
        })
    }

    /// Reference position.
    pub fn get_reference_position(&self, handle: i32, axis: i32, position: &mut i32) -> i32 {
        self.get_with(handle, axis, position, |amc, h, a| async move {
            amc.reference_position(h, a).await
        })
    }

    /// Actor position.
    pub fn get_position(&self, handle: i32, axis: i32, position: &mut i32) -> i32 {
        self.get_with(handle, axis, position, |amc, h, a| async move { amc.position(h, a).await })
    }

    /// Reference auto update.
    pub fn control_reference_auto_update(
        &self,
        handle: i32,
        axis: i32,
        enable: &mut bool,
        set: bool,
    ) -> i32 {
        self.control_bool(handle, axis, Setting::ReferenceAutoUpdate, enable, set)
    }

    /// Auto reset.
    pub fn control_auto_reset(&self, handle: i32, axis: i32, enable: &mut bool, set: bool) -> i32 {
        self.control_bool(handle, axis, Setting::AutoReset, enable, set)
    }

    /// Target range in nm or µ°.
    pub fn control_target_range(&self, handle: i32, axis: i32, range: &mut i32, set: bool) -> i32 {
        self.control_int(handle, Some(axis), Setting::TargetRange, range, set)
    }

    /// Whether the position is within the target range.
    pub fn get_status_target_range(&self, handle: i32, axis: i32, in_range: &mut bool) -> i32 {
        self.get_with(handle, axis, in_range, |amc, h, a| async move {
            amc.in_target_range(h, a).await
        })
    }

    /// End of travel forward.
    pub fn get_status_eot_fwd(&self, handle: i32, axis: i32, eot: &mut bool) -> i32 {
        self.get_with(handle, axis, eot, |amc, h, a| async move { amc.eot_forward(h, a).await })
    }

    /// End of travel backward.
    pub fn get_status_eot_bkwd(&self, handle: i32, axis: i32, eot: &mut bool) -> i32 {
        self.get_with(handle, axis, eot, |amc, h, a| async move { amc.eot_backward(h, a).await })
    }

    /// Deactivate output on end of travel.
    pub fn control_eot_output_deactive(
        &self,
        handle: i32,
        axis: i32,
        enable: &mut bool,
        set: bool,
    ) -> i32 {
        self.control_bool(handle, axis, Setting::EotOutputDeactivate, enable, set)
    }

    /// DC output level in µV.
    pub fn control_fix_output_voltage(
        &self,
        handle: i32,
        axis: i32,
        voltage: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::FixOutputVoltage, voltage, set)
    }

    /// AQuadB input resolution in nm.
    pub fn control_aquadb_in_resolution(
        &self,
        handle: i32,
        axis: i32,
        resolution: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::AquadbInResolution, resolution, set)
    }

    /// AQuadB output.
    pub fn control_aquadb_out(&self, handle: i32, axis: i32, enable: &mut bool, set: bool) -> i32 {
        self.control_bool(handle, axis, Setting::AquadbOut, enable, set)
    }

    /// AQuadB output resolution in nm.
    pub fn control_aquadb_out_resolution(
        &self,
        handle: i32,
        axis: i32,
        resolution: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::AquadbOutResolution, resolution, set)
    }

    /// AQuadB output clock in multiples of 20 ns.
    pub fn control_aquadb_out_clock(
        &self,
        handle: i32,
        axis: i32,
        clock: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::AquadbOutClock, clock, set)
    }

    /// Real-time input mode, raw value.
    pub fn control_realtime_input_mode(
        &self,
        handle: i32,
        axis: i32,
        mode: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::RtInMode, mode, set)
    }

    /// Real-time input loop mode, raw value.
    pub fn control_realtime_input_loop_mode(
        &self,
        handle: i32,
        axis: i32,
        mode: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::RtInLoopMode, mode, set)
    }

    /// Closed-loop change per pulse in nm.
    pub fn control_realtime_input_change_per_pulse(
        &self,
        handle: i32,
        axis: i32,
        change: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::RtInChangePerPulse, change, set)
    }

    /// Open-loop steps per pulse.
    pub fn control_realtime_input_steps_per_pulse(
        &self,
        handle: i32,
        axis: i32,
        steps: &mut i32,
        set: bool,
    ) -> i32 {
        self.control_int(handle, Some(axis), Setting::RtInStepsPerPulse, steps, set)
    }

    /// Motion driven by the real-time input.
    pub fn control_realtime_input_move(
        &self,
        handle: i32,
        axis: i32,
        enable: &mut bool,
        set: bool,
    ) -> i32 {
        self.control_bool(handle, axis, Setting::RtInMove, enable, set)
    }

    // ========================================================================
    // Actor configuration
    // ========================================================================

    /// Load a preset by name.
    pub fn set_actor_parameters_by_name(&self, handle: i32, axis: i32, actor_name: &str) -> i32 {
        code_of(self.axis_call(handle, axis, |amc, h, a| async move {
            amc.select_actor_by_name(h, a, actor_name).await
        }))
    }

    /// Describe the actor completely.
    pub fn set_actor_parameters(
        &self,
        handle: i32,
        axis: i32,
        parameters: &ActorParameters,
    ) -> i32 {
        let parameters = parameters.clone();
        code_of(self.axis_call(handle, axis, |amc, h, a| async move {
            amc.set_actor_parameters(h, a, parameters).await
        }))
    }

    /// Write a boolean actor parameter.
    pub fn set_actor_parameters_by_param_name_boolean(
        &self,
        handle: i32,
        axis: i32,
        name: &str,
        value: bool,
    ) -> i32 {
        code_of(self.axis_call(handle, axis, |amc, h, a| async move {
            amc.set_actor_parameter_bool(h, a, name, value).await
        }))
    }

    /// Write an integer actor parameter.
    pub fn set_actor_parameters_by_param_name(
        &self,
        handle: i32,
        axis: i32,
        name: &str,
        value: i32,
    ) -> i32 {
        code_of(self.axis_call(handle, axis, |amc, h, a| async move {
            amc.set_actor_parameter(h, a, name, value).await
        }))
    }

    /// Read one actor parameter as text.
    pub fn get_actor_parameters_by_param_name(
        &self,
        handle: i32,
        axis: i32,
        name: &str,
        buffer: &mut [u8],
    ) -> i32 {
        let axis = match self.locate(handle, axis) {
            Ok((_, axis)) => axis,
            Err(e) => return e.code().as_i32(),
        };
        self.string_with(handle, buffer, |amc, h| async move {
            amc.actor_parameter(h, axis, name).await
        })
    }

    /// Full actor description.
    pub fn get_actor_parameters(
        &self,
        handle: i32,
        axis: i32,
        parameters: &mut ActorParameters,
    ) -> i32 {
        self.get_with(handle, axis, parameters, |amc, h, a| async move {
            amc.actor_parameters(h, a).await
        })
    }

    /// Names of all presets, one per line.
    pub fn get_positioners_list(&self, handle: i32, buffer: &mut [u8]) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move { amc.positioners(h).await })
    }

    // ========================================================================
    // Device
    // ========================================================================

    /// Firmware version.
    pub fn get_firmware_version(&self, handle: i32, buffer: &mut [u8]) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move { amc.firmware_version(h).await })
    }

    /// FPGA version.
    pub fn get_fpga_version(&self, handle: i32, buffer: &mut [u8]) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move { amc.fpga_version(h).await })
    }

    /// MAC address.
    pub fn get_mac_address(&self, handle: i32, buffer: &mut [u8]) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move { amc.mac_address(h).await })
    }

    /// IP address.
    pub fn get_ip_address(&self, handle: i32, buffer: &mut [u8]) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move { amc.ip_address(h).await })
    }

    /// Device type.
    pub fn get_device_type(&self, handle: i32, buffer: &mut [u8]) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move { amc.device_type(h).await })
    }

    /// Serial number.
    pub fn get_serial_number(&self, handle: i32, buffer: &mut [u8]) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move { amc.serial_number(h).await })
    }

    /// Friendly name.
    pub fn get_device_name(&self, handle: i32, buffer: &mut [u8]) -> i32 {
        self.string_with(handle, buffer, |amc, h| async move { amc.device_name(h).await })
    }

    /// Change the friendly name.
    pub fn set_device_name(&self, handle: i32, name: &str) -> i32 {
        code_of(self.block(self.amc.set_device_name(DeviceHandle(handle), name)))
    }

    /// Device identifier, stored in flash.
    pub fn control_device_id(&self, handle: i32, id: &mut i32, set: bool) -> i32 {
        self.control_int(handle, None, Setting::DeviceId, id, set)
    }

    /// Real-time output signal mode, raw value.
    pub fn control_rt_out_signal_mode(&self, handle: i32, mode: &mut i32, set: bool) -> i32 {
        self.control_int(handle, None, Setting::RtOutMode, mode, set)
    }

    /// Restart the controller.
    pub fn reboot_system(&self, handle: i32) -> i32 {
        code_of(self.block(self.amc.reboot(DeviceHandle(handle))))
    }

    /// Restore factory settings at the next reboot.
    pub fn factory_reset(&self, handle: i32) -> i32 {
        code_of(self.block(self.amc.factory_reset(DeviceHandle(handle))))
    }
}
