use super::presets;
use crate::error::{AmcError, AmcResult};
use crate::protocol::{error_text, Request, Scope, Setting, StatusKey, Value};
use crate::types::{
    ActorParameters, Axis, LockStatus, MovingStatus, RtInLoopMode, RtInMode, RtOutMode,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, info};

/// Number of axes of a simulated controller.
pub const AXIS_COUNT: u32 = 3;

/// Identifies one open session on a simulated device.
pub type SessionId = u64;

const AMPLITUDE_MAX_MV: i32 = 60_000;
const FREQUENCY_MIN_MHZ: i32 = 1_000;
const FREQUENCY_MAX_MHZ: i32 = 5_000_000;
const FIX_VOLTAGE_MAX_UV: i32 = 60_000_000;
const AQUADB_CLOCK_MIN: i32 = 2;
const AQUADB_CLOCK_MAX: i32 = 65_535;
const ACTOR_SELECTION_MAX: i32 = 255;

const DEFAULT_AMPLITUDE_MV: i32 = 30_000;
const DEFAULT_FREQUENCY_MHZ: i32 = 1_000_000;
const DEFAULT_TARGET_RANGE: i32 = 100;
const DEFAULT_AQUADB_RESOLUTION_NM: i32 = 1;
const DEFAULT_AQUADB_CLOCK: i32 = 50;

/// Travel of linear and goniometer actors, device coordinates.
const TRAVEL_LIMIT: i64 = 5_000_000;
/// Physical location of the reference mark.
const REFERENCE_MARK: i64 = 1_000;
/// Steps covered by continuous motion between two requests.
const CONTINUOUS_STEPS_PER_REQUEST: i64 = 10;
const DEVICE_NAME_MAX_LEN: usize = 64;

fn saturate(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn expect_int(setting: Setting, value: Value) -> AmcResult<i32> {
    match value {
        Value::Int(v) => Ok(v),
        _ => Err(AmcError::invalid(format!("{} expects an integer", setting.name()))),
    }
}

fn expect_bool(setting: Setting, value: Value) -> AmcResult<bool> {
    match value {
        Value::Bool(v) => Ok(v),
        _ => Err(AmcError::invalid(format!("{} expects a flag", setting.name()))),
    }
}

#[derive(Debug, Clone)]
struct AxisState {
    output: bool,
    amplitude: i32,
    frequency: i32,
    actor_selection: i32,
    actor: ActorParameters,
    approach: bool,
    continuous_fwd: bool,
    continuous_bkwd: bool,
    target: i32,
    /// Position in device coordinates; `position = physical - offset`.
    physical: i64,
    offset: i64,
    reference_position: i32,
    reference_valid: bool,
    reference_auto_update: bool,
    auto_reset: bool,
    target_range: i32,
    eot_output_deactivate: bool,
    eot_fwd: bool,
    eot_bkwd: bool,
    fix_output_voltage: i32,
    aquadb_in_resolution: i32,
    aquadb_out: bool,
    aquadb_out_resolution: i32,
    aquadb_out_clock: i32,
    rt_in_mode: RtInMode,
    rt_in_loop_mode: RtInLoopMode,
    rt_in_change_per_pulse: i32,
    rt_in_steps_per_pulse: i32,
    rt_in_move: bool,
    n_steps: i32,
    connected: bool,
}

impl Default for AxisState {
    fn default() -> Self {
        Self {
            output: false,
            amplitude: DEFAULT_AMPLITUDE_MV,
            frequency: DEFAULT_FREQUENCY_MHZ,
            actor_selection: 0,
            actor: presets::default_actor(),
            approach: false,
            continuous_fwd: false,
            continuous_bkwd: false,
            target: 0,
            physical: 0,
            offset: 0,
            reference_position: 0,
            reference_valid: false,
            reference_auto_update: false,
            auto_reset: false,
            target_range: DEFAULT_TARGET_RANGE,
            eot_output_deactivate: false,
            eot_fwd: false,
            eot_bkwd: false,
            fix_output_voltage: 0,
            aquadb_in_resolution: DEFAULT_AQUADB_RESOLUTION_NM,
            aquadb_out: false,
            aquadb_out_resolution: DEFAULT_AQUADB_RESOLUTION_NM,
            aquadb_out_clock: DEFAULT_AQUADB_CLOCK,
            rt_in_mode: RtInMode::Off,
            rt_in_loop_mode: RtInLoopMode::OpenLoop,
            rt_in_change_per_pulse: 0,
            rt_in_steps_per_pulse: 1,
            rt_in_move: false,
            n_steps: 0,
            connected: true,
        }
    }
}

impl AxisState {
    fn position(&self) -> i32 {
        saturate(self.physical.saturating_sub(self.offset))
    }

    fn in_target_range(&self) -> bool {
        (i64::from(self.position()) - i64::from(self.target)).abs() <= i64::from(self.target_range)
    }

    fn travel(&self) -> Option<(i64, i64)> {
        match self.actor.actor_type {
            crate::types::ActorType::Rotator => None,
            _ => Some((-TRAVEL_LIMIT, TRAVEL_LIMIT)),
        }
    }

    fn direction(&self, backward: bool) -> i64 {
        if backward != self.actor.actor_dir {
            -1
        } else {
            1
        }
    }

    fn moving_status(&self) -> MovingStatus {
        let driving = self.continuous_fwd
            || self.continuous_bkwd
            || (self.approach && !self.in_target_range());
        match (driving, self.output) {
            (false, _) => MovingStatus::Idle,
            (true, true) => MovingStatus::Moving,
            (true, false) => MovingStatus::Pending,
        }
    }

    /// Move to `to` in device coordinates, honouring travel limits and the
    /// reference mark.
    fn drive_to(&mut self, to: i64) {
        let from = self.physical;
        let mut to = to;
        self.eot_fwd = false;
        self.eot_bkwd = false;
        if let Some((low, high)) = self.travel() {
            if to >= high {
                to = high;
                self.eot_fwd = true;
            } else if to <= low {
                to = low;
                self.eot_bkwd = true;
            }
        }
        self.physical = to;

        if from != to && from.min(to) <= REFERENCE_MARK && REFERENCE_MARK <= from.max(to) {
            if self.auto_reset {
                self.offset = REFERENCE_MARK;
            }
            if !self.reference_valid || self.reference_auto_update {
                self.reference_position = saturate(REFERENCE_MARK.saturating_sub(self.offset));
                self.reference_valid = true;
            }
        }

        if (self.eot_fwd || self.eot_bkwd) && self.eot_output_deactivate {
            self.output = false;
        }
    }

    /// Let time pass between two requests.
    fn advance(&mut self) {
        if !self.output {
            return;
        }
        if self.continuous_fwd || self.continuous_bkwd {
            let step = i64::from(self.actor.stepsize.max(1))
                .saturating_mul(CONTINUOUS_STEPS_PER_REQUEST)
                .saturating_mul(self.direction(self.continuous_bkwd));
            self.drive_to(self.physical.saturating_add(step));
        } else if self.approach {
            let target = i64::from(self.target).saturating_add(self.offset);
            if self.physical != target {
                self.drive_to(target);
            }
        }
    }

    fn step(&mut self, backward: bool, count: i32) -> AmcResult<()> {
        if count < 0 {
            return Err(AmcError::invalid(format!("step count must not be negative, got {count}")));
        }
        self.n_steps = count;
        if self.output {
            let distance = i64::from(count)
                .saturating_mul(i64::from(self.actor.stepsize))
                .saturating_mul(self.direction(backward));
            self.drive_to(self.physical.saturating_add(distance));
        }
        Ok(())
    }

    fn reset_position(&mut self) {
        self.offset = self.physical;
        self.reference_valid = false;
    }

    fn power_cycle(&mut self) {
        self.output = false;
        self.amplitude = DEFAULT_AMPLITUDE_MV;
        self.frequency = DEFAULT_FREQUENCY_MHZ;
        self.approach = false;
        self.continuous_fwd = false;
        self.continuous_bkwd = false;
        self.rt_in_move = false;
    }

    fn require_rt_input(&self) -> AmcResult<()> {
        if self.rt_in_mode == RtInMode::Off {
            return Err(AmcError::invalid("real-time input is disabled"));
        }
        Ok(())
    }

    fn load_actor(&mut self, selection: i32, actor: ActorParameters) {
        self.actor_selection = selection;
        self.actor = actor;
        self.amplitude = self.amplitude.min(self.actor.amax).max(0);
        self.frequency = self.frequency.min(self.actor.fmax).max(FREQUENCY_MIN_MHZ);
    }

    fn read(&self, setting: Setting) -> AmcResult<Value> {
        let value = match setting {
            Setting::Output => Value::Bool(self.output),
            Setting::Amplitude => Value::Int(self.amplitude),
            Setting::Frequency => Value::Int(self.frequency),
            Setting::ActorSelection => Value::Int(self.actor_selection),
            Setting::Move => Value::Bool(self.approach),
            Setting::ContinuousFwd => Value::Bool(self.continuous_fwd),
            Setting::ContinuousBkwd => Value::Bool(self.continuous_bkwd),
            Setting::TargetPosition => Value::Int(self.target),
            Setting::ReferenceAutoUpdate => Value::Bool(self.reference_auto_update),
            Setting::AutoReset => Value::Bool(self.auto_reset),
            Setting::TargetRange => Value::Int(self.target_range),
            Setting::EotOutputDeactivate => Value::Bool(self.eot_output_deactivate),
            Setting::FixOutputVoltage => Value::Int(self.fix_output_voltage),
            Setting::AquadbInResolution => Value::Int(self.aquadb_in_resolution),
            Setting::AquadbOut => Value::Bool(self.aquadb_out),
            Setting::AquadbOutResolution => Value::Int(self.aquadb_out_resolution),
            Setting::AquadbOutClock => Value::Int(self.aquadb_out_clock),
            Setting::RtInMode => Value::Int(self.rt_in_mode.into()),
            Setting::RtInLoopMode => Value::Int(self.rt_in_loop_mode.into()),
            Setting::RtInChangePerPulse => {
                self.require_rt_input()?;
                Value::Int(self.rt_in_change_per_pulse)
            }
            Setting::RtInStepsPerPulse => {
                self.require_rt_input()?;
                Value::Int(self.rt_in_steps_per_pulse)
            }
            Setting::RtInMove => Value::Bool(self.rt_in_move),
            Setting::DeviceId | Setting::RtOutMode => {
                return Err(AmcError::invalid(format!("{} is device scoped", setting.name())))
            }
        };
        Ok(value)
    }

    fn write(&mut self, setting: Setting, value: Value) -> AmcResult<Value> {
        match setting {
            Setting::Output => self.output = expect_bool(setting, value)?,
            Setting::Amplitude => {
                let high = AMPLITUDE_MAX_MV.min(self.actor.amax).max(0);
                self.amplitude = expect_int(setting, value)?.clamp(0, high);
            }
            Setting::Frequency => {
                let high = FREQUENCY_MAX_MHZ.min(self.actor.fmax).max(FREQUENCY_MIN_MHZ);
                self.frequency = expect_int(setting, value)?.clamp(FREQUENCY_MIN_MHZ, high);
            }
            Setting::ActorSelection => {
                let selection = expect_int(setting, value)?;
                if !(0..=ACTOR_SELECTION_MAX).contains(&selection) {
                    return Err(AmcError::invalid(format!(
                        "actor selection {selection} outside 0..=255"
                    )));
                }
                let actor = usize::try_from(selection)
                    .ok()
                    .and_then(presets::by_index)
                    .ok_or_else(|| AmcError::invalid(format!("no actor preset {selection}")))?;
                self.load_actor(selection, actor);
            }
            Setting::Move => self.approach = expect_bool(setting, value)?,
            Setting::ContinuousFwd => {
                let enable = expect_bool(setting, value)?;
                self.continuous_fwd = enable;
                self.continuous_bkwd = false;
            }
            Setting::ContinuousBkwd => {
                let enable = expect_bool(setting, value)?;
                self.continuous_bkwd = enable;
                self.continuous_fwd = false;
            }
            Setting::TargetPosition => self.target = expect_int(setting, value)?,
            Setting::ReferenceAutoUpdate => {
                self.reference_auto_update = expect_bool(setting, value)?
            }
            Setting::AutoReset => self.auto_reset = expect_bool(setting, value)?,
            Setting::TargetRange => self.target_range = expect_int(setting, value)?.max(0),
            Setting::EotOutputDeactivate => {
                self.eot_output_deactivate = expect_bool(setting, value)?
            }
            Setting::FixOutputVoltage => {
                self.fix_output_voltage = expect_int(setting, value)?.clamp(0, FIX_VOLTAGE_MAX_UV)
            }
            Setting::AquadbInResolution => {
                self.aquadb_in_resolution = expect_int(setting, value)?.max(1)
            }
            Setting::AquadbOut => self.aquadb_out = expect_bool(setting, value)?,
            Setting::AquadbOutResolution => {
                self.aquadb_out_resolution = expect_int(setting, value)?.max(1)
            }
            Setting::AquadbOutClock => {
                self.aquadb_out_clock =
                    expect_int(setting, value)?.clamp(AQUADB_CLOCK_MIN, AQUADB_CLOCK_MAX)
            }
            Setting::RtInMode => {
                self.rt_in_mode = RtInMode::try_from(expect_int(setting, value)?)?
            }
            Setting::RtInLoopMode => {
                self.rt_in_loop_mode = RtInLoopMode::try_from(expect_int(setting, value)?)?
            }
            Setting::RtInChangePerPulse => {
                self.require_rt_input()?;
                self.rt_in_change_per_pulse = expect_int(setting, value)?;
            }
            Setting::RtInStepsPerPulse => {
                self.require_rt_input()?;
                self.rt_in_steps_per_pulse = expect_int(setting, value)?.max(0);
            }
            Setting::RtInMove => self.rt_in_move = expect_bool(setting, value)?,
            Setting::DeviceId | Setting::RtOutMode => {
                return Err(AmcError::invalid(format!("{} is device scoped", setting.name())))
            }
        }
        // Continuous motion stopped by either flag going false.
        if matches!(setting, Setting::ContinuousFwd | Setting::ContinuousBkwd)
            && !self.continuous_fwd
            && !self.continuous_bkwd
        {
            debug!("continuous motion stopped");
        }
        self.read(setting)
    }

    fn status(&self, key: StatusKey) -> Value {
        match key {
            StatusKey::ActorName => Value::Text(self.actor.name.clone()),
            StatusKey::ActorType => Value::Int(self.actor.actor_type.into()),
            StatusKey::NSteps => Value::Int(self.n_steps),
            StatusKey::ReferenceValid => Value::Bool(self.reference_valid),
            StatusKey::Moving => Value::Int(self.moving_status().into()),
            StatusKey::Connected => Value::Bool(self.connected),
            StatusKey::ReferencePosition => Value::Int(self.reference_position),
            StatusKey::Position => Value::Int(self.position()),
            StatusKey::InTargetRange => Value::Bool(self.in_target_range()),
            StatusKey::EotFwd => Value::Bool(self.eot_fwd),
            StatusKey::EotBkwd => Value::Bool(self.eot_bkwd),
            _ => Value::Unit,
        }
    }
}

#[derive(Debug, Clone)]
struct Identity {
    firmware_version: String,
    fpga_version: String,
    mac_address: String,
    ip_address: String,
    device_type: String,
    serial_number: String,
}

/// One simulated controller with its sessions.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    identity: Identity,
    device_name: String,
    device_id: i32,
    factory_reset_pending: bool,
    rt_out_mode: RtOutMode,
    axes: Vec<AxisState>,
    password: Option<String>,
    authorized: HashSet<SessionId>,
    sessions: HashSet<SessionId>,
    next_session: SessionId,
}

impl SimulatedDevice {
    /// Create a device with the given serial number.
    pub fn new(serial_number: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(serial_number.as_bytes());
        let digest = hasher.finalize();
        let identity = Identity {
            firmware_version: "1.3.16".to_string(),
            fpga_version: "1.0.4".to_string(),
            mac_address: format!(
                "00:50:C2:{:02X}:{:02X}:{:02X}",
                digest[0], digest[1], digest[2]
            ),
            ip_address: "192.168.1.1".to_string(),
            device_type: "AMC100".to_string(),
            serial_number: serial_number.to_string(),
        };
        Self {
            device_name: Self::default_name(&identity),
            identity,
            device_id: 0,
            factory_reset_pending: false,
            rt_out_mode: RtOutMode::AquadbLvttl,
            axes: (0..AXIS_COUNT).map(|_| AxisState::default()).collect(),
            password: None,
            authorized: HashSet::new(),
            sessions: HashSet::new(),
            next_session: 1,
        }
    }

    /// Set the address reported by the IP address query.
    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.identity.ip_address = ip.into();
        self
    }

    fn default_name(identity: &Identity) -> String {
        format!("{}-{}", identity.device_type, identity.serial_number)
    }

    /// Serial number of this device.
    pub fn serial_number(&self) -> &str {
        &self.identity.serial_number
    }

    /// Start a session.
    pub fn open_session(&mut self) -> SessionId {
        let id = self.next_session;
        self.next_session += 1;
        self.sessions.insert(id);
        info!(serial = %self.identity.serial_number, session = id, "session opened");
        id
    }

    /// End a session and drop any access it was granted.
    pub fn close_session(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        self.authorized.remove(&session);
        info!(serial = %self.identity.serial_number, session, "session closed");
    }

    fn is_authorized(&self, session: SessionId) -> bool {
        self.password.is_none() || self.authorized.contains(&session)
    }

    fn axis_index(&self, axis: Axis) -> AmcResult<usize> {
        usize::try_from(axis)
            .ok()
            .filter(|index| *index < self.axes.len())
            .ok_or_else(|| AmcError::invalid(format!("axis {axis} out of range")))
    }

    fn axis_mut(&mut self, axis: Axis) -> AmcResult<&mut AxisState> {
        let index = self.axis_index(axis)?;
        Ok(&mut self.axes[index])
    }

    fn axis(&self, axis: Axis) -> AmcResult<&AxisState> {
        let index = self.axis_index(axis)?;
        Ok(&self.axes[index])
    }

    fn scoped_axis(axis: Option<Axis>, scope: Scope, what: &str) -> AmcResult<Option<Axis>> {
        match (scope, axis) {
            (Scope::Axis, Some(axis)) => Ok(Some(axis)),
            (Scope::Axis, None) => Err(AmcError::invalid(format!("{what} needs an axis"))),
            (Scope::Device, None) => Ok(None),
            (Scope::Device, Some(_)) => {
                Err(AmcError::invalid(format!("{what} is not axis scoped")))
            }
        }
    }

    /// Answer one request from `session`.
    pub fn handle(&mut self, session: SessionId, request: &Request) -> AmcResult<Value> {
        if !self.sessions.contains(&session) {
            return Err(AmcError::NotConnected);
        }
        if request.needs_access() && !self.is_authorized(session) {
            debug!(session, method = request.method(), "refused, device locked");
            return Err(AmcError::AccessDenied);
        }
        for axis in &mut self.axes {
            axis.advance();
        }

        match request {
            Request::Read { axis, setting } => {
                match Self::scoped_axis(*axis, setting.scope(), setting.name())? {
                    Some(axis) => self.axis(axis)?.read(*setting),
                    None => self.read_device(*setting),
                }
            }
            Request::Write {
                axis,
                setting,
                value,
            } => match Self::scoped_axis(*axis, setting.scope(), setting.name())? {
                Some(axis) => self.axis_mut(axis)?.write(*setting, value.clone()),
                None => self.write_device(*setting, value.clone()),
            },
            Request::Status { axis, status } => {
                match Self::scoped_axis(*axis, status.scope(), "status query")? {
                    Some(axis) => Ok(self.axis(axis)?.status(*status)),
                    None => Ok(self.device_status(*status)),
                }
            }
            Request::ResetPosition { axis } => {
                self.axis_mut(*axis)?.reset_position();
                Ok(Value::Unit)
            }
            Request::Step {
                axis,
                backward,
                count,
            } => {
                self.axis_mut(*axis)?.step(*backward, *count)?;
                Ok(Value::Unit)
            }
            Request::Reboot => {
                self.reboot();
                Ok(Value::Unit)
            }
            Request::FactoryReset => {
                self.factory_reset_pending = true;
                Ok(Value::Unit)
            }
            Request::SetDeviceName { name } => {
                if name.is_empty() || name.len() > DEVICE_NAME_MAX_LEN {
                    return Err(AmcError::invalid(format!(
                        "device name must be 1..={DEVICE_NAME_MAX_LEN} bytes"
                    )));
                }
                self.device_name = name.clone();
                Ok(Value::Unit)
            }
            Request::LockStatus => Ok(Value::Lock(LockStatus {
                locked: self.password.is_some(),
                authorized: self.is_authorized(session),
            })),
            Request::Lock { password } => {
                if !self.is_authorized(session) {
                    return Err(AmcError::AccessDenied);
                }
                if password.is_empty() {
                    return Err(AmcError::invalid("password must not be empty"));
                }
                self.password = Some(password.clone());
                self.authorized.clear();
                self.authorized.insert(session);
                info!(session, "device locked");
                Ok(Value::Unit)
            }
            Request::GrantAccess { password } => match &self.password {
                None => Ok(Value::Unit),
                Some(current) if current == password => {
                    self.authorized.insert(session);
                    Ok(Value::Unit)
                }
                Some(_) => Err(AmcError::AccessDenied),
            },
            Request::Unlock => {
                self.password = None;
                self.authorized.clear();
                info!(session, "device unlocked");
                Ok(Value::Unit)
            }
            Request::ErrorText { lang, code } => {
                error_text(*lang, *code).map(|text| Value::Text(text.to_string()))
            }
            Request::SelectActorByName { axis, name } => {
                let (index, actor) = presets::by_name(name)
                    .ok_or_else(|| AmcError::invalid(format!("unknown actor '{name}'")))?;
                self.axis_mut(*axis)?.load_actor(saturate(index as i64), actor);
                Ok(Value::Unit)
            }
            Request::SetActorParameters { axis, parameters } => {
                parameters.validate()?;
                let state = self.axis_mut(*axis)?;
                let selection = state.actor_selection;
                state.load_actor(selection, parameters.clone());
                Ok(Value::Unit)
            }
            Request::ActorParameters { axis } => Ok(Value::Actor(self.axis(*axis)?.actor.clone())),
            Request::SetActorParameter { axis, name, value } => {
                let state = self.axis_mut(*axis)?;
                match value {
                    Value::Int(v) => state.actor.set_int(name, *v)?,
                    Value::Bool(v) => state.actor.set_bool(name, *v)?,
                    _ => return Err(AmcError::invalid("actor parameter expects int or flag")),
                }
                Ok(Value::Unit)
            }
            Request::ActorParameter { axis, name } => {
                self.axis(*axis)?.actor.get(name).map(Value::Text)
            }
            Request::Positioners => Ok(Value::Text(presets::list())),
        }
    }

    fn read_device(&self, setting: Setting) -> AmcResult<Value> {
        match setting {
            Setting::DeviceId => Ok(Value::Int(self.device_id)),
            Setting::RtOutMode => Ok(Value::Int(self.rt_out_mode.into())),
            other => Err(AmcError::invalid(format!("{} is axis scoped", other.name()))),
        }
    }

    fn write_device(&mut self, setting: Setting, value: Value) -> AmcResult<Value> {
        match setting {
            Setting::DeviceId => {
                self.device_id = expect_int(setting, value)?;
                info!(id = self.device_id, "device id written to flash");
            }
            Setting::RtOutMode => {
                self.rt_out_mode = RtOutMode::try_from(expect_int(setting, value)?)?;
            }
            other => {
                return Err(AmcError::invalid(format!("{} is axis scoped", other.name())))
            }
        }
        self.read_device(setting)
    }

    fn device_status(&self, key: StatusKey) -> Value {
        let text = match key {
            StatusKey::FirmwareVersion => &self.identity.firmware_version,
            StatusKey::FpgaVersion => &self.identity.fpga_version,
            StatusKey::MacAddress => &self.identity.mac_address,
            StatusKey::IpAddress => &self.identity.ip_address,
            StatusKey::DeviceType => &self.identity.device_type,
            StatusKey::SerialNumber => &self.identity.serial_number,
            StatusKey::DeviceName => &self.device_name,
            _ => return Value::Unit,
        };
        Value::Text(text.clone())
    }

    fn reboot(&mut self) {
        if self.factory_reset_pending {
            info!(serial = %self.identity.serial_number, "applying factory reset");
            self.factory_reset_pending = false;
            self.device_id = 0;
            self.device_name = Self::default_name(&self.identity);
            self.rt_out_mode = RtOutMode::AquadbLvttl;
            self.password = None;
            self.authorized.clear();
            for axis in &mut self.axes {
                *axis = AxisState::default();
            }
        } else {
            for axis in &mut self.axes {
                axis.power_cycle();
            }
        }
        info!(serial = %self.identity.serial_number, "rebooted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(axis: Axis, setting: Setting) -> Request {
        Request::Read {
            axis: Some(axis),
            setting,
        }
    }

    fn write(axis: Axis, setting: Setting, value: Value) -> Request {
        Request::Write {
            axis: Some(axis),
            setting,
            value,
        }
    }

    fn status(axis: Axis, status: StatusKey) -> Request {
        Request::Status {
            axis: Some(axis),
            status,
        }
    }

    fn device_with_session() -> (SimulatedDevice, SessionId) {
        let mut device = SimulatedDevice::new("SIM-0001");
        let session = device.open_session();
        (device, session)
    }

    #[test]
    fn amplitude_is_clamped() {
        let (mut device, s) = device_with_session();
        let accepted = device
            .handle(s, &write(0, Setting::Amplitude, Value::Int(75_000)))
            .unwrap();
        assert_eq!(accepted, Value::Int(60_000));
        let accepted = device
            .handle(s, &write(0, Setting::Amplitude, Value::Int(-5)))
            .unwrap();
        assert_eq!(accepted, Value::Int(0));
    }

    #[test]
    fn wrong_scope_and_kind_are_invalid() {
        let (mut device, s) = device_with_session();
        let no_axis = Request::Read {
            axis: None,
            setting: Setting::Amplitude,
        };
        assert!(matches!(device.handle(s, &no_axis), Err(AmcError::InvalidParam(_))));
        let with_axis = Request::Read {
            axis: Some(0),
            setting: Setting::DeviceId,
        };
        assert!(matches!(device.handle(s, &with_axis), Err(AmcError::InvalidParam(_))));
        assert!(matches!(
            device.handle(s, &write(0, Setting::Output, Value::Int(1))),
            Err(AmcError::InvalidParam(_))
        ));
        assert!(matches!(
            device.handle(s, &read(AXIS_COUNT, Setting::Amplitude)),
            Err(AmcError::InvalidParam(_))
        ));
    }

    #[test]
    fn closed_session_is_not_connected() {
        let (mut device, s) = device_with_session();
        device.close_session(s);
        assert!(matches!(
            device.handle(s, &read(0, Setting::Amplitude)),
            Err(AmcError::NotConnected)
        ));
    }

    #[test]
    fn approach_reaches_target_when_output_enabled() {
        let (mut device, s) = device_with_session();
        device
            .handle(s, &write(0, Setting::TargetPosition, Value::Int(20_000)))
            .unwrap();
        device.handle(s, &write(0, Setting::Move, Value::Bool(true))).unwrap();

        let moving = device.handle(s, &status(0, StatusKey::Moving)).unwrap();
        assert_eq!(moving, Value::Int(MovingStatus::Pending.into()));

        device.handle(s, &write(0, Setting::Output, Value::Bool(true))).unwrap();
        let position = device.handle(s, &status(0, StatusKey::Position)).unwrap();
        assert_eq!(position, Value::Int(20_000));
        assert_eq!(
            device.handle(s, &status(0, StatusKey::InTargetRange)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            device.handle(s, &status(0, StatusKey::Moving)).unwrap(),
            Value::Int(MovingStatus::Idle.into())
        );
        // Passing the mark at 1000 validated the reference.
        assert_eq!(
            device.handle(s, &status(0, StatusKey::ReferenceValid)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn travel_limit_raises_eot_and_drops_output() {
        let (mut device, s) = device_with_session();
        device
            .handle(s, &write(0, Setting::EotOutputDeactivate, Value::Bool(true)))
            .unwrap();
        device.handle(s, &write(0, Setting::Output, Value::Bool(true))).unwrap();
        device
            .handle(s, &write(0, Setting::TargetPosition, Value::Int(9_000_000)))
            .unwrap();
        device.handle(s, &write(0, Setting::Move, Value::Bool(true))).unwrap();

        assert_eq!(
            device.handle(s, &status(0, StatusKey::EotFwd)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            device.handle(s, &read(0, Setting::Output)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            device.handle(s, &status(0, StatusKey::Moving)).unwrap(),
            Value::Int(MovingStatus::Pending.into())
        );
    }

    #[test]
    fn steps_follow_actor_stepsize_and_reset_zeroes() {
        let (mut device, s) = device_with_session();
        device.handle(s, &write(1, Setting::Output, Value::Bool(true))).unwrap();
        device
            .handle(
                s,
                &Request::Step {
                    axis: 1,
                    backward: true,
                    count: 4,
                },
            )
            .unwrap();
        assert_eq!(device.handle(s, &status(1, StatusKey::NSteps)).unwrap(), Value::Int(4));
        assert_eq!(
            device.handle(s, &status(1, StatusKey::Position)).unwrap(),
            Value::Int(-200)
        );

        device.handle(s, &Request::ResetPosition { axis: 1 }).unwrap();
        assert_eq!(
            device.handle(s, &status(1, StatusKey::Position)).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            device.handle(s, &status(1, StatusKey::ReferenceValid)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn continuous_directions_are_exclusive() {
        let (mut device, s) = device_with_session();
        device
            .handle(s, &write(2, Setting::ContinuousFwd, Value::Bool(true)))
            .unwrap();
        device
            .handle(s, &write(2, Setting::ContinuousBkwd, Value::Bool(true)))
            .unwrap();
        assert_eq!(
            device.handle(s, &read(2, Setting::ContinuousFwd)).unwrap(),
            Value::Bool(false)
        );
        device
            .handle(s, &write(2, Setting::ContinuousFwd, Value::Bool(false)))
            .unwrap();
        assert_eq!(
            device.handle(s, &read(2, Setting::ContinuousBkwd)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn rt_input_off_rejects_pulse_scaling() {
        let (mut device, s) = device_with_session();
        assert!(matches!(
            device.handle(s, &write(0, Setting::RtInStepsPerPulse, Value::Int(3))),
            Err(AmcError::InvalidParam(_))
        ));
        device
            .handle(s, &write(0, Setting::RtInMode, Value::Int(8)))
            .unwrap();
        assert_eq!(
            device
                .handle(s, &write(0, Setting::RtInStepsPerPulse, Value::Int(3)))
                .unwrap(),
            Value::Int(3)
        );
        assert!(matches!(
            device.handle(s, &write(0, Setting::RtInMode, Value::Int(4))),
            Err(AmcError::InvalidParam(_))
        ));
    }

    #[test]
    fn lock_blocks_other_sessions_until_granted() {
        let (mut device, owner) = device_with_session();
        let other = device.open_session();
        device
            .handle(owner, &Request::Lock { password: "pw".into() })
            .unwrap();

        assert!(matches!(
            device.handle(other, &read(0, Setting::Amplitude)),
            Err(AmcError::AccessDenied)
        ));
        assert_eq!(
            device.handle(other, &Request::LockStatus).unwrap(),
            Value::Lock(LockStatus {
                locked: true,
                authorized: false
            })
        );
        assert!(matches!(
            device.handle(other, &Request::GrantAccess { password: "nope".into() }),
            Err(AmcError::AccessDenied)
        ));
        device
            .handle(other, &Request::GrantAccess { password: "pw".into() })
            .unwrap();
        assert!(device.handle(other, &read(0, Setting::Amplitude)).is_ok());
        device.handle(owner, &read(0, Setting::Amplitude)).unwrap();
    }

    #[test]
    fn reboot_restores_volatile_and_keeps_flash() {
        let (mut device, s) = device_with_session();
        device
            .handle(s, &write(0, Setting::Amplitude, Value::Int(12_000)))
            .unwrap();
        device
            .handle(
                s,
                &Request::Write {
                    axis: None,
                    setting: Setting::DeviceId,
                    value: Value::Int(42),
                },
            )
            .unwrap();
        device.handle(s, &Request::Reboot).unwrap();

        assert_eq!(
            device.handle(s, &read(0, Setting::Amplitude)).unwrap(),
            Value::Int(DEFAULT_AMPLITUDE_MV)
        );
        let id = Request::Read {
            axis: None,
            setting: Setting::DeviceId,
        };
        assert_eq!(device.handle(s, &id).unwrap(), Value::Int(42));

        device.handle(s, &Request::FactoryReset).unwrap();
        assert_eq!(device.handle(s, &id).unwrap(), Value::Int(42));
        device.handle(s, &Request::Reboot).unwrap();
        assert_eq!(device.handle(s, &id).unwrap(), Value::Int(0));
    }

    #[test]
    fn actor_selection_loads_preset() {
        let (mut device, s) = device_with_session();
        let (index, _) = presets::by_name("ANR101").unwrap();
        device
            .handle(s, &write(0, Setting::ActorSelection, Value::Int(index as i32)))
            .unwrap();
        assert_eq!(
            device.handle(s, &status(0, StatusKey::ActorName)).unwrap(),
            Value::Text("ANR101".into())
        );
        assert!(matches!(
            device.handle(s, &write(0, Setting::ActorSelection, Value::Int(200))),
            Err(AmcError::InvalidParam(_))
        ));
        assert!(matches!(
            device.handle(s, &write(0, Setting::ActorSelection, Value::Int(256))),
            Err(AmcError::InvalidParam(_))
        ));
    }

    #[test]
    fn rotator_saturates_instead_of_overflowing() {
        let (mut device, s) = device_with_session();
        device
            .handle(
                s,
                &Request::SelectActorByName {
                    axis: 0,
                    name: "ANR101".into(),
                },
            )
            .unwrap();
        device
            .handle(
                s,
                &Request::SetActorParameter {
                    axis: 0,
                    name: "stepsize".into(),
                    value: Value::Int(i32::MAX),
                },
            )
            .unwrap();
        device.handle(s, &write(0, Setting::Output, Value::Bool(true))).unwrap();

        let step = Request::Step {
            axis: 0,
            backward: false,
            count: i32::MAX,
        };
        for _ in 0..4 {
            device.handle(s, &step).unwrap();
        }
        assert_eq!(
            device.handle(s, &status(0, StatusKey::Position)).unwrap(),
            Value::Int(i32::MAX)
        );

        device.handle(s, &Request::ResetPosition { axis: 0 }).unwrap();
        device
            .handle(
                s,
                &Request::Step {
                    axis: 0,
                    backward: true,
                    count: i32::MAX,
                },
            )
            .unwrap();
        assert_eq!(
            device.handle(s, &status(0, StatusKey::Position)).unwrap(),
            Value::Int(i32::MIN)
        );
    }

    #[test]
    fn invalid_parameter_sets_are_rejected() {
        let (mut device, s) = device_with_session();
        let current = match device
            .handle(s, &Request::ActorParameters { axis: 0 })
            .unwrap()
        {
            Value::Actor(params) => params,
            other => panic!("unexpected {other:?}"),
        };

        for parameters in [
            ActorParameters { amax: -5, ..current.clone() },
            ActorParameters { stepsize: 0, ..current.clone() },
            ActorParameters { fmax: -1, ..current.clone() },
        ] {
            assert!(matches!(
                device.handle(s, &Request::SetActorParameters { axis: 0, parameters }),
                Err(AmcError::InvalidParam(_))
            ));
        }
        assert_eq!(
            device.handle(s, &read(0, Setting::Amplitude)).unwrap(),
            Value::Int(DEFAULT_AMPLITUDE_MV)
        );

        let silent = ActorParameters { amax: 0, ..current };
        device
            .handle(s, &Request::SetActorParameters { axis: 0, parameters: silent })
            .unwrap();
        assert_eq!(
            device.handle(s, &read(0, Setting::Amplitude)).unwrap(),
            Value::Int(0)
        );
    }
}
