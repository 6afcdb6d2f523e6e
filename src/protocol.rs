//! Request/response exchange with the controller.
//!
//! Every facade call becomes exactly one [`Request`] answered by exactly one
//! [`Value`] or error. The same types are used in process (simulated
//! transport) and on the wire, where they travel as line-delimited JSON-RPC
//! 2.0:
//!
//! ```text
//! -> {"jsonrpc":"2.0","id":7,"method":"read","params":{"axis":0,"setting":"amplitude"}}
//! <- {"jsonrpc":"2.0","id":7,"result":{"int":30000}}
//! <- {"jsonrpc":"2.0","id":8,"error":{"code":-9,"message":"Invalid parameter: axis 5"}}
//! ```

use crate::error::{AmcError, AmcResult, NcbCode};
use crate::types::{ActorParameters, Axis, LockStatus};
use serde::{Deserialize, Serialize};

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Marker placed in `error.data` for access-denied failures, which share
/// their integer code with unspecified errors.
pub const ACCESS_DENIED_MARKER: &str = "access_denied";

/// Whether a parameter belongs to an axis or to the whole device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Needs an axis index.
    Axis,
    /// Must not carry an axis index.
    Device,
}

/// Value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Signed integer.
    Int,
    /// Flag.
    Bool,
}

/// Parameters that can be both read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    /// Output relay.
    Output,
    /// Drive amplitude, mV.
    Amplitude,
    /// Drive frequency, mHz.
    Frequency,
    /// Actor preset index.
    ActorSelection,
    /// Approach to the target position.
    Move,
    /// Continuous motion forward.
    ContinuousFwd,
    /// Continuous motion backward.
    ContinuousBkwd,
    /// Target position, nm or µ°.
    TargetPosition,
    /// Update the reference each time the mark is passed.
    ReferenceAutoUpdate,
    /// Reset the position each time the reference is passed.
    AutoReset,
    /// Window around the target for the in-range flag, nm or µ°.
    TargetRange,
    /// Deactivate the output on end of travel.
    EotOutputDeactivate,
    /// DC output level, µV.
    FixOutputVoltage,
    /// AQuadB input resolution, nm.
    AquadbInResolution,
    /// AQuadB position output.
    AquadbOut,
    /// AQuadB output resolution, nm.
    AquadbOutResolution,
    /// AQuadB output clock, multiples of 20 ns.
    AquadbOutClock,
    /// Real-time input mode.
    RtInMode,
    /// Real-time input loop mode.
    RtInLoopMode,
    /// Closed-loop change per pulse, nm.
    RtInChangePerPulse,
    /// Open-loop steps per pulse.
    RtInStepsPerPulse,
    /// Real-time input driven motion.
    RtInMove,
    /// Device identifier, persisted to flash.
    DeviceId,
    /// Real-time output signal mode.
    RtOutMode,
}

impl Setting {
    /// Every setting, axis-scoped first.
    pub const ALL: [Setting; 24] = [
        Setting::Output,
        Setting::Amplitude,
        Setting::Frequency,
        Setting::ActorSelection,
        Setting::Move,
        Setting::ContinuousFwd,
        Setting::ContinuousBkwd,
        Setting::TargetPosition,
        Setting::ReferenceAutoUpdate,
        Setting::AutoReset,
        Setting::TargetRange,
        Setting::EotOutputDeactivate,
        Setting::FixOutputVoltage,
        Setting::AquadbInResolution,
        Setting::AquadbOut,
        Setting::AquadbOutResolution,
        Setting::AquadbOutClock,
        Setting::RtInMode,
        Setting::RtInLoopMode,
        Setting::RtInChangePerPulse,
        Setting::RtInStepsPerPulse,
        Setting::RtInMove,
        Setting::DeviceId,
        Setting::RtOutMode,
    ];

    /// Axis or device scope.
    pub fn scope(self) -> Scope {
        match self {
            Setting::DeviceId | Setting::RtOutMode => Scope::Device,
            _ => Scope::Axis,
        }
    }

    /// Integer or flag.
    pub fn kind(self) -> ValueKind {
        match self {
            Setting::Output
            | Setting::Move
            | Setting::ContinuousFwd
            | Setting::ContinuousBkwd
            | Setting::ReferenceAutoUpdate
            | Setting::AutoReset
            | Setting::EotOutputDeactivate
            | Setting::AquadbOut
            | Setting::RtInMove => ValueKind::Bool,
            _ => ValueKind::Int,
        }
    }

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Setting::Output => "output",
            Setting::Amplitude => "amplitude",
            Setting::Frequency => "frequency",
            Setting::ActorSelection => "actor_selection",
            Setting::Move => "move",
            Setting::ContinuousFwd => "continuous_fwd",
            Setting::ContinuousBkwd => "continuous_bkwd",
            Setting::TargetPosition => "target_position",
            Setting::ReferenceAutoUpdate => "reference_auto_update",
            Setting::AutoReset => "auto_reset",
            Setting::TargetRange => "target_range",
            Setting::EotOutputDeactivate => "eot_output_deactivate",
            Setting::FixOutputVoltage => "fix_output_voltage",
            Setting::AquadbInResolution => "aquadb_in_resolution",
            Setting::AquadbOut => "aquadb_out",
            Setting::AquadbOutResolution => "aquadb_out_resolution",
            Setting::AquadbOutClock => "aquadb_out_clock",
            Setting::RtInMode => "rt_in_mode",
            Setting::RtInLoopMode => "rt_in_loop_mode",
            Setting::RtInChangePerPulse => "rt_in_change_per_pulse",
            Setting::RtInStepsPerPulse => "rt_in_steps_per_pulse",
            Setting::RtInMove => "rt_in_move",
            Setting::DeviceId => "device_id",
            Setting::RtOutMode => "rt_out_mode",
        }
    }

    /// Look a setting up by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

/// Read-only quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKey {
    /// Name of the selected actor (axis).
    ActorName,
    /// Type of the selected actor (axis).
    ActorType,
    /// Step count of the last step command (axis).
    NSteps,
    /// Reference position is valid (axis).
    ReferenceValid,
    /// Output stage state (axis).
    Moving,
    /// An actor is electrically connected (axis).
    Connected,
    /// Reference position, nm or µ° (axis).
    ReferencePosition,
    /// Actor position, nm or µ° (axis).
    Position,
    /// Position is within the target range (axis).
    InTargetRange,
    /// End of travel detected forward (axis).
    EotFwd,
    /// End of travel detected backward (axis).
    EotBkwd,
    /// Firmware version string.
    FirmwareVersion,
    /// FPGA version string.
    FpgaVersion,
    /// MAC address string.
    MacAddress,
    /// IP address string.
    IpAddress,
    /// Device type from the EEPROM.
    DeviceType,
    /// Serial number.
    SerialNumber,
    /// Friendly name.
    DeviceName,
}

impl StatusKey {
    /// Axis or device scope.
    pub fn scope(self) -> Scope {
        match self {
            StatusKey::FirmwareVersion
            | StatusKey::FpgaVersion
            | StatusKey::MacAddress
            | StatusKey::IpAddress
            | StatusKey::DeviceType
            | StatusKey::SerialNumber
            | StatusKey::DeviceName => Scope::Device,
            _ => Scope::Axis,
        }
    }
}

/// One value exchanged with the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// No payload.
    Unit,
    /// Integer.
    Int(i32),
    /// Flag.
    Bool(bool),
    /// Text.
    Text(String),
    /// Actor description.
    Actor(ActorParameters),
    /// Lock state.
    Lock(LockStatus),
}

impl Value {
    fn kind_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
            Value::Actor(_) => "actor",
            Value::Lock(_) => "lock",
        }
    }

    fn mismatch(&self, expected: &str) -> AmcError {
        AmcError::DriverError(format!(
            "expected {expected} reply, got {}",
            self.kind_name()
        ))
    }

    /// Expect an empty reply.
    pub fn into_unit(self) -> AmcResult<()> {
        match self {
            Value::Unit => Ok(()),
            other => Err(other.mismatch("unit")),
        }
    }

    /// Expect an integer.
    pub fn into_int(self) -> AmcResult<i32> {
        match self {
            Value::Int(v) => Ok(v),
            other => Err(other.mismatch("int")),
        }
    }

    /// Expect a flag.
    pub fn into_bool(self) -> AmcResult<bool> {
        match self {
            Value::Bool(v) => Ok(v),
            other => Err(other.mismatch("bool")),
        }
    }

    /// Expect text.
    pub fn into_text(self) -> AmcResult<String> {
        match self {
            Value::Text(v) => Ok(v),
            other => Err(other.mismatch("text")),
        }
    }

    /// Expect an actor description.
    pub fn into_actor(self) -> AmcResult<ActorParameters> {
        match self {
            Value::Actor(v) => Ok(v),
            other => Err(other.mismatch("actor")),
        }
    }

    /// Expect a lock state.
    pub fn into_lock(self) -> AmcResult<LockStatus> {
        match self {
            Value::Lock(v) => Ok(v),
            other => Err(other.mismatch("lock")),
        }
    }
}

/// A single operation on a connected device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Read a setting.
    Read {
        /// Axis for axis-scoped settings.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        axis: Option<Axis>,
        /// Which setting.
        setting: Setting,
    },
    /// Write a setting; the reply carries the accepted value.
    Write {
        /// Axis for axis-scoped settings.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        axis: Option<Axis>,
        /// Which setting.
        setting: Setting,
        /// Requested value.
        value: Value,
    },
    /// Read a status quantity or device string.
    Status {
        /// Axis for axis-scoped quantities.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        axis: Option<Axis>,
        /// Which quantity.
        status: StatusKey,
    },
    /// Zero the position and invalidate the reference.
    ResetPosition {
        /// Target axis.
        axis: Axis,
    },
    /// Trigger `count` single steps.
    Step {
        /// Target axis.
        axis: Axis,
        /// Direction.
        backward: bool,
        /// Number of steps.
        count: i32,
    },
    /// Restart the controller.
    Reboot,
    /// Restore factory settings on next reboot.
    FactoryReset,
    /// Change the friendly name.
    SetDeviceName {
        /// New name.
        name: String,
    },
    /// Query lock state.
    LockStatus,
    /// Lock the device.
    Lock {
        /// Password.
        password: String,
    },
    /// Ask for access to a locked device.
    GrantAccess {
        /// Password.
        password: String,
    },
    /// Remove the lock.
    Unlock,
    /// Translate a result code.
    ErrorText {
        /// 0 English, 1 German.
        lang: i32,
        /// Result code.
        code: i32,
    },
    /// Load a preset actor by name.
    SelectActorByName {
        /// Target axis.
        axis: Axis,
        /// Preset name.
        name: String,
    },
    /// Describe the actor completely.
    SetActorParameters {
        /// Target axis.
        axis: Axis,
        /// Parameter set.
        parameters: ActorParameters,
    },
    /// Read the full actor description.
    ActorParameters {
        /// Target axis.
        axis: Axis,
    },
    /// Write one actor parameter.
    SetActorParameter {
        /// Target axis.
        axis: Axis,
        /// Parameter name.
        name: String,
        /// Int or Bool.
        value: Value,
    },
    /// Read one actor parameter as text.
    ActorParameter {
        /// Target axis.
        axis: Axis,
        /// Parameter name.
        name: String,
    },
    /// Names of all actor presets.
    Positioners,
}

impl Request {
    /// Method name used on the wire and in logs.
    pub fn method(&self) -> &'static str {
        match self {
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::Status { .. } => "status",
            Request::ResetPosition { .. } => "reset_position",
            Request::Step { .. } => "step",
            Request::Reboot => "reboot",
            Request::FactoryReset => "factory_reset",
            Request::SetDeviceName { .. } => "set_device_name",
            Request::LockStatus => "lock_status",
            Request::Lock { .. } => "lock",
            Request::GrantAccess { .. } => "grant_access",
            Request::Unlock => "unlock",
            Request::ErrorText { .. } => "error_text",
            Request::SelectActorByName { .. } => "select_actor_by_name",
            Request::SetActorParameters { .. } => "set_actor_parameters",
            Request::ActorParameters { .. } => "actor_parameters",
            Request::SetActorParameter { .. } => "set_actor_parameter",
            Request::ActorParameter { .. } => "actor_parameter",
            Request::Positioners => "positioners",
        }
    }

    /// Whether a locked device refuses this request from an unauthorized
    /// session.
    pub fn needs_access(&self) -> bool {
        !matches!(
            self,
            Request::LockStatus
                | Request::GrantAccess { .. }
                | Request::ErrorText { .. }
                | Request::Lock { .. }
        )
    }
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Result code.
    pub code: i32,
    /// Human readable message.
    pub message: String,
    /// Extra classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl From<&AmcError> for RpcError {
    fn from(err: &AmcError) -> Self {
        let data = matches!(err, AmcError::AccessDenied).then(|| ACCESS_DENIED_MARKER.to_string());
        Self {
            code: err.code().as_i32(),
            message: err.to_string(),
            data,
        }
    }
}

impl RpcError {
    /// Turn a received error object back into a client error.
    pub fn into_error(self) -> AmcError {
        if self.data.as_deref() == Some(ACCESS_DENIED_MARKER) {
            return AmcError::AccessDenied;
        }
        let message = self.message;
        AmcError::from_code(self.code, message.clone()).unwrap_or_else(|| {
            AmcError::DriverError(format!("error reply with code 0: {message}"))
        })
    }
}

/// JSON-RPC response line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always "2.0".
    pub jsonrpc: String,
    /// Id of the request being answered.
    pub id: u64,
    /// Successful reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Build a response from the outcome of a request.
    pub fn from_outcome(id: u64, outcome: &AmcResult<Value>) -> Self {
        let (result, error) = match outcome {
            Ok(value) => (Some(value.clone()), None),
            Err(err) => (None, Some(RpcError::from(err))),
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
            error,
        }
    }

    /// Unpack into the outcome it carries.
    pub fn into_outcome(self) -> AmcResult<Value> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error.into_error()),
            (Some(value), None) => Ok(value),
            (None, None) => Err(AmcError::Protocol(format!(
                "response {} has neither result nor error",
                self.id
            ))),
        }
    }
}

/// Encode a request as one JSON-RPC line (without the newline).
pub fn encode_request(id: u64, request: &Request) -> AmcResult<String> {
    let mut object = match serde_json::to_value(request) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            return Err(AmcError::Protocol(format!(
                "request encoded to non-object {other}"
            )))
        }
        Err(e) => return Err(AmcError::Protocol(format!("failed to encode request: {e}"))),
    };
    object.insert("jsonrpc".into(), JSONRPC_VERSION.into());
    object.insert("id".into(), id.into());
    Ok(serde_json::Value::Object(object).to_string())
}

/// Decode one JSON-RPC request line into its id and request.
///
/// The id is returned whenever it could be read so that a failure can still
/// be answered.
pub fn decode_request(line: &str) -> Result<(u64, Request), (Option<u64>, AmcError)> {
    let mut object = match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(_) => return Err((None, AmcError::Protocol("request is not an object".into()))),
        Err(e) => return Err((None, AmcError::Protocol(format!("invalid JSON: {e}")))),
    };
    let id = object.remove("id").and_then(|v| v.as_u64());
    match object.remove("jsonrpc") {
        Some(serde_json::Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => {
            return Err((
                id,
                AmcError::Protocol("missing or unsupported jsonrpc version".into()),
            ))
        }
    }
    let Some(id) = id else {
        return Err((None, AmcError::Protocol("request without numeric id".into())));
    };
    serde_json::from_value::<Request>(serde_json::Value::Object(object))
        .map(|request| (id, request))
        .map_err(|e| (Some(id), AmcError::Protocol(format!("invalid request: {e}"))))
}

/// Text for a result code. `lang` 0 is English, 1 is German.
pub fn error_text(lang: i32, code: i32) -> AmcResult<&'static str> {
    let code = NcbCode::from_i32(code);
    let text = match (lang, code) {
        (0, Some(NcbCode::Ok)) => "No error",
        (0, Some(NcbCode::Error)) => "Unspecified error",
        (0, Some(NcbCode::NotConnected)) => "No active connection to device",
        (0, Some(NcbCode::DriverError)) => "Error in communication with driver",
        (0, Some(NcbCode::NetworkError)) => "Network error when connecting to AMC",
        (0, Some(NcbCode::BadIpAddress)) => "Bad IP address",
        (0, Some(NcbCode::ConnectionTimeout)) => "Connection timeout",
        (0, Some(NcbCode::NoDeviceFound)) => "No device found",
        (0, Some(NcbCode::InvalidParam)) => "Parameter out of range",
        (0, Some(NcbCode::FeatureNotAvailable)) => "Feature only available in pro version",
        (0, None) => "Unknown error",
        (1, Some(NcbCode::Ok)) => "Kein Fehler",
        (1, Some(NcbCode::Error)) => "Unbekannter Fehler",
        (1, Some(NcbCode::NotConnected)) => "Keine aktive Verbindung zum Gerät",
        (1, Some(NcbCode::DriverError)) => "Fehler in der Kommunikation mit dem Treiber",
        (1, Some(NcbCode::NetworkError)) => "Netzwerkfehler bei der Verbindung zum AMC",
        (1, Some(NcbCode::BadIpAddress)) => "Ungültige IP-Adresse",
        (1, Some(NcbCode::ConnectionTimeout)) => "Zeitüberschreitung der Verbindung",
        (1, Some(NcbCode::NoDeviceFound)) => "Kein Gerät gefunden",
        (1, Some(NcbCode::InvalidParam)) => "Parameter außerhalb des Bereichs",
        (1, Some(NcbCode::FeatureNotAvailable)) => "Funktion nur in der Pro-Version verfügbar",
        (1, None) => "Unbekannter Fehlercode",
        (other, _) => {
            return Err(AmcError::invalid(format!("unsupported language {other}")))
        }
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_has_jsonrpc_shape() {
        let line = encode_request(
            7,
            &Request::Read {
                axis: Some(0),
                setting: Setting::Amplitude,
            },
        )
        .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 7);
        assert_eq!(parsed["method"], "read");
        assert_eq!(parsed["params"]["setting"], "amplitude");
        assert_eq!(parsed["params"]["axis"], 0);
    }

    #[test]
    fn unit_requests_decode_without_params() {
        let (id, request) =
            decode_request(r#"{"jsonrpc":"2.0","id":3,"method":"reboot"}"#).unwrap();
        assert_eq!(id, 3);
        assert_eq!(request, Request::Reboot);
    }

    #[test]
    fn decode_reports_id_of_bad_request() {
        let err = decode_request(r#"{"jsonrpc":"2.0","id":9,"method":"warp"}"#).unwrap_err();
        assert_eq!(err.0, Some(9));
        assert!(matches!(err.1, AmcError::Protocol(_)));

        let err = decode_request("not json").unwrap_err();
        assert_eq!(err.0, None);

        let err = decode_request(r#"{"jsonrpc":"1.0","id":1,"method":"reboot"}"#).unwrap_err();
        assert_eq!(err.0, Some(1));
    }

    #[test]
    fn access_denied_survives_the_wire() {
        let response = RpcResponse::from_outcome(1, &Err(AmcError::AccessDenied));
        let line = serde_json::to_string(&response).unwrap();
        let back: RpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(back.error.as_ref().map(|e| e.code), Some(-1));
        assert!(matches!(back.into_outcome(), Err(AmcError::AccessDenied)));
    }

    #[test]
    fn settings_know_their_scope_and_kind() {
        assert_eq!(Setting::DeviceId.scope(), Scope::Device);
        assert_eq!(Setting::Amplitude.scope(), Scope::Axis);
        assert_eq!(Setting::AquadbOut.kind(), ValueKind::Bool);
        assert_eq!(Setting::AquadbOutClock.kind(), ValueKind::Int);
        for setting in Setting::ALL {
            assert_eq!(Setting::from_name(setting.name()), Some(setting));
            let json = serde_json::to_string(&setting).unwrap();
            assert_eq!(json, format!("\"{}\"", setting.name()));
        }
    }

    #[test]
    fn error_texts_cover_both_languages() {
        assert_eq!(error_text(0, -9).unwrap(), "Parameter out of range");
        assert_eq!(error_text(1, -2).unwrap(), "Keine aktive Verbindung zum Gerät");
        assert_eq!(error_text(0, 1234).unwrap(), "Unknown error");
        assert!(error_text(2, 0).is_err());
    }

    #[test]
    fn value_accessors_reject_wrong_kind() {
        assert_eq!(Value::Int(4).into_int().unwrap(), 4);
        assert!(matches!(
            Value::Text("x".into()).into_bool(),
            Err(AmcError::DriverError(_))
        ));
    }
}
