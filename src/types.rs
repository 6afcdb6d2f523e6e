//! Handles, enumerations and value types shared by every layer.

use crate::error::AmcError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a positioning channel on a device.
pub type Axis = u32;

/// Opaque session handle returned by [`crate::Amc100::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceHandle(pub i32);

impl DeviceHandle {
    /// Raw integer, as handed out by the C interface.
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Declares a `#[repr(i32)]` enum together with its `TryFrom<i32>` and
/// `From<Self> for i32` conversions so that it travels as a plain integer on
/// the wire.
macro_rules! int_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($what:literal) {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i32", into = "i32")]
        #[repr(i32)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl TryFrom<i32> for $name {
            type Error = AmcError;

            fn try_from(raw: i32) -> Result<Self, Self::Error> {
                match raw {
                    $($value => Ok($name::$variant),)+
                    other => Err(AmcError::invalid(format!("{} {} out of range", $what, other))),
                }
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value as i32
            }
        }
    };
}

int_enum! {
    /// Kind of positioner attached to an axis. Selects the position unit.
    pub enum ActorType("actor type") {
        /// Linear positioner, positions in nm.
        Linear = 0,
        /// Goniometer, positions in µ°.
        Goniometer = 1,
        /// Rotator, positions in µ°.
        Rotator = 2,
    }
}

impl ActorType {
    /// Unit of positions, target and range values for this actor.
    pub fn position_unit(self) -> &'static str {
        match self {
            ActorType::Linear => "nm",
            ActorType::Goniometer | ActorType::Rotator => "µ°",
        }
    }
}

int_enum! {
    /// Electrical standard of the real-time position output.
    pub enum RtOutMode("real-time output mode") {
        /// AQuadB on LVTTL.
        AquadbLvttl = 0,
        /// AQuadB on LVDS.
        AquadbLvds = 1,
    }
}

int_enum! {
    /// Real-time input interpretation for one axis.
    pub enum RtInMode("real-time input mode") {
        /// AQuadB on LVTTL.
        AquadbLvttl = 0,
        /// AQuadB on LVDS.
        AquadbLvds = 1,
        /// Step/direction on LVTTL.
        StepperLvttl = 8,
        /// Step/direction on LVDS.
        StepperLvds = 9,
        /// Trigger on LVTTL.
        TriggerLvttl = 10,
        /// Trigger on LVDS.
        TriggerLvds = 11,
        /// Real-time input disabled.
        Off = 15,
    }
}

int_enum! {
    /// Feedback behaviour of the real-time input.
    pub enum RtInLoopMode("loop mode") {
        /// Pulses translate into steps.
        OpenLoop = 0,
        /// Pulses translate into a position change.
        ClosedLoop = 1,
    }
}

int_enum! {
    /// State of an axis output stage.
    pub enum MovingStatus("moving status") {
        /// Not driving.
        Idle = 0,
        /// Driving with the output active.
        Moving = 1,
        /// Driving but the output is deactivated (EOT or output relay off).
        Pending = 2,
    }
}

/// Full description of an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorParameters {
    /// Display name.
    pub name: String,
    /// Positioner kind.
    pub actor_type: ActorType,
    /// Maximum drive frequency in mHz.
    pub fmax: i32,
    /// Maximum drive amplitude in mV.
    pub amax: i32,
    /// Invert the sensor direction.
    pub sensor_dir: bool,
    /// Invert the actuator direction.
    pub actor_dir: bool,
    /// Pitch of the sensor grading in nm (or µ°).
    pub pitch: i32,
    /// Sensor sensitivity.
    pub sensitivity: i32,
    /// Nominal step size in nm (or µ°).
    pub stepsize: i32,
}

/// Names accepted by the per-parameter actor accessors.
pub const ACTOR_PARAMETER_NAMES: [&str; 8] = [
    "type",
    "fmax",
    "amax",
    "sensor_dir",
    "actor_dir",
    "pitch",
    "sensitivity",
    "stepsize",
];

impl ActorParameters {
    /// Read one parameter, rendered as text.
    pub fn get(&self, name: &str) -> Result<String, AmcError> {
        let value = match name {
            "name" => self.name.clone(),
            "type" => i32::from(self.actor_type).to_string(),
            "fmax" => self.fmax.to_string(),
            "amax" => self.amax.to_string(),
            "sensor_dir" => u8::from(self.sensor_dir).to_string(),
            "actor_dir" => u8::from(self.actor_dir).to_string(),
            "pitch" => self.pitch.to_string(),
            "sensitivity" => self.sensitivity.to_string(),
            "stepsize" => self.stepsize.to_string(),
            other => return Err(AmcError::invalid(format!("unknown actor parameter '{other}'"))),
        };
        Ok(value)
    }

    /// Write an integer parameter. Direction flags take any non-zero as true.
    pub fn set_int(&mut self, name: &str, value: i32) -> Result<(), AmcError> {
        match name {
            "type" => self.actor_type = ActorType::try_from(value)?,
            "fmax" => self.fmax = non_negative(name, value)?,
            "amax" => self.amax = non_negative(name, value)?,
            "sensor_dir" => self.sensor_dir = value != 0,
            "actor_dir" => self.actor_dir = value != 0,
            "pitch" => self.pitch = non_negative(name, value)?,
            "sensitivity" => self.sensitivity = value,
            "stepsize" => self.stepsize = positive(name, value)?,
            other => return Err(AmcError::invalid(format!("unknown actor parameter '{other}'"))),
        }
        Ok(())
    }

    /// Check a complete parameter set against the same limits the
    /// per-parameter setters enforce.
    pub fn validate(&self) -> Result<(), AmcError> {
        if self.name.is_empty() {
            return Err(AmcError::invalid("actor name must not be empty"));
        }
        non_negative("fmax", self.fmax)?;
        non_negative("amax", self.amax)?;
        non_negative("pitch", self.pitch)?;
        positive("stepsize", self.stepsize)?;
        Ok(())
    }

    /// Write a boolean parameter. Only the direction flags are boolean.
    pub fn set_bool(&mut self, name: &str, value: bool) -> Result<(), AmcError> {
        match name {
            "sensor_dir" => self.sensor_dir = value,
            "actor_dir" => self.actor_dir = value,
            other if ACTOR_PARAMETER_NAMES.contains(&other) => {
                return Err(AmcError::invalid(format!(
                    "actor parameter '{other}' is not boolean"
                )))
            }
            other => return Err(AmcError::invalid(format!("unknown actor parameter '{other}'"))),
        }
        Ok(())
    }
}

fn non_negative(name: &str, value: i32) -> Result<i32, AmcError> {
    if value < 0 {
        return Err(AmcError::invalid(format!("{name} must not be negative, got {value}")));
    }
    Ok(value)
}

fn positive(name: &str, value: i32) -> Result<i32, AmcError> {
    if value <= 0 {
        return Err(AmcError::invalid(format!("{name} must be positive, got {value}")));
    }
    Ok(value)
}

/// Lock state of a device as seen by one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    /// A password lock is active.
    pub locked: bool,
    /// This session may operate the device.
    pub authorized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ActorParameters {
        ActorParameters {
            name: "ANPx101".into(),
            actor_type: ActorType::Linear,
            fmax: 2_000_000,
            amax: 60_000,
            sensor_dir: false,
            actor_dir: false,
            pitch: 4_000,
            sensitivity: 1,
            stepsize: 50,
        }
    }

    #[test]
    fn rt_in_mode_rejects_gaps() {
        assert_eq!(RtInMode::try_from(15).unwrap(), RtInMode::Off);
        assert_eq!(RtInMode::try_from(9).unwrap(), RtInMode::StepperLvds);
        assert!(RtInMode::try_from(2).is_err());
        assert!(RtInMode::try_from(12).is_err());
        assert_eq!(i32::from(RtInMode::TriggerLvds), 11);
    }

    #[test]
    fn enums_serialize_as_integers() {
        let json = serde_json::to_string(&MovingStatus::Pending).unwrap();
        assert_eq!(json, "2");
        let parsed: ActorType = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, ActorType::Goniometer);
        assert!(serde_json::from_str::<ActorType>("7").is_err());
    }

    #[test]
    fn actor_parameters_by_name() {
        let mut params = sample();
        assert_eq!(params.get("stepsize").unwrap(), "50");
        params.set_int("stepsize", 25).unwrap();
        params.set_int("actor_dir", 3).unwrap();
        params.set_bool("sensor_dir", true).unwrap();
        assert_eq!(params.stepsize, 25);
        assert!(params.actor_dir);
        assert_eq!(params.get("sensor_dir").unwrap(), "1");

        assert!(params.set_bool("fmax", true).is_err());
        assert!(params.set_int("amax", -1).is_err());
        assert!(params.get("colour").is_err());
        assert!(params.set_int("type", 5).is_err());
    }

    #[test]
    fn parameter_sets_are_checked_as_a_whole() {
        assert!(sample().validate().is_ok());
        assert!(sample().set_int("stepsize", 0).is_err());

        let negative_amax = ActorParameters { amax: -5, ..sample() };
        assert!(negative_amax.validate().is_err());
        let zero_step = ActorParameters { stepsize: 0, ..sample() };
        assert!(zero_step.validate().is_err());
        let unnamed = ActorParameters { name: String::new(), ..sample() };
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn position_units_follow_actor_type() {
        assert_eq!(ActorType::Linear.position_unit(), "nm");
        assert_eq!(ActorType::Rotator.position_unit(), "µ°");
    }
}
