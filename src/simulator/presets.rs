//! Built-in actor presets of the simulated controller.

use crate::types::{ActorParameters, ActorType};

struct Preset {
    name: &'static str,
    actor_type: ActorType,
    fmax: i32,
    amax: i32,
    pitch: i32,
    sensitivity: i32,
    stepsize: i32,
}

#[rustfmt::skip]
const PRESETS: &[Preset] = &[
    Preset { name: "ANPx101", actor_type: ActorType::Linear, fmax: 5_000_000, amax: 60_000, pitch: 4_000, sensitivity: 1, stepsize: 50 },
    Preset { name: "ANPx311", actor_type: ActorType::Linear, fmax: 5_000_000, amax: 60_000, pitch: 4_000, sensitivity: 1, stepsize: 30 },
    Preset { name: "ANPx321", actor_type: ActorType::Linear, fmax: 5_000_000, amax: 60_000, pitch: 4_000, sensitivity: 1, stepsize: 30 },
    Preset { name: "ANPx341", actor_type: ActorType::Linear, fmax: 3_000_000, amax: 60_000, pitch: 4_000, sensitivity: 1, stepsize: 60 },
    Preset { name: "ANPz101", actor_type: ActorType::Linear, fmax: 3_000_000, amax: 60_000, pitch: 4_000, sensitivity: 1, stepsize: 25 },
    Preset { name: "ANPz102", actor_type: ActorType::Linear, fmax: 3_000_000, amax: 60_000, pitch: 4_000, sensitivity: 1, stepsize: 25 },
    Preset { name: "ANGt101", actor_type: ActorType::Goniometer, fmax: 2_000_000, amax: 60_000, pitch: 100_000, sensitivity: 1, stepsize: 200 },
    Preset { name: "ANGp101", actor_type: ActorType::Goniometer, fmax: 2_000_000, amax: 60_000, pitch: 100_000, sensitivity: 1, stepsize: 200 },
    Preset { name: "ANR101", actor_type: ActorType::Rotator, fmax: 1_000_000, amax: 60_000, pitch: 1_000_000, sensitivity: 1, stepsize: 1_000 },
    Preset { name: "ANR240", actor_type: ActorType::Rotator, fmax: 1_000_000, amax: 60_000, pitch: 1_000_000, sensitivity: 1, stepsize: 500 },
];

/// Number of presets in the table.
pub fn count() -> usize {
    PRESETS.len()
}

/// Actor loaded on every axis after a factory reset.
pub fn default_actor() -> ActorParameters {
    to_parameters(&PRESETS[0])
}

/// Preset by index.
pub fn by_index(index: usize) -> Option<ActorParameters> {
    PRESETS.get(index).map(to_parameters)
}

/// Preset and its index by name.
pub fn by_name(name: &str) -> Option<(usize, ActorParameters)> {
    PRESETS
        .iter()
        .position(|p| p.name == name)
        .map(|index| (index, to_parameters(&PRESETS[index])))
}

/// Preset names, one per line.
pub fn list() -> String {
    PRESETS
        .iter()
        .map(|p| p.name)
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_parameters(preset: &Preset) -> ActorParameters {
    ActorParameters {
        name: preset.name.to_string(),
        actor_type: preset.actor_type,
        fmax: preset.fmax,
        amax: preset.amax,
        sensor_dir: false,
        actor_dir: false,
        pitch: preset.pitch,
        sensitivity: preset.sensitivity,
        stepsize: preset.stepsize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_index_agree() {
        let (index, params) = by_name("ANR240").unwrap();
        assert_eq!(by_index(index).unwrap(), params);
        assert_eq!(params.actor_type, ActorType::Rotator);
        assert!(by_name("ANX999").is_none());
        assert!(by_index(count()).is_none());
    }

    #[test]
    fn list_is_newline_separated() {
        let list = list();
        assert_eq!(list.lines().count(), count());
        assert!(list.starts_with("ANPx101\n"));
    }
}
