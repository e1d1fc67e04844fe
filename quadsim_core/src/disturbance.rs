//! External torque disturbances.

use crate::faults::{HfStressEvent, HfStressKind, TorqueDisturbanceEvent};
use nalgebra::Vector3;
use quadsim_env::{
    DisturbanceField, DisturbanceSnapshot, SubsystemError, SubsystemResult, ValidationError, WorldTime,
};
use std::f64::consts::TAU;

/// Sums every torque event and HF impulse/vibration active at the current
/// time. Other HF kinds are ignored here; the sensor and actuator decorators
/// consume them.
#[derive(Debug, Clone)]
pub struct TorqueDisturbanceField {
    events: Vec<TorqueDisturbanceEvent>,
    stress: Vec<HfStressEvent>,
    current: DisturbanceSnapshot,
}

impl TorqueDisturbanceField {
    pub fn new(events: Vec<TorqueDisturbanceEvent>, stress: Vec<HfStressEvent>) -> Result<Self, ValidationError> {
        for event in &events {
            event.validate()?;
        }
        for event in &stress {
            event.validate()?;
        }
        Ok(Self {
            events,
            stress,
            current: DisturbanceSnapshot::default(),
        })
    }

    /// A field that never disturbs.
    pub fn calm() -> Self {
        Self {
            events: Vec::new(),
            stress: Vec::new(),
            current: DisturbanceSnapshot::default(),
        }
    }
}

impl DisturbanceField for TorqueDisturbanceField {
    fn update(&mut self, time: &WorldTime) -> SubsystemResult<()> {
        let t = time.time;
        let mut torque = Vector3::zeros();
        let mut active = Vec::new();

        for event in self.events.iter().filter(|e| e.window.contains(t)) {
            torque += event.torque;
            active.push(event.label.clone());
        }

        for event in self.stress.iter().filter(|e| e.window.contains(t)) {
            match &event.kind {
                HfStressKind::ImpulseTorque { torque: impulse } => torque += impulse,
                HfStressKind::Vibration {
                    amplitude,
                    frequency_hz,
                } => {
                    let phase = TAU * frequency_hz * (t - event.window.start_time);
                    torque += amplitude * phase.sin();
                }
                _ => continue,
            }
            active.push(event.tag().to_string());
        }

        SubsystemError::check_finite("disturbance", "body torque", torque.as_slice())?;
        self.current = DisturbanceSnapshot {
            body_torque: torque,
            world_force: Vector3::zeros(),
            active_events: active,
        };
        Ok(())
    }

    fn snapshot(&self) -> DisturbanceSnapshot {
        self.current.clone()
    }
}
