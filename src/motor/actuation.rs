// Acceleration-limited motor actuation
//
// Each wheel keeps a target and an actual duty-cycle speed. Targets are set
// whenever a request is mapped; `update` runs once per control cycle and moves
// the actual speed toward the target, producing one direction + duty write per
// wheel.

use tracing::debug;

use super::kinematics::{SpinDirection, WheelId, WheelTargets};
use crate::config::{ACCEL_RATE, ConfigState};

/// State of one wheel, alive for the whole process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wheel {
    pub id: WheelId,
    pub direction: SpinDirection,
    pub target_speed: f32,
    pub current_speed: f32,
    pub enabled: bool,
}

impl Wheel {
    fn new(id: WheelId) -> Self {
        Self {
            id,
            direction: SpinDirection::Forward,
            target_speed: 0.0,
            current_speed: 0.0,
            enabled: true,
        }
    }

    fn halt(&mut self) {
        self.target_speed = 0.0;
        self.current_speed = 0.0;
    }
}

/// What gets written to one H-bridge this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelOutput {
    pub wheel: WheelId,
    pub direction: SpinDirection,
    pub duty: u8,
    pub enabled: bool,
}

impl WheelOutput {
    /// Duty with the direction folded into the sign
    pub fn signed_duty(&self) -> i16 {
        match self.direction {
            SpinDirection::Forward => self.duty as i16,
            SpinDirection::Backward => -(self.duty as i16),
        }
    }
}

pub type WheelOutputs = [WheelOutput; 3];

/// Owns the three wheel records and their ramping state
#[derive(Debug, Clone)]
pub struct MotorBank {
    wheels: [Wheel; 3],
}

impl Default for MotorBank {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorBank {
    pub fn new() -> Self {
        Self {
            wheels: WheelId::ALL.map(Wheel::new),
        }
    }

    pub fn wheel(&self, id: WheelId) -> &Wheel {
        &self.wheels[id.index()]
    }

    /// Set a wheel's target.
    ///
    /// The speed is clamped to [0, MAX_SPEED] and a non-zero target below
    /// MIN_SPEED is raised to MIN_SPEED. Reversing a spinning wheel drops its
    /// actual speed to zero first. Without smooth acceleration the actual
    /// speed snaps to the target.
    pub fn set_target(
        &mut self,
        id: WheelId,
        direction: SpinDirection,
        desired_speed: f32,
        cfg: &ConfigState,
    ) {
        let mut speed = desired_speed.clamp(0.0, cfg.max_speed());
        if speed > 0.0 && speed < cfg.min_speed() {
            speed = cfg.min_speed();
        }

        let wheel = &mut self.wheels[id.index()];
        if !wheel.enabled {
            speed = 0.0;
        }

        // A zero target keeps the old direction so the wheel ramps down instead of snapping
        if speed > 0.0 {
            if direction != wheel.direction && wheel.current_speed > 0.0 {
                debug!("Reversing {} wheel, dropping speed to zero", wheel.id.as_str());
                wheel.current_speed = 0.0;
            }
            wheel.direction = direction;
        }
        wheel.target_speed = speed;

        if !cfg.smooth_acceleration {
            wheel.current_speed = speed;
        }
    }

    /// Set targets for all three wheels at once
    pub fn apply(&mut self, targets: &WheelTargets, cfg: &ConfigState) {
        for id in WheelId::ALL {
            let target = targets.get(id);
            self.set_target(id, target.direction, target.speed, cfg);
        }
    }

    /// Zero every wheel immediately, bypassing the ramp
    pub fn stop_all(&mut self) {
        for wheel in &mut self.wheels {
            wheel.halt();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.wheels.iter().all(|w| w.current_speed == 0.0)
    }

    /// Advance one control cycle and return the outputs to write
    pub fn update(&mut self, cfg: &ConfigState) -> WheelOutputs {
        let max_step = cfg.max_speed() * ACCEL_RATE;

        for wheel in &mut self.wheels {
            wheel.enabled = wheel.id != WheelId::Back || cfg.is_three_wheel();
            if !wheel.enabled {
                wheel.halt();
                continue;
            }

            // MAX_SPEED may have been lowered since the target was set
            wheel.target_speed = wheel.target_speed.min(cfg.max_speed());

            if cfg.smooth_acceleration {
                let delta = (wheel.target_speed - wheel.current_speed).clamp(-max_step, max_step);
                wheel.current_speed += delta;
            } else {
                wheel.current_speed = wheel.target_speed;
            }
            wheel.current_speed = wheel.current_speed.clamp(0.0, cfg.max_speed());
        }

        self.wheels.map(|w| WheelOutput {
            wheel: w.id,
            direction: w.direction,
            duty: w.current_speed.round().clamp(0.0, 255.0) as u8,
            enabled: w.enabled,
        })
    }
}
