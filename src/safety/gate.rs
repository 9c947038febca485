// Safety interlock gate
//
// Every motion request passes through `admit` before it reaches the mapper.
// Discrete maneuvers are go/no-go: any blocked side vetoes the whole request.
// Continuous requests lose only the offending axis so tracking degrades
// instead of aborting. Anything admitted is slowed down as the closest
// relevant obstacle approaches.

use crate::config::{CRITICAL_DISTANCE_CM, ConfigState, SLOW_DOWN_DISTANCE_CM};
use crate::motion::{MotionRequest, Side};

use super::zones::{DistanceSnapshot, InterlockState};

/// Why a request did not reach the wheels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VetoReason {
    Override,
    Blocked(Side),
}

impl VetoReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            VetoReason::Override => "OVERRIDE",
            VetoReason::Blocked(side) => side.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admitted(MotionRequest),
    Vetoed(VetoReason),
}

/// Speed multiplier for an obstacle `distance` cm away: 1 beyond the slow-down
/// distance, 0 under the critical distance, linear in between
pub fn slow_down_factor(distance: f32) -> f32 {
    if distance < CRITICAL_DISTANCE_CM {
        0.0
    } else if distance >= SLOW_DOWN_DISTANCE_CM {
        1.0
    } else {
        (distance - CRITICAL_DISTANCE_CM) / (SLOW_DOWN_DISTANCE_CM - CRITICAL_DISTANCE_CM)
    }
}

/// Scale `speed` by `factor`, never below `floor` unless the request itself was lower
fn scaled_speed(speed: f32, factor: f32, floor: f32) -> f32 {
    if factor >= 1.0 {
        speed
    } else if factor <= 0.0 {
        0.0
    } else {
        (speed * factor).max(floor).min(speed)
    }
}

fn blocked(side: Side, interlocks: &InterlockState, snapshot: &DistanceSnapshot) -> bool {
    interlocks.is_blocked(side) || snapshot.clearance(side) < CRITICAL_DISTANCE_CM
}

/// Decide whether `request` may be executed under the current interlocks
pub fn admit(
    request: &MotionRequest,
    interlocks: &InterlockState,
    snapshot: &DistanceSnapshot,
    cfg: &ConfigState,
) -> Admission {
    if let MotionRequest::Stop = request {
        return Admission::Admitted(MotionRequest::Stop);
    }
    if interlocks.override_active {
        return Admission::Vetoed(VetoReason::Override);
    }

    match *request {
        MotionRequest::Stop => Admission::Admitted(MotionRequest::Stop),
        MotionRequest::Direction { code, speed } => {
            let sides = code.implied_sides();
            if let Some(&side) = sides.iter().find(|&&s| blocked(s, interlocks, snapshot)) {
                return Admission::Vetoed(VetoReason::Blocked(side));
            }
            let factor = sides
                .iter()
                .map(|&s| slow_down_factor(snapshot.clearance(s)))
                .fold(1.0f32, f32::min);
            Admission::Admitted(MotionRequest::Direction {
                code,
                speed: scaled_speed(speed, factor, cfg.min_speed()),
            })
        }
        MotionRequest::Linear {
            mut lateral,
            mut forward,
            rotational,
        } => {
            let forward_side = if forward > 0.0 { Side::Front } else { Side::Back };
            if forward != 0.0 && blocked(forward_side, interlocks, snapshot) {
                forward = 0.0;
            }
            let lateral_side = if lateral > 0.0 { Side::Right } else { Side::Left };
            if lateral != 0.0 && blocked(lateral_side, interlocks, snapshot) {
                lateral = 0.0;
            }

            let mut factor = 1.0f32;
            if forward != 0.0 {
                factor = factor.min(slow_down_factor(snapshot.clearance(forward_side)));
            }
            if lateral != 0.0 {
                factor = factor.min(slow_down_factor(snapshot.clearance(lateral_side)));
            }

            let magnitude = lateral.hypot(forward);
            if magnitude > 0.0 && factor < 1.0 {
                let floor = cfg.min_speed() / cfg.max_speed();
                let scale = scaled_speed(magnitude, factor, floor) / magnitude;
                lateral *= scale;
                forward *= scale;
            }

            Admission::Admitted(MotionRequest::Linear {
                lateral,
                forward,
                rotational,
            })
        }
    }
}
