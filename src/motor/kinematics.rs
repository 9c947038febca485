// Holonomic kinematics for the 120-degree three-wheel base
// Converts body-frame requests (lateral, forward, rotational) into per-wheel direction + speed.

use crate::config::{ConfigState, DEADBAND, WheelMode};
use crate::motion::{DirectionCode, MotionRequest};

/// sin(60°): projection of forward motion onto the two front wheels
const SIN_60: f32 = 0.866;

// Empirical tuning ratios for the discrete maneuvers. They compensate for
// motor torque at low duty cycle and are not derived from the triangle model.
/// Inner wheel on an arc turn
pub const ARC_INNER_RATIO: f32 = 0.5;
/// Back wheel on an arc turn (three-wheel only)
pub const ARC_BACK_RATIO: f32 = 0.75;
/// All wheels on an in-place rotation
pub const ROTATE_RATIO: f32 = 0.6;
/// Back wheel drag compensation on straight runs
pub const STRAIGHT_BACK_TRIM: f32 = 0.3;
/// Slower front wheel on a diagonal
pub const DIAGONAL_MINOR_RATIO: f32 = 0.3;
/// Back wheel on a diagonal
pub const DIAGONAL_BACK_RATIO: f32 = 0.75;
/// Front wheels while strafing
pub const SLIDE_SIDE_RATIO: f32 = 0.5;
/// Back wheel while strafing; the actuator clamps anything above MAX_SPEED
pub const SLIDE_BACK_BOOST: f32 = 1.3;
/// Two-wheel mode turns lateral requests into rotation with this gain
pub const LATERAL_TO_ROTATION: f32 = 0.6;

/// Wheel identity; the discriminant indexes every per-wheel table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WheelId {
    Left = 0,
    Right = 1,
    Back = 2,
}

impl WheelId {
    pub const ALL: [WheelId; 3] = [WheelId::Left, WheelId::Right, WheelId::Back];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WheelId::Left => "left",
            WheelId::Right => "right",
            WheelId::Back => "back",
        }
    }
}

/// Spin direction of one wheel as seen by its H-bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpinDirection {
    #[default]
    Forward,
    Backward,
}

impl SpinDirection {
    fn of(value: f32) -> Self {
        if value >= 0.0 {
            SpinDirection::Forward
        } else {
            SpinDirection::Backward
        }
    }
}

/// Desired direction and duty-cycle speed for one wheel
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelTarget {
    pub direction: SpinDirection,
    pub speed: f32,
}

impl WheelTarget {
    fn from_ratio(ratio: f32, scale: f32) -> Self {
        Self {
            direction: SpinDirection::of(ratio),
            speed: ratio.abs() * scale,
        }
    }
}

/// Targets for the three wheels, indexed by [`WheelId`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelTargets([WheelTarget; 3]);

impl WheelTargets {
    pub fn zero() -> Self {
        Self::default()
    }

    fn from_ratios(ratios: [f32; 3], scale: f32) -> Self {
        Self(ratios.map(|r| WheelTarget::from_ratio(r, scale)))
    }

    pub fn get(&self, id: WheelId) -> WheelTarget {
        self.0[id.index()]
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|t| t.speed == 0.0)
    }
}

/// Normalized signed wheel ratios `[left, right, back]` for a continuous request.
///
/// Inputs are clamped to [-1, 1]. If any wheel exceeds 1.0 all three are scaled
/// down together so the motion direction is preserved, then values inside the
/// deadband are zeroed.
pub fn holonomic_ratios(lateral: f32, forward: f32, rotational: f32, mode: WheelMode) -> [f32; 3] {
    let vx = lateral.clamp(-1.0, 1.0);
    let vy = forward.clamp(-1.0, 1.0);
    let w = rotational.clamp(-1.0, 1.0);

    let mut wheels = match mode {
        WheelMode::ThreeWheel => [
            -0.5 * vx - SIN_60 * vy + w,
            -0.5 * vx + SIN_60 * vy + w,
            vx + w,
        ],
        WheelMode::TwoWheel => {
            // No strafe without the back wheel: bias the rotation instead
            let w = w - LATERAL_TO_ROTATION * vx;
            [-vy + w, vy + w, 0.0]
        }
    };

    let peak = wheels.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if peak > 1.0 {
        for v in &mut wheels {
            *v /= peak;
        }
    }

    for v in &mut wheels {
        if v.abs() < DEADBAND {
            *v = 0.0;
        }
    }

    wheels
}

/// Fixed per-wheel ratios `[left, right, back]` for a discrete maneuver
pub fn direction_ratios(code: DirectionCode, mode: WheelMode) -> [f32; 3] {
    use DirectionCode::*;
    match mode {
        WheelMode::ThreeWheel => match code {
            Forward => [-1.0, 1.0, STRAIGHT_BACK_TRIM],
            Backward => [1.0, -1.0, -STRAIGHT_BACK_TRIM],
            ArcLeft => [-ARC_INNER_RATIO, 1.0, ARC_BACK_RATIO],
            ArcRight => [-1.0, ARC_INNER_RATIO, -ARC_BACK_RATIO],
            RotateLeft => [ROTATE_RATIO, ROTATE_RATIO, ROTATE_RATIO],
            RotateRight => [-ROTATE_RATIO, -ROTATE_RATIO, -ROTATE_RATIO],
            SlideLeft => [SLIDE_SIDE_RATIO, SLIDE_SIDE_RATIO, -SLIDE_BACK_BOOST],
            SlideRight => [-SLIDE_SIDE_RATIO, -SLIDE_SIDE_RATIO, SLIDE_BACK_BOOST],
            ForwardLeft => [-DIAGONAL_MINOR_RATIO, 1.0, -DIAGONAL_BACK_RATIO],
            ForwardRight => [-1.0, DIAGONAL_MINOR_RATIO, DIAGONAL_BACK_RATIO],
            BackwardLeft => [1.0, -DIAGONAL_MINOR_RATIO, -DIAGONAL_BACK_RATIO],
            BackwardRight => [DIAGONAL_MINOR_RATIO, -1.0, DIAGONAL_BACK_RATIO],
        },
        WheelMode::TwoWheel => match code {
            Forward => [-1.0, 1.0, 0.0],
            Backward => [1.0, -1.0, 0.0],
            ArcLeft => [-ARC_INNER_RATIO, 1.0, 0.0],
            ArcRight => [-1.0, ARC_INNER_RATIO, 0.0],
            RotateLeft | SlideLeft => [ROTATE_RATIO, ROTATE_RATIO, 0.0],
            RotateRight | SlideRight => [-ROTATE_RATIO, -ROTATE_RATIO, 0.0],
            ForwardLeft => [-DIAGONAL_MINOR_RATIO, 1.0, 0.0],
            ForwardRight => [-1.0, DIAGONAL_MINOR_RATIO, 0.0],
            BackwardLeft => [DIAGONAL_MINOR_RATIO, -1.0, 0.0],
            BackwardRight => [1.0, -DIAGONAL_MINOR_RATIO, 0.0],
        },
    }
}

/// Map any motion request to wheel targets in duty-cycle units
pub fn map_request(request: &MotionRequest, cfg: &ConfigState) -> WheelTargets {
    match *request {
        MotionRequest::Stop => WheelTargets::zero(),
        MotionRequest::Linear {
            lateral,
            forward,
            rotational,
        } => WheelTargets::from_ratios(
            holonomic_ratios(lateral, forward, rotational, cfg.wheel_mode),
            cfg.max_speed(),
        ),
        MotionRequest::Direction { code, speed } => {
            WheelTargets::from_ratios(direction_ratios(code, cfg.wheel_mode), speed.max(0.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_wheel() -> ConfigState {
        let mut cfg = ConfigState::default();
        cfg.wheel_mode = WheelMode::TwoWheel;
        cfg
    }

    #[test]
    fn test_zero_velocity() {
        let wheels = holonomic_ratios(0.0, 0.0, 0.0, WheelMode::ThreeWheel);
        assert_eq!(wheels, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_forward_motion() {
        // Back wheel is perpendicular to forward travel and stays still
        let [left, right, back] = holonomic_ratios(0.0, 1.0, 0.0, WheelMode::ThreeWheel);
        assert!(left < 0.0 && right > 0.0);
        assert!((left + right).abs() < 1e-6);
        assert_eq!(back, 0.0);
    }

    #[test]
    fn test_rotation_only() {
        let wheels = holonomic_ratios(0.0, 0.0, 0.5, WheelMode::ThreeWheel);
        assert!(wheels.iter().all(|&w| (w - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_normalization_keeps_every_wheel_within_one() {
        let steps = [-1.0, -0.6, -0.2, 0.0, 0.3, 0.7, 1.0];
        for &vx in &steps {
            for &vy in &steps {
                for &w in &steps {
                    let wheels = holonomic_ratios(vx, vy, w, WheelMode::ThreeWheel);
                    assert!(
                        wheels.iter().all(|v| v.abs() <= 1.0 + 1e-6),
                        "({vx}, {vy}, {w}) -> {wheels:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_normalization_preserves_direction() {
        let [left, right, back] = holonomic_ratios(1.0, 1.0, 0.0, WheelMode::ThreeWheel);
        // Raw values: -1.366, 0.366, 1.0 -> scaled by 1/1.366
        assert!((left + 1.0).abs() < 1e-4);
        assert!((right - 0.366 / 1.366).abs() < 1e-3);
        assert!((back - 1.0 / 1.366).abs() < 1e-3);
    }

    #[test]
    fn test_deadband_suppresses_small_commands() {
        let wheels = holonomic_ratios(0.0, 0.05, 0.0, WheelMode::ThreeWheel);
        assert_eq!(wheels, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_two_wheel_turns_lateral_into_rotation() {
        let [left, right, back] = holonomic_ratios(1.0, 0.0, 0.0, WheelMode::TwoWheel);
        assert_eq!(back, 0.0);
        // Sliding right becomes a clockwise pivot: both wheels backward
        assert!(left < 0.0 && right < 0.0);
    }

    #[test]
    fn test_forward_code_three_wheel() {
        let cfg = ConfigState::default();
        let targets = map_request(&MotionRequest::direction(DirectionCode::Forward, 100.0), &cfg);
        assert_eq!(targets.get(WheelId::Left).direction, SpinDirection::Backward);
        assert_eq!(targets.get(WheelId::Right).direction, SpinDirection::Forward);
        assert_eq!(targets.get(WheelId::Back).direction, SpinDirection::Forward);
        assert_eq!(targets.get(WheelId::Left).speed, 100.0);
        assert!((targets.get(WheelId::Back).speed - 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_forward_code_two_wheel_leaves_back_idle() {
        let targets = map_request(
            &MotionRequest::direction(DirectionCode::Forward, 100.0),
            &two_wheel(),
        );
        assert_eq!(targets.get(WheelId::Back).speed, 0.0);
    }

    #[test]
    fn test_arc_turn_ratios() {
        let [left, right, back] = direction_ratios(DirectionCode::ArcLeft, WheelMode::ThreeWheel);
        assert_eq!(left, -ARC_INNER_RATIO);
        assert_eq!(right, 1.0);
        assert_eq!(back, ARC_BACK_RATIO);
    }

    #[test]
    fn test_linear_scaled_by_max_speed() {
        let cfg = ConfigState::default();
        let targets = map_request(&MotionRequest::linear(0.0, 0.0, 1.0), &cfg);
        for id in WheelId::ALL {
            assert_eq!(targets.get(id).speed, 255.0);
        }
    }
}
