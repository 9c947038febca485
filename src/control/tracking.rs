// Tag tracking and position hold.
//
// Target poses arrive already decoded, relative to the robot at the moment
// they were observed. Between reports the tracker dead-reckons its own pose
// from the commands that reached the wheels. Two independent PID loops
// produce the translational and rotational corrections.

use std::f32::consts::PI;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::pid::{Pid, PidGains};
use crate::config::{
    CONTROL_INTERVAL, ConfigState, POSITION_TOLERANCE_CM, ROTATION_TOLERANCE_RAD, TAG_STANDOFF_CM,
    TAG_TIMEOUT,
};
use crate::motion::MotionRequest;

/// Body speed at a normalized command of 1.0, used for dead reckoning
pub const NOMINAL_SPEED_CM_S: f32 = 40.0;
pub const NOMINAL_TURN_RAD_S: f32 = 2.0;

/// Smallest command issued while outside tolerance. Applied after the speed
/// cap: any heading at this magnitude puts at least one wheel (cos 30° of it)
/// outside the deadband.
pub const MIN_TRACKING_COMMAND: f32 = 0.2;

const TRANSLATION_GAINS: PidGains = PidGains {
    kp: 8.0,
    ki: 0.5,
    kd: 0.2,
};
const ROTATION_GAINS: PidGains = PidGains {
    kp: 300.0,
    ki: 10.0,
    kd: 5.0,
};

/// Wrap an angle to [-π, π]
pub fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Planar pose; x to the right, y forward, yaw counter-clockwise (rad)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub yaw: f32,
}

impl Pose {
    pub fn new(x: f32, y: f32, yaw: f32) -> Self {
        Self {
            x,
            y,
            yaw: wrap_angle(yaw),
        }
    }

    /// Where to hold for a tag seen `distance` cm away at `bearing` rad
    /// (counter-clockwise positive): `TAG_STANDOFF_CM` short of it, facing it
    pub fn facing_tag(distance: f32, bearing: f32) -> Self {
        let reach = distance - TAG_STANDOFF_CM;
        Self::new(-reach * bearing.sin(), reach * bearing.cos(), bearing)
    }

    /// Dead-reckon a normalized body velocity held for `dt` seconds
    pub fn advanced(&self, lateral: f32, forward: f32, rotational: f32, dt: f32) -> Self {
        let (sin, cos) = self.yaw.sin_cos();
        let step = NOMINAL_SPEED_CM_S * dt;
        Self {
            x: self.x + (lateral * cos - forward * sin) * step,
            y: self.y + (lateral * sin + forward * cos) * step,
            yaw: wrap_angle(self.yaw + rotational * NOMINAL_TURN_RAD_S * dt),
        }
    }

    /// Offset to `other` expressed in this pose's frame as (right, forward)
    pub fn offset_to(&self, other: &Pose) -> (f32, f32) {
        let (ex, ey) = (other.x - self.x, other.y - self.y);
        let (sin, cos) = self.yaw.sin_cos();
        (ex * cos + ey * sin, -ex * sin + ey * cos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    #[default]
    Idle,
    MovingToTag,
    AligningWithTag,
    MaintainingPosition,
}

impl TrackingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingState::Idle => "IDLE",
            TrackingState::MovingToTag => "MOVING_TO_TAG",
            TrackingState::AligningWithTag => "ALIGNING_WITH_TAG",
            TrackingState::MaintainingPosition => "MAINTAINING_POSITION",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TagTracker {
    state: TrackingState,
    target: Option<Pose>,
    tag_id: Option<u32>,
    estimate: Pose,
    speed_limit: f32,
    last_update: Option<Instant>,
    last_tick: Option<Instant>,
    translation: Pid,
    rotation: Pid,
}

impl TagTracker {
    pub fn new(max_speed: f32) -> Self {
        Self {
            state: TrackingState::Idle,
            target: None,
            tag_id: None,
            estimate: Pose::default(),
            speed_limit: 1.0,
            last_update: None,
            last_tick: None,
            translation: Pid::new(TRANSLATION_GAINS, max_speed),
            rotation: Pid::new(ROTATION_GAINS, max_speed),
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != TrackingState::Idle
    }

    pub fn estimate(&self) -> Pose {
        self.estimate
    }

    /// Accept a freshly observed target pose, relative to the robot right now.
    /// `speed_limit` is a fraction of MAX_SPEED in (0, 1].
    pub fn update_target(
        &mut self,
        target: Pose,
        speed_limit: f32,
        tag_id: Option<u32>,
        now: Instant,
    ) {
        self.target = Some(target);
        self.tag_id = tag_id;
        self.estimate = Pose::default();
        self.speed_limit = speed_limit.clamp(0.0, 1.0);
        self.last_update = Some(now);

        if self.state == TrackingState::Idle {
            info!("Tracking target {:?} at ({:.1}, {:.1})", tag_id, target.x, target.y);
            self.translation.reset();
            self.rotation.reset();
            self.last_tick = None;
            self.state = TrackingState::MovingToTag;
        }
    }

    /// Stop tracking without a stale-data warning
    pub fn cancel(&mut self) {
        if self.is_active() {
            info!("Tracking cancelled in {}", self.state.as_str());
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = TrackingState::Idle;
        self.target = None;
        self.last_update = None;
        self.last_tick = None;
        self.translation.reset();
        self.rotation.reset();
    }

    /// Fold a command that actually reached the wheels into the pose estimate
    pub fn record_motion(&mut self, admitted: &MotionRequest, dt: Duration) {
        if let MotionRequest::Linear {
            lateral,
            forward,
            rotational,
        } = *admitted
        {
            self.estimate = self
                .estimate
                .advanced(lateral, forward, rotational, dt.as_secs_f32());
        }
    }

    /// Advance one control tick.
    ///
    /// Returns `None` while idle, `Some(Stop)` when the target went stale, and
    /// otherwise the velocity correction to run through the safety gate.
    pub fn tick(&mut self, now: Instant, cfg: &ConfigState) -> Option<MotionRequest> {
        if self.state == TrackingState::Idle {
            return None;
        }

        let age = self.last_update.map_or(Duration::MAX, |t| now.saturating_duration_since(t));
        let target = match self.target {
            Some(target) if age <= TAG_TIMEOUT => target,
            _ => {
                warn!("Target {:?} stale ({:?} old), stopping", self.tag_id, age);
                self.reset();
                return Some(MotionRequest::Stop);
            }
        };

        let dt = self
            .last_tick
            .map_or(CONTROL_INTERVAL, |t| now.saturating_duration_since(t))
            .as_secs_f32();
        self.last_tick = Some(now);
        self.translation.set_limit(cfg.max_speed());
        self.rotation.set_limit(cfg.max_speed());

        let (right, ahead) = self.estimate.offset_to(&target);
        let distance = right.hypot(ahead);
        let yaw_error = wrap_angle(target.yaw - self.estimate.yaw);
        let in_position = distance <= POSITION_TOLERANCE_CM;
        let aligned = yaw_error.abs() <= ROTATION_TOLERANCE_RAD;

        let next = match self.state {
            TrackingState::MovingToTag if in_position => TrackingState::AligningWithTag,
            TrackingState::AligningWithTag if !in_position => TrackingState::MovingToTag,
            TrackingState::AligningWithTag if aligned => TrackingState::MaintainingPosition,
            TrackingState::MaintainingPosition if !(in_position && aligned) => {
                TrackingState::MovingToTag
            }
            state => state,
        };
        if next != self.state {
            debug!(
                "Tracking {} -> {} (error {:.1} cm, {:.3} rad)",
                self.state.as_str(),
                next.as_str(),
                distance,
                yaw_error
            );
            self.state = next;
        }

        let request = match self.state {
            TrackingState::Idle | TrackingState::MaintainingPosition => {
                MotionRequest::linear(0.0, 0.0, 0.0)
            }
            TrackingState::AligningWithTag => {
                let turn = self.turn_command(yaw_error, aligned, dt, cfg);
                MotionRequest::linear(0.0, 0.0, turn)
            }
            TrackingState::MovingToTag => {
                let turn = self.turn_command(yaw_error, aligned, dt, cfg);
                let (lateral, forward) = if distance > 0.0 {
                    let u = self.translation.update(distance, dt) / cfg.max_speed();
                    let magnitude = (u * self.speed_limit).clamp(MIN_TRACKING_COMMAND, self.cap());
                    (right / distance * magnitude, ahead / distance * magnitude)
                } else {
                    (0.0, 0.0)
                };
                MotionRequest::linear(lateral, forward, turn)
            }
        };
        Some(request)
    }

    fn turn_command(&mut self, yaw_error: f32, aligned: bool, dt: f32, cfg: &ConfigState) -> f32 {
        let mut turn = self.rotation.update(yaw_error, dt) / cfg.max_speed();
        if !aligned && turn.abs() < MIN_TRACKING_COMMAND {
            turn = MIN_TRACKING_COMMAND.copysign(yaw_error);
        }
        turn.clamp(-self.cap(), self.cap())
    }

    fn cap(&self) -> f32 {
        self.speed_limit.max(MIN_TRACKING_COMMAND)
    }
}
