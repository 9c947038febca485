// The motion controller.
//
// Owns every piece of mutable robot state and is driven from a single
// thread: commands are executed as they are decoded, sensors are sampled at
// the sensor cadence, and `Controller::tick` runs once per control cycle.
// Time is always passed in, never read, so the whole core can be driven by
// a synthetic clock.
//
// Per tick, exactly one source decides what the wheels do, in priority
// order: master override, obstacle avoidance, tag tracking, then the last
// manual request. Every request from any source goes through the safety
// gate first.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::avoidance::{AvoidanceOutcome, ObstacleAvoidance};
use super::tracking::{Pose, TagTracker};
use crate::config::{CONTROL_INTERVAL, ConfigState, SENSOR_MAX_CM, SENSOR_MIN_CM, WheelMode};
use crate::messages::BusState;
use crate::motion::{DirectionCode, MotionRequest, Side};
use crate::motor::kinematics::holonomic_ratios;
use crate::motor::{MotorBank, SpinDirection, WheelId, WheelOutputs, map_request};
use crate::protocol::{Command, CommandError, FrameError, Response, parse_command};
use crate::safety::{
    Admission, DistanceSensor, DistanceSnapshot, InterlockState, SensorPosition, VetoReason,
    ZoneMonitor, admit,
};

pub struct Controller {
    config: ConfigState,
    zones: ZoneMonitor,
    motors: MotorBank,
    avoidance: ObstacleAvoidance,
    tracker: TagTracker,
    /// Last accepted manual request, re-admitted every tick
    active: Option<MotionRequest>,
    last_veto: Option<VetoReason>,
    last_outputs: WheelOutputs,
    last_tick: Option<Instant>,
    bus_ready: bool,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self::with_config(ConfigState::default())
    }

    pub fn with_config(config: ConfigState) -> Self {
        let mut motors = MotorBank::new();
        let last_outputs = motors.update(&config);
        Self {
            tracker: TagTracker::new(config.max_speed()),
            config,
            zones: ZoneMonitor::new(),
            motors,
            avoidance: ObstacleAvoidance::new(),
            active: None,
            last_veto: None,
            last_outputs,
            last_tick: None,
            bus_ready: false,
        }
    }

    pub fn config(&self) -> &ConfigState {
        &self.config
    }

    pub fn interlocks(&self) -> &InterlockState {
        self.zones.interlocks()
    }

    pub fn snapshot(&self) -> &DistanceSnapshot {
        self.zones.snapshot()
    }

    pub fn avoidance(&self) -> &ObstacleAvoidance {
        &self.avoidance
    }

    pub fn tracker(&self) -> &TagTracker {
        &self.tracker
    }

    pub fn motors(&self) -> &MotorBank {
        &self.motors
    }

    pub fn active_request(&self) -> Option<MotionRequest> {
        self.active
    }

    pub fn last_veto(&self) -> Option<VetoReason> {
        self.last_veto
    }

    /// Outputs written by the most recent tick
    pub fn last_outputs(&self) -> &WheelOutputs {
        &self.last_outputs
    }

    pub fn bus_ready(&self) -> bool {
        self.bus_ready
    }

    pub fn bus_state(&self) -> BusState {
        if self.zones.interlocks().override_active {
            BusState::Override
        } else if self.motors.is_idle()
            && self.active.is_none()
            && !self.avoidance.is_active()
            && !self.tracker.is_active()
        {
            BusState::Idle
        } else {
            BusState::Active
        }
    }

    /// Sample every distance sensor and refresh the interlocks
    pub fn sample_sensors<S: DistanceSensor + ?Sized>(&mut self, sensor: &mut S) {
        self.zones.sample(sensor);
    }

    /// Override signal from the peer board; any signal also marks the bus ready.
    /// Activation is an emergency stop.
    pub fn set_master_override(&mut self, active: bool) {
        if !self.bus_ready {
            info!("Peer board is ready");
            self.bus_ready = true;
        }
        if active == self.zones.interlocks().override_active {
            return;
        }
        self.zones.set_override(active);
        if active {
            warn!("Master override engaged, stopping all motion");
            self.stop();
        } else {
            info!("Master override released");
        }
    }

    /// Cancel everything and zero the wheels immediately
    pub fn stop(&mut self) {
        self.active = None;
        self.avoidance.abort();
        self.tracker.cancel();
        self.motors.stop_all();
    }

    /// Submit a manual motion request. Returns the veto reason if the gate
    /// refused it.
    pub fn request_motion(&mut self, request: MotionRequest, now: Instant) -> Option<VetoReason> {
        if request.is_stop() {
            self.stop();
            return None;
        }

        if self.avoidance.is_active() {
            if moves_forward(&request) {
                debug!("Forward request during avoidance, episode continues");
                return None;
            }
            self.avoidance.abort();
        }
        self.tracker.cancel();
        self.active = Some(request);
        self.engage(request, now)
    }

    /// Run one control cycle and return the outputs written to the wheels
    pub fn tick(&mut self, now: Instant) -> WheelOutputs {
        let dt = self
            .last_tick
            .map_or(CONTROL_INTERVAL, |t| now.saturating_duration_since(t));
        self.last_tick = Some(now);

        if self.zones.interlocks().override_active {
            self.motors.stop_all();
        } else if self.avoidance.is_active() {
            self.step_avoidance(now);
        } else if self.tracker.is_active() {
            self.step_tracking(now, dt);
        } else if let Some(request) = self.active {
            self.engage(request, now);
        }

        self.last_outputs = self.motors.update(&self.config);
        self.last_outputs
    }

    /// Gate a manual request and drive it, or stop and possibly start avoiding
    fn engage(&mut self, request: MotionRequest, now: Instant) -> Option<VetoReason> {
        match admit(&request, self.zones.interlocks(), self.zones.snapshot(), &self.config) {
            Admission::Admitted(admitted) => {
                self.last_veto = None;
                self.drive(&admitted);
                None
            }
            Admission::Vetoed(reason) => {
                if self.last_veto != Some(reason) {
                    info!("Motion vetoed: {}", reason.as_str());
                }
                self.last_veto = Some(reason);
                self.motors.stop_all();

                let avoid = reason == VetoReason::Blocked(Side::Front)
                    && self.config.avoidance_enabled
                    && moves_forward(&request);
                match request {
                    MotionRequest::Direction { speed, .. } if avoid => {
                        self.avoidance.start(now, self.zones.snapshot(), speed);
                    }
                    _ => self.active = None,
                }
                Some(reason)
            }
        }
    }

    fn step_avoidance(&mut self, now: Instant) {
        let step =
            self.avoidance
                .continue_avoidance(now, self.zones.interlocks(), self.zones.snapshot());
        match step.outcome {
            Some(AvoidanceOutcome::Succeeded) => match self.active {
                Some(request) => {
                    self.engage(request, now);
                }
                None => self.motors.stop_all(),
            },
            Some(AvoidanceOutcome::Failed) => {
                self.active = None;
                self.motors.stop_all();
            }
            None => {
                let admission = admit(
                    &step.request,
                    self.zones.interlocks(),
                    self.zones.snapshot(),
                    &self.config,
                );
                match admission {
                    Admission::Admitted(admitted) => {
                        self.drive(&admitted);
                    }
                    Admission::Vetoed(_) => self.motors.stop_all(),
                }
            }
        }
    }

    fn step_tracking(&mut self, now: Instant, dt: Duration) {
        match self.tracker.tick(now, &self.config) {
            None => {}
            Some(MotionRequest::Stop) => self.motors.stop_all(),
            Some(request) => {
                let snapshot = self.zones.snapshot();
                match admit(&request, self.zones.interlocks(), snapshot, &self.config) {
                    Admission::Admitted(admitted) => {
                        // Only motion that reached the wheels moves the estimate
                        if self.drive(&admitted) {
                            self.tracker.record_motion(&admitted, dt);
                        }
                    }
                    Admission::Vetoed(reason) => {
                        self.last_veto = Some(reason);
                        self.motors.stop_all();
                    }
                }
            }
        }
    }

    /// Map and apply a gated request; false when every wheel target is zero
    fn drive(&mut self, admitted: &MotionRequest) -> bool {
        let targets = map_request(admitted, &self.config);
        self.motors.apply(&targets, &self.config);
        !targets.is_zero()
    }

    fn manual(&mut self, verb: String, request: MotionRequest, now: Instant) -> Response {
        match self.request_motion(request, now) {
            Some(reason) if self.config.debug => Response::AckVetoed {
                verb,
                reason: reason.as_str(),
            },
            _ => Response::Ack(verb),
        }
    }

    fn begin_tracking(
        &mut self,
        target: Pose,
        speed_limit: f32,
        tag_id: Option<u32>,
        now: Instant,
    ) {
        self.active = None;
        self.avoidance.abort();
        self.tracker.update_target(target, speed_limit, tag_id, now);
    }

    /// Execute a decoded command
    pub fn execute(&mut self, command: Command, now: Instant) -> Result<Response, CommandError> {
        let verb = command.verb();
        let response = match command {
            Command::Stop | Command::Move { code: None, .. } | Command::Key { code: None, .. } => {
                self.stop();
                Response::Ack(verb)
            }
            Command::Move {
                code: Some(code),
                speed,
            } => self.manual(verb, MotionRequest::direction(code, f32::from(speed)), now),
            Command::Rotate { clockwise, speed } => {
                let code = if clockwise {
                    DirectionCode::RotateRight
                } else {
                    DirectionCode::RotateLeft
                };
                self.manual(verb, MotionRequest::direction(code, f32::from(speed)), now)
            }
            Command::Key {
                code: Some(code), ..
            } => {
                let speed = self.config.max_speed();
                self.manual(verb, MotionRequest::direction(code, speed), now)
            }
            Command::Clear(side) => {
                match side {
                    Some(side) => self.zones.clear(side),
                    None => self.zones.clear_all(),
                }
                self.avoidance.clear_outcome();
                info!("Interlocks cleared: {}", side.map_or("ALL", |s| s.as_str()));
                Response::Ack(verb)
            }
            Command::Mode(mode) => {
                self.config.wheel_mode = mode;
                info!("Wheel mode: {}", mode.as_str());
                Response::Ack(verb)
            }
            Command::Speed { max, min } => {
                self.config.set_speed_limits(max, min).map_err(|e| {
                    warn!("Rejected speed limits: {}", e);
                    CommandError::InvalidParams("SPEED")
                })?;
                info!("Speed limits: max {} min {}", max, min);
                Response::Ack(verb)
            }
            Command::Accel(on) => {
                self.config.smooth_acceleration = on;
                info!("Smooth acceleration {}", on_off(on));
                Response::Ack(verb)
            }
            Command::Debug(on) => {
                self.config.debug = on;
                info!("Debug responses {}", on_off(on));
                Response::Ack(verb)
            }
            Command::Avoid(on) => {
                self.config.avoidance_enabled = on;
                if !on {
                    self.avoidance.abort();
                }
                info!("Obstacle avoidance {}", on_off(on));
                Response::Ack(verb)
            }
            Command::Sensors => Response::Sensors(self.sensor_report()),
            Command::Status => Response::Status(self.status_report()),
            Command::Ping => Response::Pong,
            Command::Test => Response::Test(self.self_test()),
            Command::Tag {
                id,
                distance,
                bearing_deg,
                speed_pct,
            } => {
                let target = Pose::facing_tag(distance, bearing_deg.to_radians());
                let limit = speed_pct.map_or(1.0, |p| f32::from(p) / 100.0);
                self.begin_tracking(target, limit, Some(id), now);
                Response::Ack(verb)
            }
            Command::Pose { x, y, yaw_deg } => {
                self.begin_tracking(Pose::new(x, y, yaw_deg.to_radians()), 1.0, None, now);
                Response::Ack(verb)
            }
        };
        Ok(response)
    }

    /// Decode and execute one command line; failures become a negative acknowledgment
    pub fn handle_line(&mut self, line: &str, now: Instant) -> Response {
        debug!("Command: {}", line);
        match parse_command(line).and_then(|command| self.execute(command, now)) {
            Ok(response) => response,
            Err(e) => {
                warn!("Rejected command {:?}: {}", line, e);
                Response::Error(e.to_string())
            }
        }
    }

    /// Framing errors are only reported back in debug mode
    pub fn frame_error(&self, error: &FrameError) -> Option<Response> {
        debug!("Frame error: {}", error);
        self.config
            .debug
            .then(|| Response::Error(error.to_string()))
    }

    pub fn sensor_report(&self) -> String {
        let snapshot = self.zones.snapshot();
        SensorPosition::ALL
            .iter()
            .map(|&p| format!("{}={:.1}", p.label(), snapshot.get(p)))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn status_report(&self) -> String {
        let locks = self.zones.interlocks();
        let blocked: Vec<&str> = Side::ALL
            .iter()
            .filter(|&&s| locks.is_blocked(s))
            .map(|s| s.as_str())
            .collect();
        let blocked = if blocked.is_empty() {
            "NONE".to_string()
        } else {
            blocked.join("|")
        };
        let result = match self.avoidance.last_outcome() {
            Some(AvoidanceOutcome::Succeeded) => "SUCCESS",
            Some(AvoidanceOutcome::Failed) => "FAILED",
            None => "NONE",
        };
        let outputs = &self.last_outputs;

        format!(
            "MODE={},MAX={},MIN={},ACCEL={},AVOID={},DEBUG={},BLOCKED={},OVERRIDE={},BUS={},\
             AVOIDANCE={},ATTEMPTS={},AVOID_RESULT={},TRACKING={},WHEELS={}/{}/{}",
            self.config.wheel_mode.as_str(),
            self.config.max_speed(),
            self.config.min_speed(),
            on_off(self.config.smooth_acceleration),
            on_off(self.config.avoidance_enabled),
            on_off(self.config.debug),
            blocked,
            on_off(locks.override_active),
            if self.bus_ready { "READY" } else { "WAITING" },
            self.avoidance.state().as_str(),
            self.avoidance.attempts(),
            result,
            self.tracker.state().as_str(),
            outputs[WheelId::Left.index()].signed_duty(),
            outputs[WheelId::Right.index()].signed_duty(),
            outputs[WheelId::Back.index()].signed_duty(),
        )
    }

    /// Non-moving self check
    pub fn self_test(&self) -> Result<(), String> {
        let mut failures = Vec::new();

        let snapshot = self.zones.snapshot();
        for p in SensorPosition::ALL {
            let d = snapshot.get(p);
            if !(SENSOR_MIN_CM..=SENSOR_MAX_CM).contains(&d) {
                failures.push(format!("SENSOR_{}", p.label()));
            }
        }

        let axis = [-1.0, 0.0, 1.0];
        let bounded = axis.iter().all(|&x| {
            axis.iter().all(|&y| {
                axis.iter().all(|&w| {
                    holonomic_ratios(x, y, w, WheelMode::ThreeWheel)
                        .iter()
                        .all(|r| r.abs() <= 1.0)
                })
            })
        });
        let forward = map_request(
            &MotionRequest::direction(DirectionCode::Forward, self.config.max_speed()),
            &self.config,
        );
        let left = forward.get(WheelId::Left);
        let right = forward.get(WheelId::Right);
        if !bounded
            || left.direction != SpinDirection::Backward
            || right.direction != SpinDirection::Forward
            || left.speed <= 0.0
            || right.speed <= 0.0
        {
            failures.push("KINEMATICS".to_string());
        }

        if !self.motors.is_idle() {
            failures.push("MOVING".to_string());
        }

        if failures.is_empty() {
            Ok(())
        } else {
            warn!("Self test failed: {}", failures.join(","));
            Err(failures.join(","))
        }
    }
}

fn moves_forward(request: &MotionRequest) -> bool {
    match *request {
        MotionRequest::Direction { code, .. } => code.moves_forward(),
        MotionRequest::Linear { forward, .. } => forward > 0.0,
        MotionRequest::Stop => false,
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}
