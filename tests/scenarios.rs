// End-to-end behaviour through the public controller API, on a synthetic clock

use std::time::Instant;

use patrol_motion::config::{
    CONTROL_INTERVAL, DEFAULT_MAX_SPEED, DEFAULT_MIN_SPEED, MAX_AVOIDANCE_ATTEMPTS,
    MOVEMENT_TIMEOUT, ROTATION_TIMEOUT, TAG_TIMEOUT,
};
use patrol_motion::control::{AvoidanceState, Controller, TrackingState};
use patrol_motion::motor::{SpinDirection, WheelId, WheelOutputs};
use patrol_motion::protocol::Response;
use patrol_motion::safety::{DistanceSensor, SensorPosition};

struct Room([f32; 6]);

impl DistanceSensor for Room {
    fn read_distance(&mut self, position: SensorPosition) -> f32 {
        self.0[position.index()]
    }
}

const OPEN: [f32; 6] = [250.0; 6];
// Wall 10 cm ahead, sides and rear open
const WALL_AHEAD: [f32; 6] = [10.0, 120.0, 120.0, 250.0, 250.0, 250.0];

/// Steps the controller one control cycle at a time, sampling the room every cycle
struct Bench {
    controller: Controller,
    room: Room,
    now: Instant,
}

impl Bench {
    fn new(readings: [f32; 6]) -> Self {
        let mut controller = Controller::new();
        let mut room = Room(readings);
        controller.sample_sensors(&mut room);
        Self {
            controller,
            room,
            now: Instant::now(),
        }
    }

    fn send(&mut self, line: &str) -> Response {
        self.controller.handle_line(line, self.now)
    }

    fn cycle(&mut self) -> WheelOutputs {
        self.now += CONTROL_INTERVAL;
        self.controller.sample_sensors(&mut self.room);
        self.controller.tick(self.now)
    }

    fn cycles(&mut self, n: u32) -> WheelOutputs {
        let mut out = *self.controller.last_outputs();
        for _ in 0..n {
            out = self.cycle();
        }
        out
    }
}

fn wheel(out: &WheelOutputs, id: WheelId) -> (SpinDirection, u8) {
    let w = out[id.index()];
    (w.direction, w.duty)
}

#[test]
fn forward_in_open_space() {
    let mut bench = Bench::new(OPEN);
    assert_eq!(bench.send("MOV:1,100").to_string(), "<ACK:MOV>");

    let mut previous = 0;
    for _ in 0..20 {
        let out = bench.cycle();
        let (_, duty) = wheel(&out, WheelId::Right);
        assert!(duty >= previous && duty <= 100);
        previous = duty;
    }

    let out = *bench.controller.last_outputs();
    assert_eq!(wheel(&out, WheelId::Left), (SpinDirection::Backward, 100));
    assert_eq!(wheel(&out, WheelId::Right), (SpinDirection::Forward, 100));
    let (back_dir, back_duty) = wheel(&out, WheelId::Back);
    assert_eq!(back_dir, SpinDirection::Forward);
    assert!(back_duty > 0);
}

#[test]
fn forward_in_two_wheel_mode_leaves_back_wheel_stopped() {
    let mut bench = Bench::new(OPEN);
    bench.send("MODE:0");
    bench.send("MOV:1,100");
    let out = bench.cycles(20);
    assert_eq!(wheel(&out, WheelId::Right), (SpinDirection::Forward, 100));
    assert_eq!(out[WheelId::Back.index()].duty, 0);
    assert!(!out[WheelId::Back.index()].enabled);
}

#[test]
fn forward_blocked_by_wall() {
    let mut bench = Bench::new(WALL_AHEAD);
    assert!(bench.controller.interlocks().front);

    assert_eq!(bench.send("MOV:1,100"), Response::Ack("MOV".into()));
    let out = bench.cycles(10);
    assert!(out.iter().all(|w| w.duty == 0));

    bench.send("DEBUG:1");
    assert_eq!(bench.send("MOV:1,100").to_string(), "<ACK:MOV:VETOED:FRONT>");
}

#[test]
fn wall_appearing_mid_motion_stops_the_robot() {
    let mut bench = Bench::new(OPEN);
    bench.send("W");
    let out = bench.cycles(10);
    assert!(out.iter().any(|w| w.duty > 0));

    // A sudden 240 cm drop is held off by the outlier filter for two samples
    bench.room = Room(WALL_AHEAD);
    let out = bench.cycles(2);
    assert!(out.iter().any(|w| w.duty > 0));
    let out = bench.cycle();
    assert!(out.iter().all(|w| w.duty == 0));
}

#[test]
fn avoidance_gives_up_when_never_clear() {
    // Boxed in ahead on both escape sides as well
    let mut bench = Bench::new([10.0, 10.0, 10.0, 250.0, 250.0, 250.0]);
    bench.send("AVOID:1");
    bench.send("MOV:1,100");
    assert_eq!(bench.controller.avoidance().state(), AvoidanceState::RotatingAway);

    let bound = (ROTATION_TIMEOUT + MOVEMENT_TIMEOUT) * MAX_AVOIDANCE_ATTEMPTS;
    let cycles = (bound.as_millis() / CONTROL_INTERVAL.as_millis()) as u32;
    let mut max_attempts = 0;
    for _ in 0..cycles {
        bench.cycle();
        max_attempts = max_attempts.max(bench.controller.avoidance().attempts());
        if !bench.controller.avoidance().is_active() {
            break;
        }
    }

    assert_eq!(bench.controller.avoidance().state(), AvoidanceState::Idle);
    assert!(!bench.controller.avoidance().successful());
    assert_eq!(max_attempts, MAX_AVOIDANCE_ATTEMPTS);
    assert!(bench.cycle().iter().all(|w| w.duty == 0));
}

#[test]
fn avoidance_steers_around_an_obstacle() {
    let mut bench = Bench::new(WALL_AHEAD);
    bench.send("AVOID:1");
    bench.send("MOV:1,150");
    assert!(bench.controller.avoidance().is_active());

    // The turn clears the front sensors after a few cycles
    bench.cycles(4);
    bench.room = Room(OPEN);

    let mut reached_idle = false;
    for _ in 0..200 {
        bench.cycle();
        if !bench.controller.avoidance().is_active() {
            reached_idle = true;
            break;
        }
    }
    assert!(reached_idle);
    assert!(bench.controller.avoidance().successful());

    // The original forward request resumes
    let out = bench.cycles(20);
    assert_eq!(wheel(&out, WheelId::Right).0, SpinDirection::Forward);
    assert!(wheel(&out, WheelId::Right).1 > 0);
}

#[test]
fn stale_tag_stops_tracking() {
    let mut bench = Bench::new(OPEN);
    assert_eq!(bench.send("TAG:5,12.0,3,80"), Response::Ack("TAG".into()));
    bench.cycle();
    assert_ne!(bench.controller.tracker().state(), TrackingState::Idle);

    let cycles = (TAG_TIMEOUT.as_millis() / CONTROL_INTERVAL.as_millis()) as u32 + 2;
    let out = bench.cycles(cycles);
    assert_eq!(bench.controller.tracker().state(), TrackingState::Idle);
    assert!(out.iter().all(|w| w.duty == 0));
}

#[test]
fn tracking_holds_position_in_front_of_tag() {
    let mut bench = Bench::new(OPEN);
    let mut held = false;
    for _ in 0..200 {
        // Fresh sighting every cycle, already inside the position tolerance
        bench.send("TAG:7,12,0");
        bench.cycle();
        if bench.controller.tracker().state() == TrackingState::MaintainingPosition {
            held = true;
            break;
        }
    }
    assert!(held);
}

#[test]
fn malformed_speed_leaves_limits_unchanged() {
    let mut bench = Bench::new(OPEN);
    assert_eq!(bench.send("SPEED:abc").to_string(), "<ERR:Invalid SPEED params>");
    assert_eq!(bench.controller.config().max_speed(), f32::from(DEFAULT_MAX_SPEED));
    assert_eq!(bench.controller.config().min_speed(), f32::from(DEFAULT_MIN_SPEED));
}

#[test]
fn unknown_verb_is_named_in_the_error() {
    let mut bench = Bench::new(OPEN);
    assert_eq!(bench.send("FLY:1").to_string(), "<ERR:Unknown command: FLY>");
}

#[test]
fn repeated_stop_keeps_every_wheel_at_zero() {
    let mut bench = Bench::new(OPEN);
    bench.send("MOV:10,255");
    bench.cycles(10);
    for line in ["STOP", "5", "MOV:0,0", "STOP"] {
        bench.send(line);
        assert!(bench.cycle().iter().all(|w| w.duty == 0));
    }
}
