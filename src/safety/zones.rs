// Distance zone monitor
//
// Folds the six directional distance readings into a filtered snapshot and
// four directional interlocks. A side is blocked iff the closest sensor in its
// group is under CRITICAL_DISTANCE_CM; there is no hysteresis.

use tracing::{debug, info};

use crate::config::{
    CRITICAL_DISTANCE_CM, FAR_DISTANCE_CM, OUTLIER_JUMP_CM, OUTLIER_MAX_REJECTS, SENSOR_MAX_CM,
    SENSOR_MIN_CM,
};
use crate::motion::Side;

/// Mounting position of a distance sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorPosition {
    Front = 0,
    FrontLeft = 1,
    FrontRight = 2,
    Back = 3,
    BackLeft = 4,
    BackRight = 5,
}

impl SensorPosition {
    pub const ALL: [SensorPosition; 6] = [
        SensorPosition::Front,
        SensorPosition::FrontLeft,
        SensorPosition::FrontRight,
        SensorPosition::Back,
        SensorPosition::BackLeft,
        SensorPosition::BackRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorPosition::Front => "F",
            SensorPosition::FrontLeft => "FL",
            SensorPosition::FrontRight => "FR",
            SensorPosition::Back => "B",
            SensorPosition::BackLeft => "BL",
            SensorPosition::BackRight => "BR",
        }
    }

    /// Sensors whose readings guard a side
    pub fn group(side: Side) -> &'static [SensorPosition] {
        use SensorPosition::*;
        match side {
            Side::Front => &[Front, FrontLeft, FrontRight],
            Side::Back => &[Back, BackLeft, BackRight],
            Side::Left => &[FrontLeft, BackLeft],
            Side::Right => &[FrontRight, BackRight],
        }
    }
}

/// Source of calibrated distances.
///
/// Implementations never fail: a timed-out or invalid pulse is reported as
/// a large value (or anything non-finite, which the monitor maps to far).
pub trait DistanceSensor {
    fn read_distance(&mut self, position: SensorPosition) -> f32;
}

/// Latest filtered distance per sensor, in cm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceSnapshot {
    values: [f32; 6],
}

impl Default for DistanceSnapshot {
    fn default() -> Self {
        Self {
            values: [FAR_DISTANCE_CM; 6],
        }
    }
}

impl DistanceSnapshot {
    pub fn get(&self, position: SensorPosition) -> f32 {
        self.values[position.index()]
    }

    /// Closest reading among the sensors guarding `side`
    pub fn clearance(&self, side: Side) -> f32 {
        SensorPosition::group(side)
            .iter()
            .map(|&p| self.get(p))
            .fold(FAR_DISTANCE_CM, f32::min)
    }
}

/// Directional interlocks plus the master override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterlockState {
    pub front: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub override_active: bool,
}

impl InterlockState {
    pub fn is_blocked(&self, side: Side) -> bool {
        match side {
            Side::Front => self.front,
            Side::Back => self.back,
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    pub fn set(&mut self, side: Side, blocked: bool) {
        match side {
            Side::Front => self.front = blocked,
            Side::Back => self.back = blocked,
            Side::Left => self.left = blocked,
            Side::Right => self.right = blocked,
        }
    }

    pub fn any_blocked(&self) -> bool {
        Side::ALL.iter().any(|&s| self.is_blocked(s))
    }
}

/// Rejects single-sample spikes by comparing against the previous accepted value
#[derive(Debug, Clone, Copy, Default)]
struct OutlierFilter {
    last: Option<f32>,
    rejects: u8,
}

impl OutlierFilter {
    fn accept(&mut self, raw: f32) -> f32 {
        let value = sanitize(raw);
        match self.last {
            Some(prev)
                if (value - prev).abs() > OUTLIER_JUMP_CM && self.rejects < OUTLIER_MAX_REJECTS =>
            {
                self.rejects += 1;
                prev
            }
            _ => {
                self.rejects = 0;
                self.last = Some(value);
                value
            }
        }
    }
}

/// Keep readings inside the sensor's range; failed reads count as far, never zero
fn sanitize(raw: f32) -> f32 {
    if !raw.is_finite() || raw <= 0.0 {
        FAR_DISTANCE_CM
    } else {
        raw.clamp(SENSOR_MIN_CM, SENSOR_MAX_CM)
    }
}

/// Aggregates sensor readings into interlocks at the sensor cadence
#[derive(Debug, Clone, Default)]
pub struct ZoneMonitor {
    snapshot: DistanceSnapshot,
    filters: [OutlierFilter; 6],
    interlocks: InterlockState,
}

impl ZoneMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &DistanceSnapshot {
        &self.snapshot
    }

    pub fn interlocks(&self) -> &InterlockState {
        &self.interlocks
    }

    /// Read every sensor once, filter, and recompute the directional interlocks
    pub fn sample<S: DistanceSensor + ?Sized>(&mut self, sensor: &mut S) {
        for position in SensorPosition::ALL {
            let raw = sensor.read_distance(position);
            self.snapshot.values[position.index()] = self.filters[position.index()].accept(raw);
        }

        for side in Side::ALL {
            let blocked = self.snapshot.clearance(side) < CRITICAL_DISTANCE_CM;
            if blocked != self.interlocks.is_blocked(side) {
                if blocked {
                    info!(
                        "{} interlock engaged ({:.1} cm)",
                        side.as_str(),
                        self.snapshot.clearance(side)
                    );
                } else {
                    info!("{} interlock released", side.as_str());
                }
            }
            self.interlocks.set(side, blocked);
        }
        debug!("Distance snapshot: {:?}", self.snapshot.values);
    }

    /// Drop an interlock until the next sample re-derives it
    pub fn clear(&mut self, side: Side) {
        self.interlocks.set(side, false);
    }

    pub fn clear_all(&mut self) {
        for side in Side::ALL {
            self.clear(side);
        }
    }

    pub fn set_override(&mut self, active: bool) {
        self.interlocks.override_active = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSensor([f32; 6]);

    impl DistanceSensor for FixedSensor {
        fn read_distance(&mut self, position: SensorPosition) -> f32 {
            self.0[position.index()]
        }
    }

    #[test]
    fn test_initial_snapshot_is_far_and_clear() {
        let monitor = ZoneMonitor::new();
        assert_eq!(monitor.snapshot().get(SensorPosition::Front), FAR_DISTANCE_CM);
        assert!(!monitor.interlocks().any_blocked());
    }

    #[test]
    fn test_front_left_blocks_front_and_left() {
        let mut monitor = ZoneMonitor::new();
        let mut sensor = FixedSensor([100.0, 10.0, 100.0, 100.0, 100.0, 100.0]);
        monitor.sample(&mut sensor);
        let locks = monitor.interlocks();
        assert!(locks.front && locks.left);
        assert!(!locks.back && !locks.right);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut monitor = ZoneMonitor::new();
        let mut sensor = FixedSensor([CRITICAL_DISTANCE_CM, 100.0, 100.0, 14.9, 100.0, 100.0]);
        monitor.sample(&mut sensor);
        assert!(!monitor.interlocks().front);
        assert!(monitor.interlocks().back);
    }

    #[test]
    fn test_failed_reads_are_far_not_zero() {
        let mut monitor = ZoneMonitor::new();
        let mut sensor = FixedSensor([0.0, f32::NAN, -3.0, f32::INFINITY, 1000.0, 0.5]);
        monitor.sample(&mut sensor);
        let snap = monitor.snapshot();
        for pos in SensorPosition::ALL {
            let v = snap.get(pos);
            assert!((SENSOR_MIN_CM..=SENSOR_MAX_CM).contains(&v), "{pos:?} = {v}");
        }
        assert_eq!(snap.get(SensorPosition::Front), FAR_DISTANCE_CM);
        assert_eq!(snap.get(SensorPosition::BackRight), SENSOR_MIN_CM);
    }

    #[test]
    fn test_single_spike_is_rejected() {
        let mut monitor = ZoneMonitor::new();
        let mut sensor = FixedSensor([200.0; 6]);
        monitor.sample(&mut sensor);

        sensor.0[SensorPosition::Front.index()] = 5.0;
        monitor.sample(&mut sensor);
        assert_eq!(monitor.snapshot().get(SensorPosition::Front), 200.0);
        assert!(!monitor.interlocks().front);

        // A persistent change is accepted once the reject budget is spent
        monitor.sample(&mut sensor);
        monitor.sample(&mut sensor);
        assert_eq!(monitor.snapshot().get(SensorPosition::Front), 5.0);
        assert!(monitor.interlocks().front);
    }

    #[test]
    fn test_clear_lasts_until_next_sample() {
        let mut monitor = ZoneMonitor::new();
        let mut sensor = FixedSensor([10.0, 100.0, 100.0, 100.0, 100.0, 100.0]);
        monitor.sample(&mut sensor);
        assert!(monitor.interlocks().front);

        monitor.clear(Side::Front);
        assert!(!monitor.interlocks().front);

        monitor.sample(&mut sensor);
        assert!(monitor.interlocks().front);
    }
}
