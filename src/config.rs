// Cadences, thresholds, topics and the runtime-mutable configuration
use std::time::Duration;

// Control loop and sensor sampling run on independent cadences
pub const CONTROL_HZ: u64 = 20;
pub const SENSOR_HZ: u64 = 20;
pub const CONTROL_INTERVAL: Duration = Duration::from_millis(1000 / CONTROL_HZ);
pub const SENSOR_INTERVAL: Duration = Duration::from_millis(1000 / SENSOR_HZ);

// How often the runtime wakes up to check both cadences
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

// Distance messages older than this are ignored and every sensor reads far
pub const SENSOR_STALE_AFTER: Duration = Duration::from_millis(500);

// Distance thresholds (cm)
pub const CRITICAL_DISTANCE_CM: f32 = 15.0;
pub const SLOW_DOWN_DISTANCE_CM: f32 = 40.0;
pub const SENSOR_MIN_CM: f32 = 2.0;
pub const SENSOR_MAX_CM: f32 = 400.0;
/// Reading reported for a failed or invalid pulse
pub const FAR_DISTANCE_CM: f32 = SENSOR_MAX_CM;
/// A jump larger than this between consecutive reads is treated as an outlier
pub const OUTLIER_JUMP_CM: f32 = 100.0;
/// Consecutive outliers after which the new value is accepted anyway
pub const OUTLIER_MAX_REJECTS: u8 = 2;

// Actuation
pub const ACCEL_RATE: f32 = 0.05;
pub const DEADBAND: f32 = 0.1;
pub const DEFAULT_MAX_SPEED: u8 = 255;
pub const DEFAULT_MIN_SPEED: u8 = 60;

// Obstacle avoidance
pub const ROTATION_TIMEOUT: Duration = Duration::from_millis(2000);
pub const MOVEMENT_TIMEOUT: Duration = Duration::from_millis(1500);
pub const RETURN_DURATION: Duration = Duration::from_millis(750);
pub const MAX_AVOIDANCE_ATTEMPTS: u32 = 3;

// Tag tracking
pub const TAG_TIMEOUT: Duration = Duration::from_millis(1000);
pub const TAG_STANDOFF_CM: f32 = 10.0;
pub const POSITION_TOLERANCE_CM: f32 = 5.0;
pub const ROTATION_TOLERANCE_RAD: f32 = 0.087; // ~5 degrees

// Command protocol
pub const FRAME_TIMEOUT: Duration = Duration::from_millis(1000);
pub const MAX_FRAME_LEN: usize = 64;

// Zenoh topics
pub const TOPIC_CMD_RAW: &str = "patrol/cmd/raw"; // command bytes in
pub const TOPIC_CMD_ACK: &str = "patrol/cmd/ack"; // response lines out
pub const TOPIC_RT_WHEELS: &str = "patrol/rt/wheels"; // actuation
pub const TOPIC_SENSORS: &str = "patrol/sensors/distance"; // distance readings in
pub const TOPIC_BUS_OVERRIDE: &str = "patrol/bus/override"; // master override in
pub const TOPIC_BUS_STATE: &str = "patrol/state/bus"; // ready/idle/active out

// Serial command link
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Rejected configuration change
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("max speed must be in 1..=255, got {0}")]
    MaxSpeed(i64),

    #[error("min speed {min} must not exceed max speed {max}")]
    MinAboveMax { min: i64, max: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelMode {
    TwoWheel,
    ThreeWheel,
}

impl WheelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WheelMode::TwoWheel => "2WHEEL",
            WheelMode::ThreeWheel => "3WHEEL",
        }
    }
}

/// Process-wide settings changed only through validated protocol commands
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigState {
    max_speed: f32,
    min_speed: f32,
    pub wheel_mode: WheelMode,
    pub smooth_acceleration: bool,
    pub avoidance_enabled: bool,
    pub debug: bool,
}

impl Default for ConfigState {
    fn default() -> Self {
        Self {
            max_speed: DEFAULT_MAX_SPEED as f32,
            min_speed: DEFAULT_MIN_SPEED as f32,
            wheel_mode: WheelMode::ThreeWheel,
            smooth_acceleration: true,
            avoidance_enabled: false,
            debug: false,
        }
    }
}

impl ConfigState {
    pub fn max_speed(&self) -> f32 {
        self.max_speed
    }

    pub fn min_speed(&self) -> f32 {
        self.min_speed
    }

    /// Set both speed limits at once; nothing changes if either is invalid
    pub fn set_speed_limits(&mut self, max: i64, min: i64) -> Result<(), ConfigError> {
        if !(1..=255).contains(&max) {
            return Err(ConfigError::MaxSpeed(max));
        }
        if min < 0 || min > max {
            return Err(ConfigError::MinAboveMax { min, max });
        }
        self.max_speed = max as f32;
        self.min_speed = min as f32;
        Ok(())
    }

    pub fn is_three_wheel(&self) -> bool {
        self.wheel_mode == WheelMode::ThreeWheel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ConfigState::default();
        assert_eq!(cfg.max_speed(), 255.0);
        assert_eq!(cfg.min_speed(), 60.0);
        assert!(cfg.is_three_wheel());
        assert!(!cfg.avoidance_enabled);
    }

    #[test]
    fn test_invalid_limits_leave_state_unchanged() {
        let mut cfg = ConfigState::default();
        assert_eq!(cfg.set_speed_limits(300, 10), Err(ConfigError::MaxSpeed(300)));
        assert!(cfg.set_speed_limits(100, 150).is_err());
        assert!(cfg.set_speed_limits(100, -1).is_err());
        assert_eq!(cfg.max_speed(), 255.0);
        assert_eq!(cfg.min_speed(), 60.0);

        cfg.set_speed_limits(200, 40).unwrap();
        assert_eq!(cfg.max_speed(), 200.0);
        assert_eq!(cfg.min_speed(), 40.0);
    }
}
