// Message types exchanged over zenoh

use serde::{Deserialize, Serialize};

use crate::config::FAR_DISTANCE_CM;
use crate::motor::{WheelId, WheelOutputs};
use crate::safety::{DistanceSensor, SensorPosition};

fn far() -> f32 {
    FAR_DISTANCE_CM
}

// Distance readings from the sensor board -> runtime (cm)
// A missing field counts as far, the same as a timed-out echo
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DistanceReadings {
    #[serde(default = "far")]
    pub front: f32,
    #[serde(default = "far")]
    pub front_left: f32,
    #[serde(default = "far")]
    pub front_right: f32,
    #[serde(default = "far")]
    pub back: f32,
    #[serde(default = "far")]
    pub back_left: f32,
    #[serde(default = "far")]
    pub back_right: f32,
}

impl Default for DistanceReadings {
    fn default() -> Self {
        Self {
            front: far(),
            front_left: far(),
            front_right: far(),
            back: far(),
            back_left: far(),
            back_right: far(),
        }
    }
}

// The latest message doubles as the sensor collaborator for the zone monitor
impl DistanceSensor for DistanceReadings {
    fn read_distance(&mut self, position: SensorPosition) -> f32 {
        match position {
            SensorPosition::Front => self.front,
            SensorPosition::FrontLeft => self.front_left,
            SensorPosition::FrontRight => self.front_right,
            SensorPosition::Back => self.back,
            SensorPosition::BackLeft => self.back_left,
            SensorPosition::BackRight => self.back_right,
        }
    }
}

// Actuation output from runtime -> motor driver board
// Signed duty per wheel, positive is forward spin
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct WheelActuation {
    pub left: i16,
    pub right: i16,
    pub back: i16,
    pub back_enabled: bool,
}

impl From<&WheelOutputs> for WheelActuation {
    fn from(outputs: &WheelOutputs) -> Self {
        Self {
            left: outputs[WheelId::Left.index()].signed_duty(),
            right: outputs[WheelId::Right.index()].signed_duty(),
            back: outputs[WheelId::Back.index()].signed_duty(),
            back_enabled: outputs[WheelId::Back.index()].enabled,
        }
    }
}

/// Master override raised by the peer board
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideSignal {
    pub active: bool,
}

/// Bus state published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusState {
    Idle,
    Active,
    Override,
}

/// Response line mirrored to the bus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandAck {
    pub line: String,
}
