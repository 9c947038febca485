// Motor control for the three-wheel omnidirectional base
//
// Provides:
// - Holonomic kinematics (body request -> per-wheel direction and speed)
// - Acceleration-limited actuation with one duty-cycle write per wheel per cycle

pub mod actuation;
pub mod kinematics;

pub use actuation::{MotorBank, Wheel, WheelOutput, WheelOutputs};
pub use kinematics::{SpinDirection, WheelId, WheelTarget, WheelTargets, map_request};
