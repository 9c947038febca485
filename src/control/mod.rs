// Motion control: autonomous behaviours and the controller that arbitrates them

pub mod avoidance;
pub mod controller;
pub mod pid;
pub mod tracking;

pub use avoidance::{AvoidanceOutcome, AvoidanceState, ObstacleAvoidance};
pub use controller::Controller;
pub use tracking::{Pose, TagTracker, TrackingState};
