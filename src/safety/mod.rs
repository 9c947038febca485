// Distance-based safety: zone monitoring and the interlock gate

pub mod gate;
pub mod zones;

pub use gate::{Admission, VetoReason, admit};
pub use zones::{DistanceSensor, DistanceSnapshot, InterlockState, SensorPosition, ZoneMonitor};
