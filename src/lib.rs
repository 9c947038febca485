// Motion-control core for a three-wheeled omnidirectional patrol robot

pub mod config;
pub mod control;
pub mod messages;
pub mod motion;
pub mod motor;
pub mod protocol;
pub mod runtime;
pub mod safety;
