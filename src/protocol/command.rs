// Command decoding
//
// A command line is either a single legacy teleoperation key or
// `VERB[:p1,p2,...]`. Verbs are looked up in a fixed table that declares how
// many parameters each takes and how to decode them.

use crate::config::WheelMode;
use crate::motion::{DirectionCode, Side};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownVerb(String),

    #[error("Invalid {0} params")]
    InvalidParams(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `MOV:<dir>,<speed>`; direction code 0 is stop
    Move {
        code: Option<DirectionCode>,
        speed: u8,
    },
    /// `ROT:<L|R>,<speed>`
    Rotate { clockwise: bool, speed: u8 },
    Stop,
    /// `CLEAR[:<side|ALL>]`; `None` clears every side
    Clear(Option<Side>),
    Mode(WheelMode),
    Speed { max: i64, min: i64 },
    Accel(bool),
    Debug(bool),
    Avoid(bool),
    Sensors,
    Status,
    Ping,
    Test,
    /// `TAG:<id>,<distance_cm>,<bearing_deg>[,<speed_pct>]`
    Tag {
        id: u32,
        distance: f32,
        bearing_deg: f32,
        speed_pct: Option<u8>,
    },
    /// `POSE:<x_cm>,<y_cm>,<yaw_deg>`
    Pose { x: f32, y: f32, yaw_deg: f32 },
    /// Legacy single-character key; `None` is the stop key
    Key {
        key: char,
        code: Option<DirectionCode>,
    },
}

impl Command {
    /// Verb used in the acknowledgment
    pub fn verb(&self) -> String {
        match self {
            Command::Move { .. } => "MOV".into(),
            Command::Rotate { .. } => "ROT".into(),
            Command::Stop => "STOP".into(),
            Command::Clear(_) => "CLEAR".into(),
            Command::Mode(_) => "MODE".into(),
            Command::Speed { .. } => "SPEED".into(),
            Command::Accel(_) => "ACCEL".into(),
            Command::Debug(_) => "DEBUG".into(),
            Command::Avoid(_) => "AVOID".into(),
            Command::Sensors => "SENS".into(),
            Command::Status => "STATUS".into(),
            Command::Ping => "PING".into(),
            Command::Test => "TEST".into(),
            Command::Tag { .. } => "TAG".into(),
            Command::Pose { .. } => "POSE".into(),
            Command::Key { key, .. } => key.to_string(),
        }
    }
}

/// Legacy key -> maneuver; `Some(None)` is the stop key
pub fn key_to_direction(key: char) -> Option<Option<DirectionCode>> {
    use DirectionCode::*;
    Some(Some(match key.to_ascii_uppercase() {
        'W' => Forward,
        'S' => Backward,
        'Q' => ArcLeft,
        'E' => ArcRight,
        'A' => RotateLeft,
        'D' => RotateRight,
        '4' => SlideLeft,
        '6' => SlideRight,
        '7' => ForwardLeft,
        '9' => ForwardRight,
        '1' => BackwardLeft,
        '3' => BackwardRight,
        '5' => return Some(None),
        _ => return None,
    }))
}

/// Accepted parameter counts for a verb
#[derive(Debug, Clone, Copy)]
enum Arity {
    Exactly(usize),
    Between(usize, usize),
}

impl Arity {
    fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exactly(k) => n == k,
            Arity::Between(lo, hi) => (lo..=hi).contains(&n),
        }
    }
}

struct VerbEntry {
    verb: &'static str,
    arity: Arity,
    decode: fn(&[&str]) -> Option<Command>,
}

const VERBS: &[VerbEntry] = &[
    VerbEntry { verb: "MOV", arity: Arity::Exactly(2), decode: decode_move },
    VerbEntry { verb: "ROT", arity: Arity::Exactly(2), decode: decode_rotate },
    VerbEntry { verb: "STOP", arity: Arity::Exactly(0), decode: decode_stop },
    VerbEntry { verb: "CLEAR", arity: Arity::Between(0, 1), decode: decode_clear },
    VerbEntry { verb: "MODE", arity: Arity::Exactly(1), decode: decode_mode },
    VerbEntry { verb: "SPEED", arity: Arity::Exactly(2), decode: decode_speed },
    VerbEntry { verb: "ACCEL", arity: Arity::Exactly(1), decode: decode_accel },
    VerbEntry { verb: "DEBUG", arity: Arity::Exactly(1), decode: decode_debug },
    VerbEntry { verb: "AVOID", arity: Arity::Exactly(1), decode: decode_avoid },
    VerbEntry { verb: "SENS", arity: Arity::Exactly(0), decode: decode_sensors },
    VerbEntry { verb: "STATUS", arity: Arity::Exactly(0), decode: decode_status },
    VerbEntry { verb: "PING", arity: Arity::Exactly(0), decode: decode_ping },
    VerbEntry { verb: "TEST", arity: Arity::Exactly(0), decode: decode_test },
    VerbEntry { verb: "TAG", arity: Arity::Between(3, 4), decode: decode_tag },
    VerbEntry { verb: "POSE", arity: Arity::Exactly(3), decode: decode_pose },
];

/// Decode one complete command line
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();

    let mut chars = line.chars();
    if let (Some(key), None) = (chars.next(), chars.next()) {
        return match key_to_direction(key) {
            Some(code) => Ok(Command::Key {
                key: key.to_ascii_uppercase(),
                code,
            }),
            None => Err(CommandError::UnknownVerb(line.to_string())),
        };
    }

    let (verb, payload) = line.split_once(':').unwrap_or((line, ""));
    let verb = verb.trim().to_ascii_uppercase();
    let spec = VERBS
        .iter()
        .find(|s| s.verb == verb)
        .ok_or_else(|| CommandError::UnknownVerb(verb.clone()))?;

    let params: Vec<&str> = if payload.trim().is_empty() {
        Vec::new()
    } else {
        payload.split(',').map(str::trim).collect()
    };

    if !spec.arity.accepts(params.len()) {
        return Err(CommandError::InvalidParams(spec.verb));
    }
    (spec.decode)(&params).ok_or(CommandError::InvalidParams(spec.verb))
}

fn parse_switch(s: &str) -> Option<bool> {
    match s.to_ascii_uppercase().as_str() {
        "1" | "ON" => Some(true),
        "0" | "OFF" => Some(false),
        _ => None,
    }
}

fn parse_finite(s: &str) -> Option<f32> {
    s.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn decode_stop(_: &[&str]) -> Option<Command> {
    Some(Command::Stop)
}

fn decode_sensors(_: &[&str]) -> Option<Command> {
    Some(Command::Sensors)
}

fn decode_status(_: &[&str]) -> Option<Command> {
    Some(Command::Status)
}

fn decode_ping(_: &[&str]) -> Option<Command> {
    Some(Command::Ping)
}

fn decode_test(_: &[&str]) -> Option<Command> {
    Some(Command::Test)
}

fn decode_accel(p: &[&str]) -> Option<Command> {
    parse_switch(p[0]).map(Command::Accel)
}

fn decode_debug(p: &[&str]) -> Option<Command> {
    parse_switch(p[0]).map(Command::Debug)
}

fn decode_avoid(p: &[&str]) -> Option<Command> {
    parse_switch(p[0]).map(Command::Avoid)
}

fn decode_move(p: &[&str]) -> Option<Command> {
    let code: u8 = p[0].parse().ok()?;
    let speed: u8 = p[1].parse().ok()?;
    let code = match code {
        0 => None,
        c => Some(DirectionCode::from_code(c)?),
    };
    Some(Command::Move { code, speed })
}

fn decode_rotate(p: &[&str]) -> Option<Command> {
    let clockwise = match p[0].to_ascii_uppercase().as_str() {
        "L" | "0" | "CCW" => false,
        "R" | "1" | "CW" => true,
        _ => return None,
    };
    let speed: u8 = p[1].parse().ok()?;
    Some(Command::Rotate { clockwise, speed })
}

fn decode_clear(p: &[&str]) -> Option<Command> {
    match p.first() {
        None => Some(Command::Clear(None)),
        Some(s) if s.eq_ignore_ascii_case("ALL") => Some(Command::Clear(None)),
        Some(s) => Side::parse(s).map(|side| Command::Clear(Some(side))),
    }
}

fn decode_mode(p: &[&str]) -> Option<Command> {
    match p[0].to_ascii_uppercase().as_str() {
        "0" | "2WHEEL" => Some(Command::Mode(WheelMode::TwoWheel)),
        "1" | "3WHEEL" => Some(Command::Mode(WheelMode::ThreeWheel)),
        _ => None,
    }
}

fn decode_speed(p: &[&str]) -> Option<Command> {
    Some(Command::Speed {
        max: p[0].parse().ok()?,
        min: p[1].parse().ok()?,
    })
}

fn decode_tag(p: &[&str]) -> Option<Command> {
    let id: u32 = p[0].parse().ok()?;
    let distance = parse_finite(p[1]).filter(|d| *d >= 0.0)?;
    let bearing_deg = parse_finite(p[2]).filter(|b| b.abs() <= 360.0)?;
    let speed_pct = match p.get(3) {
        Some(s) => Some(s.parse::<u8>().ok().filter(|v| (1..=100).contains(v))?),
        None => None,
    };
    Some(Command::Tag {
        id,
        distance,
        bearing_deg,
        speed_pct,
    })
}

fn decode_pose(p: &[&str]) -> Option<Command> {
    Some(Command::Pose {
        x: parse_finite(p[0])?,
        y: parse_finite(p[1])?,
        yaw_deg: parse_finite(p[2])?,
    })
}
