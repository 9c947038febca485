// Movement intents shared by the controllers, the safety gate and the mapper

/// A side of the robot guarded by one distance interlock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Front,
    Back,
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Front, Side::Back, Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Front => "FRONT",
            Side::Back => "BACK",
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FRONT" | "F" => Some(Side::Front),
            "BACK" | "B" => Some(Side::Back),
            "LEFT" | "L" => Some(Side::Left),
            "RIGHT" | "R" => Some(Side::Right),
            _ => None,
        }
    }
}

/// The twelve discrete teleoperation maneuvers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionCode {
    Forward,
    Backward,
    ArcLeft,
    ArcRight,
    RotateLeft,
    RotateRight,
    SlideLeft,
    SlideRight,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
}

impl DirectionCode {
    /// Numeric code used by `MOV:<dir>,<speed>`; 0 is stop and has no maneuver
    pub fn from_code(code: u8) -> Option<Self> {
        use DirectionCode::*;
        Some(match code {
            1 => Forward,
            2 => Backward,
            3 => ArcLeft,
            4 => ArcRight,
            5 => RotateLeft,
            6 => RotateRight,
            7 => SlideLeft,
            8 => SlideRight,
            9 => ForwardLeft,
            10 => ForwardRight,
            11 => BackwardLeft,
            12 => BackwardRight,
            _ => return None,
        })
    }

    pub fn code(&self) -> u8 {
        use DirectionCode::*;
        match self {
            Forward => 1,
            Backward => 2,
            ArcLeft => 3,
            ArcRight => 4,
            RotateLeft => 5,
            RotateRight => 6,
            SlideLeft => 7,
            SlideRight => 8,
            ForwardLeft => 9,
            ForwardRight => 10,
            BackwardLeft => 11,
            BackwardRight => 12,
        }
    }

    /// Sides the robot body travels toward while executing this maneuver.
    /// In-place rotation translates nowhere and is never interlocked.
    pub fn implied_sides(&self) -> &'static [Side] {
        use DirectionCode::*;
        match self {
            Forward | ArcLeft | ArcRight => &[Side::Front],
            Backward => &[Side::Back],
            RotateLeft | RotateRight => &[],
            SlideLeft => &[Side::Left],
            SlideRight => &[Side::Right],
            ForwardLeft => &[Side::Front, Side::Left],
            ForwardRight => &[Side::Front, Side::Right],
            BackwardLeft => &[Side::Back, Side::Left],
            BackwardRight => &[Side::Back, Side::Right],
        }
    }

    pub fn moves_forward(&self) -> bool {
        self.implied_sides().contains(&Side::Front)
    }
}

/// A single movement intent, built per command and consumed immediately
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionRequest {
    /// Normalized body velocities in [-1, 1]; lateral is positive to the right,
    /// forward positive ahead, rotational positive counter-clockwise
    Linear {
        lateral: f32,
        forward: f32,
        rotational: f32,
    },
    /// Discrete maneuver at a duty-cycle speed
    Direction { code: DirectionCode, speed: f32 },
    Stop,
}

impl MotionRequest {
    pub fn linear(lateral: f32, forward: f32, rotational: f32) -> Self {
        MotionRequest::Linear {
            lateral: lateral.clamp(-1.0, 1.0),
            forward: forward.clamp(-1.0, 1.0),
            rotational: rotational.clamp(-1.0, 1.0),
        }
    }

    pub fn direction(code: DirectionCode, speed: f32) -> Self {
        MotionRequest::Direction { code, speed }
    }

    pub fn is_stop(&self) -> bool {
        match *self {
            MotionRequest::Stop => true,
            MotionRequest::Direction { speed, .. } => speed <= 0.0,
            MotionRequest::Linear {
                lateral,
                forward,
                rotational,
            } => lateral == 0.0 && forward == 0.0 && rotational == 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_codes_round_trip_through_numbers() {
        for code in 1..=12 {
            let dir = DirectionCode::from_code(code).unwrap();
            assert_eq!(dir.code(), code);
        }
        assert!(DirectionCode::from_code(0).is_none());
        assert!(DirectionCode::from_code(13).is_none());
    }

    #[test]
    fn test_rotation_implies_no_side() {
        assert!(DirectionCode::RotateLeft.implied_sides().is_empty());
        assert!(DirectionCode::ArcRight.moves_forward());
        assert!(!DirectionCode::BackwardLeft.moves_forward());
    }

    #[test]
    fn test_linear_is_clamped() {
        let req = MotionRequest::linear(2.0, -3.0, 0.5);
        assert_eq!(
            req,
            MotionRequest::Linear {
                lateral: 1.0,
                forward: -1.0,
                rotational: 0.5
            }
        );
    }
}
