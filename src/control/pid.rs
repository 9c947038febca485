// PID controller with anti-windup
// Output and integral contribution are both limited to ±limit (MAX_SPEED units).

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    limit: f32,
    integral: f32,
    prev_error: Option<f32>,
}

impl Pid {
    pub fn new(gains: PidGains, limit: f32) -> Self {
        Self {
            gains,
            limit: limit.abs(),
            integral: 0.0,
            prev_error: None,
        }
    }

    pub fn set_limit(&mut self, limit: f32) {
        self.limit = limit.abs();
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
    }

    /// Integral contribution to the last output
    pub fn integral_term(&self) -> f32 {
        self.gains.ki * self.integral
    }

    /// Advance one step of `dt` seconds and return the correction
    pub fn update(&mut self, error: f32, dt: f32) -> f32 {
        let PidGains { kp, ki, kd } = self.gains;
        if dt <= 0.0 {
            return (kp * error).clamp(-self.limit, self.limit);
        }

        self.integral += error * dt;
        if ki != 0.0 {
            let i_max = self.limit / ki.abs();
            self.integral = self.integral.clamp(-i_max, i_max);
        }

        let derivative = match self.prev_error {
            Some(prev) => (error - prev) / dt,
            None => 0.0,
        };
        self.prev_error = Some(error);

        (kp * error + ki * self.integral + kd * derivative).clamp(-self.limit, self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportional_only() {
        let mut pid = Pid::new(PidGains { kp: 2.0, ki: 0.0, kd: 0.0 }, 255.0);
        assert_eq!(pid.update(10.0, 0.05), 20.0);
        assert_eq!(pid.update(-10.0, 0.05), -20.0);
    }

    #[test]
    fn test_integral_is_clamped() {
        let mut pid = Pid::new(PidGains { kp: 0.0, ki: 10.0, kd: 0.0 }, 255.0);
        for _ in 0..10_000 {
            pid.update(100.0, 0.05);
        }
        assert!((pid.integral_term() - 255.0).abs() < 1e-3);

        // Windup is bounded, so the sign flips quickly once the error does
        let mut flipped = false;
        for _ in 0..20 {
            if pid.update(-100.0, 0.05) < 0.0 {
                flipped = true;
                break;
            }
        }
        assert!(flipped);
    }

    #[test]
    fn test_derivative_skips_first_sample() {
        let mut pid = Pid::new(PidGains { kp: 0.0, ki: 0.0, kd: 1.0 }, 255.0);
        assert_eq!(pid.update(5.0, 0.1), 0.0);
        assert!((pid.update(6.0, 0.1) - 10.0).abs() < 1e-3);
        pid.reset();
        assert_eq!(pid.update(100.0, 0.1), 0.0);
    }

    #[test]
    fn test_output_limited() {
        let mut pid = Pid::new(PidGains { kp: 100.0, ki: 0.0, kd: 0.0 }, 50.0);
        assert_eq!(pid.update(10.0, 0.05), 50.0);
    }
}
