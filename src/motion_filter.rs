use crate::my_types::*;

/// Constant-velocity smoother with a fixed gain schedule.
///
/// The gain starts at 1 (the first update lands exactly on the measurement)
/// and decays by a correction term that halves on every update. There is no
/// covariance; the schedule alone decides how much a measurement is trusted.
#[derive(Clone, Debug)]
pub struct MotionFilter {
    position: Vector2d,
    velocity: Vector2d,
    /// Time of the last update. Not necessarily the previous frame.
    time: usize,
    gain: f64,
    correction: f64,
}

impl MotionFilter {
    pub fn new(start: Vector2d, time: usize) -> Self {
        Self {
            position: start,
            velocity: Vector2d::zeros(),
            time,
            gain: 1.0,
            correction: 0.5,
        }
    }

    /// Position extrapolated to `time`. Only meaningful for `time >= self.time()`.
    pub fn predict(&self, time: usize) -> Vector2d {
        let dt = time as f64 - self.time as f64;
        self.position + self.velocity * dt
    }

    pub fn update(&mut self, measurement: Vector2d, time: usize) {
        let dt = time as f64 - self.time as f64;
        let projection = self.predict(time);
        if dt > 0. {
            let velocity = (measurement - self.position) / dt;
            self.velocity += self.gain * (velocity - self.velocity);
        }
        self.position = projection + self.gain * (measurement - projection);

        self.gain -= self.correction;
        self.correction /= 2.;
        self.time = time;
    }

    pub fn position(&self) -> Vector2d {
        self.position
    }

    pub fn velocity(&self) -> Vector2d {
        self.velocity
    }

    pub fn time(&self) -> usize {
        self.time
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}
