use crate::my_types::*;

/// A detected image location and the scale level it was found at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointDetection {
    pub position: Vector2d,
    pub octave: i32,
}

impl PointDetection {
    pub fn new(x: f64, y: f64, octave: i32) -> Self {
        Self {
            position: Vector2d::new(x, y),
            octave,
        }
    }

    pub fn distance2(&self, other: &PointDetection) -> f64 {
        (self.position - other.position).norm_squared()
    }
}

impl std::fmt::Display for PointDetection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.2}, {:.2}) - {}",
            self.position.x, self.position.y, self.octave
        )
    }
}

/// A detection owned by one frame's detection set. `used` only flips
/// false -> true within a frame.
#[derive(Clone, Copy, Debug)]
pub struct PointData {
    pub point: PointDetection,
    pub used: bool,
}

impl PointData {
    pub fn unused(point: PointDetection) -> Self {
        Self { point, used: false }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrajectoryNode {
    pub point: PointDetection,
    pub time: usize,
}

impl TrajectoryNode {
    pub fn new(point: PointDetection, time: usize) -> Self {
        Self { point, time }
    }
}

impl std::fmt::Display for TrajectoryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "D: {} T: {}", self.point, self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance2() {
        let a = PointDetection::new(1., 2., 1);
        let b = PointDetection::new(4., 6., 1);
        assert_eq!(a.distance2(&b), 25.);
        assert_eq!(b.distance2(&a), 25.);
        assert_eq!(a.distance2(&a), 0.);
    }
}
