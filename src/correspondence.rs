use crate::feature::TrajectoryNode;

/// Index of a trajectory in the session's active set. Only valid for the
/// frame step that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TrajectoryHandle(pub usize);

/// Last known node of a trajectory paired with where it is expected in the
/// current frame.
#[derive(Clone, Copy, Debug)]
pub struct Correspondence {
    pub actual: TrajectoryNode,
    pub predicted: TrajectoryNode,
    pub trajectory: TrajectoryHandle,
    /// 0 when optical flow lost the point.
    pub status: u8,
}

impl Correspondence {
    pub fn new(
        actual: TrajectoryNode,
        predicted: TrajectoryNode,
        trajectory: TrajectoryHandle,
    ) -> Self {
        Self {
            actual,
            predicted,
            trajectory,
            status: 1,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status != 0
    }
}

impl std::fmt::Display for Correspondence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S: {} - E: {} T: {}", self.actual, self.predicted, self.status)
    }
}
