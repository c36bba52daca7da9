use anyhow::{bail, Result};

use crate::correspondence::{Correspondence, TrajectoryHandle};
use crate::feature::*;
use crate::motion_filter::MotionFilter;
use crate::my_types::*;

/// Hands out trajectory ids. Owned by the tracking session.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering after ids that are already taken, e.g. when
    /// appending to a previously persisted record.
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    pub fn next_id(&mut self) -> TrajectoryId {
        let id = TrajectoryId(self.next);
        self.next += 1;
        id
    }
}

/// Decides whether a candidate node may extend a trajectory.
pub trait GeometricConstraint: std::fmt::Debug {
    fn accepts(&self, nodes: &[TrajectoryNode], candidate: &PointDetection, time: usize) -> bool;
}

/// Accepts every candidate.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unconstrained;

impl GeometricConstraint for Unconstrained {
    fn accepts(&self, _: &[TrajectoryNode], _: &PointDetection, _: usize) -> bool {
        true
    }
}

#[derive(Clone, Debug)]
pub struct Trajectory {
    id: TrajectoryId,
    /// Never empty; times are non-decreasing.
    nodes: Vec<TrajectoryNode>,
    filter: MotionFilter,
}

impl Trajectory {
    pub fn new(id: TrajectoryId, point: PointDetection, time: usize) -> Self {
        Self {
            id,
            nodes: vec![TrajectoryNode::new(point, time)],
            filter: MotionFilter::new(point.position, time),
        }
    }

    /// Rebuild a trajectory from persisted nodes without collapsing any of them.
    pub fn from_nodes(id: TrajectoryId, nodes: Vec<TrajectoryNode>) -> Result<Self> {
        let Some(first) = nodes.first() else {
            bail!("trajectory {id} has no nodes");
        };
        if nodes.windows(2).any(|w| w[1].time < w[0].time) {
            bail!("trajectory {id} has decreasing node times");
        }
        let mut filter = MotionFilter::new(first.point.position, first.time);
        for node in &nodes[1..] {
            filter.update(node.point.position, node.time);
        }
        Ok(Self { id, nodes, filter })
    }

    pub fn id(&self) -> TrajectoryId {
        self.id
    }

    pub fn nodes(&self) -> &[TrajectoryNode] {
        &self.nodes
    }

    pub fn last(&self) -> &TrajectoryNode {
        // nodes is never empty
        &self.nodes[self.nodes.len() - 1]
    }

    pub fn start(&self) -> usize {
        self.nodes[0].time
    }

    pub fn end(&self) -> usize {
        self.last().time
    }

    pub fn duration(&self) -> usize {
        self.end() - self.start()
    }

    /// True if the trajectory covers `time`.
    pub fn spans(&self, time: usize) -> bool {
        self.start() <= time && time <= self.end()
    }

    /// Frames missed up to `time`, which must be later than the last node.
    pub fn occlusion_depth(&self, time: usize) -> usize {
        time.saturating_sub(self.end() + 1)
    }

    pub fn predict(&self, time: usize, handle: TrajectoryHandle) -> Correspondence {
        let actual = *self.last();
        let point = PointDetection {
            position: self.filter.predict(time),
            octave: actual.point.octave,
        };
        Correspondence::new(actual, TrajectoryNode::new(point, time), handle)
    }

    /// Extend the trajectory with `point` at `time`. Returns false, leaving
    /// the trajectory untouched, when the constraint rejects the candidate.
    pub fn update(
        &mut self,
        point: PointDetection,
        time: usize,
        constraint: &dyn GeometricConstraint,
        static_threshold: f64,
    ) -> bool {
        if !constraint.accepts(&self.nodes, &point, time) {
            return false;
        }
        self.filter.update(point.position, time);

        let node = TrajectoryNode::new(point, time);
        if self.nodes.len() == 1 {
            self.nodes.push(node);
            return true;
        }
        let last = self.nodes.len() - 1;
        if self.nodes[last].point.distance2(&point) < static_threshold {
            self.nodes[last] = node;
        } else {
            self.nodes.push(node);
        }
        true
    }

    pub fn filter(&self) -> &MotionFilter {
        &self.filter
    }
}

impl std::fmt::Display for Trajectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}:", self.id)?;
        for node in &self.nodes {
            write!(f, " [{}]", node)?;
        }
        Ok(())
    }
}
