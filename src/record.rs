//! Persisted trajectories.
//!
//! A record is a creation timestamp plus every finalized trajectory with its
//! nodes in order. It is stored as JSON and replaced atomically on write.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feature::{PointDetection, TrajectoryNode};
use crate::my_types::*;
use crate::trajectory::Trajectory;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub created: DateTime<Utc>,
    pub trajectories: Vec<TrajectoryRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub id: TrajectoryId,
    pub nodes: Vec<NodeRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub time: usize,
    pub x: f64,
    pub y: f64,
    pub octave: i32,
}

impl TrackingRecord {
    pub fn new(created: DateTime<Utc>) -> Self {
        Self {
            created,
            trajectories: vec![],
        }
    }

    /// Rebuild every stored trajectory.
    pub fn to_trajectories(&self) -> Result<Vec<Trajectory>> {
        self.trajectories.iter().map(Trajectory::from_record).collect()
    }

    /// First id not used by any stored trajectory.
    pub fn next_free_id(&self) -> u64 {
        self.trajectories
            .iter()
            .map(|t| t.id.0 + 1)
            .max()
            .unwrap_or(0)
    }
}

impl From<&TrajectoryNode> for NodeRecord {
    fn from(node: &TrajectoryNode) -> Self {
        Self {
            time: node.time,
            x: node.point.position.x,
            y: node.point.position.y,
            octave: node.point.octave,
        }
    }
}

impl From<&NodeRecord> for TrajectoryNode {
    fn from(node: &NodeRecord) -> Self {
        TrajectoryNode::new(PointDetection::new(node.x, node.y, node.octave), node.time)
    }
}

impl From<&Trajectory> for TrajectoryRecord {
    fn from(trajectory: &Trajectory) -> Self {
        Self {
            id: trajectory.id(),
            nodes: trajectory.nodes().iter().map(NodeRecord::from).collect(),
        }
    }
}

impl Trajectory {
    pub fn from_record(record: &TrajectoryRecord) -> Result<Trajectory> {
        Trajectory::from_nodes(
            record.id,
            record.nodes.iter().map(TrajectoryNode::from).collect(),
        )
    }
}

/// Write `record` to `path`. The file is first written next to the target and
/// then renamed over it, so a failure never leaves a partial record behind.
pub fn write(record: &TrackingRecord, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create a temporary file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(file.as_file());
        serde_json::to_writer_pretty(&mut writer, record)
            .context("Failed to serialize trajectory record")?;
        writer.flush()?;
    }
    file.as_file().sync_all()?;
    file.persist(path)
        .with_context(|| format!("Failed to write trajectory record {}", path.display()))?;
    Ok(())
}

pub fn read(path: &Path) -> Result<TrackingRecord> {
    let file =
        File::open(path).with_context(|| format!("Failed to open record {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse record {}", path.display()))
}
