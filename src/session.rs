//! Per-frame tracking pipeline.
//!
//! Every frame goes through predict, measure and correct. Predictions and
//! flow measurements are computed without touching session state, so a
//! collaborator error abandons the frame as a unit. Only then are the
//! trajectories, the frame buffer and the clock updated.

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::correspondence::{Correspondence, TrajectoryHandle};
use crate::detector::PointDetector;
use crate::feature::{PointData, PointDetection};
use crate::frame::{Frame, FrameBuffer};
use crate::image::Image;
use crate::optical_flow::FlowEstimator;
use crate::point_search::PointSearch;
use crate::pyramid::Pyramid;
use crate::record::{TrackingRecord, TrajectoryRecord};
use crate::trajectory::{GeometricConstraint, IdGenerator, Trajectory, Unconstrained};

/// Counters for one processed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub time: usize,
    pub detections: usize,
    /// correspondences the flow estimator kept
    pub tracked: usize,
    pub extended: usize,
    pub expired: usize,
    pub persisted: usize,
    pub spawned: usize,
    pub active: usize,
}

pub struct TrackingSession<F: FlowEstimator, D: PointDetector> {
    config: Config,
    flow: F,
    detector: D,
    constraint: Box<dyn GeometricConstraint>,
    ids: IdGenerator,
    trajectories: Vec<Trajectory>,
    buffer: FrameBuffer,
    search: Option<PointSearch>,
    // Index of the next frame. 0 before the first frame.
    time: usize,
    record: TrackingRecord,
}

impl<F: FlowEstimator, D: PointDetector> TrackingSession<F, D> {
    pub fn new(config: Config, flow: F, detector: D, ids: IdGenerator) -> Result<Self> {
        config.validate()?;
        info!(
            "tracking session: K = {}, search radius = {}",
            config.max_occlusions, config.search_radius
        );
        Ok(Self {
            buffer: FrameBuffer::new(config.max_occlusions),
            config,
            flow,
            detector,
            constraint: Box::new(Unconstrained),
            ids,
            trajectories: vec![],
            search: None,
            time: 0,
            record: TrackingRecord::new(Utc::now()),
        })
    }

    pub fn with_constraint(mut self, constraint: Box<dyn GeometricConstraint>) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn time(&self) -> usize {
        self.time
    }

    pub fn active(&self) -> impl Iterator<Item = &Trajectory> {
        self.trajectories.iter()
    }

    /// Trajectories finalized so far.
    pub fn record(&self) -> &TrackingRecord {
        &self.record
    }

    #[instrument(level = "debug", skip_all, fields(time = self.time))]
    pub fn process_frame(&mut self, image: &Image) -> Result<FrameStats> {
        if image.is_empty() {
            bail!("empty image at time {}", self.time);
        }
        let time = self.time;
        let levels = self
            .config
            .lk_levels
            .min(Pyramid::max_levels(image.width, image.height));
        let frame = Frame::new(image, levels, self.buffer.take_spare())?;

        let mut buckets = self.predict(time);
        let tracked = self.measure(time, &frame, &mut buckets)?;
        let detections = self.detector.detect(&frame.image)?;

        let mut stats = self.correct(time, frame, &buckets, detections);
        stats.tracked = tracked;
        debug!(
            detections = stats.detections,
            tracked = stats.tracked,
            extended = stats.extended,
            expired = stats.expired,
            persisted = stats.persisted,
            spawned = stats.spawned,
            active = stats.active,
            "frame processed"
        );
        Ok(stats)
    }

    /// Count a frame that could not be processed. Trajectories see it as a
    /// frame without a sighting, so node times keep matching frame indices.
    pub fn skip_frame(&mut self) {
        debug!("skipping frame {}", self.time);
        self.time += 1;
    }

    /// Correspondences of the live trajectories, bucketed by occlusion depth.
    /// Trajectories at depth K or more get none and are dropped on commit.
    fn predict(&self, time: usize) -> Vec<Vec<Correspondence>> {
        let k = self.config.max_occlusions;
        let mut buckets = vec![vec![]; k];
        for (i, trajectory) in self.trajectories.iter().enumerate() {
            let depth = trajectory.occlusion_depth(time);
            if depth < k {
                buckets[depth].push(trajectory.predict(time, TrajectoryHandle(i)));
            }
        }
        buckets
    }

    /// Run optical flow for each bucket from the frame its trajectories were
    /// last seen in. Returns the number of correspondences still valid.
    fn measure(
        &mut self,
        time: usize,
        frame: &Frame,
        buckets: &mut [Vec<Correspondence>],
    ) -> Result<usize> {
        let mut tracked = 0;
        for (depth, bucket) in buckets.iter_mut().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let prev = self.buffer.get(time, depth + 1)?;
            let seeds: Vec<_> = bucket.iter().map(|c| c.actual.point.position).collect();
            let guesses: Vec<_> = bucket.iter().map(|c| c.predicted.point.position).collect();
            let output = self.flow.flow(prev, frame, &seeds, &guesses)?;
            if output.len() != bucket.len() {
                warn!(
                    "flow returned {} points for {} seeds, missing ones count as lost",
                    output.len(),
                    bucket.len()
                );
            }
            for (i, correspondence) in bucket.iter_mut().enumerate() {
                match output.get(i) {
                    Some(result) => {
                        correspondence.predicted.point.position = result.point;
                        correspondence.status = result.status;
                    }
                    None => correspondence.status = 0,
                }
                if correspondence.is_valid() {
                    tracked += 1;
                }
            }
        }
        Ok(tracked)
    }

    /// Match measurements to detections, retire expired trajectories, start
    /// new ones and store the frame. Cannot fail.
    fn correct(
        &mut self,
        time: usize,
        frame: Frame,
        buckets: &[Vec<Correspondence>],
        detections: Vec<PointDetection>,
    ) -> FrameStats {
        let k = self.config.max_occlusions;
        let size = (frame.image.width, frame.image.height);
        let mut search = match self.search.take() {
            Some(search) if search.size() == size => search,
            _ => PointSearch::new(size.0, size.1, self.config.search_radius),
        };
        let mut stats = FrameStats {
            time,
            detections: detections.len(),
            ..FrameStats::default()
        };
        search.reset(detections.into_iter().map(PointData::unused).collect());

        for correspondence in buckets.iter().flatten().filter(|c| c.is_valid()) {
            let Some(index) = search.find_nearest(&correspondence.predicted.point) else {
                continue;
            };
            let point = search.point(index).point;
            let trajectory = &mut self.trajectories[correspondence.trajectory.0];
            if trajectory.update(
                point,
                time,
                self.constraint.as_ref(),
                self.config.static_threshold,
            ) {
                search.mark_used(index);
                stats.extended += 1;
            }
        }

        // handles are dead from here on
        let record = &mut self.record;
        self.trajectories.retain(|trajectory| {
            if trajectory.occlusion_depth(time) < k {
                return true;
            }
            stats.expired += 1;
            if trajectory.duration() > k {
                debug!("persist {}", trajectory);
                record.trajectories.push(TrajectoryRecord::from(trajectory));
                stats.persisted += 1;
            }
            false
        });

        for point in search.unused() {
            self.trajectories
                .push(Trajectory::new(self.ids.next_id(), *point, time));
            stats.spawned += 1;
        }
        stats.active = self.trajectories.len();

        self.search = Some(search);
        self.buffer.push(time, frame);
        self.time += 1;
        stats
    }

    /// Close the session. Remaining trajectories are kept under the same
    /// duration rule as expired ones.
    pub fn finish(self) -> TrackingRecord {
        let k = self.config.max_occlusions;
        let mut record = self.record;
        let before = record.trajectories.len();
        record.trajectories.extend(
            self.trajectories
                .iter()
                .filter(|t| t.duration() > k)
                .map(TrajectoryRecord::from),
        );
        info!(
            "session closed after {} frames: {} trajectories persisted ({} still active at close)",
            self.time,
            record.trajectories.len(),
            record.trajectories.len() - before
        );
        record
    }
}

impl<F: FlowEstimator, D: PointDetector> std::fmt::Display for TrackingSession<F, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "time {}: {} active, {} persisted",
            self.time,
            self.trajectories.len(),
            self.record.trajectories.len()
        )?;
        for trajectory in &self.trajectories {
            writeln!(f, "  {}", trajectory)?;
        }
        Ok(())
    }
}
