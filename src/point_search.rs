//! Uniform grid over the image for nearest-unused-point queries.
//!
//! Cells are `ceil(radius)` pixels wide, so any point within `radius` of a
//! query lies in the query's cell or one of its 8 neighbours.

use crate::feature::{PointData, PointDetection};

#[derive(Debug)]
pub struct PointSearch {
    width: usize,
    height: usize,
    radius2: f64,
    step: f64,
    rows: usize,
    cols: usize,
    /// `cols * rows` buckets of indices into `points`, column-major.
    cells: Vec<Vec<usize>>,
    points: Vec<PointData>,
}

impl PointSearch {
    pub fn new(width: usize, height: usize, radius: f64) -> Self {
        let step = radius.ceil().max(1.) as usize;
        let rows = 1 + height.saturating_sub(1) / step;
        let cols = 1 + width.saturating_sub(1) / step;
        Self {
            width,
            height,
            radius2: radius * radius,
            step: step as f64,
            rows,
            cols,
            cells: vec![vec![]; rows * cols],
            points: vec![],
        }
    }

    /// Image size the grid was built for, (width, height).
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Replace the indexed point set. Points outside the grid stay in the set
    /// (so they can still seed new trajectories) but are never matched.
    pub fn reset(&mut self, points: Vec<PointData>) {
        for cell in self.cells.iter_mut() {
            cell.clear();
        }
        self.points = points;
        for (i, p) in self.points.iter().enumerate() {
            if let Some((col, row)) = self.cell_of(&p.point) {
                self.cells[col * self.rows + row].push(i);
            }
        }
    }

    /// Nearest unused point with the same octave within the search radius.
    ///
    /// Cells are scanned column by column (left to right, each top to bottom)
    /// and points in insertion order; on equal distances the first one wins.
    pub fn find_nearest(&self, query: &PointDetection) -> Option<usize> {
        let (col, row) = self.raw_cell(query)?;
        // no neighbourhood overlaps the grid
        let (cols, rows) = (self.cols as i64, self.rows as i64);
        if col < -1 || row < -1 || col > cols || row > rows {
            return None;
        }
        let min_col = (col - 1).max(0);
        let max_col = (col + 1).min(self.cols as i64 - 1);
        let min_row = (row - 1).max(0);
        let max_row = (row + 1).min(self.rows as i64 - 1);

        let mut best: Option<(usize, f64)> = None;
        for c in min_col..=max_col {
            for r in min_row..=max_row {
                for &i in &self.cells[c as usize * self.rows + r as usize] {
                    let p = &self.points[i];
                    if p.used || p.point.octave != query.octave {
                        continue;
                    }
                    let d = query.distance2(&p.point);
                    if best.map_or(true, |(_, best_d)| d < best_d) {
                        best = Some((i, d));
                    }
                }
            }
        }

        match best {
            Some((i, d)) if d <= self.radius2 => Some(i),
            _ => None,
        }
    }

    pub fn point(&self, index: usize) -> &PointData {
        &self.points[index]
    }

    pub fn mark_used(&mut self, index: usize) {
        self.points[index].used = true;
    }

    pub fn unused(&self) -> impl Iterator<Item = &PointDetection> {
        self.points.iter().filter(|p| !p.used).map(|p| &p.point)
    }

    fn raw_cell(&self, point: &PointDetection) -> Option<(i64, i64)> {
        let (x, y) = (point.position.x, point.position.y);
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        Some(((x / self.step).floor() as i64, (y / self.step).floor() as i64))
    }

    fn cell_of(&self, point: &PointDetection) -> Option<(usize, usize)> {
        let (col, row) = self.raw_cell(point)?;
        if col < 0 || row < 0 || col >= self.cols as i64 || row >= self.rows as i64 {
            return None;
        }
        Some((col as usize, row as usize))
    }
}
