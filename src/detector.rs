//! Interest point detection.
//!
//! Shi-Tomasi corners: the smaller eigenvalue of the gradient structure tensor
//! over a small block, thresholded relative to the strongest response, with
//! 3x3 non-maximum suppression and a minimum distance between accepted points.

use anyhow::Result;

use crate::config::Config;
use crate::feature::PointDetection;
use crate::image::Image;
use crate::my_types::*;
use crate::optical_flow::min_eigenvalue;

/// All detections are made on the full resolution image.
pub const DETECTION_OCTAVE: i32 = 1;

/// Structure tensor block size.
const BLOCK_SIZE: usize = 3;

pub trait PointDetector {
    fn detect(&mut self, image: &Image) -> Result<Vec<PointDetection>>;
}

pub struct Detector {
    max_points: usize,
    quality_level: f64,
    min_distance: f64,
    /// per-pixel response, reused between frames
    response: Vec<f64>,
}

impl Detector {
    pub fn new(config: &Config) -> Self {
        Detector {
            max_points: config.max_points,
            quality_level: config.quality_level,
            min_distance: config.min_distance,
            response: vec![],
        }
    }

    fn compute_response(&mut self, image: &Image) {
        let (w, h) = (image.width, image.height);
        self.response.clear();
        self.response.resize(w * h, 0.);

        // Sobel gradients, zero on the 1 pixel border
        let mut dx = vec![0.; w * h];
        let mut dy = vec![0.; w * h];
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let v = |x: usize, y: usize| image.value(x, y) as f64;
                dx[y * w + x] = (v(x + 1, y - 1) + 2. * v(x + 1, y) + v(x + 1, y + 1)
                    - v(x - 1, y - 1)
                    - 2. * v(x - 1, y)
                    - v(x - 1, y + 1))
                    / 8.;
                dy[y * w + x] = (v(x - 1, y + 1) + 2. * v(x, y + 1) + v(x + 1, y + 1)
                    - v(x - 1, y - 1)
                    - 2. * v(x, y - 1)
                    - v(x + 1, y - 1))
                    / 8.;
            }
        }

        let r = BLOCK_SIZE / 2;
        for y in (1 + r)..(h - 1 - r) {
            for x in (1 + r)..(w - 1 - r) {
                let (mut xx, mut xy, mut yy) = (0., 0., 0.);
                for by in (y - r)..=(y + r) {
                    for bx in (x - r)..=(x + r) {
                        let gx = dx[by * w + bx];
                        let gy = dy[by * w + bx];
                        xx += gx * gx;
                        xy += gx * gy;
                        yy += gy * gy;
                    }
                }
                self.response[y * w + x] = min_eigenvalue(&Matrix2d::new(xx, xy, xy, yy)).max(0.);
            }
        }
    }

    fn is_local_maximum(&self, image: &Image, x: usize, y: usize) -> bool {
        let w = image.width;
        let value = self.response[y * w + x];
        for ny in y.saturating_sub(1)..=(y + 1).min(image.height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                if self.response[ny * w + nx] > value {
                    return false;
                }
            }
        }
        true
    }
}

impl PointDetector for Detector {
    fn detect(&mut self, image: &Image) -> Result<Vec<PointDetection>> {
        let (w, h) = (image.width, image.height);
        // need room for the gradient border and one block
        if w < BLOCK_SIZE + 2 || h < BLOCK_SIZE + 2 || self.max_points == 0 {
            return Ok(vec![]);
        }
        self.compute_response(image);

        let max_response = self.response.iter().cloned().fold(0., f64::max);
        if max_response <= 0. {
            return Ok(vec![]);
        }
        let threshold = self.quality_level * max_response;

        let mut candidates = vec![];
        for y in 0..h {
            for x in 0..w {
                let value = self.response[y * w + x];
                if value > 0. && value >= threshold && self.is_local_maximum(image, x, y) {
                    candidates.push((value, x, y));
                }
            }
        }
        // strongest first, ties in raster order
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then((a.2, a.1).cmp(&(b.2, b.1))));

        // accepted points bucketed in cells of min_distance, as in the point search grid
        let cell = self.min_distance.max(1.);
        let cols = (w as f64 / cell).ceil() as usize;
        let rows = (h as f64 / cell).ceil() as usize;
        let mut grid: Vec<Vec<Vector2d>> = vec![vec![]; cols * rows];
        let min_distance2 = self.min_distance * self.min_distance;

        let mut points = vec![];
        for (_, x, y) in candidates {
            let p = Vector2d::new(x as f64, y as f64);
            let (col, row) = ((p.x / cell) as usize, (p.y / cell) as usize);
            let mut too_close = false;
            'search: for c in col.saturating_sub(1)..=(col + 1).min(cols - 1) {
                for r in row.saturating_sub(1)..=(row + 1).min(rows - 1) {
                    if grid[c * rows + r]
                        .iter()
                        .any(|q| (q - p).norm_squared() < min_distance2)
                    {
                        too_close = true;
                        break 'search;
                    }
                }
            }
            if too_close {
                continue;
            }
            grid[col * rows + row].push(p);
            points.push(PointDetection {
                position: p,
                octave: DETECTION_OCTAVE,
            });
            if points.len() >= self.max_points {
                break;
            }
        }
        Ok(points)
    }
}
