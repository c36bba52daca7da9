use anyhow::{ensure, Result};
use nalgebra as na;

use crate::config::Config;
use crate::frame::Frame;
use crate::image::*;
use crate::my_types::*;

type Range = [[i16; 2]; 2];

/// Displaced position of one seed point and whether it was found.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowPoint {
    pub point: Vector2d,
    /// 0 when the point was lost.
    pub status: u8,
}

/// Sparse optical flow between two frames.
pub trait FlowEstimator {
    /// Track every seed from `prev` into `curr`, starting from the matching
    /// initial guess. The output is index-aligned with `seeds`.
    fn flow(
        &mut self,
        prev: &Frame,
        curr: &Frame,
        seeds: &[Vector2d],
        guesses: &[Vector2d],
    ) -> Result<Vec<FlowPoint>>;
}

/// Pyramidal Lucas-Kanade
pub struct OpticalFlow {
    lk_iters: usize,
    lk_levels: usize,
    lk_win_size: usize,
    lk_term: f64,
    lk_min_eig: f64,
    ix: Matrixd,
    iy: Matrixd,
    it: Matrixd,
    grid: Matrixd,
}

impl OpticalFlow {
    pub fn new(config: &Config) -> Result<OpticalFlow> {
        let lk_win_size = config.lk_win_size;
        ensure!(lk_win_size % 2 == 1, "LK window size must be odd");

        Ok(OpticalFlow {
            lk_iters: config.lk_iters,
            lk_levels: config.lk_levels,
            lk_win_size,
            lk_term: config.lk_term,
            lk_min_eig: config.lk_min_eig,
            ix: na::DMatrix::zeros(lk_win_size, lk_win_size),
            iy: na::DMatrix::zeros(lk_win_size, lk_win_size),
            it: na::DMatrix::zeros(lk_win_size, lk_win_size),
            grid: na::DMatrix::zeros(lk_win_size, lk_win_size),
        })
    }

    /// ref http://robots.stanford.edu/cs223b04/algo_tracking.pdf
    fn process_point(
        &mut self,
        frame0: &Frame,
        frame1: &Frame,
        point0: Vector2d,
        point1_in: Vector2d,
    ) -> Option<Vector2d> {
        let lk_term2 = self.lk_term.powi(2);
        let r = (self.lk_win_size - 1) / 2;
        let levels = self
            .lk_levels
            .min(frame0.level_count())
            .min(frame1.level_count());

        // initial guess
        let mut g_init = (point1_in - point0) / u32::pow(2, levels as u32) as f64;
        let mut d = Vector2d::zeros();
        for level in (0..levels + 1).rev() {
            let level0 = frame0.get_image_at_level(level);
            let level1 = frame1.get_image_at_level(level);
            let u = point0 / u32::pow(2, level as u32) as f64;
            let range = integration_range(level0, u, r, 1)?;
            // compute the derivative
            scharr(level0, u, range, &mut self.ix, &mut self.iy, &mut self.grid);
            let gradient = spatial_gradient(&self.ix, &self.iy);
            let area = (self.ix.nrows() * self.ix.ncols()) as f64;
            if min_eigenvalue(&gradient) / area < self.lk_min_eig {
                return None;
            }
            let mut converged = false;
            let mut nu = Vector2d::zeros();
            for _ in 0..self.lk_iters {
                image_difference(range, r, &self.grid, &mut self.it, level1, u + g_init + nu)?;
                let eta = flow_vector(&gradient, &self.ix, &self.iy, &self.it)?;
                nu += eta;
                if eta.norm_squared() < lk_term2 {
                    converged = true;
                    break;
                }
            }

            d = nu;
            if !converged {
                return None;
            }
            if level > 0 {
                g_init = 2. * (g_init + d)
            }
        }

        Some(point0 + g_init + d)
    }
}

impl FlowEstimator for OpticalFlow {
    fn flow(
        &mut self,
        prev: &Frame,
        curr: &Frame,
        seeds: &[Vector2d],
        guesses: &[Vector2d],
    ) -> Result<Vec<FlowPoint>> {
        ensure!(
            seeds.len() == guesses.len(),
            "{} seeds but {} initial guesses",
            seeds.len(),
            guesses.len()
        );
        Ok(seeds
            .iter()
            .zip(guesses)
            .map(|(&seed, &guess)| match self.process_point(prev, curr, seed, guess) {
                Some(point) => FlowPoint { point, status: 1 },
                None => FlowPoint {
                    point: guess,
                    status: 0,
                },
            })
            .collect())
    }
}

fn flow_vector(gradient: &Matrix2d, ix: &Matrixd, iy: &Matrixd, it: &Matrixd) -> Option<Vector2d> {
    let mut b = Vector2d::zeros();

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            b[0] += it[(y, x)] * ix[(y, x)];
            b[1] += it[(y, x)] * iy[(y, x)];
        }
    }

    gradient.try_inverse().map(|inv_g| inv_g * b)
}

fn image_difference(
    prev_range: Range,
    r: usize,
    i0: &Matrixd,
    it: &mut Matrixd,
    level: &Image,
    center: Vector2d,
) -> Option<()> {
    let range = integration_range(level, center, r, 0)?;
    if range != prev_range {
        return None;
    }
    fill_grid(level, range, center, it);
    let shape = it.shape();
    *it *= -1.;
    *it += i0.view((1, 1), shape);
    Some(())
}

fn spatial_gradient(ix: &Matrixd, iy: &Matrixd) -> Matrix2d {
    assert_eq!(ix.nrows(), iy.nrows());
    assert_eq!(ix.ncols(), iy.ncols());

    let mut x2 = 0.;
    let mut y2 = 0.;
    let mut xy = 0.;

    for y in 0..iy.nrows() {
        for x in 0..ix.ncols() {
            x2 += ix[(y, x)] * ix[(y, x)];
            y2 += iy[(y, x)] * iy[(y, x)];
            xy += ix[(y, x)] * iy[(y, x)];
        }
    }

    Matrix2d::new(x2, xy, xy, y2)
}

/// Smaller eigenvalue of a symmetric 2x2 matrix
pub fn min_eigenvalue(m: &Matrix2d) -> f64 {
    let half_trace = 0.5 * (m[(0, 0)] + m[(1, 1)]);
    let half_diff = 0.5 * (m[(0, 0)] - m[(1, 1)]);
    half_trace - (half_diff * half_diff + m[(0, 1)] * m[(1, 0)]).sqrt()
}

/// ref https://theailearner.com/tag/scharr-operator/
fn scharr(
    level: &Image,
    center: Vector2d,
    range: Range,
    out_x: &mut Matrixd,
    out_y: &mut Matrixd,
    grid: &mut Matrixd,
) {
    let grange = [
        [range[0][0] - 1, range[0][1] + 1],
        [range[1][0] - 1, range[1][1] + 1],
    ];
    fill_grid(level, grange, center, grid);

    *out_x = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    *out_y = Matrixd::zeros(grid.nrows() - 2, grid.ncols() - 2);
    for y in 1..(grid.nrows() - 1) {
        for x in 1..(grid.ncols() - 1) {
            out_x[(y - 1, x - 1)] =
                (10. * grid[(y, x + 1)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y - 1, x + 1)]
                    - 10. * grid[(y, x - 1)]
                    - 3. * grid[(y + 1, x - 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
            out_y[(y - 1, x - 1)] =
                (10. * grid[(y + 1, x)] + 3. * grid[(y + 1, x + 1)] + 3. * grid[(y + 1, x - 1)]
                    - 10. * grid[(y - 1, x)]
                    - 3. * grid[(y - 1, x + 1)]
                    - 3. * grid[(y - 1, x - 1)])
                    / 32.;
        }
    }
}

fn fill_grid(level: &Image, range: Range, center: Vector2d, grid: &mut Matrixd) {
    *grid = na::DMatrix::zeros(
        (range[1][1] - range[1][0] + 1) as usize,
        (range[0][1] - range[0][0] + 1) as usize,
    );

    for (y_ind, y) in (range[1][0]..=range[1][1]).enumerate() {
        for (x_ind, x) in (range[0][0]..=range[0][1]).enumerate() {
            grid[(y_ind, x_ind)] = bilinear(level, center + Vector2d::new(x as f64, y as f64));
        }
    }
}

/// Returns closed range of integer steps that can be taken without going outside
/// the image borders. Returns None if the center point is outside the level
/// boundaries or no step fits.
fn integration_range(level: &Image, center: Vector2d, r: usize, padding: i16) -> Option<Range> {
    let r = r as i16;
    let mut range = [[0, 0], [0, 0]];
    for i in 0..2 {
        let s = if i == 0 { level.width } else { level.height };
        if s == 0 || !(center[i] >= 0. && center[i] <= (s - 1) as f64) {
            return None;
        }
        let n = center[i] as i16;
        let fract = if center[i].fract() > 0. { 1 } else { 0 };
        range[i] = [
            i16::max(-r, -n + padding),
            i16::min(r, s as i16 - n - padding - 1 - fract),
        ];
        if range[i][0] > range[i][1] {
            return None;
        }
    }
    Some(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(image: Image, lk_levels: usize) -> Frame {
        Frame::new(&image, lk_levels, None).unwrap()
    }

    /// Smooth blob centered at (cx, cy)
    fn blob_image(size: usize, cx: f64, cy: f64) -> Image {
        let mut image = Image::new(size, size);
        let sigma2 = 2. * 4f64.powi(2);
        for y in 0..size {
            for x in 0..size {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                image.set_value(x, y, (20. + 200. * (-d2 / sigma2).exp()).round() as u8);
            }
        }
        image
    }

    #[test]
    fn test_flow() {
        let image_size: i32 = 128;
        let mut image0 = Image::new(image_size as usize, image_size as usize);
        let mut image1 = image0.clone();

        let patch = Image {
            data: vec![
                44, 44, 44, 44, 44, 44, 44, 44, 44, 44, 55, 55, 55, 55, 55, 55, 55, 44, 44, 55, 77,
                77, 77, 77, 77, 55, 44, 44, 55, 77, 88, 88, 88, 77, 55, 44, 44, 55, 77, 88, 99, 88,
                77, 55, 44, 44, 55, 77, 88, 88, 88, 77, 55, 44, 44, 55, 77, 77, 77, 77, 77, 55, 44,
                44, 55, 55, 55, 55, 55, 55, 55, 44, 44, 44, 44, 44, 44, 44, 44, 44, 44,
            ],
            width: 9,
            height: 9,
        };

        // Place the patch at different positions in the two images.
        let x: i32 = 60;
        let y: i32 = 60;
        let dx: i32 = -2;
        let dy: i32 = 1;
        image0.set_sub_image_i32(x, y, &patch);
        image1.set_sub_image_i32(x + dx, y + dy, &patch);

        let config = Config {
            lk_levels: 1,
            ..Config::default()
        };
        let frame0 = make_frame(image0, config.lk_levels);
        let frame1 = make_frame(image1, config.lk_levels);

        // Place the point at center of the first patch.
        let r = (patch.width - 1) as i32 / 2;
        let point0 = Vector2d::new((x + r) as f64, (y + r) as f64);
        // start from the exact displacement
        let guess = point0 + Vector2d::new(dx as f64, dy as f64);

        let mut flow = OpticalFlow::new(&config).unwrap();
        let result = flow.flow(&frame0, &frame1, &[point0], &[guess]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].status, 1);
        let err = (result[0].point - point0) - Vector2d::new(dx as f64, dy as f64);
        assert!(err.norm() < 0.5, "optical flow err {}", err.norm());
    }

    #[test]
    fn test_flow_smooth_shift() {
        let config = Config {
            lk_levels: 2,
            ..Config::default()
        };
        let frame0 = make_frame(blob_image(64, 32., 32.), config.lk_levels);
        let frame1 = make_frame(blob_image(64, 33.5, 31.), config.lk_levels);

        let mut flow = OpticalFlow::new(&config).unwrap();
        let seed = Vector2d::new(30., 30.);
        let result = flow.flow(&frame0, &frame1, &[seed], &[seed]).unwrap();
        assert_eq!(result[0].status, 1);
        let err = (result[0].point - seed) - Vector2d::new(1.5, -1.);
        assert!(err.norm() < 0.3, "optical flow err {}", err.norm());
    }

    #[test]
    fn test_flat_region_is_lost() {
        let config = Config::default();
        let frame0 = make_frame(Image::new(64, 64), config.lk_levels);
        let frame1 = make_frame(Image::new(64, 64), config.lk_levels);
        let mut flow = OpticalFlow::new(&config).unwrap();
        let seed = Vector2d::new(30., 30.);
        let guess = Vector2d::new(31., 30.);
        let result = flow.flow(&frame0, &frame1, &[seed], &[guess]).unwrap();
        assert_eq!(result[0].status, 0);
        assert_eq!(result[0].point, guess);

        // out of the image
        let result = flow
            .flow(&frame0, &frame1, &[Vector2d::new(-3., 5.)], &[seed])
            .unwrap();
        assert_eq!(result[0].status, 0);

        assert!(flow.flow(&frame0, &frame1, &[seed], &[]).is_err());
    }

    #[test]
    fn test_min_eigenvalue() {
        assert_eq!(min_eigenvalue(&Matrix2d::new(3., 0., 0., 5.)), 3.);
        assert!((min_eigenvalue(&Matrix2d::new(2., 1., 1., 2.)) - 1.).abs() < 1e-12);
    }

    #[test]
    fn test_scharr() {
        let mut image = Image {
            data: vec![
                0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            ],
            width: 5,
            height: 5,
        };

        let mut out_x = Matrixd::zeros(0, 0);
        let mut out_y = Matrixd::zeros(0, 0);
        let mut grid = Matrixd::zeros(0, 0);

        let center = Vector2d::new(2.0, 2.0);
        let range = integration_range(&image, center, 1, 1).unwrap();
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::zeros(3, 3));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::repeat(3, 3, 1.));
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));

        image.data = vec![
            0, 1, 2, 3, 4, 1, 2, 3, 4, 5, 2, 3, 4, 5, 6, 3, 4, 5, 6, 7, 4, 5, 6, 7, 8,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        assert_eq!(out_x, na::DMatrix::repeat(3, 3, 1.));
        assert_eq!(out_y, na::DMatrix::repeat(3, 3, 1.));

        image.data = vec![
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
            0, 0, 5, 0, 0,
        ];
        scharr(&image, center, range, &mut out_x, &mut out_y, &mut grid);
        let answer_x = Matrixd::from_row_slice(
            3,
            3,
            &[
                2.5, 0., -2.5,
                2.5, 0., -2.5,
                2.5, 0., -2.5,
            ],
        );
        assert_eq!(out_x, answer_x);
        assert_eq!(out_y, na::DMatrix::zeros(3, 3));
    }

    #[test]
    fn test_integration_range() {
        // Width and height are pixels. Coordinate (0, 0) means center of top-left
        // pixel. Thus (9, 9) is the center of the bottom-right pixel for 10x10
        // image.
        let image = Image {
            data: vec![],
            width: 10,
            height: 10,
        };
        let range = |x, y, padding| integration_range(&image, Vector2d::new(x, y), 3, padding);
        assert_eq!(range(4.5, 4.5, 0), Some([[-3, 3], [-3, 3]]));
        assert_eq!(range(1.5, 2.5, 0), Some([[-1, 3], [-2, 3]]));
        assert_eq!(range(1.0, 2.0, 0), Some([[-1, 3], [-2, 3]]));
        assert_eq!(range(0.9, 1.9, 0), Some([[0, 3], [-1, 3]]));
        assert_eq!(range(0.9, 1.9, 1), Some([[1, 3], [0, 3]]));
        assert_eq!(range(8.5, 2.0, 0), Some([[-3, 0], [-2, 3]]));
        assert_eq!(range(9.5, 2.0, 0), None);
    }
}
