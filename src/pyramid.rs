use anyhow::{bail, Result};

use crate::image::Image;

#[derive(Debug)]
pub struct Pyramid {
    /// Level i holds the image downscaled by 2^(i+1).
    pub levels: Vec<Image>,
}

impl Pyramid {
    pub fn empty() -> Self {
        Self { levels: vec![] }
    }

    /// Number of times an image of this size can be halved.
    pub fn max_levels(width: usize, height: usize) -> usize {
        let (mut w, mut h, mut n) = (width, height, 0);
        while w >= 2 && h >= 2 {
            w /= 2;
            h /= 2;
            n += 1;
        }
        n
    }

    pub fn compute(&mut self, frame: &Image, level_count: usize) -> Result<()> {
        self.levels.truncate(level_count);
        while self.levels.len() < level_count {
            self.levels.push(Image::empty())
        }
        if level_count == 0 {
            return Ok(());
        }
        downscale(frame, &mut self.levels[0])?;
        for i in 0..(level_count - 1) {
            let rest = &mut self.levels[i..];
            // parent is level i, rest[0] is level i + 1
            if let Some((parent, rest)) = rest.split_first_mut() {
                downscale(parent, &mut rest[0])?;
            }
        }
        Ok(())
    }
}

/// downscale the parent image and store the result in child. An odd trailing
/// row or column is dropped.
fn downscale(parent: &Image, child: &mut Image) -> Result<()> {
    let w = parent.width as i64;
    let h = parent.height as i64;
    if w < 2 || h < 2 {
        bail!("cannot downscale image with shape {w} x {h}");
    }

    let w_half = w / 2;
    let h_half = h / 2;
    child.data.clear();
    child.width = w_half as usize;
    child.height = h_half as usize;

    // prevent pixel out of bounds
    let v = |x: i64, y: i64| -> u16 { parent.value_clamped(x, y) as u16 };

    for y in 0..h_half {
        let y2 = 2 * y;
        for x in 0..w_half {
            let x2 = 2 * x;
            let value = v(x2, y2) / 4
                + (v(x2 + 1, y2) + v(x2 - 1, y2) + v(x2, y2 + 1) + v(x2, y2 - 1)) / 8
                + (v(x2 + 1, y2 + 1) + v(x2 - 1, y2 - 1) + v(x2 - 1, y2 + 1) + v(x2 + 1, y2 - 1))
                    / 16;
            child.data.push(value as u8);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_sizes() {
        let image = Image::new(64, 47);
        let mut pyramid = Pyramid::empty();
        pyramid.compute(&image, 3).unwrap();
        let sizes: Vec<_> = pyramid.levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(32, 23), (16, 11), (8, 5)]);

        // recompute with fewer levels reuses and trims storage
        pyramid.compute(&image, 1).unwrap();
        assert_eq!(pyramid.levels.len(), 1);
    }

    #[test]
    fn test_flat_image_stays_flat() {
        let mut image = Image::new(16, 16);
        image.data.iter_mut().for_each(|v| *v = 100);
        let mut pyramid = Pyramid::empty();
        pyramid.compute(&image, 2).unwrap();
        for level in &pyramid.levels {
            assert!(level.data.iter().all(|&v| v == 100));
        }
    }

    #[test]
    fn test_too_small() {
        let image = Image::new(4, 4);
        let mut pyramid = Pyramid::empty();
        assert_eq!(Pyramid::max_levels(4, 4), 2);
        assert!(pyramid.compute(&image, 2).is_ok());
        assert!(pyramid.compute(&image, 3).is_err());
    }
}
