use anyhow::{bail, Result};

use crate::my_types::*;

/// Row-major grayscale image storage
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl Image {
    /// Create an empty image
    pub fn empty() -> Image {
        Image {
            data: vec![],
            width: 0,
            height: 0,
        }
    }

    /// Create a black image of the given size
    pub fn new(width: usize, height: usize) -> Image {
        Image {
            data: vec![0; width * height],
            width,
            height,
        }
    }

    /// Wrap existing pixel data, checking its length
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Image> {
        if data.len() != width * height {
            bail!(
                "pixel buffer of length {} does not match a {} x {} image",
                data.len(),
                width,
                height
            );
        }
        Ok(Image {
            data,
            width,
            height,
        })
    }

    /// Clear the image storage
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline(always)]
    pub fn value(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[cfg(test)]
    #[inline(always)]
    pub fn value_i32(&self, x: i32, y: i32) -> u8 {
        self.data[y as usize * self.width + x as usize]
    }

    /// Pixel value with coordinates clamped to the image borders
    #[inline(always)]
    pub fn value_clamped(&self, x: i64, y: i64) -> u8 {
        let x = x.clamp(0, self.width as i64 - 1);
        let y = y.clamp(0, self.height as i64 - 1);
        self.value(x as usize, y as usize)
    }

    #[inline(always)]
    pub fn set_value(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Copy `patch` with its top-left corner at (x, y), skipping pixels that
    /// fall outside this image
    #[cfg(test)]
    pub fn set_sub_image_i32(&mut self, x: i32, y: i32, patch: &Image) {
        for py in 0..patch.height as i32 {
            for px in 0..patch.width as i32 {
                let (tx, ty) = (x + px, y + py);
                if tx < 0 || ty < 0 || tx >= self.width as i32 || ty >= self.height as i32 {
                    continue;
                }
                self.set_value(tx as usize, ty as usize, patch.value_i32(px, py));
            }
        }
    }
}

/// Bilinear interpolation at a sub-pixel position. Coordinate (0, 0) is the
/// center of the top-left pixel. The position must lie inside the image.
pub fn bilinear(image: &Image, p: Vector2d) -> f64 {
    let x0 = p.x.floor();
    let y0 = p.y.floor();
    let ax = p.x - x0;
    let ay = p.y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let v = |x: i64, y: i64| image.value_clamped(x, y) as f64;
    (1. - ay) * ((1. - ax) * v(x0, y0) + ax * v(x0 + 1, y0))
        + ay * ((1. - ax) * v(x0, y0 + 1) + ax * v(x0 + 1, y0 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear() {
        let image = Image::from_raw(2, 2, vec![0, 10, 20, 30]).unwrap();
        assert_eq!(bilinear(&image, Vector2d::new(0., 0.)), 0.);
        assert_eq!(bilinear(&image, Vector2d::new(1., 1.)), 30.);
        assert_eq!(bilinear(&image, Vector2d::new(0.5, 0.)), 5.);
        assert_eq!(bilinear(&image, Vector2d::new(0.5, 0.5)), 15.);
    }

    #[test]
    fn test_set_sub_image() {
        let mut image = Image::new(4, 4);
        let patch = Image::from_raw(2, 2, vec![1, 2, 3, 4]).unwrap();
        image.set_sub_image_i32(3, -1, &patch);
        assert_eq!(image.value(3, 0), 3);
        assert_eq!(image.data.iter().filter(|&&v| v != 0).count(), 1);
    }

    #[test]
    fn test_from_raw_checks_length() {
        assert!(Image::from_raw(3, 3, vec![0; 8]).is_err());
    }
}
