use std::path::{Path, PathBuf};

use anyhow::{bail, Context as AnyhowContext, Result};
use log::{debug, info};

use crate::image::Image;

/// Sequential supplier of grayscale frames.
pub trait FrameSource {
    /// `Ok(None)` at the end of the stream. An error only concerns the
    /// current frame; the caller may keep reading.
    fn next_frame(&mut self) -> Result<Option<Image>>;

    /// Total number of frames, when known.
    fn length(&self) -> Option<u64> {
        None
    }
}

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "pgm", "tif", "tiff"];

/// Image files of a directory, in file name order.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn new(dir: &Path) -> Result<ImageSequence> {
        let mut paths = vec![];
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to open image directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            bail!("No image files in {}", dir.display());
        }
        paths.sort();
        info!("found {} frames in {}", paths.len(), dir.display());
        Ok(ImageSequence { paths, next: 0 })
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Image>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        debug!("reading {}", path.display());
        let gray = ::image::open(path)
            .with_context(|| format!("Failed to decode {}", path.display()))?
            .to_luma8();
        let (width, height) = gray.dimensions();
        Ok(Some(Image::from_raw(
            width as usize,
            height as usize,
            gray.into_raw(),
        )?))
    }

    fn length(&self) -> Option<u64> {
        Some(self.paths.len() as u64)
    }
}

#[cfg(feature = "opencv")]
pub use video::VideoInput;

#[cfg(feature = "opencv")]
mod video {
    use std::path::Path;

    use anyhow::{bail, Context as AnyhowContext, Result};
    use cv2::prelude::*;
    use log::info;
    use opencv as cv2;

    use super::FrameSource;
    use crate::image::Image;

    pub struct VideoInput {
        capture: cv2::videoio::VideoCapture,
        frame: cv2::core::Mat,
        gray: cv2::core::Mat,
        length: Option<u64>,
    }

    impl VideoInput {
        pub fn new(path: &Path) -> Result<VideoInput> {
            let path_str = path
                .to_str()
                .with_context(|| format!("Video path is not valid UTF-8: {}", path.display()))?;
            let capture = cv2::videoio::VideoCapture::from_file(path_str, cv2::videoio::CAP_ANY)
                .with_context(|| format!("Failed to open video {}", path.display()))?;
            if !capture.is_opened()? {
                bail!("Failed to open video {}", path.display());
            }
            let count = capture.get(cv2::videoio::CAP_PROP_FRAME_COUNT)?;
            let length = if count > 0. { Some(count as u64) } else { None };
            info!("opened video {} ({:?} frames)", path.display(), length);
            Ok(VideoInput {
                capture,
                frame: cv2::core::Mat::default(),
                gray: cv2::core::Mat::default(),
                length,
            })
        }
    }

    impl FrameSource for VideoInput {
        fn next_frame(&mut self) -> Result<Option<Image>> {
            if !self.capture.read(&mut self.frame)? || self.frame.empty() {
                return Ok(None);
            }
            if self.frame.channels() == 1 {
                self.frame.copy_to(&mut self.gray)?;
            } else {
                cv2::imgproc::cvt_color(
                    &self.frame,
                    &mut self.gray,
                    cv2::imgproc::COLOR_BGR2GRAY,
                    0,
                )?;
            }
            cv_8u_to_grayscale(&self.gray)
        }

        fn length(&self) -> Option<u64> {
            self.length
        }
    }

    fn cv_8u_to_grayscale(mat: &cv2::core::Mat) -> Result<Option<Image>> {
        let size = mat.size()?;
        let mut data = Vec::with_capacity((size.width * size.height) as usize);
        for y in 0..size.height {
            data.extend_from_slice(mat.at_row::<u8>(y)?);
        }
        Ok(Some(Image::from_raw(
            size.width as usize,
            size.height as usize,
            data,
        )?))
    }
}

/// Open `path` as an image directory, or as a video file when built with OpenCV.
pub fn open(path: &Path) -> Result<Box<dyn FrameSource>> {
    if path.is_dir() {
        return Ok(Box::new(ImageSequence::new(path)?));
    }
    if !path.exists() {
        bail!("Input source {} does not exist", path.display());
    }
    open_video(path)
}

#[cfg(feature = "opencv")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(VideoInput::new(path)?))
}

#[cfg(not(feature = "opencv"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    bail!(
        "Cannot decode video {}: built without the `opencv` feature, pass an image directory",
        path.display()
    )
}
