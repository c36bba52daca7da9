use anyhow::{bail, Result};

use crate::image::Image;
use crate::pyramid::Pyramid;

#[derive(Debug)]
pub struct Frame {
    /// original image
    pub image: Image,
    /// downsized images
    pub pyramid: Pyramid,
}

impl Frame {
    /// Build a frame and its pyramid. Storage of `unused_frame` is reused when given.
    pub fn new(image: &Image, lk_levels: usize, unused_frame: Option<Frame>) -> Result<Frame> {
        let mut frame = if let Some(mut unused_frame) = unused_frame {
            // Move data buffer from old unused frame to the new frame to avoid allocation
            unused_frame.image.clear();
            unused_frame
        } else {
            Frame {
                image: Image::empty(),
                pyramid: Pyramid::empty(),
            }
        };

        frame.image.data.extend(image.data.iter());
        frame.image.width = image.width;
        frame.image.height = image.height;
        frame.pyramid.compute(&frame.image, lk_levels)?;

        Ok(frame)
    }

    pub fn get_image_at_level(&self, level: usize) -> &Image {
        if level == 0 {
            &self.image
        } else {
            &self.pyramid.levels[level - 1]
        }
    }

    pub fn level_count(&self) -> usize {
        self.pyramid.levels.len()
    }
}

/// The last `capacity` frames, stored at slot `time % capacity`.
#[derive(Debug)]
pub struct FrameBuffer {
    slots: Vec<Option<(usize, Frame)>>,
    /// Last evicted frame, kept for storage reuse.
    spare: Option<Frame>,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            spare: None,
        }
    }

    pub fn push(&mut self, time: usize, frame: Frame) {
        let slot = time % self.slots.len();
        if let Some((_, evicted)) = self.slots[slot].replace((time, frame)) {
            self.spare = Some(evicted);
        }
    }

    /// The frame captured `age` frames before `time`. Fails if that frame was
    /// never written or has already been overwritten.
    pub fn get(&self, time: usize, age: usize) -> Result<&Frame> {
        if age == 0 || age > self.slots.len() || age > time {
            bail!("no buffered frame {age} frames before time {time}");
        }
        let wanted = time - age;
        match &self.slots[wanted % self.slots.len()] {
            Some((stored, frame)) if *stored == wanted => Ok(frame),
            _ => bail!("frame buffer slot for time {wanted} is not written"),
        }
    }

    pub fn take_spare(&mut self) -> Option<Frame> {
        self.spare.take()
    }
}
