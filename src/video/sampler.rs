use std::path::Path;

use image::imageops::{self, FilterType};
use log::debug;

use super::{open_video, VideoDecoder};
use crate::{
    error::{Error, Result},
    vol::Vol,
};

/// Extracts `sequence_length` evenly spaced frames from a clip, each
/// resized to `image_size` x `image_size` and scaled to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    sequence_length: usize,
    image_size: u32,
}

impl FrameSampler {
    pub fn new(sequence_length: usize, image_size: usize) -> Result<Self> {
        if sequence_length == 0 {
            return Err(Error::Config("sequence length must be at least 1".to_string()));
        }
        let image_size = u32::try_from(image_size)
            .ok()
            .filter(|&size| size > 0)
            .ok_or_else(|| Error::Config(format!("invalid image size {image_size}")))?;

        Ok(Self {
            sequence_length,
            image_size,
        })
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn image_size(&self) -> usize {
        self.image_size as usize
    }

    /// Distance between two sampled frames, never below one.
    pub fn skip_interval(&self, total_frames: usize) -> usize {
        (total_frames / self.sequence_length).max(1)
    }

    pub fn frame_indices(&self, total_frames: usize) -> Vec<usize> {
        let skip = self.skip_interval(total_frames);
        (0..self.sequence_length).map(|i| i * skip).collect()
    }

    pub fn sample(&self, path: &Path) -> Result<Vol> {
        let mut decoder = open_video(path)?;
        self.sample_from(decoder.as_mut(), path)
    }

    /// A clip either yields every requested frame or fails with
    /// [`Error::InsufficientFrames`]; sequences are never padded.
    pub fn sample_from(&self, decoder: &mut dyn VideoDecoder, path: &Path) -> Result<Vol> {
        let total = decoder.frame_count();
        if total < self.sequence_length {
            return Err(Error::InsufficientFrames {
                path: path.to_path_buf(),
                needed: self.sequence_length,
                available: total,
            });
        }

        let mut frames = Vec::with_capacity(self.sequence_length);
        for index in self.frame_indices(total) {
            let Some(frame) = decoder.read_frame(index)? else {
                return Err(Error::InsufficientFrames {
                    path: path.to_path_buf(),
                    needed: self.sequence_length,
                    available: frames.len(),
                });
            };
            frames.push(imageops::resize(
                &frame,
                self.image_size,
                self.image_size,
                FilterType::Triangle,
            ));
        }

        debug!(
            "sampled {} of {total} frames from {}",
            frames.len(),
            path.display()
        );
        Ok(Vol::from_rgb_frames(&frames))
    }
}
