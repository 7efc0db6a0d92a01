use std::{fs::File, io::BufReader, path::Path};

use image::{codecs::gif::GifDecoder, AnimationDecoder, DynamicImage, RgbImage};

use super::VideoDecoder;
use crate::error::Result;

/// An animated GIF, fully decoded when opened. Each frame is composited
/// onto the canvas, transparency is dropped.
pub struct GifFrames {
    frames: Vec<RgbImage>,
}

impl GifFrames {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let frames = GifDecoder::new(reader)?.into_frames().collect_frames()?;
        let frames = frames
            .into_iter()
            .map(|frame| DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8())
            .collect();
        Ok(Self { frames })
    }
}

impl VideoDecoder for GifFrames {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&mut self, index: usize) -> Result<Option<RgbImage>> {
        Ok(self.frames.get(index).cloned())
    }
}
