use std::{
    fs,
    path::{Path, PathBuf},
};

use image::RgbImage;

use super::VideoDecoder;
use crate::error::Result;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// A clip stored as one image file per frame; frames are ordered by file
/// name and only decoded when read.
pub struct FrameDirectory {
    frames: Vec<PathBuf>,
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.as_str()))
}

impl FrameDirectory {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut frames = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_frame(&path) {
                frames.push(path);
            }
        }
        frames.sort();
        Ok(Self { frames })
    }
}

impl VideoDecoder for FrameDirectory {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&mut self, index: usize) -> Result<Option<RgbImage>> {
        let Some(path) = self.frames.get(index) else {
            return Ok(None);
        };
        Ok(Some(image::open(path)?.to_rgb8()))
    }
}
