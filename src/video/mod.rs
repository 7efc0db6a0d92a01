//! Frame access for the clip formats the dataset may contain, and the
//! sampler that turns a clip into a fixed-length frame sequence.

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod frame_dir;
mod gif;
mod sampler;

use std::path::Path;

use image::RgbImage;

use crate::error::{Error, Result};

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegVideo;
pub use frame_dir::FrameDirectory;
pub use gif::GifFrames;
pub use sampler::FrameSampler;

/// Random access to the frames of one clip. Dropping the decoder releases
/// the underlying file.
pub trait VideoDecoder {
    /// Number of frames the container reports.
    fn frame_count(&self) -> usize;

    /// Decodes frame `index`, `None` when the clip ends before it.
    fn read_frame(&mut self, index: usize) -> Result<Option<RgbImage>>;
}

/// Picks a decoder from the path: a directory is a clip of still frames,
/// `.gif` is decoded in-process, anything else needs FFmpeg.
pub fn open_video(path: &Path) -> Result<Box<dyn VideoDecoder>> {
    if path.is_dir() {
        return Ok(Box::new(FrameDirectory::open(path)?));
    }

    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("gif") => Ok(Box::new(GifFrames::open(path)?)),
        #[cfg(feature = "ffmpeg")]
        Some(_) => Ok(Box::new(FfmpegVideo::open(path)?)),
        _ => Err(Error::UnsupportedVideo(path.to_path_buf())),
    }
}
