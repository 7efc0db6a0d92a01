use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use image::RgbImage;
use log::debug;

use super::VideoDecoder;
use crate::error::{Error, Result};

/// A container video decoded with FFmpeg. Frames are decoded in order;
/// reading an earlier frame than the last one reopens the file.
pub struct FfmpegVideo {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: usize,

    // index of the next frame the decoder will produce
    cursor: usize,
    flushed: bool,
}

impl FfmpegVideo {
    pub fn open(path: &Path) -> Result<Self> {
        let mut video = Self::open_stream(path, 0)?;
        if video.frame_count == 0 {
            video.frame_count = Self::count_frames(path)?;
        }
        debug!(
            "Opened {}: {}x{}, {} frames",
            path.display(),
            video.decoder.width(),
            video.decoder.height(),
            video.frame_count
        );
        Ok(video)
    }

    fn open_stream(path: &Path, frame_count: usize) -> Result<Self> {
        ffmpeg::init()?;

        let input = ffmpeg::format::input(&path)?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| Error::Decode {
                path: path.to_path_buf(),
                message: "no video stream found".to_string(),
            })?;
        let stream_index = stream.index();
        let reported = usize::try_from(stream.frames()).unwrap_or(0);

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )?;

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: if frame_count > 0 { frame_count } else { reported },
            cursor: 0,
            flushed: false,
        })
    }

    // containers without a frame count in the header are decoded once
    fn count_frames(path: &Path) -> Result<usize> {
        let mut video = Self::open_stream(path, 0)?;
        let mut count = 0;
        while video.next_decoded()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    // sends the next packet of our stream, or end of stream
    fn feed(&mut self) -> Result<()> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => {
                    self.decoder.send_packet(&packet)?;
                    return Ok(());
                }
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof()?;
                    self.flushed = true;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn next_decoded(&mut self) -> Result<Option<ffmpeg::frame::Video>> {
        loop {
            let mut decoded = ffmpeg::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    self.cursor += 1;
                    return Ok(Some(decoded));
                }
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                    if self.flushed {
                        return Ok(None);
                    }
                    self.feed()?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn to_rgb(&mut self, decoded: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler.run(decoded, &mut rgb)?;

        let (width, height) = (rgb.width(), rgb.height());
        let row_len = width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);

        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            pixels.extend_from_slice(&data[row * stride..row * stride + row_len]);
        }

        RgbImage::from_raw(width, height, pixels).ok_or_else(|| Error::Decode {
            path: self.path.clone(),
            message: "frame buffer does not match its size".to_string(),
        })
    }
}

impl VideoDecoder for FfmpegVideo {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn read_frame(&mut self, index: usize) -> Result<Option<RgbImage>> {
        if index < self.cursor {
            let path = self.path.clone();
            *self = Self::open_stream(&path, self.frame_count)?;
        }

        while self.cursor < index {
            if self.next_decoded()?.is_none() {
                return Ok(None);
            }
        }

        match self.next_decoded()? {
            Some(decoded) => self.to_rgb(&decoded).map(Some),
            None => Ok(None),
        }
    }
}
