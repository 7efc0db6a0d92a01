use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("could not decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("unsupported video format: {}", .0.display())]
    UnsupportedVideo(PathBuf),

    #[error("{} has {available} usable frames, {needed} required", path.display())]
    InsufficientFrames {
        path: PathBuf,
        needed: usize,
        available: usize,
    },

    #[error("unknown model type `{0}`, expected `convLSTM` or `LRCN`")]
    UnknownModel(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("dataset under {} contains no usable videos", .0.display())]
    EmptyDataset(PathBuf),

    #[error("{0} partition is empty")]
    EmptyPartition(&'static str),

    #[error("model serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "ffmpeg")]
    #[error("ffmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}
