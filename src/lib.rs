//! Video action recognition: sample fixed-length frame sequences from
//! labeled clips and train a ConvLSTM or LRCN classifier on them.

pub mod config;
pub mod dataset;
pub mod early_stopping;
pub mod error;
pub mod fit;
pub mod layers;
pub mod models;
pub mod net;
pub mod pipeline;
pub mod trainer;
pub mod utils;
pub mod video;
pub mod vol;

pub use config::*;
pub use dataset::*;
pub use early_stopping::EarlyStopping;
pub use error::{Error, Result};
pub use fit::*;
pub use models::*;
pub use net::*;
pub use pipeline::*;
pub use trainer::*;
pub use vol::*;

pub type Float = f32;
