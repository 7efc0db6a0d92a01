use std::{fmt, str::FromStr};

use log::info;
use rand::Rng;

use crate::{
    dataset::ClassLabels,
    error::{Error, Result},
    layers::PoolPadding,
    net::{Activation, EndLayer, Layer, Net},
};

/// The two supported video classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ModelKind {
    /// Stacked convolutional LSTMs over the raw frames.
    #[serde(rename = "convLSTM")]
    ConvLstm,
    /// A per-frame CNN feeding an LSTM.
    #[default]
    #[serde(rename = "LRCN")]
    Lrcn,
}

const CONV_LSTM_FILTERS: [usize; 4] = [4, 8, 14, 16];
const LRCN_BLOCKS: [(usize, usize); 4] = [(16, 4), (32, 4), (64, 2), (64, 2)];

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::ConvLstm => "convLSTM",
            ModelKind::Lrcn => "LRCN",
        }
    }

    /// Hidden layers for clips of `sequence_length` frames of
    /// `image_size` squared RGB pixels.
    pub fn layers(&self, sequence_length: usize, image_size: usize) -> Vec<Layer> {
        let mut layers = vec![Layer::Input {
            frames: sequence_length,
            width: image_size,
            height: image_size,
            depth: 3,
        }];

        match self {
            ModelKind::ConvLstm => {
                for (i, filters) in CONV_LSTM_FILTERS.into_iter().enumerate() {
                    layers.push(Layer::ConvLstm {
                        sx: 3,
                        filters,
                        recurrent_dropout: 0.2,
                    });
                    layers.push(Layer::Pool {
                        sx: 2,
                        stride: 2,
                        padding: PoolPadding::Same,
                    });
                    if i + 1 < CONV_LSTM_FILTERS.len() {
                        layers.push(Layer::Dropout { rate: 0.2 });
                    }
                }
            }
            ModelKind::Lrcn => {
                for (i, (filters, pool)) in LRCN_BLOCKS.into_iter().enumerate() {
                    layers.push(Layer::Conv {
                        sx: 3,
                        filters,
                        stride: 1,
                        padding: 1,
                        activation: Activation::Relu,
                    });
                    layers.push(Layer::Pool {
                        sx: pool,
                        stride: pool,
                        padding: PoolPadding::Valid,
                    });
                    if i + 1 < LRCN_BLOCKS.len() {
                        layers.push(Layer::Dropout { rate: 0.25 });
                    }
                }
                layers.push(Layer::Lstm { units: 32 });
            }
        }

        layers
    }

    /// Builds the untrained net. Fails with [`Error::Shape`] when the
    /// frames are too small for the topology.
    pub fn build<R: Rng + ?Sized>(
        &self,
        sequence_length: usize,
        image_size: usize,
        classes: &ClassLabels,
        rng: &mut R,
    ) -> Result<Net> {
        if classes.is_empty() {
            return Err(Error::Config("a model needs at least one class".to_string()));
        }

        let net = Net::new(
            &self.layers(sequence_length, image_size),
            EndLayer::Softmax {
                classes: classes.len(),
            },
            rng,
        )?;
        info!("{self} created successfully");
        Ok(net)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("convlstm") {
            Ok(ModelKind::ConvLstm)
        } else if s.eq_ignore_ascii_case("lrcn") {
            Ok(ModelKind::Lrcn)
        } else {
            Err(Error::UnknownModel(s.to_string()))
        }
    }
}
