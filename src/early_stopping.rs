use log::{debug, info};

use crate::{error::Result, net::Net, Float};

/// Watches the validation loss and decides when training stops making
/// progress. Keeps a copy of the weights from the best epoch.
pub struct EarlyStopping {
    patience: usize,
    restore_best_weights: bool,

    best_loss: Float,
    best_epoch: Option<usize>,
    best_weights: Option<Vec<Vec<Float>>>,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize, restore_best_weights: bool) -> Self {
        Self {
            patience,
            restore_best_weights,
            best_loss: Float::INFINITY,
            best_epoch: None,
            best_weights: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    /// Returns true when training should stop after `epoch`. When it does,
    /// the best weights seen so far are written back into `net`.
    pub fn on_epoch_end(&mut self, epoch: usize, val_loss: Float, net: &mut Net) -> Result<bool> {
        if val_loss < self.best_loss {
            debug!(
                "val_loss improved from {:.5} to {val_loss:.5}",
                self.best_loss
            );
            self.best_loss = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            if self.restore_best_weights {
                self.best_weights = Some(net.weights());
            }
            return Ok(false);
        }

        self.wait += 1;
        if self.wait < self.patience {
            return Ok(false);
        }

        self.stopped_epoch = Some(epoch);
        info!("Epoch {}: early stopping", epoch + 1);
        if let (true, Some(weights)) = (self.restore_best_weights, &self.best_weights) {
            if let Some(best) = self.best_epoch {
                info!("Restoring model weights from the end of the best epoch: {}", best + 1);
            }
            net.set_weights(weights)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        net::{Activation, EndLayer, Layer},
        utils::seeded_rng,
    };

    fn net() -> Net {
        let mut rng = seeded_rng(1, 1);
        Net::new(
            &[
                Layer::Input {
                    frames: 1,
                    width: 1,
                    height: 1,
                    depth: 3,
                },
                Layer::Dense {
                    neurons: 2,
                    activation: Activation::Tanh,
                },
            ],
            EndLayer::Softmax { classes: 2 },
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn stops_after_patience_epochs_without_improvement() {
        let mut net = net();
        let mut stopper = EarlyStopping::new(3, false);

        assert!(!stopper.on_epoch_end(0, 1.0, &mut net).unwrap());
        assert!(!stopper.on_epoch_end(1, 0.8, &mut net).unwrap());
        assert!(!stopper.on_epoch_end(2, 0.9, &mut net).unwrap());
        assert!(!stopper.on_epoch_end(3, 0.8, &mut net).unwrap());
        // an improvement resets the wait
        assert!(!stopper.on_epoch_end(4, 0.5, &mut net).unwrap());
        assert!(!stopper.on_epoch_end(5, 0.6, &mut net).unwrap());
        assert!(!stopper.on_epoch_end(6, 0.6, &mut net).unwrap());
        assert!(stopper.on_epoch_end(7, 0.7, &mut net).unwrap());

        assert_eq!(stopper.best_epoch(), Some(4));
        assert_eq!(stopper.stopped_epoch(), Some(7));
    }

    #[test]
    fn restores_the_best_weights() {
        let mut net = net();
        let best = net.weights();
        let mut stopper = EarlyStopping::new(1, true);

        assert!(!stopper.on_epoch_end(0, 0.3, &mut net).unwrap());
        for pg in net.params_and_grads() {
            pg.params.fill(0.25);
        }
        assert!(stopper.on_epoch_end(1, 0.4, &mut net).unwrap());
        assert_eq!(net.weights(), best);
    }
}
