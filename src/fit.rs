use log::{info, warn};
use rand::seq::SliceRandom;

use crate::{
    config::TrainConfig,
    dataset::Dataset,
    early_stopping::EarlyStopping,
    error::{Error, Result},
    net::Net,
    trainer::Trainer,
    utils::{argmax, seeded_rng, SHUFFLE_STREAM},
    vol::Vol,
    Float,
};

/// Per-epoch training curves.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct History {
    pub loss: Vec<Float>,
    pub accuracy: Vec<Float>,
    pub val_loss: Vec<Float>,
    pub val_accuracy: Vec<Float>,
    /// Zero based epoch with the lowest validation loss
    pub best_epoch: Option<usize>,
    /// Zero based epoch after which early stopping ended training
    pub stopped_epoch: Option<usize>,
}

impl History {
    pub fn epochs(&self) -> usize {
        self.loss.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Evaluation {
    pub loss: Float,
    pub accuracy: Float,
}

/// Mean cross-entropy and accuracy of `net` in inference mode.
pub fn evaluate(net: &mut Net, features: &[Vol], targets: &[Vec<Float>]) -> Result<Evaluation> {
    if features.is_empty() {
        return Err(Error::EmptyPartition("evaluation"));
    }
    debug_assert_eq!(features.len(), targets.len());

    let mut loss = 0.0;
    let mut correct = 0;
    for (x, target) in features.iter().zip(targets) {
        loss += net.get_cost_loss(x, target)?;
        if net.prediction() == argmax(target) {
            correct += 1;
        }
    }

    let n = features.len() as Float;
    Ok(Evaluation {
        loss: loss / n,
        accuracy: correct as Float / n,
    })
}

/// Trains `net` on `data`. The last `validation_split` share of the
/// samples, in their current order, is held out for validation and never
/// trained on; the rest is visited in a new random order every epoch.
pub fn fit(net: &mut Net, data: &Dataset, config: &TrainConfig) -> Result<History> {
    config.validate()?;

    let targets = data.one_hot_labels();
    let split_at = ((data.len() as f64) * (1.0 - config.validation_split)).floor() as usize;
    if split_at == 0 {
        return Err(Error::EmptyPartition("train"));
    }
    if config.validation_split > 0.0 && split_at == data.len() {
        return Err(Error::EmptyPartition("validation"));
    }

    let (val_features, val_targets) = (&data.features()[split_at..], &targets[split_at..]);
    let has_validation = !val_features.is_empty();

    let mut stopper = match config.patience {
        Some(patience) if has_validation => {
            Some(EarlyStopping::new(patience, config.restore_best_weights))
        }
        Some(_) => {
            warn!("early stopping needs a validation split, training for every epoch");
            None
        }
        None => None,
    };

    info!(
        "Training on {split_at} samples, validating on {} samples",
        val_features.len()
    );

    let mut rng = seeded_rng(config.seed, SHUFFLE_STREAM);
    let mut order: Vec<usize> = (0..split_at).collect();
    let mut history = History::default();

    let mut trainer = Trainer::builder(net)
        .learning_rate(config.learning_rate)
        .method(config.method)
        .l2_decay(config.l2_decay)
        .batch_size(config.batch_size)
        .build();

    for epoch in 0..config.epochs {
        if config.shuffle {
            order.shuffle(&mut rng);
        }

        let mut loss_sum = 0.0;
        let mut correct = 0;
        for &i in &order {
            let stats = trainer.train(&data.features()[i], &targets[i])?;
            loss_sum += stats.loss;
            correct += usize::from(stats.correct);
        }
        // the last batch of the epoch may be short
        trainer.step();

        let loss = loss_sum / split_at as Float;
        let accuracy = correct as Float / split_at as Float;
        history.loss.push(loss);
        history.accuracy.push(accuracy);

        if !has_validation {
            info!(
                "Epoch {}/{} - loss: {loss:.4} - accuracy: {accuracy:.4}",
                epoch + 1,
                config.epochs
            );
            continue;
        }

        let val = evaluate(trainer.net(), val_features, val_targets)?;
        history.val_loss.push(val.loss);
        history.val_accuracy.push(val.accuracy);
        info!(
            "Epoch {}/{} - loss: {loss:.4} - accuracy: {accuracy:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
            epoch + 1,
            config.epochs,
            val.loss,
            val.accuracy
        );

        if let Some(stopper) = stopper.as_mut() {
            let stop = stopper.on_epoch_end(epoch, val.loss, trainer.net())?;
            history.best_epoch = stopper.best_epoch();
            if stop {
                history.stopped_epoch = stopper.stopped_epoch();
                break;
            }
        }
    }

    Ok(history)
}
