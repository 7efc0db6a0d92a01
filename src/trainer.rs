use crate::{
    error::Result,
    net::Net,
    utils::{argmax, zeros},
    vol::Vol,
    Float,
};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Method {
    Sgd,
    Adadelta { ro: Float, eps: Float },
    Adam { eps: Float, beta1: Float, beta2: Float },
}

impl Method {
    /// Adam with the usual moment decay rates.
    pub fn adam() -> Self {
        Method::Adam {
            eps: 1e-7,
            beta1: 0.9,
            beta2: 0.999,
        }
    }
}

impl Default for Method {
    fn default() -> Self {
        Self::adam()
    }
}

/// Outcome of one training sample, measured on the forward pass that
/// produced the gradients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub loss: Float,
    pub correct: bool,
}

pub struct Trainer<'net> {
    net: &'net mut Net,

    learning_rate: Float,
    l2_decay: Float,
    batch_size: usize,
    method: Method,
    momentum: Float,

    /// number of updates applied so far
    k: usize,
    /// samples whose gradients are accumulated but not yet applied
    pending: usize,

    // last iteration gradients (used for momentum calculations)
    gsum: Vec<Vec<Float>>,

    // used in adam or adadelta
    xsum: Vec<Vec<Float>>,
}

impl<'net> Trainer<'net> {
    pub fn builder(net: &mut Net) -> TrainerBuilder<'_> {
        TrainerBuilder::new(net)
    }

    pub fn net(&mut self) -> &mut Net {
        &mut *self.net
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Accumulates the gradients of one sample and applies an update once
    /// a full batch has been seen.
    pub fn train(&mut self, x: &Vol, target: &[Float]) -> Result<SampleStats> {
        let stats = self.train_sample(x, target)?;
        if self.pending >= self.batch_size {
            self.step();
        }
        Ok(stats)
    }

    /// Forward and backward pass in training mode, without updating.
    pub fn train_sample(&mut self, x: &Vol, target: &[Float]) -> Result<SampleStats> {
        let probs = self.net.forward(x, true)?;
        let loss = self.net.backward(target);
        self.pending += 1;

        Ok(SampleStats {
            loss,
            correct: argmax(&probs.w) == argmax(target),
        })
    }

    /// Applies the accumulated gradients, averaged over the samples that
    /// produced them, and clears them. Does nothing without pending samples.
    pub fn step(&mut self) {
        if self.pending == 0 {
            return;
        }
        let batch = self.pending as Float;
        self.pending = 0;
        self.k += 1;

        let mut pg_list = self.net.params_and_grads();

        // initialize lists for accumulators. Will only be done once on first iteration
        if self.gsum.is_empty() && (self.method != Method::Sgd || self.momentum > 0.0) {
            // only vanilla sgd doesnt need either lists
            // momentum needs gsum
            // adam and adadelta needs gsum and xsum
            for pg in &pg_list {
                self.gsum.push(zeros(pg.params.len()));

                if matches!(self.method, Method::Adam { .. } | Method::Adadelta { .. }) {
                    self.xsum.push(zeros(pg.params.len()));
                } else {
                    self.xsum.push(Vec::new()); // conserve memory
                }
            }
        }

        // perform an update for all sets of weights
        for (i, pg) in pg_list.iter_mut().enumerate() {
            let l2_decay = self.l2_decay * pg.l2_decay_mul;

            for j in 0..pg.params.len() {
                let l2grad = l2_decay * pg.params[j];
                let gij = (l2grad + pg.grads[j]) / batch; // raw batch gradient

                match self.method {
                    Method::Adam { eps, beta1, beta2 } => {
                        let gsumi = &mut self.gsum[i];
                        let xsumi = &mut self.xsum[i];
                        gsumi[j] = gsumi[j] * beta1 + (1.0 - beta1) * gij; // update biased first moment estimate
                        xsumi[j] = xsumi[j] * beta2 + (1.0 - beta2) * gij * gij; // update biased second moment estimate
                        let bias_corr1 = gsumi[j] / (1.0 - beta1.powi(self.k as i32)); // correct bias first moment estimate
                        let bias_corr2 = xsumi[j] / (1.0 - beta2.powi(self.k as i32)); // correct bias second moment estimate
                        let dx = -self.learning_rate * bias_corr1 / (bias_corr2.sqrt() + eps);
                        pg.params[j] += dx;
                    }
                    Method::Adadelta { ro, eps } => {
                        let gsumi = &mut self.gsum[i];
                        let xsumi = &mut self.xsum[i];
                        gsumi[j] = ro * gsumi[j] + (1.0 - ro) * gij * gij;
                        let dx = -((xsumi[j] + eps) / (gsumi[j] + eps)).sqrt() * gij;
                        xsumi[j] = ro * xsumi[j] + (1.0 - ro) * dx * dx; // yes, xsum lags behind gsum by 1.
                        pg.params[j] += dx;
                    }
                    Method::Sgd if self.momentum > 0.0 => {
                        // momentum update
                        let gsumi = &mut self.gsum[i];
                        let dx = self.momentum * gsumi[j] - self.learning_rate * gij;
                        gsumi[j] = dx;
                        pg.params[j] += dx;
                    }
                    Method::Sgd => {
                        // vanilla sgd
                        pg.params[j] += -self.learning_rate * gij;
                    }
                }
                pg.grads[j] = 0.0;
            }
        }
    }
}

pub struct TrainerBuilder<'net> {
    net: &'net mut Net,

    learning_rate: Float,
    l2_decay: Float,
    batch_size: usize,
    method: Method,
    momentum: Float,
}

impl<'net> TrainerBuilder<'net> {
    fn new(net: &'net mut Net) -> Self {
        Self {
            net,

            learning_rate: 0.01,
            l2_decay: 0.0,
            batch_size: 1,
            method: Method::Sgd,
            momentum: 0.9,
        }
    }

    pub fn learning_rate(mut self, value: Float) -> Self {
        self.learning_rate = value;
        self
    }

    pub fn l2_decay(mut self, value: Float) -> Self {
        self.l2_decay = value;
        self
    }

    /// Clamped to at least one sample.
    pub fn batch_size(mut self, value: usize) -> Self {
        self.batch_size = value.max(1);
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn momentum(mut self, value: Float) -> Self {
        self.momentum = value;
        self
    }

    pub fn build(self) -> Trainer<'net> {
        Trainer::<'net> {
            net: self.net,
            learning_rate: self.learning_rate,
            l2_decay: self.l2_decay,
            batch_size: self.batch_size,
            method: self.method,
            momentum: self.momentum,
            k: 0,
            pending: 0,
            gsum: vec![],
            xsum: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        net::{Activation, EndLayer, Layer},
        utils::{one_hot, seeded_rng},
    };

    fn small_net() -> Net {
        let mut rng = seeded_rng(21, 1);
        Net::new(
            &[
                Layer::Input {
                    frames: 1,
                    width: 1,
                    height: 1,
                    depth: 2,
                },
                Layer::Dense {
                    neurons: 4,
                    activation: Activation::Relu,
                },
            ],
            EndLayer::Softmax { classes: 2 },
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn updates_wait_for_a_full_batch() {
        let mut net = small_net();
        let before = net.weights();
        let x = Vol::from(vec![0.5, -0.5]);

        let mut trainer = Trainer::builder(&mut net)
            .method(Method::adam())
            .learning_rate(1e-2)
            .batch_size(3)
            .build();
        trainer.train(&x, &one_hot(0, 2)).unwrap();
        trainer.train(&x, &one_hot(0, 2)).unwrap();
        assert_eq!(trainer.pending(), 2);
        assert_eq!(trainer.net().weights(), before);

        trainer.train(&x, &one_hot(0, 2)).unwrap();
        assert_eq!(trainer.pending(), 0);
        assert_ne!(trainer.net().weights(), before);
    }

    #[test]
    fn partial_batch_is_averaged_over_its_size() {
        // two identical samples stepped together move the weights exactly
        // as far as one sample stepped alone
        let x = Vol::from(vec![0.3, 0.8]);
        let target = one_hot(1, 2);

        let mut single = small_net();
        let mut trainer = Trainer::builder(&mut single)
            .method(Method::Sgd)
            .momentum(0.0)
            .batch_size(4)
            .build();
        trainer.train_sample(&x, &target).unwrap();
        trainer.step();

        let mut double = small_net();
        let mut trainer = Trainer::builder(&mut double)
            .method(Method::Sgd)
            .momentum(0.0)
            .batch_size(4)
            .build();
        trainer.train_sample(&x, &target).unwrap();
        trainer.train_sample(&x, &target).unwrap();
        trainer.step();

        for (a, b) in single.weights().iter().flatten().zip(double.weights().iter().flatten()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn first_adam_step_moves_each_weight_by_the_learning_rate() {
        let mut net = small_net();
        let before = net.weights();
        let x = Vol::from(vec![1.0, 1.0]);

        let mut trainer = Trainer::builder(&mut net)
            .method(Method::adam())
            .learning_rate(1e-3)
            .build();
        trainer.train(&x, &one_hot(0, 2)).unwrap();

        // with bias correction the first step is lr * g / |g|
        let after = net.weights();
        let last = after.len() - 1;
        for (a, b) in after[last].iter().zip(&before[last]) {
            assert!(((a - b).abs() - 1e-3).abs() < 1e-5);
        }
    }

    // parameter gradients of one training pass of a fresh `small_net`
    fn gradients(x: &Vol, target: &[Float]) -> Vec<Vec<Float>> {
        let mut net = small_net();
        net.forward(x, true).unwrap();
        net.backward(target);
        net.params_and_grads()
            .into_iter()
            .map(|pg| pg.grads.to_vec())
            .collect()
    }

    fn deltas(after: &[Vec<Float>], before: &[Vec<Float>]) -> Vec<Float> {
        after
            .iter()
            .flatten()
            .zip(before.iter().flatten())
            .map(|(a, b)| a - b)
            .collect()
    }

    // a target equal to the prediction gives every parameter a zero gradient
    fn current_prediction(net: &mut Net, x: &Vol) -> Vec<Float> {
        net.forward(x, false).unwrap().w
    }

    #[test]
    fn first_adadelta_step_scales_the_gradient() {
        let x = Vol::from(vec![0.4, -0.7]);
        let target = one_hot(1, 2);
        let grads = gradients(&x, &target);
        let (ro, eps) = (0.95, 1e-6);

        let mut net = small_net();
        let before = net.weights();
        let mut trainer = Trainer::builder(&mut net)
            .method(Method::Adadelta { ro, eps })
            .build();
        trainer.train(&x, &target).unwrap();

        let moved = deltas(&net.weights(), &before);
        for (dx, g) in moved.iter().zip(grads.iter().flatten()) {
            let gsum = (1.0 - ro) * g * g;
            let expected = -(eps / (gsum + eps)).sqrt() * g;
            assert!((dx - expected).abs() < 1e-6, "moved {dx}, expected {expected}");
        }
    }

    #[test]
    fn momentum_carries_the_previous_step() {
        let x = Vol::from(vec![0.9, 0.2]);
        let target = one_hot(0, 2);
        let grads = gradients(&x, &target);
        let (lr, momentum) = (0.1, 0.9);

        let mut net = small_net();
        let w0 = net.weights();
        let mut trainer = Trainer::builder(&mut net)
            .method(Method::Sgd)
            .learning_rate(lr)
            .momentum(momentum)
            .build();

        trainer.train(&x, &target).unwrap();
        let w1 = trainer.net().weights();
        let first = deltas(&w1, &w0);
        for (dx, g) in first.iter().zip(grads.iter().flatten()) {
            assert!((dx + lr * g).abs() < 1e-6);
        }

        // no gradient on the second step, the update is the velocity alone
        let prediction = current_prediction(trainer.net(), &x);
        trainer.train(&x, &prediction).unwrap();
        let second = deltas(&trainer.net().weights(), &w1);
        for (dx, prev) in second.iter().zip(&first) {
            assert!((dx - momentum * prev).abs() < 1e-6);
        }
    }

    #[test]
    fn l2_decay_shrinks_weights_but_not_biases() {
        let x = Vol::from(vec![0.5, 0.5]);
        let (lr, l2) = (0.1, 0.01);

        let mut net = small_net();
        let before = net.weights();
        let prediction = current_prediction(&mut net, &x);
        let mut trainer = Trainer::builder(&mut net)
            .method(Method::Sgd)
            .momentum(0.0)
            .learning_rate(lr)
            .l2_decay(l2)
            .build();
        trainer.train(&x, &prediction).unwrap();

        let after = net.weights();
        // groups per dense layer: one per neuron, then the biases
        let hidden_bias = 4;
        for (w, w0) in after[0].iter().zip(&before[0]) {
            assert!((w - w0 * (1.0 - lr * l2)).abs() < 1e-7);
        }
        assert_eq!(after[hidden_bias], before[hidden_bias]);
    }

    #[test]
    fn sample_stats_report_loss_and_hit() {
        let mut net = small_net();
        let x = Vol::from(vec![0.1, 0.2]);
        let probs = net.forward(&x, false).unwrap();
        let predicted = argmax(&probs.w).unwrap();

        let mut trainer = Trainer::builder(&mut net).build();
        let stats = trainer.train_sample(&x, &one_hot(predicted, 2)).unwrap();
        assert!(stats.correct);
        assert!(stats.loss > 0.0);
        assert!((stats.loss + probs.w[predicted].ln()).abs() < 1e-5);
    }

    #[test]
    fn method_from_json() {
        let method: Method =
            serde_json::from_str(r#"{"type":"adam","eps":1e-7,"beta1":0.9,"beta2":0.999}"#)
                .unwrap();
        assert_eq!(method, Method::adam());
        let method: Method = serde_json::from_str(r#"{"type":"sgd"}"#).unwrap();
        assert_eq!(method, Method::Sgd);
    }
}
