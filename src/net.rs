mod serde;

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use rand::Rng;

use crate::{
    error::{Error, Result},
    layers::{
        ConvLayer, ConvLstmLayer, DropoutLayer, FinalLayer, FullyConnLayer, InputLayer,
        LayerDetails, LstmLayer, NetLayer, PoolLayer, PoolPadding, ReluLayer, SoftmaxLayer,
        TanhLayer,
    },
    utils::argmax,
    vol::{Shape, Vol},
    Float,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Tanh,
}

impl Activation {
    // relus like a bit of positive bias to get gradients early
    // otherwise it's technically possible that a relu unit will never turn on (by chance)
    // and will never get any gradient and never contribute any computation. Dead relu.
    fn initial_bias(self) -> Float {
        match self {
            Activation::Relu => 0.1,
            Activation::Tanh => 0.0,
        }
    }

    fn layer(self, shape: Shape) -> Box<dyn NetLayer> {
        match self {
            Activation::Relu => Box::new(ReluLayer::new(shape)),
            Activation::Tanh => Box::new(TanhLayer::new(shape)),
        }
    }
}

/// Definition of a hidden layer. Spatial layers are applied to every
/// frame on its own; `ConvLstm` and `Lstm` run across the frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Layer {
    Input {
        frames: usize,
        width: usize,
        height: usize,
        depth: usize,
    },
    Conv {
        sx: usize,
        filters: usize,
        stride: usize,
        padding: usize,
        activation: Activation,
    },
    Pool {
        sx: usize,
        stride: usize,
        padding: PoolPadding,
    },
    Dropout {
        rate: Float,
    },
    ConvLstm {
        sx: usize,
        filters: usize,
        recurrent_dropout: Float,
    },
    Lstm {
        units: usize,
    },
    Dense {
        neurons: usize,
        activation: Activation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndLayer {
    Softmax { classes: usize },
}

// Net manages a set of layers
// For now constraints: Simple linear order of layers, first layer input last layer a cost layer
#[derive(::serde::Serialize)]
pub struct Net {
    layers: Vec<Box<dyn NetLayer>>,
    final_layer: Box<dyn FinalLayer>,

    #[serde(skip)]
    acts: Vec<Vol>,
}

fn not_first() -> Error {
    Error::Shape("the input layer must come first, and only once".to_string())
}

impl Net {
    pub fn new<R: Rng + ?Sized>(
        def_layers: &[Layer],
        def_final_layer: EndLayer,
        rng: &mut R,
    ) -> Result<Self> {
        let mut layers: Vec<Box<dyn NetLayer>> = Vec::new();
        let mut shape: Option<Shape> = None;

        for def in def_layers {
            let layer: Box<dyn NetLayer> = match (*def, shape) {
                (
                    Layer::Input {
                        frames,
                        width,
                        height,
                        depth,
                    },
                    None,
                ) => {
                    let input = Shape::new(frames, width, height, depth);
                    if input.is_empty() {
                        return Err(Error::Shape(format!("input {input} is empty")));
                    }
                    Box::new(InputLayer::new(input))
                }
                (Layer::Input { .. }, Some(_)) | (_, None) => return Err(not_first()),
                (
                    Layer::Conv {
                        sx,
                        filters,
                        stride,
                        padding,
                        activation,
                    },
                    Some(in_shape),
                ) => {
                    let layer = ConvLayer::builder(filters, sx, in_shape)
                        .padding(padding)
                        .stride(stride)
                        .bias(activation.initial_bias())
                        .build(rng)?;
                    let out_shape = layer.out_shape();
                    layers.push(Box::new(layer));
                    activation.layer(out_shape)
                }
                (
                    Layer::Pool {
                        sx,
                        stride,
                        padding,
                    },
                    Some(in_shape),
                ) => Box::new(
                    PoolLayer::builder(sx, in_shape)
                        .stride(stride)
                        .padding(padding)
                        .build()?,
                ),
                (Layer::Dropout { rate }, Some(in_shape)) => {
                    Box::new(DropoutLayer::new(rate, in_shape, rng)?)
                }
                (
                    Layer::ConvLstm {
                        sx,
                        filters,
                        recurrent_dropout,
                    },
                    Some(in_shape),
                ) => Box::new(ConvLstmLayer::new(
                    filters,
                    sx,
                    recurrent_dropout,
                    in_shape,
                    rng,
                )?),
                (Layer::Lstm { units }, Some(in_shape)) => {
                    Box::new(LstmLayer::new(units, in_shape, rng)?)
                }
                (
                    Layer::Dense {
                        neurons,
                        activation,
                    },
                    Some(in_shape),
                ) => {
                    let layer = FullyConnLayer::builder(neurons, in_shape)
                        .bias(activation.initial_bias())
                        .build(rng)?;
                    let out_shape = layer.out_shape();
                    layers.push(Box::new(layer));
                    activation.layer(out_shape)
                }
            };

            shape = Some(layer.out_shape());
            layers.push(layer);
        }

        let final_layer: Box<dyn FinalLayer> = match def_final_layer {
            EndLayer::Softmax { classes } => {
                let in_shape = shape.ok_or_else(not_first)?;
                if classes == 0 {
                    return Err(Error::Shape("softmax needs at least one class".to_string()));
                }

                // add an fc layer here, there is no reason the user should
                // have to worry about this and we almost always want to
                let layer = FullyConnLayer::builder(classes, in_shape)
                    .bias(0.1)
                    .build(rng)?;
                layers.push(Box::new(layer));

                Box::new(SoftmaxLayer::new(Shape::flat(classes)))
            }
        };

        Self::from_layers(layers, final_layer)
    }

    /// Reassembles a net from already built layers, allocating the
    /// activation buffers between them.
    pub fn from_layers(
        layers: Vec<Box<dyn NetLayer>>,
        final_layer: Box<dyn FinalLayer>,
    ) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::Shape("a net needs at least an input layer".to_string()));
        }

        let mut acts: Vec<Vol> = layers
            .iter()
            .map(|layer| Vol::zeros(layer.out_shape()))
            .collect();
        acts.push(Vol::zeros(final_layer.out_shape()));

        Ok(Self {
            layers,
            final_layer,
            acts,
        })
    }

    fn adjecent(acts: &mut [Vol], at: usize) -> (&mut Vol, &mut Vol) {
        let (a, b) = acts.split_at_mut(at);
        let last = a.len() - 1;
        (&mut a[last], &mut b[0])
    }

    pub fn input_shape(&self) -> Shape {
        self.layers[0].out_shape()
    }

    pub fn output_shape(&self) -> Shape {
        self.final_layer.out_shape()
    }

    // forward prop the network.
    // The trainer passes is_training = true, prediction passes false so
    // dropout is disabled.
    pub fn forward(&mut self, vol: &Vol, is_training: bool) -> Result<Vol> {
        debug_assert_eq!(self.layers.len() + 1, self.acts.len());

        if vol.shape() != self.input_shape() {
            return Err(Error::Shape(format!(
                "net expects input {}, got {}",
                self.input_shape(),
                vol.shape()
            )));
        }

        let n = self.acts.len();

        self.layers[0].forward(vol, &mut self.acts[0], is_training);
        for i in 1..self.layers.len() {
            let (a, b) = Self::adjecent(&mut self.acts, i);
            self.layers[i].forward(a, b, is_training);
        }

        let (a, b) = Self::adjecent(&mut self.acts, n - 1);
        self.final_layer.forward(a, b, is_training);

        Ok(b.clone())
    }

    // backprop: compute gradients wrt all parameters, for the input of the
    // last forward pass and the given target distribution
    pub fn backward(&mut self, target: &[Float]) -> Float {
        let n = self.acts.len();

        let (a, b) = Self::adjecent(&mut self.acts, n - 1);
        let loss = self.final_layer.backward(target, a, b);

        for i in (1..self.layers.len()).rev() {
            let (a, b) = Self::adjecent(&mut self.acts, i);
            self.layers[i].backward(a, b);
        }

        loss
    }

    /// Gradient of the loss wrt the input of the last forward pass, valid
    /// after `backward`. The input layer is the identity.
    pub fn input_gradient(&self) -> &[Float] {
        &self.acts[0].dw
    }

    // this is a convenience function for returning the argmax
    // prediction, assuming the last layer of the net is a softmax
    pub fn prediction(&self) -> Option<usize> {
        self.acts.last().and_then(|probs| argmax(&probs.w))
    }

    /// Loss of one sample in inference mode. Only the gradient of the
    /// last activation is written, accumulated parameter gradients are kept.
    pub fn get_cost_loss(&mut self, vol: &Vol, target: &[Float]) -> Result<Float> {
        self.forward(vol, false)?;

        let n = self.acts.len();
        let (in_act, out_act) = Self::adjecent(&mut self.acts, n - 1);

        Ok(self.final_layer.backward(target, in_act, out_act))
    }

    pub fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        let mut result = Vec::new();
        for layer in &mut self.layers {
            result.extend(layer.params_and_grads());
        }
        result.extend(self.final_layer.params_and_grads());
        result
    }

    pub fn param_count(&mut self) -> usize {
        self.params_and_grads().iter().map(|pg| pg.params.len()).sum()
    }

    /// Copy of every trainable parameter group.
    pub fn weights(&mut self) -> Vec<Vec<Float>> {
        self.params_and_grads()
            .into_iter()
            .map(|pg| pg.params.to_vec())
            .collect()
    }

    pub fn set_weights(&mut self, weights: &[Vec<Float>]) -> Result<()> {
        let mut groups = self.params_and_grads();
        if groups.len() != weights.len() {
            return Err(Error::Shape(format!(
                "net has {} parameter groups, got {}",
                groups.len(),
                weights.len()
            )));
        }
        if let Some((i, _)) = groups
            .iter()
            .zip(weights)
            .enumerate()
            .find(|(_, (pg, w))| pg.params.len() != w.len())
        {
            return Err(Error::Shape(format!("parameter group {i} has a different size")));
        }

        for (pg, w) in groups.iter_mut().zip(weights) {
            pg.params.copy_from_slice(w);
        }
        Ok(())
    }

    /// Layer table in the spirit of a Keras model summary.
    pub fn summary(&mut self) -> String {
        let mut rows = Vec::new();
        for layer in self.layers.iter_mut().skip(1) {
            let params: usize = layer.params_and_grads().iter().map(|pg| pg.params.len()).sum();
            rows.push((layer.name(), layer.out_shape(), params));
        }
        rows.push((self.final_layer.name(), self.final_layer.out_shape(), 0));

        let rule = "_".repeat(65);
        let mut out = String::new();
        out.push_str(&format!("Input: {}\n", self.input_shape()));
        out.push_str(&format!("{rule}\n"));
        out.push_str(&format!("{:<28}{:<25}{:>12}\n", "Layer (type)", "Output Shape", "Param #"));
        out.push_str(&format!("{}\n", "=".repeat(65)));
        for (i, (name, shape, params)) in rows.iter().enumerate() {
            let label = format!("{name}_{}", i + 1);
            out.push_str(&format!("{label:<28}{:<25}{params:>12}\n", shape.to_string()));
        }
        out.push_str(&format!("{}\n", "=".repeat(65)));
        out.push_str(&format!("Total params: {}\n", self.param_count()));
        out
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand_chacha::ChaCha8Rng;

    use crate::{
        trainer::Trainer,
        utils::{one_hot, seeded_rng},
        vol::Vol,
        Float,
    };

    use super::{Activation, EndLayer, Layer, Net};

    fn random_point(rng: &mut ChaCha8Rng) -> Vol {
        let a: Float = rng.gen_range(-1.0..1.0);
        let b: Float = rng.gen_range(-1.0..1.0);
        Vol::from(vec![a, b])
    }

    fn setup() -> Net {
        let mut rng = seeded_rng(27, 1);
        Net::new(
            &[
                Layer::Input {
                    frames: 1,
                    width: 1,
                    height: 1,
                    depth: 2,
                },
                Layer::Dense {
                    neurons: 5,
                    activation: Activation::Tanh,
                },
                Layer::Dense {
                    neurons: 5,
                    activation: Activation::Tanh,
                },
            ],
            EndLayer::Softmax { classes: 3 },
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn layer_count() {
        let net = setup();

        // tanh are their own layers. Softmax gets its own fully connected layer.
        // this should all get desugared just fine.
        assert_eq!(net.layers.len(), 6);
    }

    #[test]
    fn input_must_come_first() {
        let mut rng = seeded_rng(27, 1);
        let result = Net::new(
            &[Layer::Dense {
                neurons: 5,
                activation: Activation::Relu,
            }],
            EndLayer::Softmax { classes: 3 },
            &mut rng,
        );
        assert!(result.is_err());
    }

    #[test]
    fn forward_probabilities() {
        let mut net = setup();
        let probability_volume = net.forward(&Vol::from([0.2, -0.3].as_ref()), false).unwrap();

        assert_eq!(probability_volume.w.len(), 3); // 3 classes output
        for w in &probability_volume.w {
            assert!(*w > 0.0);
            assert!(*w < 1.0);
        }
        let sum: Float = probability_volume.w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn wrong_input_shape_is_an_error() {
        let mut net = setup();
        assert!(net.forward(&Vol::from([0.2, -0.3, 0.1].as_ref()), false).is_err());
    }

    #[test]
    fn increase_prob_for_ground_truth_class_when_trained() {
        let mut net = setup();
        let mut rng = seeded_rng(4, 0);
        let mut trainer = Trainer::builder(&mut net)
            .learning_rate(0.0001)
            .momentum(0.0)
            .l2_decay(0.0)
            .build();

        // note that this should work since l2 and l1 regularization are off
        // an issue is that if step size is too high, this could technically fail...
        for _k in 0..100 {
            let x = random_point(&mut rng);
            let pv = trainer.net().forward(&x, false).unwrap();

            let gti = rng.gen_range(0..3);
            trainer.train_sample(&x, &one_hot(gti, 3)).unwrap();
            trainer.step();

            let pv2 = trainer.net().forward(&x, false).unwrap();
            assert!(pv2.w[gti] > pv.w[gti]);
        }
    }

    #[test]
    fn compute_correct_gradient_at_data() {
        // here we only test the gradient at data, but if this is
        // right then that's comforting, because it is a function
        // of all gradients above, for all layers.
        let mut net = setup();
        let mut rng = seeded_rng(8, 0);

        let mut x = random_point(&mut rng);
        let target = one_hot(rng.gen_range(0..3), 3);

        net.forward(&x, true).unwrap();
        net.backward(&target);
        let analytic = net.input_gradient().to_vec();

        let delta = 1e-3;
        for i in 0..x.w.len() {
            let xold = x.w[i];
            x.w[i] += delta;
            let c0 = net.get_cost_loss(&x, &target).unwrap();
            x.w[i] -= 2.0 * delta;
            let c1 = net.get_cost_loss(&x, &target).unwrap();
            x.w[i] = xold;

            let numeric = (c0 - c1) / (2.0 * delta);
            assert!(
                (analytic[i] - numeric).abs() < 1e-3 + 1e-2 * numeric.abs(),
                "{i}: numeric: {numeric}, analytic: {}",
                analytic[i]
            );
        }
    }

    #[test]
    fn weights_round_trip() {
        let mut net = setup();
        let x = Vol::from([0.4, 0.9].as_ref());
        let before = net.forward(&x, false).unwrap();
        let snapshot = net.weights();

        for pg in net.params_and_grads() {
            pg.params.fill(0.5);
        }
        assert_ne!(net.forward(&x, false).unwrap().w, before.w);

        net.set_weights(&snapshot).unwrap();
        assert_eq!(net.forward(&x, false).unwrap().w, before.w);
        assert!(net.set_weights(&snapshot[1..]).is_err());
    }

    #[test]
    fn saved_net_predicts_the_same() {
        let mut net = setup();
        let x = Vol::from([-0.7, 0.1].as_ref());
        let expected = net.forward(&x, false).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.bin");
        net.save(&path).unwrap();

        let mut restored = Net::load(&path).unwrap();
        assert_eq!(restored.forward(&x, false).unwrap().w, expected.w);
        assert_eq!(restored.summary(), net.summary());
    }
}
