// The layer that initiates a backward() pass. One of the layers in this
// file must be the final layer in a Net.

use crate::{
    vol::{Shape, Vol},
    Float,
};

use super::{FinalLayer, LayerDetails};

// probabilities are clipped before the log so a confident miss stays finite
const EPSILON: Float = 1e-7;

/// This is a classifier, with N discrete classes from 0 to N-1
/// it gets a stream of N incoming numbers and computes the softmax
/// function (exponentiate and normalize to sum to 1 as probabilities should)
#[derive(serde::Serialize, serde::Deserialize)]
pub struct SoftmaxLayer {
    num_inputs: usize,

    #[serde(skip)]
    es: Vec<Float>,
}

impl SoftmaxLayer {
    pub fn new(in_shape: Shape) -> Self {
        let num_inputs = in_shape.len();
        Self {
            num_inputs,
            es: vec![0.0; num_inputs],
        }
    }
}

#[typetag::serde]
impl FinalLayer for SoftmaxLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        let v = in_act;
        debug_assert_eq!(out_act.w.len(), self.num_inputs);

        // compute max activation
        let amax = v.w.iter().cloned().fold(Float::NEG_INFINITY, Float::max);

        // compute exponentials (carefully to not blow up)
        self.es.resize(self.num_inputs, 0.0);
        let mut esum = 0.0;
        for (e, &w) in self.es.iter_mut().zip(&v.w) {
            *e = (w - amax).exp();
            esum += *e;
        }

        // normalize and output to sum to one
        for (e, out) in self.es.iter_mut().zip(out_act.w.iter_mut()) {
            *e /= esum;
            *out = *e;
        }
    }

    /// Categorical cross-entropy against a probability vector, usually one-hot.
    fn backward(&mut self, target: &[Float], in_act: &mut Vol, _out_act: &Vol) -> Float {
        debug_assert_eq!(target.len(), self.num_inputs);
        let x = in_act;

        let mut loss = 0.0;
        for i in 0..self.num_inputs {
            x.dw[i] = self.es[i] - target[i];
            if target[i] > 0.0 {
                loss -= target[i] * self.es[i].clamp(EPSILON, 1.0 - EPSILON).ln();
            }
        }

        loss
    }

    fn out_shape(&self) -> Shape {
        Shape::flat(self.num_inputs)
    }

    fn name(&self) -> &'static str {
        "softmax"
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}
