use super::{LayerDetails, NetLayer};
use crate::vol::{Shape, Vol};

// Implements ReLU nonlinearity elementwise
// x -> max(0, x)
// the output is in [0, inf)
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ReluLayer {
    shape: Shape,
}

impl ReluLayer {
    pub fn new(in_shape: Shape) -> Self {
        Self { shape: in_shape }
    }
}

#[typetag::serde]
impl NetLayer for ReluLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(in_act.w.len(), out_act.w.len());

        for (in_w, out_w) in in_act.w.iter().cloned().zip(out_act.w.iter_mut()) {
            // threshold at 0
            *out_w = in_w.max(0.0);
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        debug_assert_eq!(in_act.w.len(), out_act.w.len());

        for i in 0..in_act.w.len() {
            if out_act.w[i] <= 0.0 {
                // threshold
                in_act.dw[i] = 0.0;
            } else {
                in_act.dw[i] = out_act.dw[i];
            }
        }
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn name(&self) -> &'static str {
        "relu"
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}

// x -> tanh(x), output in (-1, 1)
#[derive(serde::Serialize, serde::Deserialize)]
pub struct TanhLayer {
    shape: Shape,
}

impl TanhLayer {
    pub fn new(in_shape: Shape) -> Self {
        Self { shape: in_shape }
    }
}

#[typetag::serde]
impl NetLayer for TanhLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(in_act.w.len(), out_act.w.len());

        for (in_w, out_w) in in_act.w.iter().cloned().zip(out_act.w.iter_mut()) {
            *out_w = in_w.tanh();
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        debug_assert_eq!(in_act.w.len(), in_act.dw.len());

        for i in 0..in_act.w.len() {
            let v2wi = out_act.w[i];
            in_act.dw[i] = (1.0 - v2wi * v2wi) * out_act.dw[i];
        }
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn name(&self) -> &'static str {
        "tanh"
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}
