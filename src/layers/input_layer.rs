use super::NetLayer;
use crate::vol::{Shape, Vol};

#[derive(serde::Serialize, serde::Deserialize)]
pub struct InputLayer {
    out_shape: Shape,
}

impl InputLayer {
    pub fn new(shape: Shape) -> Self {
        Self { out_shape: shape }
    }
}

#[typetag::serde]
impl NetLayer for InputLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(in_act.shape(), self.out_shape);
        debug_assert_eq!(in_act.w.len(), out_act.w.len());
        out_act.w.copy_from_slice(&in_act.w);
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        debug_assert_eq!(out_act.dw.len(), in_act.dw.len());
        in_act.dw.copy_from_slice(&out_act.dw);
    }

    fn out_shape(&self) -> Shape {
        self.out_shape
    }

    fn name(&self) -> &'static str {
        "input"
    }

    fn params_and_grads(&mut self) -> Vec<super::LayerDetails<'_>> {
        Vec::new()
    }
}
