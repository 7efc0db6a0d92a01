mod conv_layer;
mod conv_lstm_layer;
mod dropout_layer;
mod input_layer;
mod loss_layer;
mod lstm_layer;
mod nonlinear_layer;
mod pool_layer;

pub use conv_layer::*;
pub use conv_lstm_layer::*;
pub use dropout_layer::*;
pub use input_layer::*;
pub use loss_layer::*;
pub use lstm_layer::*;
pub use nonlinear_layer::*;
pub use pool_layer::*;

use crate::{
    vol::{Shape, Vol},
    Float,
};

/// A hidden layer. Spatial layers treat every frame of the input
/// independently; recurrent layers consume the frame axis as time.
///
/// `backward` must overwrite the whole of `in_act.dw` and add (not assign)
/// the parameter gradients, so that several samples can be accumulated
/// before the trainer applies an update.
#[typetag::serde]
pub trait NetLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, is_training: bool);
    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol);
    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>>;

    fn out_shape(&self) -> Shape;
    fn name(&self) -> &'static str;
}

/// The last layer of a net, the one that turns a target into the first
/// gradient and reports the loss.
#[typetag::serde]
pub trait FinalLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, is_training: bool);
    fn backward(&mut self, target: &[Float], in_act: &mut Vol, out_act: &Vol) -> Float;
    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>>;

    fn out_shape(&self) -> Shape;
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
pub struct LayerDetails<'a> {
    pub params: &'a mut [Float],
    pub grads: &'a mut [Float],
    pub l2_decay_mul: Float,
}
