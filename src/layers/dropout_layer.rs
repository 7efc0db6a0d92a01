use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    error::{Error, Result},
    vol::{Shape, Vol},
    Float,
};

use super::{LayerDetails, NetLayer};

// Randomly zeroes activations while training. The kept activations are
// scaled by 1 / (1 - rate) so inference is a plain copy.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct DropoutLayer {
    rate: Float,
    shape: Shape,
    rng: ChaCha8Rng,

    #[serde(skip)]
    mask: Vec<Float>,
}

impl DropoutLayer {
    /// The layer owns its random stream, seeded from `rng`, so a restored
    /// net keeps drawing the same masks it would have drawn.
    pub fn new<R: Rng + ?Sized>(rate: Float, in_shape: Shape, rng: &mut R) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(Error::Config(format!("dropout rate {rate} is not in [0, 1)")));
        }

        Ok(Self {
            rate,
            shape: in_shape,
            rng: ChaCha8Rng::seed_from_u64(rng.gen()),
            mask: Vec::new(),
        })
    }
}

#[typetag::serde]
impl NetLayer for DropoutLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, is_training: bool) {
        debug_assert_eq!(in_act.w.len(), out_act.w.len());

        if !is_training {
            self.mask.clear();
            out_act.w.copy_from_slice(&in_act.w);
            return;
        }

        let keep = 1.0 - self.rate;
        self.mask.clear();
        self.mask.extend((0..in_act.w.len()).map(|_| {
            if self.rng.gen::<Float>() < self.rate {
                0.0
            } else {
                1.0 / keep
            }
        }));

        for ((out, &w), &m) in out_act.w.iter_mut().zip(&in_act.w).zip(&self.mask) {
            *out = w * m;
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        if self.mask.is_empty() {
            in_act.dw.copy_from_slice(&out_act.dw);
            return;
        }

        // copy over the gradient
        for ((dw, &chain), &m) in in_act.dw.iter_mut().zip(&out_act.dw).zip(&self.mask) {
            *dw = chain * m;
        }
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn name(&self) -> &'static str {
        "dropout"
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::seeded_rng;

    #[test]
    fn inference_is_identity() {
        let mut rng = seeded_rng(5, 0);
        let shape = Shape::new(2, 2, 2, 2);
        let mut layer = DropoutLayer::new(0.5, shape, &mut rng).unwrap();
        let input = Vol::randn(shape, 1.0, &mut rng);

        let mut out = Vol::zeros(shape);
        layer.forward(&input, &mut out, false);
        assert_eq!(out.w, input.w);
    }

    #[test]
    fn training_drops_and_rescales() {
        let mut rng = seeded_rng(5, 0);
        let shape = Shape::flat(1000);
        let mut layer = DropoutLayer::new(0.25, shape, &mut rng).unwrap();
        let mut input = Vol::with_constant(shape, 1.0);

        let mut out = Vol::zeros(shape);
        layer.forward(&input, &mut out, true);

        let dropped = out.w.iter().filter(|&&w| w == 0.0).count();
        assert!((150..350).contains(&dropped), "dropped {dropped}");
        for &w in out.w.iter().filter(|&&w| w != 0.0) {
            assert!((w - 1.0 / 0.75).abs() < 1e-6);
        }

        out.dw = vec![1.0; 1000];
        layer.backward(&mut input, &out);
        assert_eq!(input.dw, out.w);
    }

    #[test]
    fn rate_must_be_a_probability() {
        let mut rng = seeded_rng(5, 0);
        assert!(DropoutLayer::new(1.0, Shape::flat(4), &mut rng).is_err());
        assert!(DropoutLayer::new(-0.1, Shape::flat(4), &mut rng).is_err());
    }
}
