use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    error::{Error, Result},
    utils::sigmoid,
    vol::{Shape, Vol},
    Float,
};

use super::{LayerDetails, NetLayer};

/// Convolutional LSTM: the gates of an LSTM computed with convolutions, so
/// the hidden and cell states keep their spatial layout. The input
/// convolution is unpadded, the recurrent one pads to keep the state size.
/// Returns the hidden state of every frame.
///
/// Recurrent dropout draws one mask per sequence over the hidden state and
/// applies it to `h(t-1)` before all four recurrent convolutions.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ConvLstmLayer {
    filters: usize,
    sx: usize,
    in_shape: Shape,
    recurrent_dropout: Float,

    out_sx: usize,
    out_sy: usize,

    // 4 * filters kernels each, gate block r / filters
    input_filters: Vec<Vol>,
    recurrent_filters: Vec<Vol>,
    biases: Vol,

    rng: ChaCha8Rng,

    #[serde(skip)]
    gates: Vec<Float>,
    #[serde(skip)]
    cells: Vec<Float>,
    #[serde(skip)]
    mask: Vec<Float>,
}

impl ConvLstmLayer {
    pub fn new<R: Rng + ?Sized>(
        filters: usize,
        sx: usize,
        recurrent_dropout: Float,
        in_shape: Shape,
        rng: &mut R,
    ) -> Result<Self> {
        if filters == 0 || sx == 0 || sx > in_shape.sx || sx > in_shape.sy || in_shape.frames == 0 {
            return Err(Error::Shape(format!(
                "{sx}x{sx} conv lstm with {filters} filters does not fit input {in_shape}"
            )));
        }
        if !(0.0..1.0).contains(&recurrent_dropout) {
            return Err(Error::Config(format!(
                "recurrent dropout {recurrent_dropout} is not in [0, 1)"
            )));
        }

        let gates = 4 * filters;
        let input_filters = (0..gates)
            .map(|_| Vol::new(Shape::new(1, sx, sx, in_shape.depth), rng))
            .collect();
        let recurrent_filters = (0..gates)
            .map(|_| Vol::new(Shape::new(1, sx, sx, filters), rng))
            .collect();

        let mut biases = Vol::zeros(Shape::flat(gates));
        biases.w[filters..2 * filters].fill(1.0);

        Ok(Self {
            filters,
            sx,
            in_shape,
            recurrent_dropout,
            out_sx: in_shape.sx - sx + 1,
            out_sy: in_shape.sy - sx + 1,
            input_filters,
            recurrent_filters,
            biases,
            rng: ChaCha8Rng::seed_from_u64(rng.gen()),
            gates: Vec::new(),
            cells: Vec::new(),
            mask: Vec::new(),
        })
    }

    fn pad(&self) -> isize {
        ((self.sx - 1) / 2) as isize
    }

    fn masked(&self, h: &[Float], out: &mut [Float]) {
        if self.mask.is_empty() {
            out.copy_from_slice(h);
        } else {
            for ((o, &h), &m) in out.iter_mut().zip(h).zip(&self.mask) {
                *o = h * m;
            }
        }
    }
}

#[typetag::serde]
impl NetLayer for ConvLstmLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, is_training: bool) {
        let nf = self.filters;
        let g4 = 4 * nf;
        let plane = self.out_sx * self.out_sy;
        let state_len = plane * nf;
        let frames = in_act.frames();
        let v_sx = in_act.sx();
        let v_depth = in_act.depth();
        let k = self.sx;
        let pad = self.pad();

        self.mask.clear();
        if is_training && self.recurrent_dropout > 0.0 {
            let keep = 1.0 - self.recurrent_dropout;
            for _ in 0..state_len {
                let m = if self.rng.gen::<Float>() < self.recurrent_dropout {
                    0.0
                } else {
                    1.0 / keep
                };
                self.mask.push(m);
            }
        }

        self.gates.resize(frames * plane * g4, 0.0);
        self.cells.resize(frames * state_len, 0.0);

        let mut h_prev = vec![0.0; state_len];
        let mut z = vec![0.0; g4];

        for t in 0..frames {
            if t > 0 {
                let prev = &out_act.w[(t - 1) * state_len..t * state_len];
                self.masked(prev, &mut h_prev);
            }
            let v = in_act.frame(t);

            for ay in 0..self.out_sy {
                for ax in 0..self.out_sx {
                    let cell = ay * self.out_sx + ax;

                    for (r, zr) in z.iter_mut().enumerate() {
                        let mut a = self.biases.w[r];

                        let f = &self.input_filters[r];
                        for fy in 0..k {
                            for fx in 0..k {
                                let v_index = ((ay + fy) * v_sx + ax + fx) * v_depth;
                                let f_index = (fy * k + fx) * v_depth;
                                for d in 0..v_depth {
                                    a += f.w[f_index + d] * v[v_index + d];
                                }
                            }
                        }

                        if t > 0 {
                            let f = &self.recurrent_filters[r];
                            for fy in 0..k as isize {
                                let oy = ay as isize + fy - pad;
                                if oy < 0 || oy >= self.out_sy as isize {
                                    continue;
                                }
                                for fx in 0..k as isize {
                                    let ox = ax as isize + fx - pad;
                                    if ox < 0 || ox >= self.out_sx as isize {
                                        continue;
                                    }
                                    let h_index = (oy as usize * self.out_sx + ox as usize) * nf;
                                    let f_index = (fy as usize * k + fx as usize) * nf;
                                    for d in 0..nf {
                                        a += f.w[f_index + d] * h_prev[h_index + d];
                                    }
                                }
                            }
                        }

                        *zr = a;
                    }

                    let gates = &mut self.gates[(t * plane + cell) * g4..(t * plane + cell + 1) * g4];
                    for d in 0..nf {
                        let i = sigmoid(z[d]);
                        let f = sigmoid(z[nf + d]);
                        let g = z[2 * nf + d].tanh();
                        let o = sigmoid(z[3 * nf + d]);
                        gates[d] = i;
                        gates[nf + d] = f;
                        gates[2 * nf + d] = g;
                        gates[3 * nf + d] = o;

                        let s = cell * nf + d;
                        let c_prev = if t > 0 { self.cells[(t - 1) * state_len + s] } else { 0.0 };
                        let c = f * c_prev + i * g;
                        self.cells[t * state_len + s] = c;
                        out_act.w[t * state_len + s] = o * c.tanh();
                    }
                }
            }
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        let nf = self.filters;
        let g4 = 4 * nf;
        let plane = self.out_sx * self.out_sy;
        let state_len = plane * nf;
        let frames = in_act.frames();
        let v_sx = in_act.sx();
        let v_depth = in_act.depth();
        let frame_len = in_act.shape().frame_len();
        let k = self.sx;
        let pad = self.pad();

        in_act.dw.fill(0.0);

        let mut dh_next = vec![0.0; state_len];
        let mut dc_next = vec![0.0; state_len];
        let mut dz = vec![0.0; plane * g4];
        let mut h_prev = vec![0.0; state_len];
        let mut dh_prev = vec![0.0; state_len];

        for t in (0..frames).rev() {
            for cell in 0..plane {
                let gates = &self.gates[(t * plane + cell) * g4..(t * plane + cell + 1) * g4];
                for d in 0..nf {
                    let s = cell * nf + d;
                    let i = gates[d];
                    let f = gates[nf + d];
                    let g = gates[2 * nf + d];
                    let o = gates[3 * nf + d];
                    let c_prev = if t > 0 { self.cells[(t - 1) * state_len + s] } else { 0.0 };
                    let tc = self.cells[t * state_len + s].tanh();

                    let dh = out_act.dw[t * state_len + s] + dh_next[s];
                    let dc = dc_next[s] + dh * o * (1.0 - tc * tc);
                    let dzc = &mut dz[cell * g4..(cell + 1) * g4];
                    dzc[d] = dc * g * i * (1.0 - i);
                    dzc[nf + d] = dc * c_prev * f * (1.0 - f);
                    dzc[2 * nf + d] = dc * i * (1.0 - g * g);
                    dzc[3 * nf + d] = dh * tc * o * (1.0 - o);
                    dc_next[s] = dc * f;
                }
            }

            if t > 0 {
                let prev = &out_act.w[(t - 1) * state_len..t * state_len];
                self.masked(prev, &mut h_prev);
            }
            dh_prev.fill(0.0);

            let base = t * frame_len;
            for ay in 0..self.out_sy {
                for ax in 0..self.out_sx {
                    let cell = ay * self.out_sx + ax;

                    for r in 0..g4 {
                        let chain_grad = dz[cell * g4 + r];
                        self.biases.dw[r] += chain_grad;

                        let f = &mut self.input_filters[r];
                        for fy in 0..k {
                            for fx in 0..k {
                                let ix1 = base + ((ay + fy) * v_sx + ax + fx) * v_depth;
                                let ix2 = (fy * k + fx) * v_depth;
                                for d in 0..v_depth {
                                    f.dw[ix2 + d] += in_act.w[ix1 + d] * chain_grad;
                                    in_act.dw[ix1 + d] += f.w[ix2 + d] * chain_grad;
                                }
                            }
                        }

                        if t > 0 {
                            let f = &mut self.recurrent_filters[r];
                            for fy in 0..k as isize {
                                let oy = ay as isize + fy - pad;
                                if oy < 0 || oy >= self.out_sy as isize {
                                    continue;
                                }
                                for fx in 0..k as isize {
                                    let ox = ax as isize + fx - pad;
                                    if ox < 0 || ox >= self.out_sx as isize {
                                        continue;
                                    }
                                    let ix1 = (oy as usize * self.out_sx + ox as usize) * nf;
                                    let ix2 = (fy as usize * k + fx as usize) * nf;
                                    for d in 0..nf {
                                        f.dw[ix2 + d] += h_prev[ix1 + d] * chain_grad;
                                        dh_prev[ix1 + d] += f.w[ix2 + d] * chain_grad;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            // the gradient reaches h(t-1) through the same mask
            self.masked(&dh_prev, &mut dh_next);
        }
    }

    fn out_shape(&self) -> Shape {
        Shape::new(self.in_shape.frames, self.out_sx, self.out_sy, self.filters)
    }

    fn name(&self) -> &'static str {
        "conv_lstm2d"
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        let mut result = Vec::new();
        for filter in self.input_filters.iter_mut().chain(&mut self.recurrent_filters) {
            result.push(LayerDetails {
                params: &mut filter.w,
                grads: &mut filter.dw,
                l2_decay_mul: 1.0,
            });
        }

        result.push(LayerDetails {
            params: &mut self.biases.w,
            grads: &mut self.biases.dw,
            l2_decay_mul: 0.0,
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{layers::gradcheck, utils::seeded_rng};

    #[test]
    fn valid_input_convolution_shrinks_each_frame() {
        let mut rng = seeded_rng(13, 0);
        let layer = ConvLstmLayer::new(4, 3, 0.2, Shape::new(5, 8, 6, 3), &mut rng).unwrap();
        assert_eq!(layer.out_shape(), Shape::new(5, 6, 4, 4));
        assert_eq!(layer.input_filters.len(), 16);
        assert_eq!(&layer.biases.w[4..8], &[1.0; 4]);
    }

    #[test]
    fn input_smaller_than_kernel_is_rejected() {
        let mut rng = seeded_rng(13, 0);
        let result = ConvLstmLayer::new(4, 3, 0.2, Shape::new(5, 2, 6, 3), &mut rng);
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn recurrent_dropout_only_applies_while_training() {
        let mut rng = seeded_rng(13, 0);
        let shape = Shape::new(4, 5, 5, 2);
        let mut layer = ConvLstmLayer::new(3, 3, 0.5, shape, &mut rng).unwrap();
        let input = Vol::randn(shape, 1.0, &mut rng);

        let mut a = Vol::zeros(layer.out_shape());
        let mut b = Vol::zeros(layer.out_shape());
        layer.forward(&input, &mut a, false);
        layer.forward(&input, &mut b, false);
        assert_eq!(a.w, b.w);

        let mut c = Vol::zeros(layer.out_shape());
        layer.forward(&input, &mut c, true);
        // the first frame has no recurrent input to drop
        assert_eq!(a.frame(0), c.frame(0));
        assert_ne!(a.w, c.w);
    }

    #[test]
    fn gradients_through_time_match_numeric() {
        let mut rng = seeded_rng(17, 0);
        let shape = Shape::new(3, 4, 4, 2);
        let mut layer = ConvLstmLayer::new(2, 3, 0.0, shape, &mut rng).unwrap();
        let input = Vol::randn(shape, 1.0, &mut rng);
        gradcheck::check(&mut layer, &input);
    }
}
