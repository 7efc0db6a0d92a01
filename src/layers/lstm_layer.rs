use rand::Rng;

use crate::{
    error::{Error, Result},
    utils::sigmoid,
    vol::{Shape, Vol},
    Float,
};

use super::{LayerDetails, NetLayer};

// Gate blocks inside the 4 * units pre-activation vector.
const INPUT_GATE: usize = 0;
const FORGET_GATE: usize = 1;
const CELL_GATE: usize = 2;
const OUTPUT_GATE: usize = 3;

/// Long short-term memory over the frame axis. Every frame is flattened
/// into one input vector and only the hidden state after the last frame
/// is emitted.
///
/// ```text
/// i = σ(Wi·x + Ui·h + bi)    f = σ(Wf·x + Uf·h + bf)
/// g = tanh(Wg·x + Ug·h + bg) o = σ(Wo·x + Uo·h + bo)
/// c = f·c' + i·g             h = o·tanh(c)
/// ```
#[derive(serde::Serialize, serde::Deserialize)]
pub struct LstmLayer {
    units: usize,
    in_shape: Shape,

    // row r of the 4 * units rows holds the weights of gate r / units
    kernel: Vol,
    recurrent_kernel: Vol,
    biases: Vol,

    // per frame activated gates, cell states and hidden states
    #[serde(skip)]
    gates: Vec<Float>,
    #[serde(skip)]
    cells: Vec<Float>,
    #[serde(skip)]
    hidden: Vec<Float>,
}

impl LstmLayer {
    pub fn new<R: Rng + ?Sized>(units: usize, in_shape: Shape, rng: &mut R) -> Result<Self> {
        let num_inputs = in_shape.frame_len();
        if units == 0 || num_inputs == 0 || in_shape.frames == 0 {
            return Err(Error::Shape(format!(
                "lstm with {units} units cannot consume input {in_shape}"
            )));
        }

        let rows = 4 * units;
        let kernel = Vol::randn(
            Shape::flat(rows * num_inputs),
            (1.0 / num_inputs as Float).sqrt(),
            rng,
        );
        let recurrent_kernel = Vol::randn(
            Shape::flat(rows * units),
            (1.0 / units as Float).sqrt(),
            rng,
        );

        let mut biases = Vol::zeros(Shape::flat(rows));
        biases.w[FORGET_GATE * units..(FORGET_GATE + 1) * units].fill(1.0);

        Ok(Self {
            units,
            in_shape,
            kernel,
            recurrent_kernel,
            biases,
            gates: Vec::new(),
            cells: Vec::new(),
            hidden: Vec::new(),
        })
    }
}

#[typetag::serde]
impl NetLayer for LstmLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        let u = self.units;
        let n = self.in_shape.frame_len();
        let frames = in_act.frames();

        self.gates.resize(frames * 4 * u, 0.0);
        self.cells.resize(frames * u, 0.0);
        self.hidden.resize(frames * u, 0.0);

        let mut z = vec![0.0; 4 * u];
        for t in 0..frames {
            let x = in_act.frame(t);

            z.copy_from_slice(&self.biases.w);
            for (r, zr) in z.iter_mut().enumerate() {
                let row = &self.kernel.w[r * n..(r + 1) * n];
                *zr += row.iter().zip(x).map(|(w, x)| w * x).sum::<Float>();

                if t > 0 {
                    let h_prev = &self.hidden[(t - 1) * u..t * u];
                    let row = &self.recurrent_kernel.w[r * u..(r + 1) * u];
                    *zr += row.iter().zip(h_prev).map(|(w, h)| w * h).sum::<Float>();
                }
            }

            let gates = &mut self.gates[t * 4 * u..(t + 1) * 4 * u];
            for k in 0..u {
                let i = sigmoid(z[INPUT_GATE * u + k]);
                let f = sigmoid(z[FORGET_GATE * u + k]);
                let g = z[CELL_GATE * u + k].tanh();
                let o = sigmoid(z[OUTPUT_GATE * u + k]);
                gates[INPUT_GATE * u + k] = i;
                gates[FORGET_GATE * u + k] = f;
                gates[CELL_GATE * u + k] = g;
                gates[OUTPUT_GATE * u + k] = o;

                let c_prev = if t > 0 { self.cells[(t - 1) * u + k] } else { 0.0 };
                let c = f * c_prev + i * g;
                self.cells[t * u + k] = c;
                self.hidden[t * u + k] = o * c.tanh();
            }
        }

        out_act
            .w
            .copy_from_slice(&self.hidden[(frames - 1) * u..frames * u]);
    }

    // backpropagation through time, from the last frame back to the first
    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        let u = self.units;
        let n = self.in_shape.frame_len();
        let frames = in_act.frames();

        in_act.dw.fill(0.0);

        let mut dh = out_act.dw.clone();
        let mut dc_next = vec![0.0; u];
        let mut dz = vec![0.0; 4 * u];

        for t in (0..frames).rev() {
            let gates = &self.gates[t * 4 * u..(t + 1) * 4 * u];
            for k in 0..u {
                let i = gates[INPUT_GATE * u + k];
                let f = gates[FORGET_GATE * u + k];
                let g = gates[CELL_GATE * u + k];
                let o = gates[OUTPUT_GATE * u + k];
                let c_prev = if t > 0 { self.cells[(t - 1) * u + k] } else { 0.0 };
                let tc = self.cells[t * u + k].tanh();

                let dc = dc_next[k] + dh[k] * o * (1.0 - tc * tc);
                dz[INPUT_GATE * u + k] = dc * g * i * (1.0 - i);
                dz[FORGET_GATE * u + k] = dc * c_prev * f * (1.0 - f);
                dz[CELL_GATE * u + k] = dc * i * (1.0 - g * g);
                dz[OUTPUT_GATE * u + k] = dh[k] * tc * o * (1.0 - o);
                dc_next[k] = dc * f;
            }

            let x_base = t * n;
            dh.fill(0.0);
            for (r, &dzr) in dz.iter().enumerate() {
                self.biases.dw[r] += dzr;

                for j in 0..n {
                    self.kernel.dw[r * n + j] += dzr * in_act.w[x_base + j];
                    in_act.dw[x_base + j] += self.kernel.w[r * n + j] * dzr;
                }

                if t > 0 {
                    for k in 0..u {
                        self.recurrent_kernel.dw[r * u + k] += dzr * self.hidden[(t - 1) * u + k];
                        dh[k] += self.recurrent_kernel.w[r * u + k] * dzr;
                    }
                }
            }
        }
    }

    fn out_shape(&self) -> Shape {
        Shape::flat(self.units)
    }

    fn name(&self) -> &'static str {
        "lstm"
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        vec![
            LayerDetails {
                params: &mut self.kernel.w,
                grads: &mut self.kernel.dw,
                l2_decay_mul: 1.0,
            },
            LayerDetails {
                params: &mut self.recurrent_kernel.w,
                grads: &mut self.recurrent_kernel.dw,
                l2_decay_mul: 1.0,
            },
            LayerDetails {
                params: &mut self.biases.w,
                grads: &mut self.biases.dw,
                l2_decay_mul: 0.0,
            },
        ]
    }
}
