//! This file contains all layers that do dot products with input,
//! but usually in a different connectivity pattern and weight sharing
//! schemes:
//! - FullyConn is fully connected dot products over the whole input,
//!   every frame included, which also makes it the flatten step
//! - ConvLayer does convolutions (so weight sharing spatially), applied
//!   to each frame on its own with the same filters
//! putting them together in one file because they are very similar

use rand::Rng;

use crate::{
    error::{Error, Result},
    vol::{Shape, Vol},
    Float,
};

use super::{LayerDetails, NetLayer};

#[derive(serde::Serialize, serde::Deserialize)]
pub struct ConvLayer {
    out_depth: usize,
    sx: usize,
    sy: usize,

    in_shape: Shape,

    stride: usize,
    padding: usize,
    l2_decay_mul: Float,

    out_sx: usize,
    out_sy: usize,

    filters: Vec<Vol>,
    biases: Vol,
}

impl ConvLayer {
    pub fn builder(filters: usize, sx: usize, in_shape: Shape) -> ConvLayerBuilder {
        ConvLayerBuilder::new(filters, sx, in_shape)
    }
}

pub struct ConvLayerBuilder {
    out_depth: usize,
    sx: usize,
    in_shape: Shape,

    sy: usize,
    stride: usize,
    padding: usize,
    l2_decay_mul: Float,

    bias: Float,
}

impl ConvLayerBuilder {
    pub fn new(filters: usize, sx: usize, in_shape: Shape) -> Self {
        Self {
            // required
            out_depth: filters,
            sx,
            in_shape,

            // optional
            sy: sx,
            stride: 1,
            padding: 0,
            l2_decay_mul: 1.0,
            bias: 0.0,
        }
    }

    /// stride at which we apply filters to input volume
    ///
    /// default: 1
    pub fn stride(mut self, value: usize) -> Self {
        self.stride = value;
        self
    }

    /// padding to add around borders of input volume
    ///
    /// default: 0
    pub fn padding(mut self, value: usize) -> Self {
        self.padding = value;
        self
    }

    /// default: 0.0
    pub fn bias(mut self, value: Float) -> Self {
        self.bias = value;
        self
    }

    pub fn build<R: Rng + ?Sized>(self, rng: &mut R) -> Result<ConvLayer> {
        let in_shape = self.in_shape;
        let padded_sx = in_shape.sx + self.padding * 2;
        let padded_sy = in_shape.sy + self.padding * 2;
        if self.stride == 0 || self.sx > padded_sx || self.sy > padded_sy {
            return Err(Error::Shape(format!(
                "{}x{} convolution (stride {}, padding {}) does not fit input {in_shape}",
                self.sx, self.sy, self.stride, self.padding
            )));
        }

        let filters = (0..self.out_depth)
            .map(|_| Vol::new(Shape::new(1, self.sx, self.sy, in_shape.depth), rng))
            .collect();
        Ok(ConvLayer {
            out_depth: self.out_depth,
            sx: self.sx,
            sy: self.sy,
            in_shape,
            stride: self.stride,
            padding: self.padding,
            l2_decay_mul: self.l2_decay_mul,
            // floor: a last window that only partly fits is dropped
            out_sx: (padded_sx - self.sx) / self.stride + 1,
            out_sy: (padded_sy - self.sy) / self.stride + 1,
            filters,
            biases: Vol::with_constant(Shape::flat(self.out_depth), self.bias),
        })
    }
}

#[typetag::serde]
impl NetLayer for ConvLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        let v_sx = in_act.sx() as isize;
        let v_sy = in_act.sy() as isize;
        let v_depth = in_act.depth();
        let xy_stride = self.stride as isize;

        for t in 0..in_act.frames() {
            let v = in_act.frame(t);

            for d in 0..self.out_depth {
                let f = &self.filters[d];
                let mut y = -(self.padding as isize);

                for ay in 0..self.out_sy {
                    let mut x = -(self.padding as isize);

                    for ax in 0..self.out_sx {
                        let mut a = 0.0;

                        for fy in 0..f.sy() as isize {
                            let oy = y + fy;
                            if oy < 0 || oy >= v_sy {
                                continue;
                            }

                            for fx in 0..f.sx() as isize {
                                let ox = x + fx;
                                if ox < 0 || ox >= v_sx {
                                    continue;
                                }

                                let f_index = ((f.sx() as isize * fy) + fx) as usize * f.depth();
                                let v_index = ((v_sx * oy) + ox) as usize * v_depth;
                                for fd in 0..f.depth() {
                                    a += f.w[f_index + fd] * v[v_index + fd];
                                }
                            }
                        }

                        a += self.biases.w[d];
                        out_act.set(t, ax, ay, d, a);

                        x += xy_stride;
                    }

                    y += xy_stride;
                }
            }
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        let v = in_act;

        debug_assert_eq!(v.w.len(), v.dw.len());
        v.dw.fill(0.0);

        let v_sx = v.sx() as isize;
        let v_sy = v.sy() as isize;
        let v_depth = v.depth();
        let frame_len = v.shape().frame_len();
        let xy_stride = self.stride as isize;

        for t in 0..v.frames() {
            let base = t * frame_len;

            for d in 0..self.out_depth {
                let f = &mut self.filters[d];
                let mut y = -(self.padding as isize);

                for ay in 0..self.out_sy {
                    let mut x = -(self.padding as isize);

                    for ax in 0..self.out_sx {
                        let chain_grad = out_act.get_gradient(t, ax, ay, d);

                        for fy in 0..f.sy() as isize {
                            let oy = y + fy;
                            if oy < 0 || oy >= v_sy {
                                continue;
                            }

                            for fx in 0..f.sx() as isize {
                                let ox = x + fx;
                                if ox < 0 || ox >= v_sx {
                                    continue;
                                }

                                let ix1 = base + ((v_sx * oy) + ox) as usize * v_depth;
                                let ix2 = ((f.sx() as isize * fy) + fx) as usize * f.depth();
                                for fd in 0..f.depth() {
                                    f.dw[ix2 + fd] += v.w[ix1 + fd] * chain_grad;
                                    v.dw[ix1 + fd] += f.w[ix2 + fd] * chain_grad;
                                }
                            }
                        }

                        self.biases.dw[d] += chain_grad;

                        x += xy_stride;
                    }

                    y += xy_stride;
                }
            }
        }
    }

    fn out_shape(&self) -> Shape {
        Shape::new(self.in_shape.frames, self.out_sx, self.out_sy, self.out_depth)
    }

    fn name(&self) -> &'static str {
        "conv2d"
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        let mut result = Vec::new();
        for filter in &mut self.filters {
            result.push(LayerDetails {
                params: &mut filter.w,
                grads: &mut filter.dw,
                l2_decay_mul: self.l2_decay_mul,
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

#[derive(serde::Serialize, serde::Deserialize)]
pub struct FullyConnLayer {
    // required
    out_depth: usize,

    // optional
    l2_decay_mul: Float,

    // computed
    num_inputs: usize,

    filters: Vec<Vol>,
    biases: Vol,
}

impl FullyConnLayer {
    pub fn builder(num_neurons: usize, in_shape: Shape) -> FullyConnLayerBuilder {
        FullyConnLayerBuilder::new(num_neurons, in_shape)
    }
}

#[typetag::serde]
impl NetLayer for FullyConnLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        debug_assert_eq!(in_act.w.len(), self.num_inputs);
        debug_assert_eq!(out_act.shape(), Shape::flat(self.out_depth));

        for (i, filter) in self.filters.iter().enumerate() {
            let a: Float = filter.w.iter().zip(&in_act.w).map(|(w, x)| w * x).sum();
            out_act.w[i] = a + self.biases.w[i];
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        in_act.dw.fill(0.0);

        for (i, filter) in self.filters.iter_mut().enumerate() {
            let chain_grad = out_act.dw[i];
            for d in 0..self.num_inputs {
                in_act.dw[d] += filter.w[d] * chain_grad;
                filter.dw[d] += in_act.w[d] * chain_grad;
            }
            self.biases.dw[i] += chain_grad;
        }
    }

    fn out_shape(&self) -> Shape {
        Shape::flat(self.out_depth)
    }

    fn name(&self) -> &'static str {
        "dense"
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        let mut result = Vec::new();
        for filter in &mut self.filters {
            result.push(LayerDetails {
                params: &mut filter.w,
                grads: &mut filter.dw,
                l2_decay_mul: self.l2_decay_mul,
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

pub struct FullyConnLayerBuilder {
    // required
    out_depth: usize,
    in_shape: Shape,

    // optional
    l2_decay_mul: Float,
    bias: Float,
}

impl FullyConnLayerBuilder {
    fn new(num_neurons: usize, in_shape: Shape) -> Self {
        Self {
            out_depth: num_neurons,
            in_shape,

            l2_decay_mul: 1.0,
            bias: 0.0,
        }
    }

    /// default: 0.0
    pub fn bias(mut self, value: Float) -> Self {
        self.bias = value;
        self
    }

    pub fn build<R: Rng + ?Sized>(self, rng: &mut R) -> Result<FullyConnLayer> {
        let num_inputs = self.in_shape.len();
        if num_inputs == 0 || self.out_depth == 0 {
            return Err(Error::Shape(format!(
                "dense layer of {} neurons over input {}",
                self.out_depth, self.in_shape
            )));
        }

        let filters = (0..self.out_depth)
            .map(|_| Vol::new(Shape::flat(num_inputs), rng))
            .collect();

        let biases = Vol::with_constant(Shape::flat(self.out_depth), self.bias);
        Ok(FullyConnLayer {
            out_depth: self.out_depth,

            l2_decay_mul: self.l2_decay_mul,

            num_inputs,
            filters,
            biases,
        })
    }
}
