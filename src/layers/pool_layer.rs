use crate::{
    error::{Error, Result},
    vol::{Shape, Vol},
    Float,
};

use super::{LayerDetails, NetLayer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PoolPadding {
    /// only windows that fit entirely inside the input
    Valid,
    /// `ceil(in / stride)` outputs, the missing border split with the
    /// extra cell at the end
    Same,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct PoolLayer {
    // required
    sx: usize,
    in_shape: Shape,

    // optional
    sy: usize,
    stride: usize,
    padding: PoolPadding,

    // computed
    pad_x: usize,
    pad_y: usize,
    out_sx: usize,
    out_sy: usize,

    // store switches for x,y coordinates for where the max comes from, for each output neuron
    #[serde(skip)]
    switch_x: Vec<usize>,
    #[serde(skip)]
    switch_y: Vec<usize>,
}

impl PoolLayer {
    pub fn builder(sx: usize, in_shape: Shape) -> PoolLayerBuilder {
        PoolLayerBuilder::new(sx, in_shape)
    }
}

pub struct PoolLayerBuilder {
    // required
    sx: usize,
    in_shape: Shape,

    // optional
    sy: usize,
    stride: usize,
    padding: PoolPadding,
}

// output extent and leading padding along one axis
fn pooled_extent(input: usize, window: usize, stride: usize, padding: PoolPadding) -> Option<(usize, usize)> {
    if stride == 0 || window == 0 || input == 0 {
        return None;
    }
    match padding {
        PoolPadding::Valid => {
            if input < window {
                return None;
            }
            Some(((input - window) / stride + 1, 0))
        }
        PoolPadding::Same => {
            let out = input.div_ceil(stride);
            let total = ((out - 1) * stride + window).saturating_sub(input);
            Some((out, total / 2))
        }
    }
}

impl PoolLayerBuilder {
    fn new(sx: usize, in_shape: Shape) -> Self {
        Self {
            sx,
            in_shape,

            sy: sx,
            stride: sx,
            padding: PoolPadding::Valid,
        }
    }

    pub fn sy(mut self, value: usize) -> Self {
        self.sy = value;
        self
    }

    /// default: the window width
    pub fn stride(mut self, value: usize) -> Self {
        self.stride = value;
        self
    }

    /// default: [`PoolPadding::Valid`]
    pub fn padding(mut self, value: PoolPadding) -> Self {
        self.padding = value;
        self
    }

    pub fn build(self) -> Result<PoolLayer> {
        let in_shape = self.in_shape;
        let extent_x = pooled_extent(in_shape.sx, self.sx, self.stride, self.padding);
        let extent_y = pooled_extent(in_shape.sy, self.sy, self.stride, self.padding);
        let (Some((out_sx, pad_x)), Some((out_sy, pad_y))) = (extent_x, extent_y) else {
            return Err(Error::Shape(format!(
                "{}x{} pooling (stride {}, {:?}) does not fit input {in_shape}",
                self.sx, self.sy, self.stride, self.padding
            )));
        };

        let n = in_shape.frames * out_sx * out_sy * in_shape.depth;
        Ok(PoolLayer {
            sx: self.sx,
            in_shape,
            sy: self.sy,
            stride: self.stride,
            padding: self.padding,

            pad_x,
            pad_y,
            out_sx,
            out_sy,

            switch_x: vec![0; n],
            switch_y: vec![0; n],
        })
    }
}

#[typetag::serde]
impl NetLayer for PoolLayer {
    fn forward(&mut self, in_act: &Vol, out_act: &mut Vol, _is_training: bool) {
        let v = in_act;

        let n_switches = out_act.w.len();
        if self.switch_x.len() != n_switches {
            self.switch_x = vec![0; n_switches];
            self.switch_y = vec![0; n_switches];
        }

        let mut n = 0; // a counter for switches
        for t in 0..v.frames() {
            for d in 0..self.in_shape.depth {
                let mut x = -(self.pad_x as isize);

                for ax in 0..self.out_sx {
                    let mut y = -(self.pad_y as isize);

                    for ay in 0..self.out_sy {
                        let mut a = Float::NEG_INFINITY;
                        let mut winx = -1;
                        let mut winy = -1;

                        for fx in 0..self.sx as isize {
                            for fy in 0..self.sy as isize {
                                let oy = y + fy;
                                let ox = x + fx;

                                if oy >= 0 && oy < v.sy() as isize && ox >= 0 && ox < v.sx() as isize {
                                    let v = v.get(t, ox as usize, oy as usize, d);
                                    // the first in-bounds cell seeds the max, so an
                                    // all-NaN window still gets a valid switch
                                    if winx < 0 || v > a {
                                        a = v;
                                        winx = ox;
                                        winy = oy;
                                    }
                                }
                            }
                        }

                        debug_assert!(winx >= 0);
                        debug_assert!(winy >= 0);

                        self.switch_x[n] = winx as usize;
                        self.switch_y[n] = winy as usize;
                        n += 1;
                        out_act.set(t, ax, ay, d, a);

                        y += self.stride as isize;
                    }

                    x += self.stride as isize;
                }
            }
        }
    }

    fn backward(&mut self, in_act: &mut Vol, out_act: &Vol) {
        // pooling layers have no parameters, so simply compute
        // gradient wrt data here
        let v = in_act;

        debug_assert_eq!(v.w.len(), v.dw.len());

        v.dw.fill(0.0);

        let mut n = 0;
        for t in 0..v.frames() {
            for d in 0..self.in_shape.depth {
                for ax in 0..self.out_sx {
                    for ay in 0..self.out_sy {
                        let chain_grad = out_act.get_gradient(t, ax, ay, d);
                        v.add_gradient(t, self.switch_x[n], self.switch_y[n], d, chain_grad);
                        n += 1;
                    }
                }
            }
        }
    }

    fn out_shape(&self) -> Shape {
        Shape::new(self.in_shape.frames, self.out_sx, self.out_sy, self.in_shape.depth)
    }

    fn name(&self) -> &'static str {
        match self.padding {
            PoolPadding::Valid => "max_pool",
            PoolPadding::Same => "max_pool_same",
        }
    }

    fn params_and_grads(&mut self) -> Vec<LayerDetails<'_>> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_and_same_extents() {
        assert_eq!(pooled_extent(64, 4, 4, PoolPadding::Valid), Some((16, 0)));
        assert_eq!(pooled_extent(2, 2, 2, PoolPadding::Valid), Some((1, 0)));
        assert_eq!(pooled_extent(1, 2, 2, PoolPadding::Valid), None);
        assert_eq!(pooled_extent(62, 2, 2, PoolPadding::Same), Some((31, 0)));
        assert_eq!(pooled_extent(29, 2, 2, PoolPadding::Same), Some((15, 0)));
        assert_eq!(pooled_extent(3, 3, 1, PoolPadding::Same), Some((3, 1)));
    }

    #[test]
    fn same_padding_routes_gradient_to_the_max() {
        // one frame, 3x1, values 1 5 2, window 2: windows {1,5} and {2}
        let mut layer = PoolLayer::builder(2, Shape::new(1, 3, 1, 1))
            .sy(1)
            .padding(PoolPadding::Same)
            .build()
            .unwrap();
        assert_eq!(layer.out_shape(), Shape::new(1, 2, 1, 1));

        let mut input = Vol::zeros(Shape::new(1, 3, 1, 1));
        input.w.copy_from_slice(&[1.0, 5.0, 2.0]);
        let mut out = Vol::zeros(layer.out_shape());
        layer.forward(&input, &mut out, true);
        assert_eq!(out.w, vec![5.0, 2.0]);

        out.dw = vec![1.0, 3.0];
        layer.backward(&mut input, &out);
        assert_eq!(input.dw, vec![0.0, 1.0, 3.0]);
    }

    #[test]
    fn nan_window_keeps_a_valid_switch() {
        let mut layer = PoolLayer::builder(2, Shape::new(1, 2, 2, 1)).build().unwrap();
        let mut input = Vol::with_constant(Shape::new(1, 2, 2, 1), Float::NAN);
        let mut out = Vol::zeros(layer.out_shape());
        layer.forward(&input, &mut out, true);
        assert!(out.w[0].is_nan());

        out.dw = vec![2.0];
        layer.backward(&mut input, &out);
        assert_eq!(input.dw, vec![2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn frames_are_pooled_independently() {
        let mut layer = PoolLayer::builder(2, Shape::new(2, 2, 2, 1)).build().unwrap();
        let mut input = Vol::zeros(Shape::new(2, 2, 2, 1));
        input.w.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 8.0, 7.0, 6.0, 5.0]);

        let mut out = Vol::zeros(layer.out_shape());
        layer.forward(&input, &mut out, false);
        assert_eq!(out.shape(), Shape::new(2, 1, 1, 1));
        assert_eq!(out.w, vec![4.0, 8.0]);
    }
}
