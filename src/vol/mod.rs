mod serde;

use std::fmt;

use image::RgbImage;
use rand::Rng;

use crate::{utils::randn, Float};

/// Extent of a [`Vol`]: `frames` planes of `sx` by `sy` cells with `depth`
/// channels each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ::serde::Serialize, ::serde::Deserialize)]
pub struct Shape {
    pub frames: usize,
    pub sx: usize,
    pub sy: usize,
    pub depth: usize,
}

impl Shape {
    pub fn new(frames: usize, sx: usize, sy: usize, depth: usize) -> Self {
        Self {
            frames,
            sx,
            sy,
            depth,
        }
    }

    /// A single frame holding a plain vector.
    pub fn flat(depth: usize) -> Self {
        Self::new(1, 1, 1, depth)
    }

    pub fn frame_len(&self) -> usize {
        self.sx * self.sy * self.depth
    }

    pub fn len(&self) -> usize {
        self.frames * self.frame_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.frames, self.sy, self.sx, self.depth
        )
    }
}

// Vol is the basic building block of all data in a net.
// It is a sequence of `frames` 3D volumes, each with a width (sx),
// height (sy) and depth. A still image or a plain vector is simply a
// Vol with one frame. It holds activations, filters and weights, and
// stores the gradients w.r.t. the data alongside in `dw`.
#[derive(Debug, Clone, ::serde::Serialize)]
pub struct Vol {
    frames: usize,
    sx: usize,
    sy: usize,
    depth: usize,

    pub w: Vec<Float>,

    #[serde(skip)]
    pub dw: Vec<Float>,
}

impl From<Vec<Float>> for Vol {
    fn from(value: Vec<Float>) -> Self {
        let n = value.len();
        Self {
            frames: 1,
            sx: 1,
            sy: 1,
            depth: n,
            w: value,
            dw: vec![0.0; n],
        }
    }
}

impl From<&[Float]> for Vol {
    fn from(value: &[Float]) -> Self {
        Self::from(value.to_vec())
    }
}

impl Vol {
    pub fn new<R: Rng + ?Sized>(shape: Shape, rng: &mut R) -> Self {
        // weight normalization is done to equalize the output
        // variance of every neuron, otherwise neurons with a lot
        // of incoming connections have outputs of larger variance
        let scale = (1.0 / (shape.len().max(1) as Float)).sqrt();
        Self::randn(shape, scale, rng)
    }

    pub fn randn<R: Rng + ?Sized>(shape: Shape, std: Float, rng: &mut R) -> Self {
        let n = shape.len();
        let w = (0..n).map(|_| randn(rng, 0.0, std)).collect();
        Self::from_parts(shape, w)
    }

    pub fn with_constant(shape: Shape, constant: Float) -> Self {
        Self::from_parts(shape, vec![constant; shape.len()])
    }

    pub fn zeros(shape: Shape) -> Self {
        Self::with_constant(shape, 0.0)
    }

    fn from_parts(shape: Shape, w: Vec<Float>) -> Self {
        debug_assert_eq!(shape.len(), w.len());
        let dw = vec![0.0; w.len()];
        Self {
            frames: shape.frames,
            sx: shape.sx,
            sy: shape.sy,
            depth: shape.depth,
            w,
            dw,
        }
    }

    /// Builds a `(frames.len(), width, height, 3)` volume, scaling 8-bit
    /// channels to [0, 1]. All frames must share the first frame's size.
    ///
    /// The result is meant as net input only, so it carries no gradient
    /// buffer (`dw` is empty).
    pub fn from_rgb_frames(frames: &[RgbImage]) -> Self {
        let (width, height) = frames
            .first()
            .map(|frame| frame.dimensions())
            .unwrap_or((0, 0));

        let shape = Shape::new(frames.len(), width as usize, height as usize, 3);
        let mut w = Vec::with_capacity(shape.len());
        for frame in frames {
            debug_assert_eq!(frame.dimensions(), (width, height));
            w.extend(frame.as_raw().iter().map(|&p| Float::from(p) / 255.0));
        }

        Self {
            frames: shape.frames,
            sx: shape.sx,
            sy: shape.sy,
            depth: shape.depth,
            w,
            dw: Vec::new(),
        }
    }

    fn get_index(&self, t: usize, x: usize, y: usize, d: usize) -> usize {
        (((self.sy * t) + y) * self.sx + x) * self.depth + d
    }

    pub fn get(&self, t: usize, x: usize, y: usize, d: usize) -> Float {
        let index = self.get_index(t, x, y, d);
        self.w[index]
    }

    pub fn set(&mut self, t: usize, x: usize, y: usize, d: usize, value: Float) {
        let index = self.get_index(t, x, y, d);
        self.w[index] = value
    }

    pub fn get_gradient(&self, t: usize, x: usize, y: usize, d: usize) -> Float {
        let index = self.get_index(t, x, y, d);
        self.dw[index]
    }

    pub fn add_gradient(&mut self, t: usize, x: usize, y: usize, d: usize, value: Float) {
        let index = self.get_index(t, x, y, d);
        self.dw[index] += value
    }

    pub fn frame(&self, t: usize) -> &[Float] {
        let n = self.shape().frame_len();
        &self.w[t * n..(t + 1) * n]
    }

    pub fn shape(&self) -> Shape {
        Shape::new(self.frames, self.sx, self.sy, self.depth)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }
    pub fn sx(&self) -> usize {
        self.sx
    }
    pub fn sy(&self) -> usize {
        self.sy
    }
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::{Shape, Vol};
    use crate::utils::seeded_rng;

    #[test]
    fn index_layout_is_frame_major() {
        let mut vol = Vol::zeros(Shape::new(2, 3, 2, 4));
        vol.set(1, 2, 1, 3, 7.0);

        assert_eq!(vol.w.len(), 48);
        assert_eq!(vol.w[47], 7.0);
        assert_eq!(vol.frame(1)[23], 7.0);
        assert_eq!(vol.get(1, 2, 1, 3), 7.0);
    }

    #[test]
    fn rgb_frames_are_normalized() {
        let frames = vec![
            RgbImage::from_pixel(2, 2, Rgb([0, 255, 51])),
            RgbImage::from_pixel(2, 2, Rgb([255, 0, 102])),
        ];
        let vol = Vol::from_rgb_frames(&frames);

        assert_eq!(vol.shape(), Shape::new(2, 2, 2, 3));
        assert_eq!(vol.get(0, 1, 1, 1), 1.0);
        assert_eq!(vol.get(1, 0, 0, 0), 1.0);
        assert!((vol.get(1, 0, 1, 2) - 0.4).abs() < 1e-6);
        assert!(vol.w.iter().all(|w| (0.0..=1.0).contains(w)));
        assert!(vol.dw.is_empty());
    }

    #[test]
    fn deserialized_vol_gets_gradient_buffer() {
        let mut rng = seeded_rng(1, 0);
        let vol = Vol::new(Shape::new(2, 3, 3, 2), &mut rng);

        let json = serde_json::to_string(&vol).unwrap();
        let restored: Vol = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.shape(), vol.shape());
        assert_eq!(restored.w, vol.w);
        assert_eq!(restored.dw.len(), vol.w.len());

        let bytes = bincode::serialize(&vol).unwrap();
        let restored: Vol = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.w, vol.w);
        assert_eq!(restored.dw.len(), vol.w.len());
    }
}
