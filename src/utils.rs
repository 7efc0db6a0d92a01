use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::Float;

// Independent random streams derived from one run seed, so that changing
// how many numbers one consumer draws never shifts another.
pub const SPLIT_STREAM: u64 = 0;
pub const INIT_STREAM: u64 = 1;
pub const SHUFFLE_STREAM: u64 = 2;

pub fn seeded_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

pub fn randn<R: Rng + ?Sized>(rng: &mut R, mu: Float, std: Float) -> Float {
    let z: Float = rng.sample(StandardNormal);
    mu + z * std
}

pub fn zeros(n: usize) -> Vec<Float> {
    vec![0.0; n]
}

pub fn sigmoid(x: Float) -> Float {
    1.0 / (1.0 + (-x).exp())
}

// index of the largest value of a non-empty array, first one wins on ties
pub fn argmax(values: &[Float]) -> Option<usize> {
    if values.is_empty() {
        return None;
    }

    let mut maxv = values[0];
    let mut maxi = 0;
    for (i, value) in values.iter().copied().enumerate() {
        if value > maxv {
            maxv = value;
            maxi = i;
        }
    }
    Some(maxi)
}

pub fn one_hot(index: usize, width: usize) -> Vec<Float> {
    let mut v = zeros(width);
    if index < width {
        v[index] = 1.0;
    }
    v
}
