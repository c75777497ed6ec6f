//! Weight initialization routines.
//!
//! Pure functions producing initial tensors from a shape and a [`SimpleRng`].

use ndarray::{Array, Array2, Dimension, ShapeBuilder};

use crate::utils::rng::SimpleRng;

/// Xavier/Glorot uniform initialization for a `[fan_in, fan_out]` weight matrix.
///
/// Values are sampled from a uniform distribution in `[-limit, limit]`
/// where `limit = sqrt(6 / (fan_in + fan_out))`.
///
/// # Example
///
/// ```
/// use recurring_nn::utils::init::xavier;
/// use recurring_nn::utils::rng::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let w = xavier([100, 50], &mut rng);
/// let limit = (6.0f64 / 150.0).sqrt();
/// assert!(w.iter().all(|v| v.abs() <= limit));
/// ```
pub fn xavier(shape: [usize; 2], rng: &mut SimpleRng) -> Array2<f64> {
    let [fan_in, fan_out] = shape;
    let denom = (fan_in + fan_out).max(1) as f64;
    let limit = (6.0 / denom).sqrt();
    Array2::from_shape_simple_fn(shape, || rng.gen_range_f64(-limit, limit))
}

/// Gaussian initialization with the given mean and standard deviation.
pub fn gauss<Sh, D>(mean: f64, std: f64, shape: Sh, rng: &mut SimpleRng) -> Array<f64, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    Array::from_shape_simple_fn(shape, || mean + std * rng.next_gaussian())
}
