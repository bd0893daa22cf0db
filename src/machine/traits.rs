//! Layer trait for feed-forward models.
//!
//! Batches flow through layers as `DMatrix<f64>` with one row per sample.
//! Each layer owns its parameters together with their gradient buffers, so
//! the accumulation state lives next to the values it differentiates.

use std::fmt;

use nalgebra::DMatrix;

use crate::error::Result;

/// A trainable tensor plus its gradient accumulation buffers.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: &'static str,
    pub value: DMatrix<f64>,
    /// Gradient summed over the batch, accumulated across backward passes.
    pub grad: DMatrix<f64>,
    /// Per-sample gradients from the last backward pass that retained them,
    /// shape `(batch, len)` in column-major parameter order.
    pub grad_batch: Option<DMatrix<f64>>,
}

impl Param {
    pub fn new(name: &'static str, value: DMatrix<f64>) -> Self {
        let grad = DMatrix::zeros(value.nrows(), value.ncols());
        Self {
            name,
            value,
            grad,
            grad_batch: None,
        }
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
        self.grad_batch = None;
    }

    pub fn grad_is_zero(&self) -> bool {
        self.grad_batch.is_none() && self.grad.iter().all(|g| *g == 0.0)
    }
}

/// A differentiable layer.
///
/// `backward` is reverse mode: it adds the batch-summed parameter gradient
/// into each [`Param::grad`] and returns the gradient with respect to the
/// input. With `retain_per_sample` set, layers that support it also store
/// the individual per-sample contributions in [`Param::grad_batch`].
///
/// `jvp` is forward mode: given tangents for the input and for every
/// parameter (in [`Layer::params`] order) it returns the output tangent.
pub trait Layer: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Output feature count for a given input feature count.
    fn output_dim(&self, input_dim: usize) -> Result<usize>;

    fn params(&self) -> &[Param] {
        &[]
    }

    fn params_mut(&mut self) -> &mut [Param] {
        &mut []
    }

    /// True if output row `i` depends on rows other than `i`.
    fn mixes_batch(&self) -> bool {
        false
    }

    /// True if `backward` can retain per-sample parameter gradients.
    fn supports_grad_batch(&self) -> bool {
        self.params().is_empty()
    }

    fn forward(&self, input: &DMatrix<f64>) -> DMatrix<f64>;

    fn backward(
        &mut self,
        input: &DMatrix<f64>,
        grad_output: &DMatrix<f64>,
        retain_per_sample: bool,
    ) -> DMatrix<f64>;

    fn jvp(
        &self,
        input: &DMatrix<f64>,
        tangent: &DMatrix<f64>,
        param_tangents: &[DMatrix<f64>],
    ) -> DMatrix<f64>;

    fn n_params(&self) -> usize {
        self.params().iter().map(Param::len).sum()
    }
}
