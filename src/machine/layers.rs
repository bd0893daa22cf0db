//! Concrete layers: affine, convolutional, diagonal, activation and a
//! batch-centering layer.

use nalgebra::DMatrix;

use super::traits::{Layer, Param};
use crate::error::{Error, Result};

fn expect_dim(layer: &'static str, expected: usize, input_dim: usize) -> Result<()> {
    if expected != input_dim {
        return Err(Error::InvalidNetwork(format!(
            "{} expects {} input features, got {}",
            layer, expected, input_dim
        )));
    }
    Ok(())
}

/// Affine layer: `y = x Wᵀ + b`.
#[derive(Clone, Debug)]
pub struct Dense {
    params: [Param; 2],
}

impl Dense {
    pub fn new(in_dim: usize, out_dim: usize) -> Self {
        Self {
            params: [
                Param::new("weight", DMatrix::zeros(out_dim, in_dim)),
                Param::new("bias", DMatrix::zeros(out_dim, 1)),
            ],
        }
    }

    /// Weight of shape `(out, in)` and bias of shape `(out, 1)`.
    pub fn from_parts(weight: DMatrix<f64>, bias: DMatrix<f64>) -> Result<Self> {
        if bias.shape() != (weight.nrows(), 1) {
            return Err(Error::InvalidNetwork(format!(
                "Dense bias has shape {:?}, expected ({}, 1)",
                bias.shape(),
                weight.nrows()
            )));
        }
        Ok(Self {
            params: [Param::new("weight", weight), Param::new("bias", bias)],
        })
    }

    fn in_dim(&self) -> usize {
        self.params[0].value.ncols()
    }

    fn out_dim(&self) -> usize {
        self.params[0].value.nrows()
    }

    fn add_bias(y: &mut DMatrix<f64>, bias: &DMatrix<f64>) {
        for i in 0..y.nrows() {
            for o in 0..y.ncols() {
                y[(i, o)] += bias[o];
            }
        }
    }
}

impl Layer for Dense {
    fn name(&self) -> &'static str {
        "Dense"
    }

    fn output_dim(&self, input_dim: usize) -> Result<usize> {
        expect_dim("Dense", self.in_dim(), input_dim)?;
        Ok(self.out_dim())
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Param] {
        &mut self.params
    }

    fn supports_grad_batch(&self) -> bool {
        true
    }

    fn forward(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        let mut y = input * self.params[0].value.transpose();
        Self::add_bias(&mut y, &self.params[1].value);
        y
    }

    fn backward(
        &mut self,
        input: &DMatrix<f64>,
        grad_output: &DMatrix<f64>,
        retain_per_sample: bool,
    ) -> DMatrix<f64> {
        let (n_out, n_in) = (self.out_dim(), self.in_dim());
        let batch = input.nrows();

        let gw = grad_output.transpose() * input;
        let gb = DMatrix::from_fn(n_out, 1, |o, _| grad_output.column(o).sum());
        self.params[0].grad += &gw;
        self.params[1].grad += &gb;

        if retain_per_sample {
            // weight entry (o, j) sits at flat index o + j * n_out
            let gw_batch = DMatrix::from_fn(batch, n_out * n_in, |i, k| {
                grad_output[(i, k % n_out)] * input[(i, k / n_out)]
            });
            self.params[0].grad_batch = Some(gw_batch);
            self.params[1].grad_batch = Some(grad_output.clone());
        }

        grad_output * &self.params[0].value
    }

    fn jvp(
        &self,
        input: &DMatrix<f64>,
        tangent: &DMatrix<f64>,
        param_tangents: &[DMatrix<f64>],
    ) -> DMatrix<f64> {
        let mut dy = tangent * self.params[0].value.transpose()
            + input * param_tangents[0].transpose();
        Self::add_bias(&mut dy, &param_tangents[1]);
        dy
    }
}

/// Per-feature scaling without bias: `y_ij = x_ij s_j`.
#[derive(Clone, Debug)]
pub struct Diagonal {
    params: [Param; 1],
}

impl Diagonal {
    pub fn new(dim: usize) -> Self {
        Self::from_scale(DMatrix::from_element(dim, 1, 1.0))
    }

    pub fn from_scale(scale: DMatrix<f64>) -> Self {
        Self {
            params: [Param::new("scale", scale)],
        }
    }
}

impl Layer for Diagonal {
    fn name(&self) -> &'static str {
        "Diagonal"
    }

    fn output_dim(&self, input_dim: usize) -> Result<usize> {
        expect_dim("Diagonal", self.params[0].len(), input_dim)?;
        Ok(input_dim)
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Param] {
        &mut self.params
    }

    fn supports_grad_batch(&self) -> bool {
        true
    }

    fn forward(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        let s = &self.params[0].value;
        DMatrix::from_fn(input.nrows(), input.ncols(), |i, j| input[(i, j)] * s[j])
    }

    fn backward(
        &mut self,
        input: &DMatrix<f64>,
        grad_output: &DMatrix<f64>,
        retain_per_sample: bool,
    ) -> DMatrix<f64> {
        let per_sample = grad_output.component_mul(input);
        for j in 0..input.ncols() {
            self.params[0].grad[j] += per_sample.column(j).sum();
        }
        if retain_per_sample {
            self.params[0].grad_batch = Some(per_sample);
        }
        let s = &self.params[0].value;
        DMatrix::from_fn(input.nrows(), input.ncols(), |i, j| grad_output[(i, j)] * s[j])
    }

    fn jvp(
        &self,
        input: &DMatrix<f64>,
        tangent: &DMatrix<f64>,
        param_tangents: &[DMatrix<f64>],
    ) -> DMatrix<f64> {
        let s = &self.params[0].value;
        let ds = &param_tangents[0];
        DMatrix::from_fn(input.nrows(), input.ncols(), |i, j| {
            tangent[(i, j)] * s[j] + input[(i, j)] * ds[j]
        })
    }
}

/// Periodic one-dimensional convolution over lattice sites.
///
/// Features are laid out channel-major: feature `c * n_sites + l` is
/// channel `c` at site `l`. The kernel has shape
/// `(out_channels, in_channels * kernel_size)`.
#[derive(Clone, Debug)]
pub struct Conv1d {
    n_sites: usize,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    params: [Param; 2],
}

impl Conv1d {
    pub fn new(n_sites: usize, in_channels: usize, out_channels: usize, kernel_size: usize) -> Self {
        Self {
            n_sites,
            in_channels,
            out_channels,
            kernel_size,
            params: [
                Param::new("kernel", DMatrix::zeros(out_channels, in_channels * kernel_size)),
                Param::new("bias", DMatrix::zeros(out_channels, 1)),
            ],
        }
    }

    /// Cross-correlate every row of `x` with `kernel`, without bias.
    fn correlate(&self, x: &DMatrix<f64>, kernel: &DMatrix<f64>) -> DMatrix<f64> {
        let l = self.n_sites;
        let ks = self.kernel_size;
        let mut y = DMatrix::zeros(x.nrows(), self.out_channels * l);
        for i in 0..x.nrows() {
            for o in 0..self.out_channels {
                for pos in 0..l {
                    let mut acc = 0.0;
                    for c in 0..self.in_channels {
                        for k in 0..ks {
                            acc += kernel[(o, c * ks + k)] * x[(i, c * l + (pos + k) % l)];
                        }
                    }
                    y[(i, o * l + pos)] = acc;
                }
            }
        }
        y
    }

    fn add_bias(&self, y: &mut DMatrix<f64>, bias: &DMatrix<f64>) {
        for i in 0..y.nrows() {
            for o in 0..self.out_channels {
                for pos in 0..self.n_sites {
                    y[(i, o * self.n_sites + pos)] += bias[o];
                }
            }
        }
    }
}

impl Layer for Conv1d {
    fn name(&self) -> &'static str {
        "Conv1d"
    }

    fn output_dim(&self, input_dim: usize) -> Result<usize> {
        expect_dim("Conv1d", self.in_channels * self.n_sites, input_dim)?;
        if self.kernel_size == 0 || self.kernel_size > self.n_sites {
            return Err(Error::InvalidNetwork(format!(
                "Conv1d kernel size {} must be in 1..={}",
                self.kernel_size, self.n_sites
            )));
        }
        Ok(self.out_channels * self.n_sites)
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Param] {
        &mut self.params
    }

    fn supports_grad_batch(&self) -> bool {
        true
    }

    fn forward(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        let mut y = self.correlate(input, &self.params[0].value);
        self.add_bias(&mut y, &self.params[1].value);
        y
    }

    fn backward(
        &mut self,
        input: &DMatrix<f64>,
        grad_output: &DMatrix<f64>,
        retain_per_sample: bool,
    ) -> DMatrix<f64> {
        let l = self.n_sites;
        let ks = self.kernel_size;
        let (n_in, n_out) = (self.in_channels, self.out_channels);
        let batch = input.nrows();

        let mut gk = DMatrix::zeros(n_out, n_in * ks);
        let mut gb = DMatrix::zeros(n_out, 1);
        let mut gk_batch = retain_per_sample.then(|| DMatrix::zeros(batch, n_out * n_in * ks));
        let mut gb_batch = retain_per_sample.then(|| DMatrix::zeros(batch, n_out));
        let mut gx = DMatrix::zeros(batch, n_in * l);

        let kernel = &self.params[0].value;
        for i in 0..batch {
            for o in 0..n_out {
                for pos in 0..l {
                    let g = grad_output[(i, o * l + pos)];
                    if g == 0.0 {
                        continue;
                    }
                    gb[o] += g;
                    if let Some(m) = gb_batch.as_mut() {
                        m[(i, o)] += g;
                    }
                    for c in 0..n_in {
                        for k in 0..ks {
                            let col = c * ks + k;
                            let site = c * l + (pos + k) % l;
                            let contrib = g * input[(i, site)];
                            gk[(o, col)] += contrib;
                            if let Some(m) = gk_batch.as_mut() {
                                m[(i, o + col * n_out)] += contrib;
                            }
                            gx[(i, site)] += g * kernel[(o, col)];
                        }
                    }
                }
            }
        }

        self.params[0].grad += &gk;
        self.params[1].grad += &gb;
        if retain_per_sample {
            self.params[0].grad_batch = gk_batch;
            self.params[1].grad_batch = gb_batch;
        }
        gx
    }

    fn jvp(
        &self,
        input: &DMatrix<f64>,
        tangent: &DMatrix<f64>,
        param_tangents: &[DMatrix<f64>],
    ) -> DMatrix<f64> {
        let mut dy = self.correlate(tangent, &self.params[0].value)
            + self.correlate(input, &param_tangents[0]);
        self.add_bias(&mut dy, &param_tangents[1]);
        dy
    }
}

/// `log(cosh(x))` up to a constant, written as `-x + softplus(2x)`.
#[derive(Clone, Debug, Default)]
pub struct LogCosh;

fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

impl Layer for LogCosh {
    fn name(&self) -> &'static str {
        "LogCosh"
    }

    fn output_dim(&self, input_dim: usize) -> Result<usize> {
        Ok(input_dim)
    }

    fn forward(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        input.map(|x| -x + softplus(2.0 * x))
    }

    fn backward(
        &mut self,
        input: &DMatrix<f64>,
        grad_output: &DMatrix<f64>,
        _retain_per_sample: bool,
    ) -> DMatrix<f64> {
        grad_output.component_mul(&input.map(f64::tanh))
    }

    fn jvp(
        &self,
        input: &DMatrix<f64>,
        tangent: &DMatrix<f64>,
        _param_tangents: &[DMatrix<f64>],
    ) -> DMatrix<f64> {
        tangent.component_mul(&input.map(f64::tanh))
    }
}

/// Learnable scale and shift around the batch mean:
/// `y_ij = s_j (x_ij - mean_i x_ij) + t_j`.
///
/// Every output row depends on the whole batch, so per-sample gradients
/// cannot be read off a single backward pass.
#[derive(Clone, Debug)]
pub struct BatchCenter {
    params: [Param; 2],
}

impl BatchCenter {
    pub fn new(dim: usize) -> Self {
        Self {
            params: [
                Param::new("scale", DMatrix::from_element(dim, 1, 1.0)),
                Param::new("shift", DMatrix::zeros(dim, 1)),
            ],
        }
    }

    fn centered(x: &DMatrix<f64>) -> DMatrix<f64> {
        let n = x.nrows() as f64;
        let means: Vec<f64> = x.column_iter().map(|c| c.sum() / n).collect();
        DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] - means[j])
    }
}

impl Layer for BatchCenter {
    fn name(&self) -> &'static str {
        "BatchCenter"
    }

    fn output_dim(&self, input_dim: usize) -> Result<usize> {
        expect_dim("BatchCenter", self.params[0].len(), input_dim)?;
        Ok(input_dim)
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Param] {
        &mut self.params
    }

    fn mixes_batch(&self) -> bool {
        true
    }

    fn supports_grad_batch(&self) -> bool {
        false
    }

    fn forward(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        let xc = Self::centered(input);
        let (s, t) = (&self.params[0].value, &self.params[1].value);
        DMatrix::from_fn(xc.nrows(), xc.ncols(), |i, j| s[j] * xc[(i, j)] + t[j])
    }

    fn backward(
        &mut self,
        input: &DMatrix<f64>,
        grad_output: &DMatrix<f64>,
        _retain_per_sample: bool,
    ) -> DMatrix<f64> {
        let xc = Self::centered(input);
        for j in 0..input.ncols() {
            self.params[0].grad[j] += grad_output.column(j).dot(&xc.column(j));
            self.params[1].grad[j] += grad_output.column(j).sum();
        }
        let gc = Self::centered(grad_output);
        let s = &self.params[0].value;
        DMatrix::from_fn(gc.nrows(), gc.ncols(), |i, j| s[j] * gc[(i, j)])
    }

    fn jvp(
        &self,
        input: &DMatrix<f64>,
        tangent: &DMatrix<f64>,
        param_tangents: &[DMatrix<f64>],
    ) -> DMatrix<f64> {
        let xc = Self::centered(input);
        let dxc = Self::centered(tangent);
        let s = &self.params[0].value;
        let (ds, dt) = (&param_tangents[0], &param_tangents[1]);
        DMatrix::from_fn(xc.nrows(), xc.ncols(), |i, j| {
            ds[j] * xc[(i, j)] + s[j] * dxc[(i, j)] + dt[j]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn input() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 4, &[
            1.0, -1.0, 1.0, 1.0,
            -1.0, -1.0, 1.0, -1.0,
            0.5, 0.2, -0.3, 0.9,
        ])
    }

    fn filled(layer: &mut dyn Layer, seed: f64) {
        for (p_idx, p) in layer.params_mut().iter_mut().enumerate() {
            let (r, c) = p.value.shape();
            p.value = DMatrix::from_fn(r, c, |i, j| {
                (seed + 0.37 * (i as f64) - 0.21 * (j as f64) + 0.13 * p_idx as f64).sin()
            });
        }
    }

    /// Finite-difference check of backward (summed gradient against a fixed
    /// cotangent) and of the parameter part of jvp.
    fn check_layer(layer: &mut dyn Layer) {
        let x = input();
        let y = layer.forward(&x);
        let cot = DMatrix::from_fn(y.nrows(), y.ncols(), |i, j| 0.3 + 0.1 * i as f64 - 0.05 * j as f64);
        let h = 1e-6;

        let gx = layer.backward(&x, &cot, false);
        let grads: Vec<DMatrix<f64>> = layer.params().iter().map(|p| p.grad.clone()).collect();

        let objective = |l: &dyn Layer, x: &DMatrix<f64>| l.forward(x).component_mul(&cot).sum();

        for p_idx in 0..layer.params().len() {
            for k in 0..layer.params()[p_idx].len() {
                let orig = layer.params()[p_idx].value[k];
                layer.params_mut()[p_idx].value[k] = orig + h;
                let fp = objective(&*layer, &x);
                layer.params_mut()[p_idx].value[k] = orig - h;
                let fm = objective(&*layer, &x);
                layer.params_mut()[p_idx].value[k] = orig;
                assert_relative_eq!(grads[p_idx][k], (fp - fm) / (2.0 * h), epsilon = 1e-6);
            }
        }

        for k in 0..x.len() {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[k] += h;
            xm[k] -= h;
            let numerical = (objective(&*layer, &xp) - objective(&*layer, &xm)) / (2.0 * h);
            assert_relative_eq!(gx[k], numerical, epsilon = 1e-6);
        }

        // jvp against the same directional derivative
        let dx = DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| 0.1 * (i + j) as f64 - 0.2);
        let dps: Vec<DMatrix<f64>> = layer
            .params()
            .iter()
            .map(|p| DMatrix::from_fn(p.value.nrows(), p.value.ncols(), |i, j| 0.05 * (1 + i + 2 * j) as f64))
            .collect();
        let dy = layer.jvp(&x, &dx, &dps);
        let mut shifted = |sign: f64| {
            let originals: Vec<DMatrix<f64>> = layer.params().iter().map(|p| p.value.clone()).collect();
            for (p, dp) in layer.params_mut().iter_mut().zip(dps.iter()) {
                p.value += dp * (sign * h);
            }
            let out = layer.forward(&(&x + &dx * (sign * h)));
            for (p, orig) in layer.params_mut().iter_mut().zip(originals) {
                p.value = orig;
            }
            out
        };
        let numerical = (shifted(1.0) - shifted(-1.0)) / (2.0 * h);
        for k in 0..dy.len() {
            assert_relative_eq!(dy[k], numerical[k], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_dense_gradients() {
        let mut layer = Dense::new(4, 3);
        filled(&mut layer, 0.4);
        check_layer(&mut layer);
    }

    #[test]
    fn test_diagonal_gradients() {
        let mut layer = Diagonal::new(4);
        filled(&mut layer, 1.1);
        check_layer(&mut layer);
    }

    #[test]
    fn test_conv1d_gradients() {
        let mut layer = Conv1d::new(2, 2, 3, 2);
        filled(&mut layer, -0.3);
        check_layer(&mut layer);
    }

    #[test]
    fn test_log_cosh_gradients() {
        let mut layer = LogCosh;
        check_layer(&mut layer);
        let y = layer.forward(&DMatrix::from_element(1, 1, 0.0));
        assert_relative_eq!(y[0], std::f64::consts::LN_2, epsilon = 1e-12);
    }

    #[test]
    fn test_batch_center_gradients() {
        let mut layer = BatchCenter::new(4);
        filled(&mut layer, 2.0);
        check_layer(&mut layer);
        assert!(layer.mixes_batch());
        assert!(!layer.supports_grad_batch());
    }

    #[test]
    fn test_dense_grad_batch_sums_to_grad() {
        let mut layer = Dense::new(4, 2);
        filled(&mut layer, 0.9);
        let x = input();
        let cot = DMatrix::from_fn(3, 2, |i, j| 1.0 + i as f64 * j as f64);
        layer.backward(&x, &cot, true);
        for p in layer.params() {
            let batch = p.grad_batch.as_ref().unwrap();
            assert_eq!(batch.shape(), (3, p.len()));
            for k in 0..p.len() {
                assert_relative_eq!(batch.column(k).sum(), p.grad[k], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_dimension_checks() {
        assert!(Dense::new(3, 2).output_dim(4).is_err());
        assert_eq!(Conv1d::new(4, 1, 2, 3).output_dim(4).unwrap(), 8);
        assert!(Conv1d::new(2, 1, 1, 3).output_dim(2).is_err());
    }

    #[test]
    fn test_dense_from_parts() {
        let weight = DMatrix::from_row_slice(2, 4, &[0.1, 0.2, 0.3, 0.4, -0.1, -0.2, -0.3, -0.4]);
        let bias = DMatrix::from_column_slice(2, 1, &[0.5, -0.5]);
        let dense = Dense::from_parts(weight.clone(), bias).unwrap();
        assert_eq!(dense.output_dim(4).unwrap(), 2);
        let y = dense.forward(&input());
        assert_relative_eq!(y[(0, 0)], 0.1 - 0.2 + 0.3 + 0.4 + 0.5, epsilon = 1e-12);

        let short = Dense::from_parts(weight.clone(), DMatrix::zeros(3, 1));
        assert!(matches!(short, Err(Error::InvalidNetwork(_))));
        let wide = Dense::from_parts(weight, DMatrix::zeros(2, 2));
        assert!(matches!(wide, Err(Error::InvalidNetwork(_))));
    }
}
