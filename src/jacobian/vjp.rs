//! Matrix-free products with the complex Jacobian.
//!
//! Log ψ is carried as two real channels, so a complex weight `w_i` on
//! sample `i` enters the backward passes as
//!
//! - real part of the result: `(Re w_i, Im w_i)` on (log-amplitude, phase),
//! - imaginary part: `(Im w_i, -Re w_i)`,
//!
//! which yields `Jᴴ w`. Two backward passes suffice whatever the batch size.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::machine::{Sequential, LOG_AMPLITUDE, N_CHANNELS};

/// `Jᴴ w` for a weight vector over samples.
pub fn vector_jacobian_prod(
    network: &mut Sequential,
    samples: &DMatrix<f64>,
    w: &DVector<Complex64>,
) -> DVector<Complex64> {
    let batch = samples.nrows();
    let tape = network.forward_tape(samples);

    let seed_re = DMatrix::from_fn(batch, N_CHANNELS, |i, c| {
        if c == LOG_AMPLITUDE { w[i].re } else { w[i].im }
    });
    let seed_im = DMatrix::from_fn(batch, N_CHANNELS, |i, c| {
        if c == LOG_AMPLITUDE { w[i].im } else { -w[i].re }
    });

    network.zero_grad();
    network.backward(&tape, &seed_re, false);
    let re = network.flat_grad();
    network.zero_grad();
    network.backward(&tape, &seed_im, false);
    let im = network.flat_grad();
    network.zero_grad();

    DVector::from_fn(re.len(), |k, _| Complex64::new(re[k], im[k]))
}

/// `J v` for a complex parameter-space vector, via two forward-mode passes.
///
/// Parameters are real, so `J v = J Re(v) + i J Im(v)` and each term is one
/// real tangent propagation.
pub fn jacobian_vector_prod(
    network: &Sequential,
    samples: &DMatrix<f64>,
    v: &DVector<Complex64>,
) -> DVector<Complex64> {
    let re = network.jvp(samples, &v.map(|z| z.re));
    let im = network.jvp(samples, &v.map(|z| z.im));
    DVector::from_fn(samples.nrows(), |i, _| {
        let j_re = Complex64::new(re[(i, 0)], re[(i, 1)]);
        let j_im = Complex64::new(im[(i, 0)], im[(i, 1)]);
        j_re + Complex64::i() * j_im
    })
}
