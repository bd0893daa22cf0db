//! Monte Carlo statistics of a local estimator.

use std::fmt;

use num_complex::Complex64;

/// Summary of a sampled observable.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub mean: Complex64,
    pub variance: f64,
    pub error_of_mean: f64,
    /// Integrated autocorrelation time of the complex series.
    pub tau_corr: f64,
}

impl Stats {
    pub fn from_samples(values: &[Complex64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                mean: Complex64::new(f64::NAN, f64::NAN),
                variance: f64::NAN,
                error_of_mean: f64::NAN,
                tau_corr: f64::NAN,
            };
        }
        let mean = values.iter().sum::<Complex64>() / n as f64;
        let centered: Vec<Complex64> = values.iter().map(|z| z - mean).collect();
        let variance = centered.iter().map(|z| z.norm_sqr()).sum::<f64>() / n as f64;

        let tau_corr = autocorrelation_time(&centered, variance);
        let error_of_mean = blocked_error(values, tau_corr).unwrap_or_else(|| (variance / n as f64).sqrt());

        Self { mean, variance, error_of_mean, tau_corr }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} ± {:.6} [σ²={:.6}, τ={:.2}]",
            self.mean.re, self.error_of_mean, self.variance, self.tau_corr
        )?;
        if self.mean.im != 0.0 {
            write!(f, " (im {:+.2e})", self.mean.im)?;
        }
        Ok(())
    }
}

/// Integrated autocorrelation time `1 + 2 Σ_t ρ(t)` of a mean-free series,
/// where `ρ(t) = Re ⟨z̄_i z_{i+t}⟩ / σ²`. The sum stops at the first
/// negative `ρ` (initial positive sequence).
fn autocorrelation_time(centered: &[Complex64], variance: f64) -> f64 {
    if variance == 0.0 {
        return 1.0;
    }
    let n = centered.len();
    let rho = |lag: usize| {
        let cov: f64 = centered
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| (a.conj() * b).re)
            .sum();
        cov / ((n - lag) as f64 * variance)
    };
    1.0 + 2.0 * (1..n / 2).map(rho).take_while(|r| *r >= 0.0).sum::<f64>()
}

/// Error of the mean from blocks of `⌈2τ⌉` samples; `None` with fewer than
/// two blocks.
fn blocked_error(values: &[Complex64], tau: f64) -> Option<f64> {
    let block_size = ((2.0 * tau).ceil() as usize).max(1);
    let block_means: Vec<Complex64> = values
        .chunks_exact(block_size)
        .map(|block| block.iter().sum::<Complex64>() / block_size as f64)
        .collect();
    if block_means.len() < 2 {
        return None;
    }

    let n_blocks = block_means.len() as f64;
    let mean = block_means.iter().sum::<Complex64>() / n_blocks;
    let variance = block_means.iter().map(|z| (z - mean).norm_sqr()).sum::<f64>() / (n_blocks - 1.0);
    Some((variance / n_blocks).sqrt())
}
