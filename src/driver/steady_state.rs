//! Optimization step driver.
//!
//! One step draws a batch, estimates the loss and its bare gradient,
//! preconditions the gradient with the geometric tensor when an SR
//! configuration is present, and projects the result onto the parameter
//! space of the machine. The direction is kept as the warm start of the
//! next solve.

use std::fmt;

use log::{debug, info};
use nalgebra::DVector;
use num_complex::Complex64;

use super::stats::Stats;
use super::traits::{Expectation, Optimizer, Sampler};
use crate::error::{Error, Result};
use crate::machine::Machine;
use crate::sr::{SolveInfo, SrConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Stepping,
}

pub struct SteadyState<S: Sampler, E: Expectation, O: Optimizer> {
    machine: Machine,
    sampler: S,
    expectation: E,
    optimizer: O,
    sr: Option<SrConfig>,
    state: DriverState,
    step_count: usize,
    n_samples: usize,
    previous_dp: Option<DVector<Complex64>>,
    loss_stats: Option<Stats>,
    last_solve: Option<SolveInfo>,
}

impl<S: Sampler, E: Expectation, O: Optimizer> SteadyState<S, E, O> {
    /// Driver that follows the bare gradient until an SR configuration is set.
    pub fn new(machine: Machine, sampler: S, expectation: E, mut optimizer: O) -> Self {
        optimizer.init(machine.n_par(), machine.is_holomorphic());
        Self {
            machine,
            sampler,
            expectation,
            optimizer,
            sr: None,
            state: DriverState::Idle,
            step_count: 0,
            n_samples: 0,
            previous_dp: None,
            loss_stats: None,
            last_solve: None,
        }
    }

    /// Precondition every step with stochastic reconfiguration.
    pub fn with_sr(mut self, sr: SrConfig) -> Self {
        self.sr = Some(sr);
        self
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Statistics of the loss from the most recent step.
    pub fn loss_stats(&self) -> Option<&Stats> {
        self.loss_stats.as_ref()
    }

    pub fn last_solve(&self) -> Option<&SolveInfo> {
        self.last_solve.as_ref()
    }

    /// Compute one update direction.
    pub fn step(&mut self) -> Result<DVector<Complex64>> {
        if self.state == DriverState::Stepping {
            return Err(Error::StepInProgress);
        }
        self.state = DriverState::Stepping;
        let result = self.compute_direction();
        self.state = DriverState::Idle;
        result
    }

    /// Run `n` steps, applying the optimizer after each.
    pub fn advance(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            let dp = self.step()?;
            let params = self.machine.flat_parameters();
            let updated = self.optimizer.update(&dp, &params);
            let updated = self.machine.parameters().project(&updated)?;
            self.machine.set_parameters(&updated)?;
            if let Some(stats) = &self.loss_stats {
                info!("step {:>4}: loss = {}", self.step_count, stats);
            }
        }
        Ok(())
    }

    /// Forget the warm start and the optimizer state.
    pub fn reset(&mut self) {
        self.previous_dp = None;
        self.last_solve = None;
        self.step_count = 0;
        self.optimizer.reset();
        self.sampler.reset();
    }

    fn compute_direction(&mut self) -> Result<DVector<Complex64>> {
        self.sampler.reset();
        let batch = self.sampler.sample()?;
        if batch.n_sites() != self.machine.n_sites() {
            return Err(Error::MalformedBatch(format!(
                "sampler produced {} sites, machine expects {}",
                batch.n_sites(),
                self.machine.n_sites()
            )));
        }

        let (stats, grad) = self.expectation.expect_and_grad(&mut self.machine, &batch)?;
        if grad.len() != self.machine.n_par() {
            return Err(Error::shape("SteadyState gradient", self.machine.n_par(), grad.len()));
        }

        let direction = match &self.sr {
            Some(sr) => {
                let x0 = if sr.reuse_previous_solution {
                    self.previous_dp.as_ref()
                } else {
                    None
                };
                let (x, info) = sr.solve(&mut self.machine, &batch, &grad, x0, self.step_count)?;
                self.last_solve = Some(info);
                x
            }
            None => grad,
        };
        let dp = self.machine.parameters().project(&direction)?;
        debug!("step {}: |dp| = {:.3e}", self.step_count, dp.norm());

        self.n_samples = batch.len();
        self.loss_stats = Some(stats);
        self.previous_dp = Some(dp.clone());
        self.step_count += 1;
        Ok(dp)
    }
}

impl<S: Sampler, E: Expectation, O: Optimizer> fmt::Display for SteadyState<S, E, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SteadyState(step_count={}, n_samples={}, solver=", self.step_count, self.n_samples)?;
        match &self.sr {
            Some(sr) => write!(f, "sr[{}, λ={}])", sr.solver, sr.diag_shift),
            None => write!(f, "none)"),
        }
    }
}
