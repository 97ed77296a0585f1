//! Newton–Raphson driver for a single time step.
//!
//! Rebuilds the linearized system around the current iterate, solves, and
//! repeats until the largest component change falls under tolerance. A
//! purely linear circuit passes through the loop exactly once. Slow
//! convergence is answered by re-seeding the iterate with uniform noise;
//! only after the allowed restarts are spent does the step fail.

use rand::rngs::StdRng;
use rand::Rng;

use crate::compiler::Circuit;
use crate::error::{Result, SimError};
use crate::solver::MnaSystem;
use crate::stamp::{self, StepContext};

/// Convergence tolerance on the iterate max-delta.
const TOL: f64 = 1e-7;
/// Iterations before the iterate is randomized.
const RESTART_AFTER: u32 = 20;
/// Randomized restarts allowed within one step.
const MAX_RESTARTS: u32 = 10;
/// Iterations before the step fails outright.
const MAX_ITERATIONS: u32 = 100;
/// Randomized iterates are drawn uniformly from this range.
const RESTART_SPAN: std::ops::Range<f64> = -5.0..5.0;

/// Timing of the step being solved.
pub struct StepFrame {
    pub t: f64,
    pub dt: f64,
    pub step: u64,
    /// Trace output interval, forwarded to waveform evaluation.
    pub base_dt: f64,
}

/// What one converged step cost.
pub struct StepReport {
    pub iterations: u32,
    pub restarts: u32,
}

/// Solve one time step. `x` carries the iterate in (warm-started from the
/// last accepted solution) and the converged solution out. `prev` and
/// `state` are the accepted solution and history, read-only here.
pub fn solve_step(
    circuit: &Circuit,
    sys: &mut MnaSystem,
    x: &mut [f64],
    prev: &[f64],
    state: &[f64],
    frame: &StepFrame,
    rng: &mut StdRng,
) -> Result<StepReport> {
    let n = circuit.n_vars;
    let mut iterations = 0u32;
    let mut restarts = 0u32;

    loop {
        let ctx = StepContext {
            t: frame.t,
            dt: frame.dt,
            step: frame.step,
            iteration: iterations,
            method: circuit.tran.method,
            prev,
            state,
            base_dt: frame.base_dt,
        };
        stamp::assemble(circuit, sys, x, &ctx);
        sys.solve(frame.t)?;
        iterations += 1;

        let mut err_max = 0.0f64;
        for i in 1..=n {
            let next = sys.solution(i);
            err_max = err_max.max((next - x[i]).abs());
            x[i] = next;
        }

        if !circuit.nonlinear || err_max <= TOL {
            return Ok(StepReport {
                iterations,
                restarts,
            });
        }
        if iterations > MAX_ITERATIONS {
            return Err(SimError::NoConvergence {
                t: frame.t,
                restarts,
            });
        }
        if iterations > RESTART_AFTER && restarts <= MAX_RESTARTS {
            restarts += 1;
            iterations = 0;
            for value in x.iter_mut().skip(1) {
                *value = rng.gen_range(RESTART_SPAN);
            }
            tracing::debug!(t = frame.t, restarts, "slow convergence, iterate randomized");
        }
    }
}
