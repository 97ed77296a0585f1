//! Transient analysis engine.
//!
//! Runs the step loop: one Newton solve per time point, history advance at
//! the start of each step, acceptance copy at the end, and a trace row
//! every `n_substeps`-th step. The first step shrinks dt by 1e-3 to soften
//! the transient of solving an all-zero initial guess against the ICs.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::compiler::{Circuit, Device};
use crate::error::Result;
use crate::ir::Method;
use crate::output::Trace;
use crate::solver::newton::{self, StepFrame};
use crate::solver::MnaSystem;
use crate::stats::Stats;

/// First-step dt scale.
const FIRST_STEP_SCALE: f64 = 1e-3;

/// Knobs that do not come from the netlist.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranOptions {
    /// Pin the divergence-restart RNG for reproducible runs.
    pub seed: Option<u64>,
}

/// Run the transient analysis, emitting rows into `trace`.
pub fn run(
    circuit: &Circuit,
    trace: &mut dyn Trace,
    options: &TranOptions,
    mut stats: Option<&mut Stats>,
) -> Result<()> {
    let tran = circuit.tran;
    let total_steps = (tran.n_points * tran.n_substeps as f64).round().max(1.0) as u64;
    let dt_nominal = tran.t_total / total_steps as f64;
    let base_dt = tran.t_total / tran.n_points;

    let _span = tracing::info_span!(
        "transient",
        t_total = tran.t_total,
        steps = total_steps,
        method = ?tran.method
    )
    .entered();

    trace.header(&circuit.names[1..])?;

    let n = circuit.n_vars;
    let mut sys = MnaSystem::new(n);
    // Last accepted solution (index 0 stays at the 0 V reference) and the
    // Newton iterate, which warm-starts from it across steps.
    let mut accepted = vec![0.0; n + 1];
    let mut iterate = vec![0.0; n + 1];
    let mut state = vec![0.0; circuit.state_len];

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut t = 0.0;
    let mut dt_prev = dt_nominal;
    for step in 0..=total_steps {
        let dt = if step == 0 {
            dt_nominal * FIRST_STEP_SCALE
        } else {
            dt_nominal
        };

        advance_history(circuit, &mut state, &accepted, step, dt, dt_prev);

        let frame = StepFrame {
            t,
            dt,
            step,
            base_dt,
        };
        let report = newton::solve_step(
            circuit,
            &mut sys,
            &mut iterate,
            &accepted,
            &state,
            &frame,
            &mut rng,
        )?;

        accepted[1..].copy_from_slice(&iterate[1..]);

        if let Some(stats) = stats.as_deref_mut() {
            stats.steps += 1;
            stats.linear_solves += u64::from(report.iterations);
            if report.iterations > stats.max_newton_iterations {
                stats.max_newton_iterations = report.iterations;
                stats.t_worst_step = t;
            }
            if report.restarts > 0 {
                stats.max_restarts = stats.max_restarts.max(report.restarts);
                stats.randomizations += report.restarts;
                stats.t_last_randomization = t;
            }
        }

        if step % tran.n_substeps == 0 {
            trace.row(t, &accepted[1..=n])?;
        }

        dt_prev = dt;
        t += dt_nominal;
    }

    Ok(())
}

/// Advance per-step history from the last accepted solution. Runs exactly
/// once per step, before the Newton loop; the loop itself never touches
/// history. Terms that straddle a step-size change use `dt_prev` to close
/// the previous step and `dt` for the new companion.
fn advance_history(
    circuit: &Circuit,
    state: &mut [f64],
    accepted: &[f64],
    step: u64,
    dt: f64,
    dt_prev: f64,
) {
    let method = circuit.tran.method;
    for device in &circuit.devices {
        match device {
            Device::Capacitor {
                a,
                b,
                cap,
                ic,
                state: slot,
                ..
            } => {
                if method == Method::Tr {
                    let v_prev = accepted[*a] - accepted[*b];
                    advance_companion_voltage(&mut state[*slot], *cap, *ic, v_prev, step, dt, dt_prev);
                }
            }
            Device::NodalInductor {
                a,
                b,
                ind,
                ic,
                state: slot,
                ..
            } => {
                if step == 0 {
                    state[*slot] = *ic;
                } else {
                    let dv = accepted[*a] - accepted[*b];
                    state[*slot] += match method {
                        Method::Be => dt_prev * dv / ind,
                        Method::Fe => dt * dv / ind,
                        Method::Tr => (dt_prev + dt) * dv / (2.0 * ind),
                    };
                }
            }
            Device::Gate {
                a,
                b,
                c,
                state: slot,
                ..
            } => {
                if method == Method::Tr {
                    advance_companion_voltage(&mut state[*slot], *c, 0.0, accepted[*a], step, dt, dt_prev);
                    if let Some(b) = b {
                        advance_companion_voltage(
                            &mut state[*slot + 1],
                            *c,
                            0.0,
                            accepted[*b],
                            step,
                            dt,
                            dt_prev,
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

/// Trapezoidal capacitor equivalent-voltage update: recover the branch
/// current of the closed step from `dt_prev`, then fold it into the new
/// companion source at the current dt.
fn advance_companion_voltage(
    slot: &mut f64,
    cap: f64,
    ic: f64,
    v_prev: f64,
    step: u64,
    dt: f64,
    dt_prev: f64,
) {
    if step == 0 {
        *slot = ic;
    } else if cap == 0.0 {
        // A zero capacitor stamps nothing; track the node so the slot
        // stays finite.
        *slot = v_prev;
    } else {
        let i_prev = 2.0 * cap / dt_prev * (v_prev - *slot);
        *slot = v_prev + i_prev * dt / (2.0 * cap);
    }
}
