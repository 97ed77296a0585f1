//! MNA stamp assembly.
//!
//! Rebuilds the (A, b) system from the device list, the current Newton
//! iterate, the last accepted solution and the per-device history. Every
//! stamp is additive; the system is zeroed before each rebuild, and
//! contributions touching ground land in row/column 0 where the solver
//! ignores them.
//!
//! Reactive devices are stamped as companion models: a conductance from
//! discretizing the element equation with the active integration method,
//! plus a history source. History that depends on the previous step size
//! lives in the state vector and is advanced by the integrator, never
//! here; BE-form histories are read straight from the last accepted
//! solution.

use crate::analysis::source;
use crate::compiler::{Circuit, Device};
use crate::ir::{BjtPolarity, GateKind, Method, MosPolarity};
use crate::solver::MnaSystem;

/// Junction thermal voltage.
const VT: f64 = 25e-3;
/// Junction saturation current.
const IS: f64 = 3.7751345e-14;
/// Junction voltage clamp; larger values overflow the exponential.
const DIODE_CLAMP: f64 = 0.9;
/// Junction voltage guess on the very first Newton iteration.
const DIODE_SEED: f64 = 0.6;
/// BJT forward and reverse common-base current gains.
const ALPHA: f64 = 0.99;
const ALPHA_R: f64 = 0.5;
/// MOSFET threshold voltage and channel-length modulation.
const MOS_VT0: f64 = 1.0;
const MOS_LAMBDA: f64 = 0.05;
/// Vgs guess on the very first Newton iteration, so transistors start
/// conducting.
const MOS_SEED_VGS: f64 = 2.0;

/// Everything the assembler needs to know about where the integrator is.
pub struct StepContext<'a> {
    /// Time of the solution being computed.
    pub t: f64,
    /// Current step size.
    pub dt: f64,
    /// Step index; step 0 is the ramp-in step starting from the ICs.
    pub step: u64,
    /// Newton iteration within the step.
    pub iteration: u32,
    pub method: Method,
    /// Last accepted solution, indexed by variable (entry 0 is ground).
    pub prev: &'a [f64],
    /// History slots, advanced once per step by the integrator.
    pub state: &'a [f64],
    /// Trace output interval; PULSE edge substitution.
    pub base_dt: f64,
}

impl StepContext<'_> {
    /// True on the very first linearization of the run.
    fn first_guess(&self) -> bool {
        self.step == 0 && self.iteration == 0
    }
}

/// Rebuild (A, b) from scratch for the given iterate.
pub fn assemble(circuit: &Circuit, sys: &mut MnaSystem, x: &[f64], ctx: &StepContext) {
    sys.clear();
    for device in &circuit.devices {
        match device {
            Device::Resistor { a, b, res, .. } => {
                sys.stamp_conductance(*a, *b, 1.0 / res);
            }

            Device::Capacitor {
                a, b, cap, ic, state, ..
            } => {
                stamp_capacitor(sys, ctx, *a, *b, *cap, *ic, *state);
            }

            Device::Inductor {
                a, b, ind, ic, branch, ..
            } => {
                let j = *branch;
                sys.add(*a, j, 1.0);
                sys.add(*b, j, -1.0);
                let i_prev = if ctx.step == 0 { *ic } else { ctx.prev[j] };
                match ctx.method {
                    Method::Be => {
                        let g = ind / ctx.dt;
                        sys.add(j, *a, -1.0);
                        sys.add(j, *b, 1.0);
                        sys.add(j, j, g);
                        sys.add_rhs(j, g * i_prev);
                    }
                    Method::Fe => {
                        // The voltage equation lags one step, so the
                        // node-column back-coupling is absent and V(t0)
                        // moves into the excitation.
                        let g = ind / ctx.dt;
                        sys.add(j, j, g);
                        sys.add_rhs(j, g * i_prev);
                        if ctx.step > 0 {
                            sys.add_rhs(j, ctx.prev[*a] - ctx.prev[*b]);
                        }
                    }
                    Method::Tr => {
                        let g = 2.0 * ind / ctx.dt;
                        sys.add(j, *a, -1.0);
                        sys.add(j, *b, 1.0);
                        sys.add(j, j, g);
                        sys.add_rhs(j, g * i_prev);
                        if ctx.step > 0 {
                            sys.add_rhs(j, ctx.prev[*a] - ctx.prev[*b]);
                        }
                    }
                }
            }

            Device::NodalInductor {
                a, b, ind, state, ..
            } => {
                let i_hist = ctx.state[*state];
                match ctx.method {
                    Method::Be => sys.stamp_conductance(*a, *b, ctx.dt / ind),
                    // FE is a pure history source.
                    Method::Fe => {}
                    Method::Tr => sys.stamp_conductance(*a, *b, ctx.dt / (2.0 * ind)),
                }
                sys.stamp_current(*a, *b, i_hist);
            }

            Device::Coupling {
                m, jx, jy, ic1, ic2, ..
            } => {
                let mut g = m / ctx.dt;
                if ctx.method == Method::Tr {
                    g *= 2.0;
                }
                sys.add(*jx, *jy, g);
                sys.add(*jy, *jx, g);
                let (i1, i2) = if ctx.step == 0 {
                    (*ic1, *ic2)
                } else {
                    (ctx.prev[*jx], ctx.prev[*jy])
                };
                sys.add_rhs(*jx, g * i2);
                sys.add_rhs(*jy, g * i1);
            }

            Device::Vccs { a, b, c, d, gm, .. } => {
                sys.stamp_transconductance(*a, *b, *c, *d, *gm);
            }

            Device::Vcvs {
                a, b, c, d, gain, branch, ..
            } => {
                let j = *branch;
                sys.add(*a, j, 1.0);
                sys.add(*b, j, -1.0);
                sys.add(j, *a, 1.0);
                sys.add(j, *b, -1.0);
                sys.add(j, *c, -gain);
                sys.add(j, *d, *gain);
            }

            Device::Cccs {
                a, b, c, d, gain, branch, ..
            } => {
                let j = *branch;
                sys.add(*a, j, *gain);
                sys.add(*b, j, -gain);
                sys.add(*c, j, 1.0);
                sys.add(*d, j, -1.0);
                sys.add(j, *c, 1.0);
                sys.add(j, *d, -1.0);
            }

            Device::Ccvs {
                a, b, c, d, rm, jx, jy, ..
            } => {
                sys.add(*a, *jx, 1.0);
                sys.add(*b, *jx, -1.0);
                sys.add(*c, *jy, 1.0);
                sys.add(*d, *jy, -1.0);
                sys.add(*jx, *a, 1.0);
                sys.add(*jx, *b, -1.0);
                sys.add(*jy, *c, 1.0);
                sys.add(*jy, *d, -1.0);
                sys.add(*jx, *jy, -rm);
            }

            Device::CurrentSource { a, b, wave, .. } => {
                let s = source::evaluate(wave, ctx.t, ctx.base_dt);
                sys.stamp_current(*a, *b, s);
            }

            Device::VoltageSource {
                a, b, wave, branch, ..
            } => {
                let j = *branch;
                sys.add(*a, j, 1.0);
                sys.add(*b, j, -1.0);
                sys.add(j, *a, 1.0);
                sys.add(j, *b, -1.0);
                sys.add_rhs(j, source::evaluate(wave, ctx.t, ctx.base_dt));
            }

            Device::OpAmp { a, b, c, d, branch, .. } => {
                let j = *branch;
                sys.add(*a, j, 1.0);
                sys.add(*b, j, -1.0);
                sys.add(j, *c, 1.0);
                sys.add(j, *d, -1.0);
            }

            Device::Diode { a, b, .. } => {
                stamp_junction(sys, x, *a, *b, ctx.first_guess());
            }

            Device::Bjt {
                collector,
                base,
                emitter,
                polarity,
                ..
            } => {
                let (c, b, e) = (*collector, *base, *emitter);
                let seed = ctx.first_guess();
                match polarity {
                    BjtPolarity::Npn => {
                        let fwd = stamp_junction(sys, x, b, e, seed);
                        sys.stamp_current(c, b, ALPHA * fwd.ieq);
                        sys.stamp_transconductance(c, b, b, e, ALPHA * fwd.g);
                        let rev = stamp_junction(sys, x, b, c, seed);
                        sys.stamp_current(e, b, ALPHA_R * rev.ieq);
                        sys.stamp_transconductance(e, b, b, c, ALPHA_R * rev.g);
                    }
                    BjtPolarity::Pnp => {
                        let fwd = stamp_junction(sys, x, e, b, seed);
                        sys.stamp_current(b, c, ALPHA * fwd.ieq);
                        sys.stamp_transconductance(c, b, b, e, ALPHA * fwd.g);
                        let rev = stamp_junction(sys, x, c, b, seed);
                        sys.stamp_current(b, e, ALPHA_R * rev.ieq);
                        sys.stamp_transconductance(e, b, b, c, ALPHA_R * rev.g);
                    }
                }
            }

            Device::Mosfet {
                drain,
                gate,
                source: src,
                polarity,
                km,
                ..
            } => {
                stamp_mosfet(sys, x, ctx, *drain, *gate, *src, *polarity, *km);
            }

            Device::PwlResistor { a, b, points, .. } => {
                let v = x[*a] - x[*b];
                let (lo, hi) = if v > points[2].0 {
                    (points[2], points[3])
                } else if v > points[1].0 {
                    (points[1], points[2])
                } else {
                    (points[0], points[1])
                };
                let g = (hi.1 - lo.1) / (hi.0 - lo.0);
                let ieq = hi.1 - g * hi.0;
                sys.stamp_conductance(*a, *b, g);
                sys.stamp_current(*a, *b, ieq);
            }

            Device::Gate {
                kind,
                a,
                b,
                out,
                v,
                r,
                c,
                gain,
                state,
                ..
            } => {
                // Input model: a grounded capacitor per input.
                stamp_capacitor(sys, ctx, *a, 0, *c, 0.0, *state);
                if let Some(b) = b {
                    stamp_capacitor(sys, ctx, *b, 0, *c, 0.0, *state + 1);
                }

                let transfer = gate_transfer(*kind, x, *a, *b, *v, *gain);
                // Output model: VCCS and history-free current source from
                // ground into the output, in parallel with the output
                // resistor.
                sys.stamp_transconductance(0, *out, transfer.ctrl, 0, transfer.g / r);
                sys.stamp_current(0, *out, transfer.v_open / r);
                sys.stamp_conductance(*out, 0, 1.0 / r);
            }
        }
    }
}

/// Capacitor companion between `a` and `b`. Also models the logic-gate
/// input (b = ground, ic = 0).
fn stamp_capacitor(
    sys: &mut MnaSystem,
    ctx: &StepContext,
    a: usize,
    b: usize,
    cap: f64,
    ic: f64,
    state: usize,
) {
    match ctx.method {
        // No FE capacitor form exists; FE runs use the BE companion.
        Method::Be | Method::Fe => {
            let g = cap / ctx.dt;
            sys.stamp_conductance(a, b, g);
            let v_prev = if ctx.step == 0 {
                ic
            } else {
                ctx.prev[a] - ctx.prev[b]
            };
            sys.stamp_current(b, a, g * v_prev);
        }
        Method::Tr => {
            let g = 2.0 * cap / ctx.dt;
            sys.stamp_conductance(a, b, g);
            sys.stamp_current(b, a, g * ctx.state[state]);
        }
    }
}

/// Linearized junction quantities at the current iterate.
struct Junction {
    g: f64,
    ieq: f64,
}

/// Stamp an exponential junction between `a` (anode) and `b` (cathode),
/// returning the linearization for dependent-source reuse.
fn stamp_junction(sys: &mut MnaSystem, x: &[f64], a: usize, b: usize, seed: bool) -> Junction {
    let v = if seed {
        DIODE_SEED
    } else {
        (x[a] - x[b]).min(DIODE_CLAMP)
    };
    let ex = (v / VT).exp();
    let g = (IS / VT) * ex;
    let ieq = IS * (ex - 1.0) - g * v;
    sys.stamp_conductance(a, b, g);
    sys.stamp_current(a, b, ieq);
    Junction { g, ieq }
}

#[allow(clippy::too_many_arguments)]
fn stamp_mosfet(
    sys: &mut MnaSystem,
    x: &[f64],
    ctx: &StepContext,
    drain: usize,
    gate: usize,
    src: usize,
    polarity: MosPolarity,
    km: f64,
) {
    // Terminals sort by iterate voltage; the PMOS comparison and the
    // Vgs/Vds/current signs invert.
    let (d, s, sign) = match polarity {
        MosPolarity::Nmos => {
            if x[drain] > x[src] {
                (drain, src, 1.0)
            } else {
                (src, drain, 1.0)
            }
        }
        MosPolarity::Pmos => {
            if x[drain] < x[src] {
                (drain, src, -1.0)
            } else {
                (src, drain, -1.0)
            }
        }
    };

    let vgs = if ctx.first_guess() {
        MOS_SEED_VGS
    } else {
        sign * (x[gate] - x[s])
    };
    if vgs <= MOS_VT0 {
        return;
    }

    let vds = sign * (x[d] - x[s]);
    let vov = vgs - MOS_VT0;
    let (gm, gds, id) = if vds > vov {
        // Saturation.
        (
            2.0 * km * vov * (1.0 + MOS_LAMBDA * vds),
            km * vov * vov * MOS_LAMBDA,
            km * vov * vov * (1.0 + MOS_LAMBDA * vds),
        )
    } else {
        // Triode.
        (
            2.0 * km * vds * (1.0 + MOS_LAMBDA * vds),
            km * (2.0 * vov - 2.0 * vds + 4.0 * MOS_LAMBDA * vov * vds
                - 3.0 * MOS_LAMBDA * vds * vds),
            km * (2.0 * vov * vds - vds * vds) * (1.0 + MOS_LAMBDA * vds),
        )
    };

    let ieq = sign * (id - gm * vgs - gds * vds);
    sys.stamp_transconductance(d, s, gate, s, gm);
    sys.stamp_conductance(d, s, gds);
    sys.stamp_current(d, s, ieq);
}

/// One segment of the gate output transfer at the current iterate.
struct GateTransfer {
    /// The input node the output currently follows.
    ctrl: usize,
    /// Slope of the open-circuit transfer.
    g: f64,
    /// Open-circuit output level contribution.
    v_open: f64,
}

fn gate_transfer(
    kind: GateKind,
    x: &[f64],
    a: usize,
    b: Option<usize>,
    v: f64,
    gain: f64,
) -> GateTransfer {
    let vm = v / 2.0;
    let vih = vm + vm / gain;
    let vil = vm - vm / gain;

    // Output level below VIL, slope in the transition band, level above
    // VIH. In the band the open-circuit level is V/2 - G*V/2.
    let segment = |ctrl: usize, low: f64, slope: f64, high: f64| -> GateTransfer {
        let vc = x[ctrl];
        let (g, v_open) = if vc > vih {
            (0.0, high)
        } else if vc > vil {
            (slope, vm - slope * vm)
        } else {
            (0.0, low)
        };
        GateTransfer { ctrl, g, v_open }
    };

    let lower = |b: usize| if x[a] <= x[b] { a } else { b };
    let higher = |b: usize| if x[a] >= x[b] { a } else { b };

    match kind {
        GateKind::Not => segment(a, v, -gain, 0.0),
        GateKind::And => segment(lower(b.unwrap()), 0.0, gain, v),
        GateKind::Nand => segment(lower(b.unwrap()), v, -gain, 0.0),
        GateKind::Or => segment(higher(b.unwrap()), 0.0, gain, v),
        GateKind::Nor => segment(higher(b.unwrap()), v, -gain, 0.0),
        GateKind::Xor => {
            let b = b.unwrap();
            if x[a] + x[b] >= v {
                segment(lower(b), v, -gain, 0.0)
            } else {
                segment(higher(b), 0.0, gain, v)
            }
        }
        GateKind::Xnor => {
            let b = b.unwrap();
            if x[a] + x[b] >= v {
                segment(lower(b), 0.0, gain, v)
            } else {
                segment(higher(b), v, -gain, 0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{self, Circuit};
    use crate::ir::Method;
    use crate::parser;
    use approx::assert_abs_diff_eq;

    fn circuit(netlist: &str) -> Circuit {
        compiler::compile(&parser::parse(netlist).unwrap()).unwrap()
    }

    fn assembled(netlist: &str, dt: f64, step: u64) -> (Circuit, MnaSystem, Vec<f64>) {
        let circuit = circuit(netlist);
        let mut sys = MnaSystem::new(circuit.n_vars);
        let x = vec![0.0; circuit.n_vars + 1];
        let prev = vec![0.0; circuit.n_vars + 1];
        let state = vec![0.0; circuit.state_len];
        let ctx = StepContext {
            t: 0.0,
            dt,
            step,
            iteration: 0,
            method: circuit.tran.method,
            prev: &prev,
            state: &state,
            base_dt: dt,
        };
        assemble(&circuit, &mut sys, &x, &ctx);
        (circuit, sys, x)
    }

    #[test]
    fn resistor_stamp() {
        let (_, sys, _) = assembled("2\nR1 1 2 100\n.TRAN 1 1 BE 1", 1.0, 0);
        assert_abs_diff_eq!(sys.at(1, 1), 0.01, epsilon = 1e-15);
        assert_abs_diff_eq!(sys.at(2, 2), 0.01, epsilon = 1e-15);
        assert_abs_diff_eq!(sys.at(1, 2), -0.01, epsilon = 1e-15);
        assert_abs_diff_eq!(sys.at(2, 1), -0.01, epsilon = 1e-15);
    }

    #[test]
    fn capacitor_be_companion_uses_ic_on_step_zero() {
        let dt = 1e-6;
        let (_, sys, _) = assembled("1\nC1 1 0 1u IC=2\n.TRAN 1e-3 10 BE 1", dt, 0);
        let g = 1e-6 / dt;
        assert_abs_diff_eq!(sys.at(1, 1), g, epsilon = 1e-9);
        // Source g*IC from ground into node 1.
        assert_abs_diff_eq!(sys.at(1, 2), g * 2.0, epsilon = 1e-9);
    }

    #[test]
    fn capacitor_tr_companion_reads_state_slot() {
        let netlist = "1\nC1 1 0 1u\n.TRAN 1e-3 10 TR 1";
        let circuit = circuit(netlist);
        let mut sys = MnaSystem::new(circuit.n_vars);
        let x = vec![0.0; circuit.n_vars + 1];
        let prev = vec![0.0; circuit.n_vars + 1];
        let state = vec![3.0];
        let dt = 1e-6;
        let ctx = StepContext {
            t: 0.0,
            dt,
            step: 5,
            iteration: 0,
            method: Method::Tr,
            prev: &prev,
            state: &state,
            base_dt: dt,
        };
        assemble(&circuit, &mut sys, &x, &ctx);
        let g = 2.0 * 1e-6 / dt;
        assert_abs_diff_eq!(sys.at(1, 1), g, epsilon = 1e-9);
        assert_abs_diff_eq!(sys.at(1, 2), g * 3.0, epsilon = 1e-9);
    }

    #[test]
    fn inductor_be_rows() {
        let dt = 1e-6;
        let (circuit, sys, _) = assembled("2\nL1 1 2 1m IC=0.5\n.TRAN 1e-3 10 BE 1", dt, 0);
        let j = 3;
        assert_eq!(circuit.n_vars, 3);
        let g = 1e-3 / dt;
        assert_abs_diff_eq!(sys.at(1, j), 1.0);
        assert_abs_diff_eq!(sys.at(2, j), -1.0);
        assert_abs_diff_eq!(sys.at(j, 1), -1.0);
        assert_abs_diff_eq!(sys.at(j, 2), 1.0);
        assert_abs_diff_eq!(sys.at(j, j), g, epsilon = 1e-9);
        assert_abs_diff_eq!(sys.at(j, 4), g * 0.5, epsilon = 1e-9);
    }

    #[test]
    fn inductor_fe_omits_back_coupling() {
        let dt = 1e-6;
        let (_, sys, _) = assembled("2\nL1 1 2 1m\n.TRAN 1e-3 10 FE 1", dt, 0);
        let j = 3;
        assert_abs_diff_eq!(sys.at(1, j), 1.0);
        assert_abs_diff_eq!(sys.at(j, 1), 0.0);
        assert_abs_diff_eq!(sys.at(j, 2), 0.0);
        assert_abs_diff_eq!(sys.at(j, j), 1e-3 / dt, epsilon = 1e-9);
    }

    #[test]
    fn vcvs_rows() {
        let (_, sys, _) = assembled("4\nE1 1 2 3 4 7\n.TRAN 1 1 BE 1", 1.0, 0);
        let j = 5;
        assert_abs_diff_eq!(sys.at(1, j), 1.0);
        assert_abs_diff_eq!(sys.at(2, j), -1.0);
        assert_abs_diff_eq!(sys.at(j, 1), 1.0);
        assert_abs_diff_eq!(sys.at(j, 2), -1.0);
        assert_abs_diff_eq!(sys.at(j, 3), -7.0);
        assert_abs_diff_eq!(sys.at(j, 4), 7.0);
    }

    #[test]
    fn ccvs_rows() {
        let (_, sys, _) = assembled("4\nH1 1 2 3 4 50\n.TRAN 1 1 BE 1", 1.0, 0);
        let (jx, jy) = (5, 6);
        assert_abs_diff_eq!(sys.at(1, jx), 1.0);
        assert_abs_diff_eq!(sys.at(2, jx), -1.0);
        assert_abs_diff_eq!(sys.at(3, jy), 1.0);
        assert_abs_diff_eq!(sys.at(4, jy), -1.0);
        assert_abs_diff_eq!(sys.at(jx, jy), -50.0);
    }

    #[test]
    fn voltage_source_rhs() {
        let (_, sys, _) = assembled("1\nV1 1 0 DC 5\n.TRAN 1 1 BE 1", 1.0, 0);
        let j = 2;
        assert_abs_diff_eq!(sys.at(1, j), 1.0);
        assert_abs_diff_eq!(sys.at(j, 1), 1.0);
        assert_abs_diff_eq!(sys.at(j, 3), 5.0);
    }

    #[test]
    fn current_source_rhs() {
        let (_, sys, _) = assembled("2\nI1 1 2 DC 1m\n.TRAN 1 1 BE 1", 1.0, 0);
        assert_abs_diff_eq!(sys.at(1, 3), -1e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(sys.at(2, 3), 1e-3, epsilon = 1e-15);
    }

    #[test]
    fn opamp_rows() {
        let (_, sys, _) = assembled("4\nO1 1 2 3 4\n.TRAN 1 1 BE 1", 1.0, 0);
        let j = 5;
        assert_abs_diff_eq!(sys.at(1, j), 1.0);
        assert_abs_diff_eq!(sys.at(2, j), -1.0);
        assert_abs_diff_eq!(sys.at(j, 3), 1.0);
        assert_abs_diff_eq!(sys.at(j, 4), -1.0);
        assert_abs_diff_eq!(sys.at(j, j), 0.0);
    }

    #[test]
    fn diode_seeded_on_first_guess() {
        let (_, sys, _) = assembled("2\nD1 1 2\n.TRAN 1 1 BE 1", 1.0, 0);
        let ex = (DIODE_SEED / VT).exp();
        let g = (IS / VT) * ex;
        assert_abs_diff_eq!(sys.at(1, 1), g, epsilon = g * 1e-12);
        // Equivalent source Id - g*v from anode to cathode.
        let ieq = IS * (ex - 1.0) - g * DIODE_SEED;
        assert_abs_diff_eq!(sys.at(1, 3), -ieq, epsilon = g.abs() * 1e-12);
    }

    #[test]
    fn diode_clamps_large_forward_voltage() {
        let netlist = "2\nD1 1 2\n.TRAN 1 1 BE 1";
        let circuit = circuit(netlist);
        let mut sys = MnaSystem::new(circuit.n_vars);
        let mut x = vec![0.0; circuit.n_vars + 1];
        x[1] = 5.0; // would overflow unclamped
        let prev = vec![0.0; circuit.n_vars + 1];
        let ctx = StepContext {
            t: 0.0,
            dt: 1.0,
            step: 3,
            iteration: 2,
            method: Method::Be,
            prev: &prev,
            state: &[],
            base_dt: 1.0,
        };
        assemble(&circuit, &mut sys, &x, &ctx);
        let g_clamped = (IS / VT) * (DIODE_CLAMP / VT).exp();
        assert_abs_diff_eq!(sys.at(1, 1), g_clamped, epsilon = g_clamped * 1e-12);
    }

    #[test]
    fn mosfet_off_stamps_nothing() {
        let netlist = "4\nM1 1 2 3 0 NMOS L=1u W=1u\n.TRAN 1 1 BE 1";
        let circuit = circuit(netlist);
        let mut sys = MnaSystem::new(circuit.n_vars);
        let x = vec![0.0; circuit.n_vars + 1];
        let prev = vec![0.0; circuit.n_vars + 1];
        // Past the first guess, with Vgs = 0 < Vt0 the device is dark.
        let ctx = StepContext {
            t: 0.0,
            dt: 1.0,
            step: 2,
            iteration: 1,
            method: Method::Be,
            prev: &prev,
            state: &[],
            base_dt: 1.0,
        };
        assemble(&circuit, &mut sys, &x, &ctx);
        for row in 1..=circuit.n_vars {
            for col in 1..=circuit.n_vars + 1 {
                assert_eq!(sys.at(row, col), 0.0);
            }
        }
    }

    #[test]
    fn pwl_middle_segment_at_zero_bias() {
        let (_, sys, _) = assembled(
            "2\nN1 1 2 -2 1.1 -1 0.7 1 -0.7 2 -1.1\n.TRAN 1 1 BE 1",
            1.0,
            1,
        );
        // v = 0 falls in (V2, V3]: slope (I3-I2)/(V3-V2) = -0.7.
        assert_abs_diff_eq!(sys.at(1, 1), -0.7, epsilon = 1e-12);
        // Intercept I3 - g*V3 = -0.7 - (-0.7) = 0.
        assert_abs_diff_eq!(sys.at(1, 3), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn tr_passive_node_submatrix_is_symmetric() {
        let netlist = "\
3
R1 1 2 1k
C1 2 0 1u IC=1
X1 2 3 1m
C2 3 0 10n
R2 3 0 50
.TRAN 1e-3 10 TR 2
";
        let (circuit, sys, _) = assembled(netlist, 1e-5, 4);
        for i in 1..=circuit.n_nodes {
            for j in 1..=circuit.n_nodes {
                assert_abs_diff_eq!(sys.at(i, j), sys.at(j, i), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn not_gate_output_network() {
        let (_, sys, _) = assembled("2\n>g1 1 2 5 100 1p 10\n.TRAN 1e-3 10 BE 1", 1e-6, 1);
        // Output resistor 1/R on the output diagonal.
        assert_abs_diff_eq!(sys.at(2, 2), 0.01, epsilon = 1e-12);
        // Input at 0 V < VIL: open-circuit level V, so source V/R into the
        // output node.
        assert_abs_diff_eq!(sys.at(2, 3), 5.0 / 100.0, epsilon = 1e-12);
        // Flat segment: no transconductance onto the output row.
        assert_abs_diff_eq!(sys.at(2, 1), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn and_gate_follows_lower_input_transition() {
        let netlist = "3\n)g1 1 2 3 5 100 1p 10\n.TRAN 1e-3 10 BE 1";
        let circuit = circuit(netlist);
        let mut sys = MnaSystem::new(circuit.n_vars);
        let mut x = vec![0.0; circuit.n_vars + 1];
        x[1] = 2.5; // in the transition band (VIL=2.25, VIH=2.75)
        x[2] = 5.0; // high
        let prev = vec![0.0; circuit.n_vars + 1];
        let state = vec![0.0; circuit.state_len];
        let ctx = StepContext {
            t: 0.0,
            dt: 1e-6,
            step: 1,
            iteration: 1,
            method: Method::Be,
            prev: &prev,
            state: &state,
            base_dt: 1e-6,
        };
        assemble(&circuit, &mut sys, &x, &ctx);
        // AND in the band: transconductance +A/R from the lower input
        // (node 1) into the output node row with a minus sign.
        assert_abs_diff_eq!(sys.at(3, 1), -10.0 / 100.0, epsilon = 1e-12);
    }
}
