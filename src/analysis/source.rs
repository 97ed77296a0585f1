//! Independent source waveform evaluation.
//!
//! Evaluates DC, SIN and PULSE waveforms at a given time t. `base_dt` is
//! the trace output interval; PULSE rise/fall times of zero are replaced
//! by it so ideal edges stay representable on the time grid.

use std::f64::consts::PI;

use crate::ir::Waveform;

/// Evaluate a source waveform at time t.
pub fn evaluate(wave: &Waveform, t: f64, base_dt: f64) -> f64 {
    match wave {
        Waveform::Dc(value) => *value,
        Waveform::Sin {
            dc,
            amp,
            freq,
            delay,
            atten,
            phase,
            cycles,
        } => eval_sin(*dc, *amp, *freq, *delay, *atten, *phase, *cycles, t),
        Waveform::Pulse {
            a1,
            a2,
            delay,
            tr,
            tf,
            ton,
            period,
            cycles,
        } => eval_pulse(
            *a1, *a2, *delay, *tr, *tf, *ton, *period, *cycles, t, base_dt,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn eval_sin(
    dc: f64,
    amp: f64,
    freq: f64,
    delay: f64,
    atten: f64,
    phase: f64,
    cycles: f64,
    t: f64,
) -> f64 {
    let phase_rad = PI * phase / 180.0;
    if t < delay || t > delay + cycles / freq {
        // Outside the active window the source holds its phase-offset level.
        dc + amp * phase_rad.sin()
    } else {
        let elapsed = t - delay;
        dc + amp * (-atten * elapsed).exp() * (2.0 * PI * freq * elapsed + phase_rad).sin()
    }
}

#[allow(clippy::too_many_arguments)]
fn eval_pulse(
    a1: f64,
    a2: f64,
    delay: f64,
    tr: f64,
    tf: f64,
    ton: f64,
    period: f64,
    cycles: f64,
    t: f64,
    base_dt: f64,
) -> f64 {
    let tr = if tr == 0.0 { base_dt } else { tr };
    let tf = if tf == 0.0 { base_dt } else { tf };

    if t <= delay || t > delay + period * cycles {
        return a1;
    }

    // Fold into the current period.
    let mut tp = t - delay;
    if period > 0.0 && period.is_finite() {
        while tp > period {
            tp -= period;
        }
    }

    if tp < tr {
        a1 + (a2 - a1) * tp / tr
    } else if tp <= tr + ton {
        a2
    } else if tp <= tr + ton + tf {
        a2 + (a1 - a2) * (tp - tr - ton) / tf
    } else {
        a1
    }
}
