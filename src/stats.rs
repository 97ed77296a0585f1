//! Run statistics collection for `--stats` output.
//!
//! Created when `--stats` is passed, threaded as `Option<&mut Stats>`.
//! Zero cost when `None`.

use std::time::Instant;

pub struct Stats {
    start: Instant,
    pub steps: u64,
    pub linear_solves: u64,
    /// Worst Newton iteration count over all steps, and where it happened.
    pub max_newton_iterations: u32,
    pub t_worst_step: f64,
    pub max_restarts: u32,
    pub randomizations: u32,
    pub t_last_randomization: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            start: Instant::now(),
            steps: 0,
            linear_solves: 0,
            max_newton_iterations: 0,
            t_worst_step: 0.0,
            max_restarts: 0,
            randomizations: 0,
            t_last_randomization: 0.0,
        }
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.start.elapsed();
        eprintln!();
        eprintln!("=== Run stats ===");
        eprintln!("  Time steps:             {}", self.steps);
        eprintln!("  Linear solves:          {}", self.linear_solves);
        eprintln!(
            "  Worst Newton count:     {} (at t={:.4e})",
            self.max_newton_iterations, self.t_worst_step
        );
        if self.randomizations > 0 {
            eprintln!(
                "  Restarts:               max {} in a step, {} total, last at t={:.4e}",
                self.max_restarts, self.randomizations, self.t_last_randomization
            );
        }
        eprintln!("  Total:                  {:.3}s", total.as_secs_f64());
    }
}
