//! The dense MNA system and its direct solver.
//!
//! The augmented buffer holds rows 0..=n and columns 0..=n+1; column n+1 is
//! the excitation vector and, after a solve, the solution. Row and column 0
//! belong to ground: stamps may write there freely, but elimination ignores
//! them, which shorts ground to the 0 V reference.

pub mod newton;

use crate::error::{Result, SimError};

/// Pivot magnitude below this fails the solve as singular.
const PIVOT_TOL: f64 = 1e-12;

/// Dense augmented MNA matrix [A | b], allocated once and reused.
#[derive(Debug, Clone)]
pub struct MnaSystem {
    n: usize,
    stride: usize,
    buf: Vec<f64>,
}

impl MnaSystem {
    /// A zeroed system with `n` unknowns (plus the ground row/column).
    pub fn new(n: usize) -> Self {
        let stride = n + 2;
        MnaSystem {
            n,
            stride,
            buf: vec![0.0; (n + 1) * stride],
        }
    }

    pub fn unknowns(&self) -> usize {
        self.n
    }

    /// Zero the whole buffer before a rebuild.
    pub fn clear(&mut self) {
        self.buf.fill(0.0);
    }

    #[inline]
    fn idx(&self, row: usize, col: usize) -> usize {
        debug_assert!(row <= self.n && col <= self.n + 1);
        row * self.stride + col
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.buf[self.idx(row, col)]
    }

    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        let i = self.idx(row, col);
        self.buf[i] += value;
    }

    /// Add to the excitation vector entry of `row`.
    #[inline]
    pub fn add_rhs(&mut self, row: usize, value: f64) {
        let i = self.idx(row, self.n + 1);
        self.buf[i] += value;
    }

    /// Solution component `i` after a successful solve.
    #[inline]
    pub fn solution(&self, i: usize) -> f64 {
        self.at(i, self.n + 1)
    }

    /// Conductance `g` between nodes `a` and `b`.
    pub fn stamp_conductance(&mut self, a: usize, b: usize, g: f64) {
        self.stamp_transconductance(a, b, a, b, g);
    }

    /// Transconductance `g` from control pair (c,d) into output pair (a,b).
    pub fn stamp_transconductance(&mut self, a: usize, b: usize, c: usize, d: usize, g: f64) {
        self.add(a, c, g);
        self.add(b, d, g);
        self.add(a, d, -g);
        self.add(b, c, -g);
    }

    /// Independent current `i` flowing from `a` to `b`.
    pub fn stamp_current(&mut self, a: usize, b: usize, i: f64) {
        self.add_rhs(a, -i);
        self.add_rhs(b, i);
    }

    /// Gauss–Jordan elimination with partial pivoting over rows/columns
    /// 1..=n. On success the solution is left in the last column. `t` is
    /// the simulation time, reported on a singular pivot.
    pub fn solve(&mut self, t: f64) -> Result<()> {
        let n = self.n;
        for i in 1..=n {
            // Select the pivot row for column i.
            let mut pivot = 0.0f64;
            let mut pivot_row = i;
            for row in i..=n {
                let candidate = self.at(row, i);
                if candidate.abs() > pivot.abs() {
                    pivot = candidate;
                    pivot_row = row;
                }
            }
            if pivot.abs() < PIVOT_TOL {
                return Err(SimError::SingularSystem { t, pivot });
            }
            if pivot_row != i {
                self.swap_rows(i, pivot_row);
            }
            // Normalize the pivot row; columns left of i are already zero.
            for col in i..=n + 1 {
                let v = self.at(i, col) / pivot;
                self.buf[i * self.stride + col] = v;
            }
            // Eliminate column i from every other row.
            for row in 1..=n {
                if row == i {
                    continue;
                }
                let factor = self.at(row, i);
                if factor == 0.0 {
                    continue;
                }
                for col in i..=n + 1 {
                    let v = self.at(i, col);
                    self.buf[row * self.stride + col] -= factor * v;
                }
            }
        }
        Ok(())
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        for col in 0..self.stride {
            self.buf.swap(a * self.stride + col, b * self.stride + col);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn system_from(rows: &[&[f64]], rhs: &[f64]) -> MnaSystem {
        let n = rhs.len();
        let mut sys = MnaSystem::new(n);
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                sys.add(i + 1, j + 1, v);
            }
            sys.add_rhs(i + 1, rhs[i]);
        }
        sys
    }

    #[test]
    fn solve_identity() {
        let mut sys = system_from(&[&[1.0, 0.0], &[0.0, 1.0]], &[3.0, 7.0]);
        sys.solve(0.0).unwrap();
        assert_abs_diff_eq!(sys.solution(1), 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sys.solution(2), 7.0, epsilon = 1e-12);
    }

    #[test]
    fn solve_known_2x2() {
        // [[2, 1], [5, 7]] x = [11, 13] => x = [64/9, -29/9]
        let mut sys = system_from(&[&[2.0, 1.0], &[5.0, 7.0]], &[11.0, 13.0]);
        sys.solve(0.0).unwrap();
        assert_abs_diff_eq!(sys.solution(1), 64.0 / 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sys.solution(2), -29.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn solve_requires_pivoting() {
        // Zero in the first pivot position forces a row swap.
        let mut sys = system_from(
            &[&[0.0, 2.0, 1.0], &[1.0, 1.0, 1.0], &[2.0, 1.0, 0.0]],
            &[5.0, 4.0, 4.0],
        );
        sys.solve(0.0).unwrap();
        assert_abs_diff_eq!(sys.solution(1), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sys.solution(2), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sys.solution(3), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn solve_singular_reports_time() {
        let mut sys = system_from(&[&[1.0, 2.0], &[2.0, 4.0]], &[3.0, 6.0]);
        match sys.solve(2.5) {
            Err(SimError::SingularSystem { t, .. }) => assert_eq!(t, 2.5),
            other => panic!("expected SingularSystem, got {:?}", other),
        }
    }

    #[test]
    fn ground_row_is_ignored() {
        // Garbage stamped into row/column 0 must not affect the solve.
        let mut sys = system_from(&[&[2.0]], &[4.0]);
        sys.add(0, 0, 123.0);
        sys.add(0, 1, -7.0);
        sys.add(1, 0, 9.0);
        sys.add_rhs(0, 55.0);
        sys.solve(0.0).unwrap();
        assert_abs_diff_eq!(sys.solution(1), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn conductance_stamp_pattern() {
        let mut sys = MnaSystem::new(2);
        sys.stamp_conductance(1, 2, 0.01);
        assert_abs_diff_eq!(sys.at(1, 1), 0.01);
        assert_abs_diff_eq!(sys.at(2, 2), 0.01);
        assert_abs_diff_eq!(sys.at(1, 2), -0.01);
        assert_abs_diff_eq!(sys.at(2, 1), -0.01);
    }

    #[test]
    fn current_stamp_pattern() {
        let mut sys = MnaSystem::new(2);
        sys.stamp_current(1, 2, 2e-3);
        assert_abs_diff_eq!(sys.at(1, 3), -2e-3);
        assert_abs_diff_eq!(sys.at(2, 3), 2e-3);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut sys = MnaSystem::new(2);
        sys.stamp_conductance(1, 2, 1.0);
        sys.add_rhs(1, 5.0);
        sys.clear();
        for row in 0..=2 {
            for col in 0..=3 {
                assert_eq!(sys.at(row, col), 0.0);
            }
        }
    }

    #[test]
    fn reuse_after_solve() {
        let mut sys = MnaSystem::new(1);
        sys.add(1, 1, 2.0);
        sys.add_rhs(1, 4.0);
        sys.solve(0.0).unwrap();
        sys.clear();
        sys.add(1, 1, 4.0);
        sys.add_rhs(1, 4.0);
        sys.solve(0.0).unwrap();
        assert_abs_diff_eq!(sys.solution(1), 1.0, epsilon = 1e-12);
    }
}
