//! Separable convex approximation of the objective and constraints.
//!
//! Each function is replaced by `sum_j p_j/(upp_j - x_j) + q_j/(x_j - low_j)`
//! with non-negative coefficients, which is convex on `(low, upp)` and matches
//! the gradient of the true function at the current design.

use nalgebra::{DMatrix, DVector};

use crate::asymptotes::{Asymptotes, MoveLimits};
use crate::error::{check_len, Result};
use crate::settings::MmaSettings;
use crate::traits::Communicator;

const MIN_ASYMPTOTE_GAP: f64 = 1e-5;

#[derive(Debug, Clone)]
pub struct Approximation {
    pub low: DVector<f64>,
    pub upp: DVector<f64>,
    pub alfa: DVector<f64>,
    pub beta: DVector<f64>,
    pub p0: DVector<f64>,
    pub q0: DVector<f64>,
    /// `n_local x m`, one column per constraint.
    pub p: DMatrix<f64>,
    pub q: DMatrix<f64>,
    /// Replicated right-hand side of the approximated constraints.
    pub b: DVector<f64>,
    /// Length of the full design vector over all ranks.
    pub n_global: usize,
}

/// Current design point and its gradients as supplied by the caller.
pub struct GradientPoint<'a> {
    pub xval: &'a DVector<f64>,
    pub dfdx: &'a DVector<f64>,
    pub g: &'a DVector<f64>,
    pub dgdx: &'a DMatrix<f64>,
}

impl Approximation {
    /// Builds the coefficients around `point`. `b` needs a sum over the full
    /// design vector, so this is a collective call.
    pub fn build(
        point: &GradientPoint<'_>,
        asymptotes: &Asymptotes,
        limits: &MoveLimits,
        n_global: usize,
        settings: &MmaSettings,
        comm: &dyn Communicator,
    ) -> Result<Self> {
        let GradientPoint {
            xval,
            dfdx,
            g,
            dgdx,
        } = *point;
        let n = xval.len();
        let m = g.len();
        check_len("objective gradient", n, dfdx.len())?;
        check_len("constraint gradient rows", n, dgdx.nrows())?;
        check_len("constraint gradient columns", m, dgdx.ncols())?;

        let low = &asymptotes.low;
        let upp = &asymptotes.upp;

        let mut p0 = DVector::<f64>::zeros(n);
        let mut q0 = DVector::<f64>::zeros(n);
        let mut p = DMatrix::<f64>::zeros(n, m);
        let mut q = DMatrix::<f64>::zeros(n, m);
        for j in 0..n {
            let ux1 = upp[j] - xval[j];
            let xl1 = xval[j] - low[j];
            let ux2 = ux1 * ux1;
            let xl2 = xl1 * xl1;
            let gap = (upp[j] - low[j]).max(MIN_ASYMPTOTE_GAP);

            let floor = 0.5 * settings.raa0 / gap;
            let split = |grad: f64| {
                let pos = grad.max(0.0);
                let neg = (-grad).max(0.0);
                let reg = 0.001 * (pos + neg) + floor;
                ((pos + reg) * ux2, (neg + reg) * xl2)
            };

            (p0[j], q0[j]) = split(dfdx[j]);
            for i in 0..m {
                (p[(j, i)], q[(j, i)]) = split(dgdx[(j, i)]);
            }
        }

        let mut approx = Self {
            low: low.clone(),
            upp: upp.clone(),
            alfa: limits.alfa.clone(),
            beta: limits.beta.clone(),
            p0,
            q0,
            p,
            q,
            b: DVector::zeros(m),
            n_global,
        };

        let mut b = approx.local_constraint_sums(xval);
        comm.sum_in_place(b.as_mut_slice())?;
        approx.b = b - g;
        Ok(approx)
    }

    pub fn n_local(&self) -> usize {
        self.p0.len()
    }

    pub fn m(&self) -> usize {
        self.b.len()
    }

    /// This rank's share of `sum_j P_ji/(upp_j - x_j) + Q_ji/(x_j - low_j)`.
    pub fn local_constraint_sums(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::<f64>::zeros(self.m());
        for j in 0..self.n_local() {
            let uxinv = 1.0 / (self.upp[j] - x[j]);
            let xlinv = 1.0 / (x[j] - self.low[j]);
            for i in 0..self.m() {
                out[i] += self.p[(j, i)] * uxinv + self.q[(j, i)] * xlinv;
            }
        }
        out
    }

    /// `p0 + P*lambda` and `q0 + Q*lambda`.
    pub fn lagrangian_coefficients(&self, lambda: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        (&self.p0 + &self.p * lambda, &self.q0 + &self.q * lambda)
    }

    /// `d/dx` of the approximated Lagrangian at `x`.
    pub fn lagrangian_gradient(
        &self,
        x: &DVector<f64>,
        plam: &DVector<f64>,
        qlam: &DVector<f64>,
    ) -> DVector<f64> {
        DVector::from_fn(self.n_local(), |j, _| {
            let ux1 = self.upp[j] - x[j];
            let xl1 = x[j] - self.low[j];
            plam[j] / (ux1 * ux1) - qlam[j] / (xl1 * xl1)
        })
    }
}
