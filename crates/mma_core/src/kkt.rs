//! KKT residuals of the MMA subproblem and of the original problem.
//!
//! Both functions are collective: the blocks indexed by design variables are
//! partitioned and reduced, the constraint-indexed blocks are replicated and
//! counted once.

use nalgebra::{DMatrix, DVector};

use crate::approximation::Approximation;
use crate::error::{check_len, Result};
use crate::settings::ConstraintWeights;
use crate::traits::Communicator;
use crate::types::{KktPoint, KktResidual};

#[derive(Default)]
struct Accumulator {
    sq: f64,
    max: f64,
}

impl Accumulator {
    fn push(&mut self, r: f64) {
        self.sq += r * r;
        self.max = self.max.max(r.abs());
    }

    fn extend(&mut self, values: impl IntoIterator<Item = f64>) {
        for r in values {
            self.push(r);
        }
    }
}

/// Residual of the barrier-perturbed KKT system of the subproblem.
///
/// With `epsi = 0` this measures how well `point` solves the subproblem
/// itself, whichever backend produced it.
pub fn subproblem_residual(
    approx: &Approximation,
    weights: &ConstraintWeights,
    point: &KktPoint,
    epsi: f64,
    comm: &dyn Communicator,
) -> Result<KktResidual> {
    let m = approx.m();
    let KktPoint {
        x,
        y,
        z,
        lambda,
        xsi,
        eta,
        mu,
        zet,
        s,
    } = point;

    let (plam, qlam) = approx.lagrangian_coefficients(lambda);
    let dpsidx = approx.lagrangian_gradient(x, &plam, &qlam);

    let mut local = Accumulator::default();
    for j in 0..approx.n_local() {
        local.push(dpsidx[j] - xsi[j] + eta[j]);
        local.push(xsi[j] * (x[j] - approx.alfa[j]) - epsi);
        local.push(eta[j] * (approx.beta[j] - x[j]) - epsi);
    }

    // One sum carries both the constraint values and the local squares.
    let mut buf = approx.local_constraint_sums(x).as_slice().to_vec();
    buf.push(local.sq);
    comm.sum_in_place(&mut buf)?;
    let global_sq = buf[m];
    let global_max = comm.max(local.max)?;

    let mut shared = Accumulator::default();
    shared.extend((0..m).map(|i| weights.c[i] + weights.d[i] * y[i] - mu[i] - lambda[i]));
    shared.push(weights.a0 - zet - weights.a.dot(lambda));
    shared.extend((0..m).map(|i| buf[i] - weights.a[i] * z - y[i] + s[i] - approx.b[i]));
    shared.extend((0..m).map(|i| mu[i] * y[i] - epsi));
    shared.push(zet * z - epsi);
    shared.extend((0..m).map(|i| lambda[i] * s[i] - epsi));

    Ok(KktResidual {
        norm: (global_sq + shared.sq).sqrt(),
        max: global_max.max(shared.max),
    })
}

/// True problem data the original KKT check is evaluated against.
pub struct OriginalProblem<'a> {
    pub xval: &'a DVector<f64>,
    pub xmin: &'a DVector<f64>,
    pub xmax: &'a DVector<f64>,
    pub dfdx: &'a DVector<f64>,
    pub g: &'a DVector<f64>,
    pub dgdx: &'a DMatrix<f64>,
}

/// KKT residual of the original problem at `problem.xval`, using the
/// multipliers of the last subproblem solution. The bound multipliers refer
/// to `xmin`/`xmax` instead of the move limits.
pub fn original_problem_residual(
    problem: &OriginalProblem<'_>,
    weights: &ConstraintWeights,
    point: &KktPoint,
    comm: &dyn Communicator,
) -> Result<KktResidual> {
    let OriginalProblem {
        xval,
        xmin,
        xmax,
        dfdx,
        g,
        dgdx,
    } = *problem;
    let n = xval.len();
    let m = g.len();
    check_len("objective gradient", n, dfdx.len())?;
    check_len("constraint gradient rows", n, dgdx.nrows())?;
    check_len("constraint gradient columns", m, dgdx.ncols())?;
    check_len("multipliers", m, point.lambda.len())?;
    check_len("bound multipliers", n, point.xsi.len())?;

    let rex = dfdx + dgdx * &point.lambda - &point.xsi + &point.eta;
    let mut local = Accumulator::default();
    for j in 0..n {
        local.push(rex[j]);
        local.push(point.xsi[j] * (xval[j] - xmin[j]));
        local.push(point.eta[j] * (xmax[j] - xval[j]));
    }
    let global_sq = comm.sum(local.sq)?;
    let global_max = comm.max(local.max)?;

    let KktPoint {
        y,
        z,
        lambda,
        mu,
        zet,
        s,
        ..
    } = point;
    let mut shared = Accumulator::default();
    shared.extend((0..m).map(|i| weights.c[i] + weights.d[i] * y[i] - mu[i] - lambda[i]));
    shared.push(weights.a0 - zet - weights.a.dot(lambda));
    shared.extend((0..m).map(|i| g[i] - weights.a[i] * z - y[i] + s[i]));
    shared.extend((0..m).map(|i| mu[i] * y[i]));
    shared.push(zet * z);
    shared.extend((0..m).map(|i| lambda[i] * s[i]));

    Ok(KktResidual {
        norm: (global_sq + shared.sq).sqrt(),
        max: global_max.max(shared.max),
    })
}
