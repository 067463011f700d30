//! Dual Newton solver for the MMA subproblem (Aage & Lazarov, 2013).
//!
//! The primal variables are eliminated in closed form, leaving a smooth
//! concave problem in the `m` constraint multipliers. It is maximised by an
//! interior-point Newton method on `(lambda, eta)`, where `eta` is the
//! multiplier of `lambda >= 0`. Only the gradient and Hessian assembly touch
//! the partitioned design vector; the `m x m` Newton system is solved
//! redundantly on every rank.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::approximation::Approximation;
use crate::error::{MmaError, Result};
use crate::settings::{ConstraintWeights, MmaSettings};
use crate::traits::{Communicator, SubproblemSolver};
use crate::types::{KktPoint, SolveDiagnostics, SubproblemSolution};

const INITIAL_LAMBDA: f64 = 500.0;
const STEP_TO_BOUNDARY: f64 = 0.99;
const Z_SCALE: f64 = 10.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct DualNewton;

/// Primal point implied by a multiplier vector.
struct DualPoint {
    x: DVector<f64>,
    y: DVector<f64>,
    z: f64,
    plam: DVector<f64>,
    qlam: DVector<f64>,
}

impl DualPoint {
    fn at(approx: &Approximation, weights: &ConstraintWeights, lambda: &DVector<f64>) -> Self {
        let (plam, qlam) = approx.lagrangian_coefficients(lambda);
        let x = DVector::from_fn(approx.n_local(), |j, _| {
            let prt = plam[j].sqrt();
            let qrt = qlam[j].sqrt();
            let x = (prt * approx.low[j] + qrt * approx.upp[j]) / (prt + qrt);
            x.min(approx.beta[j]).max(approx.alfa[j])
        });
        let y = DVector::from_fn(lambda.len(), |i, _| {
            ((lambda[i] - weights.c[i]) / weights.d[i]).max(0.0)
        });
        let z = Z_SCALE * ((lambda.dot(&weights.a) - weights.a0) / weights.b0).max(0.0);
        Self {
            x,
            y,
            z,
            plam,
            qlam,
        }
    }
}

struct DualResidual {
    norm: f64,
    max: f64,
}

impl DualResidual {
    fn new(grad: &DVector<f64>, eta: &DVector<f64>, lambda: &DVector<f64>, epsi: f64) -> Self {
        let mut sq = 0.0;
        let mut max = 0.0f64;
        for i in 0..grad.len() {
            for r in [grad[i] + eta[i], eta[i] * lambda[i] - epsi] {
                sq += r * r;
                max = max.max(r.abs());
            }
        }
        Self {
            norm: sq.sqrt(),
            max,
        }
    }
}

impl SubproblemSolver for DualNewton {
    fn name(&self) -> &'static str {
        "dual Newton"
    }

    fn solve(
        &self,
        approx: &Approximation,
        weights: &ConstraintWeights,
        settings: &MmaSettings,
        comm: &dyn Communicator,
    ) -> Result<SubproblemSolution> {
        let m = approx.m();
        if m == 0 {
            return Err(MmaError::NoConstraints);
        }

        let mut diagnostics = SolveDiagnostics::default();
        let mut eta = DVector::from_element(m, 1.0);
        let mut lambda = DVector::from_element(m, INITIAL_LAMBDA);
        let mut point = DualPoint::at(approx, weights, &lambda);
        let mut grad = dual_gradient(approx, weights, &point, comm)?;

        let mut epsi = 1.0;
        while epsi > settings.epsimin {
            diagnostics.barrier_levels += 1;
            let mut residual = DualResidual::new(&grad, &eta, &lambda, epsi);

            let mut inner = 0;
            while residual.max > 0.9 * epsi && inner < settings.dual_max_inner {
                inner += 1;

                let hess = dual_hessian(approx, weights, &point, &lambda, comm)?;
                let (dlam, deta) = search_direction(&hess, &grad, &lambda, &eta, epsi)?;
                let theta = step_length(&lambda, &eta, &dlam, &deta);

                lambda.axpy(theta, &dlam, 1.0);
                eta.axpy(theta, &deta, 1.0);
                diagnostics.min_multiplier = diagnostics
                    .min_multiplier
                    .min(lambda.min())
                    .min(eta.min());

                point = DualPoint::at(approx, weights, &lambda);
                grad = dual_gradient(approx, weights, &point, comm)?;
                residual = DualResidual::new(&grad, &eta, &lambda, epsi);
            }

            diagnostics.newton_iterations += inner;
            diagnostics.residual_norm = residual.norm;
            diagnostics.residual_max = residual.max;
            if residual.max > 0.9 * epsi {
                diagnostics.capped_levels += 1;
                warn!(
                    epsi,
                    residual = residual.max,
                    "dual Newton hit the inner iteration cap"
                );
            }
            debug!(epsi, iterations = inner, residual = residual.max, "dual barrier level done");
            epsi *= 0.1;
        }

        // Recover the bound, slack and artificial-variable multipliers from
        // stationarity so the KKT diagnostics apply to this backend too.
        let dpsidx = approx.lagrangian_gradient(&point.x, &point.plam, &point.qlam);
        let xsi = dpsidx.map(|v| v.max(0.0));
        let eta_x = dpsidx.map(|v| (-v).max(0.0));
        let mu = DVector::from_fn(m, |i, _| {
            (weights.c[i] + weights.d[i] * point.y[i] - lambda[i]).max(0.0)
        });
        let zet = (weights.a0 - weights.a.dot(&lambda)).max(0.0);
        let s = grad.map(|v| (-v).max(0.0));

        Ok(SubproblemSolution {
            point: KktPoint {
                x: point.x,
                y: point.y,
                z: point.z,
                lambda,
                xsi,
                eta: eta_x,
                mu,
                zet,
                s,
            },
            diagnostics,
        })
    }
}

/// Gradient of the dual function: `f_i(x(lambda)) - b_i - a_i z - y_i`.
fn dual_gradient(
    approx: &Approximation,
    weights: &ConstraintWeights,
    point: &DualPoint,
    comm: &dyn Communicator,
) -> Result<DVector<f64>> {
    let mut grad = approx.local_constraint_sums(&point.x);
    comm.sum_in_place(grad.as_mut_slice())?;
    grad -= &approx.b + &weights.a * point.z + &point.y;
    Ok(grad)
}

fn dual_hessian(
    approx: &Approximation,
    weights: &ConstraintWeights,
    point: &DualPoint,
    lambda: &DVector<f64>,
    comm: &dyn Communicator,
) -> Result<DMatrix<f64>> {
    let n = approx.n_local();
    let m = approx.m();

    // dh/dx, one row per constraint, and the inverse Lagrangian curvature,
    // zeroed where x sits on a move limit.
    let mut dhdx = DMatrix::<f64>::zeros(m, n);
    let mut curvature_inv = DVector::<f64>::zeros(n);
    for j in 0..n {
        let ux1 = approx.upp[j] - point.x[j];
        let xl1 = point.x[j] - approx.low[j];
        let ux2 = ux1 * ux1;
        let xl2 = xl1 * xl1;
        for i in 0..m {
            dhdx[(i, j)] = approx.p[(j, i)] / ux2 - approx.q[(j, i)] / xl2;
        }
        let free = point.x[j] > approx.alfa[j] && point.x[j] < approx.beta[j];
        if free {
            curvature_inv[j] =
                1.0 / (2.0 * point.plam[j] / (ux2 * ux1) + 2.0 * point.qlam[j] / (xl2 * xl1));
        }
    }

    let weighted = &dhdx * DMatrix::from_diagonal(&curvature_inv);
    let mut hess = -(weighted * dhdx.transpose());
    comm.sum_in_place(hess.as_mut_slice())?;

    for i in 0..m {
        if lambda[i] > weights.c[i] {
            hess[(i, i)] -= 1.0 / weights.d[i];
        }
    }
    if point.z > 0.0 {
        hess -= (&weights.a * weights.a.transpose()) * (Z_SCALE / weights.b0);
    }
    Ok(hess)
}

fn search_direction(
    hess: &DMatrix<f64>,
    grad: &DVector<f64>,
    lambda: &DVector<f64>,
    eta: &DVector<f64>,
    epsi: f64,
) -> Result<(DVector<f64>, DVector<f64>)> {
    let m = lambda.len();
    let eta_over_lam = eta.component_div(lambda);
    let epsi_over_lam = lambda.map(|l| epsi / l);

    // Damping follows the dual curvature, not the eta/lambda barrier term.
    let shift = (1e-4 * hess.trace() / m as f64).min(-1e-7);
    let mut a = hess - DMatrix::from_diagonal(&eta_over_lam);
    for i in 0..m {
        a[(i, i)] += shift;
    }

    let rhs = -grad - &epsi_over_lam;
    let dlam = a
        .lu()
        .solve(&rhs)
        .ok_or(MmaError::SingularSystem("dual Newton"))?;
    let deta = -eta + epsi_over_lam - dlam.component_mul(&eta_over_lam);
    Ok((dlam, deta))
}

/// Largest step in `(0, 1]` keeping `lambda` and `eta` strictly positive.
fn step_length(
    lambda: &DVector<f64>,
    eta: &DVector<f64>,
    dlam: &DVector<f64>,
    deta: &DVector<f64>,
) -> f64 {
    let mut theta = 1.0f64;
    for (v, dv) in lambda.iter().zip(dlam.iter()).chain(eta.iter().zip(deta.iter())) {
        let ratio = -STEP_TO_BOUNDARY * v / dv;
        if ratio >= 0.0 {
            theta = theta.min(ratio);
        }
    }
    theta
}
