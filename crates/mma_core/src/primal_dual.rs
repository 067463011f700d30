//! Primal-dual interior-point solver for the MMA subproblem (Svanberg's
//! `subsolv`).
//!
//! All nine variable groups are iterated jointly on the barrier-perturbed
//! KKT system. Each Newton step eliminates the diagonal blocks and solves a
//! dense system in either the constraint multipliers or the design
//! variables, whichever is smaller. A design vector partitioned over several
//! ranks always takes the multiplier form, which only needs sums of local
//! contributions.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::approximation::Approximation;
use crate::error::{MmaError, Result};
use crate::kkt::subproblem_residual;
use crate::settings::{ConstraintWeights, MmaSettings};
use crate::traits::{Communicator, SubproblemSolver};
use crate::types::{KktPoint, SolveDiagnostics, SubproblemSolution};

const STEP_TO_BOUNDARY: f64 = 1.01;

#[derive(Debug, Clone, Copy, Default)]
pub struct PrimalDual;

impl SubproblemSolver for PrimalDual {
    fn name(&self) -> &'static str {
        "primal-dual"
    }

    fn solve(
        &self,
        approx: &Approximation,
        weights: &ConstraintWeights,
        settings: &MmaSettings,
        comm: &dyn Communicator,
    ) -> Result<SubproblemSolution> {
        if approx.m() == 0 {
            return Err(MmaError::NoConstraints);
        }

        let mut diagnostics = SolveDiagnostics::default();
        let mut point = initial_point(approx, weights);

        let mut epsi = 1.0;
        while epsi > settings.epsimin {
            diagnostics.barrier_levels += 1;
            let mut residual = subproblem_residual(approx, weights, &point, epsi, comm)?;

            let mut inner = 0;
            while residual.max > 0.9 * epsi && inner < settings.primal_dual_max_inner {
                inner += 1;

                let dir = newton_direction(approx, weights, &point, epsi, comm)?;
                let mut step = 1.0 / max_step_inverse(approx, &point, &dir, comm)?;

                // Halve until the residual norm does not grow.
                let mut backtracks = 0;
                let (trial, trial_residual) = loop {
                    backtracks += 1;
                    let trial = point.stepped(&dir, step);
                    let trial_residual = subproblem_residual(approx, weights, &trial, epsi, comm)?;
                    step *= 0.5;
                    if trial_residual.norm <= residual.norm
                        || backtracks >= settings.max_backtracks
                    {
                        break (trial, trial_residual);
                    }
                };
                if trial_residual.norm > residual.norm {
                    diagnostics.exhausted_line_searches += 1;
                }

                point = trial;
                residual = trial_residual;
                diagnostics.min_multiplier = diagnostics.min_multiplier.min(positive_min(&point));
            }

            diagnostics.newton_iterations += inner;
            diagnostics.residual_norm = residual.norm;
            diagnostics.residual_max = residual.max;
            if residual.max > 0.9 * epsi {
                diagnostics.capped_levels += 1;
                warn!(
                    epsi,
                    residual = residual.max,
                    "primal-dual hit the inner iteration cap"
                );
            }
            debug!(epsi, iterations = inner, residual = residual.max, "primal-dual barrier level done");
            epsi *= 0.1;
        }

        if diagnostics.exhausted_line_searches > 0 {
            warn!(
                count = diagnostics.exhausted_line_searches,
                "primal-dual backtracking stopped on the halving cap"
            );
        }

        Ok(SubproblemSolution { point, diagnostics })
    }
}

fn initial_point(approx: &Approximation, weights: &ConstraintWeights) -> KktPoint {
    let m = approx.m();
    let x = (&approx.alfa + &approx.beta) * 0.5;
    let xsi = DVector::from_fn(x.len(), |j, _| (1.0 / (x[j] - approx.alfa[j])).max(1.0));
    let eta = DVector::from_fn(x.len(), |j, _| (1.0 / (approx.beta[j] - x[j])).max(1.0));
    KktPoint {
        y: DVector::from_element(m, 1.0),
        z: 1.0,
        lambda: DVector::from_element(m, 1.0),
        xsi,
        eta,
        mu: weights.c.map(|c| (0.5 * c).max(1.0)),
        zet: 1.0,
        s: DVector::from_element(m, 1.0),
        x,
    }
}

/// Smallest value among the sign-constrained variables on this rank.
fn positive_min(point: &KktPoint) -> f64 {
    [
        point.y.min(),
        point.z,
        point.lambda.min(),
        point.mu.min(),
        point.zet,
        point.s.min(),
    ]
    .into_iter()
    .chain(point.xsi.iter().copied())
    .chain(point.eta.iter().copied())
    .fold(f64::INFINITY, f64::min)
}

fn newton_direction(
    approx: &Approximation,
    weights: &ConstraintWeights,
    pt: &KktPoint,
    epsi: f64,
    comm: &dyn Communicator,
) -> Result<KktPoint> {
    let n = approx.n_local();
    let m = approx.m();
    let ConstraintWeights { a0, a, c, d, .. } = weights;

    let (plam, qlam) = approx.lagrangian_coefficients(&pt.lambda);
    let dpsidx = approx.lagrangian_gradient(&pt.x, &plam, &qlam);
    let mut gvec = approx.local_constraint_sums(&pt.x);
    comm.sum_in_place(gvec.as_mut_slice())?;

    let mut gg = DMatrix::<f64>::zeros(m, n);
    let mut delx = DVector::<f64>::zeros(n);
    let mut diagx = DVector::<f64>::zeros(n);
    for j in 0..n {
        let ux1 = approx.upp[j] - pt.x[j];
        let xl1 = pt.x[j] - approx.low[j];
        let ux2 = ux1 * ux1;
        let xl2 = xl1 * xl1;
        let xa = pt.x[j] - approx.alfa[j];
        let bx = approx.beta[j] - pt.x[j];
        for i in 0..m {
            gg[(i, j)] = approx.p[(j, i)] / ux2 - approx.q[(j, i)] / xl2;
        }
        delx[j] = dpsidx[j] - epsi / xa + epsi / bx;
        diagx[j] = 2.0 * (plam[j] / (ux2 * ux1) + qlam[j] / (xl2 * xl1))
            + pt.xsi[j] / xa
            + pt.eta[j] / bx;
    }

    let dely = DVector::from_fn(m, |i, _| c[i] + d[i] * pt.y[i] - pt.lambda[i] - epsi / pt.y[i]);
    let delz = a0 - a.dot(&pt.lambda) - epsi / pt.z;
    let dellam = DVector::from_fn(m, |i, _| {
        gvec[i] - a[i] * pt.z - pt.y[i] - approx.b[i] + epsi / pt.lambda[i]
    });
    let diagy = DVector::from_fn(m, |i, _| d[i] + pt.mu[i] / pt.y[i]);
    let diaglamyi = DVector::from_fn(m, |i, _| pt.s[i] / pt.lambda[i] + 1.0 / diagy[i]);

    let blocks = NewtonBlocks {
        gg,
        delx,
        diagx,
        dely,
        diagy,
        delz,
        dellam,
        diaglamyi,
        zet_over_z: pt.zet / pt.z,
    };
    let (dx, dlam, dz) = if comm.size() > 1 || m < approx.n_global {
        blocks.solve_multiplier_block(a, comm)?
    } else {
        blocks.solve_design_block(a)?
    };
    let NewtonBlocks { dely, diagy, .. } = blocks;

    let dy = DVector::from_fn(m, |i, _| (dlam[i] - dely[i]) / diagy[i]);
    let dxsi = DVector::from_fn(n, |j, _| {
        let xa = pt.x[j] - approx.alfa[j];
        -pt.xsi[j] + epsi / xa - pt.xsi[j] * dx[j] / xa
    });
    let deta = DVector::from_fn(n, |j, _| {
        let bx = approx.beta[j] - pt.x[j];
        -pt.eta[j] + epsi / bx + pt.eta[j] * dx[j] / bx
    });
    let dmu = DVector::from_fn(m, |i, _| -pt.mu[i] + epsi / pt.y[i] - pt.mu[i] * dy[i] / pt.y[i]);
    let dzet = -pt.zet + epsi / pt.z - pt.zet * dz / pt.z;
    let ds = DVector::from_fn(m, |i, _| {
        -pt.s[i] + epsi / pt.lambda[i] - pt.s[i] * dlam[i] / pt.lambda[i]
    });

    Ok(KktPoint {
        x: dx,
        y: dy,
        z: dz,
        lambda: dlam,
        xsi: dxsi,
        eta: deta,
        mu: dmu,
        zet: dzet,
        s: ds,
    })
}

/// Right-hand sides and diagonals of the barrier Newton system after the
/// complementarity rows have been eliminated.
struct NewtonBlocks {
    /// `m x n_local` Jacobian of the approximated constraints.
    gg: DMatrix<f64>,
    delx: DVector<f64>,
    diagx: DVector<f64>,
    dely: DVector<f64>,
    diagy: DVector<f64>,
    delz: f64,
    dellam: DVector<f64>,
    diaglamyi: DVector<f64>,
    zet_over_z: f64,
}

impl NewtonBlocks {
    /// Eliminates `x` and `y`, leaving an `(m+1)`-square system in
    /// `(lambda, z)`. Its matrix is a sum over the design partition.
    fn solve_multiplier_block(
        &self,
        a: &DVector<f64>,
        comm: &dyn Communicator,
    ) -> Result<(DVector<f64>, DVector<f64>, f64)> {
        let m = self.dellam.len();
        let gg = &self.gg;
        let diagxinv = self.diagx.map(|v| 1.0 / v);

        let mut gg_delx = gg * self.delx.component_mul(&diagxinv);
        comm.sum_in_place(gg_delx.as_mut_slice())?;
        let mut alam = gg * DMatrix::from_diagonal(&diagxinv) * gg.transpose();
        comm.sum_in_place(alam.as_mut_slice())?;

        let mut aa = DMatrix::<f64>::zeros(m + 1, m + 1);
        let mut bb = DVector::<f64>::zeros(m + 1);
        aa.view_mut((0, 0), (m, m)).copy_from(&alam);
        for i in 0..m {
            aa[(i, i)] += self.diaglamyi[i];
            aa[(i, m)] = a[i];
            aa[(m, i)] = a[i];
            bb[i] = self.dellam[i] + self.dely[i] / self.diagy[i] - gg_delx[i];
        }
        aa[(m, m)] = -self.zet_over_z;
        bb[m] = self.delz;

        let sol = aa
            .lu()
            .solve(&bb)
            .ok_or(MmaError::SingularSystem("primal-dual multiplier block"))?;
        let dlam = sol.rows(0, m).into_owned();
        let dz = sol[m];
        let dx = -(&self.delx + gg.transpose() * &dlam).component_mul(&diagxinv);
        Ok((dx, dlam, dz))
    }

    /// Eliminates `lambda` and `y`, leaving an `(n+1)`-square system in
    /// `(x, z)`. Only valid when this rank owns the whole design vector.
    fn solve_design_block(&self, a: &DVector<f64>) -> Result<(DVector<f64>, DVector<f64>, f64)> {
        let n = self.delx.len();
        let gg = &self.gg;
        let diaglamyiinv = self.diaglamyi.map(|v| 1.0 / v);
        let dellamyi = &self.dellam + self.dely.component_div(&self.diagy);
        let a_scaled = a.component_mul(&diaglamyiinv);
        let rhs_scaled = dellamyi.component_mul(&diaglamyiinv);

        let axx = DMatrix::from_diagonal(&self.diagx)
            + gg.transpose() * DMatrix::from_diagonal(&diaglamyiinv) * gg;
        let azz = self.zet_over_z + a.dot(&a_scaled);
        let axz = -(gg.transpose() * &a_scaled);
        let bx = &self.delx + gg.transpose() * &rhs_scaled;
        let bz = self.delz - a.dot(&rhs_scaled);

        let mut aa = DMatrix::<f64>::zeros(n + 1, n + 1);
        let mut bb = DVector::<f64>::zeros(n + 1);
        aa.view_mut((0, 0), (n, n)).copy_from(&axx);
        for j in 0..n {
            aa[(j, n)] = axz[j];
            aa[(n, j)] = axz[j];
            bb[j] = -bx[j];
        }
        aa[(n, n)] = azz;
        bb[n] = -bz;

        let sol = aa
            .lu()
            .solve(&bb)
            .ok_or(MmaError::SingularSystem("primal-dual design block"))?;
        let dx = sol.rows(0, n).into_owned();
        let dz = sol[n];
        let dlam = (gg * &dx).component_mul(&diaglamyiinv) - &a_scaled * dz + rhs_scaled;
        Ok((dx, dlam, dz))
    }
}

/// Inverse of the largest step that keeps every positive variable and the
/// move-limit distances positive, floored at 1.
fn max_step_inverse(
    approx: &Approximation,
    pt: &KktPoint,
    dir: &KktPoint,
    comm: &dyn Communicator,
) -> Result<f64> {
    let ratio = |v: f64, dv: f64| -STEP_TO_BOUNDARY * dv / v;

    let mut local = f64::NEG_INFINITY;
    for j in 0..approx.n_local() {
        local = local
            .max(ratio(pt.xsi[j], dir.xsi[j]))
            .max(ratio(pt.eta[j], dir.eta[j]))
            .max(ratio(pt.x[j] - approx.alfa[j], dir.x[j]))
            .max(ratio(approx.beta[j] - pt.x[j], -dir.x[j]));
    }
    let mut shared = ratio(pt.z, dir.z).max(ratio(pt.zet, dir.zet));
    for i in 0..approx.m() {
        shared = shared
            .max(ratio(pt.y[i], dir.y[i]))
            .max(ratio(pt.lambda[i], dir.lambda[i]))
            .max(ratio(pt.mu[i], dir.mu[i]))
            .max(ratio(pt.s[i], dir.s[i]));
    }
    let global = comm.max(local)?;
    Ok(global.max(shared).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialComm;
    use crate::dual::DualNewton;

    fn approx_1d(m: usize, p: &[f64], b: &[f64]) -> Approximation {
        Approximation {
            low: DVector::from_element(1, 0.0),
            upp: DVector::from_element(1, 1.0),
            alfa: DVector::from_element(1, 0.05),
            beta: DVector::from_element(1, 0.95),
            p0: DVector::from_element(1, 0.01),
            q0: DVector::from_element(1, 1.0),
            p: DMatrix::from_row_slice(1, m, p),
            q: DMatrix::zeros(1, m),
            b: DVector::from_row_slice(b),
            n_global: 1,
        }
    }

    #[test]
    fn initial_point_is_strictly_interior() {
        let approx = approx_1d(1, &[0.1], &[0.2]);
        let pt = initial_point(&approx, &ConstraintWeights::new(1));
        assert!((pt.x[0] - 0.5).abs() < 1e-15);
        assert!(pt.xsi[0] >= 1.0 && pt.eta[0] >= 1.0);
        assert_eq!(pt.mu[0], 500.0);
        assert!(positive_min(&pt) > 0.0);
    }

    #[test]
    fn step_bound_is_at_least_one() {
        let approx = approx_1d(1, &[0.1], &[0.2]);
        let pt = initial_point(&approx, &ConstraintWeights::new(1));
        let mut dir = pt.clone();
        for v in dir.x.iter_mut() {
            *v = 0.0;
        }
        // Every positive group grows, so nothing binds.
        assert_eq!(max_step_inverse(&approx, &pt, &dir, &SerialComm).unwrap(), 1.0);

        dir.lambda[0] = -2.0 * pt.lambda[0];
        let inv = max_step_inverse(&approx, &pt, &dir, &SerialComm).unwrap();
        assert!((inv - 2.02).abs() < 1e-12);
    }

    #[test]
    fn design_block_matches_multiplier_block() {
        // Two constraints on one variable exercise the design-block branch;
        // n_global = 3 forces the multiplier-block branch on the same data.
        let weights = ConstraintWeights::new(2);
        let settings = MmaSettings::default();
        let small = approx_1d(2, &[0.1, 0.05], &[0.2, 0.5]);
        let mut large = small.clone();
        large.n_global = 3;

        let a = PrimalDual
            .solve(&small, &weights, &settings, &SerialComm)
            .expect("design block solve");
        let b = PrimalDual
            .solve(&large, &weights, &settings, &SerialComm)
            .expect("multiplier block solve");
        assert!((a.point.x[0] - 0.5).abs() < 1e-6, "x = {}", a.point.x[0]);
        assert!((a.point.x[0] - b.point.x[0]).abs() < 1e-8);
        assert!((a.point.lambda[0] - b.point.lambda[0]).abs() < 1e-5);
    }

    #[test]
    fn agrees_with_dual_newton_on_active_constraint() {
        let approx = approx_1d(1, &[0.1], &[0.2]);
        let weights = ConstraintWeights::new(1);
        let settings = MmaSettings {
            epsimin: 1e-9,
            ..MmaSettings::default()
        };
        let pd = PrimalDual
            .solve(&approx, &weights, &settings, &SerialComm)
            .expect("primal-dual solve");
        let dual = DualNewton
            .solve(&approx, &weights, &settings, &SerialComm)
            .expect("dual solve");

        assert!((pd.point.x[0] - dual.point.x[0]).abs() <= 1e-6 * dual.point.x[0].abs());
        // lambda solves (0.01 + 0.1*lambda)/0.25 = 1/0.25
        assert!((pd.point.lambda[0] - 9.9).abs() < 1e-4);
        assert!((dual.point.lambda[0] - 9.9).abs() < 1e-4);

        for sol in [&pd, &dual] {
            let res = subproblem_residual(&approx, &weights, &sol.point, 0.0, &SerialComm)
                .expect("residual");
            assert!(res.max < 1e-6, "residual {}", res.max);
        }
    }
}
