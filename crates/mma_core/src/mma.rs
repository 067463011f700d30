//! Top-level MMA solver: owns the design history and the asymptotes, and
//! dispatches each outer iteration to the subproblem backend.

use anyhow::{anyhow, Context, Result};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::approximation::{Approximation, GradientPoint};
use crate::asymptotes::{Asymptotes, DesignHistory, MoveLimits};
use crate::comm::SerialComm;
use crate::convergence::{design_change, ConvergenceState};
use crate::dual::DualNewton;
use crate::error::{check_len, MmaError};
use crate::kkt::{original_problem_residual, OriginalProblem};
use crate::oc::{oc_update, OcOutcome, OcProblem};
use crate::primal_dual::PrimalDual;
use crate::settings::{ConstraintWeights, MmaSettings, SubproblemMethod};
use crate::traits::{Communicator, SubproblemSolver};
use crate::types::{KktResidual, SubproblemSolution};

/// Per-rank MMA state for a design vector partitioned over `comm`.
///
/// Every rank calls [`Mma::update`] in lockstep with its own slice of the
/// gradients; `g` and the constraint weights are identical on all ranks.
pub struct Mma<C: Communicator = SerialComm> {
    n_local: usize,
    n_global: usize,
    m: usize,
    xval: DVector<f64>,
    xold1: DVector<f64>,
    xold2: DVector<f64>,
    xmin: DVector<f64>,
    xmax: DVector<f64>,
    asymptotes: Asymptotes,
    limits: MoveLimits,
    weights: ConstraintWeights,
    settings: MmaSettings,
    iteration: usize,
    convergence: ConvergenceState,
    last_solution: Option<SubproblemSolution>,
    last_oc: Option<OcOutcome>,
    comm: C,
}

/// Result of one update, applied to the solver only once it is complete.
enum Step {
    Oc(OcOutcome),
    Subproblem {
        asymptotes: Asymptotes,
        limits: MoveLimits,
        solution: SubproblemSolution,
    },
}

impl Step {
    fn x(&self) -> &DVector<f64> {
        match self {
            Step::Oc(outcome) => &outcome.x,
            Step::Subproblem { solution, .. } => &solution.point.x,
        }
    }
}

impl<C: Communicator> Mma<C> {
    /// Collective: checks that the local lengths add up to `n_global`.
    ///
    /// Bounds start at `[0, 1]` and the design at `0.5`.
    pub fn new(n_local: usize, n_global: usize, comm: C) -> Result<Self> {
        let total = comm.sum(n_local as f64)?;
        if total != n_global as f64 {
            return Err(MmaError::DimensionMismatch {
                what: "global design length",
                expected: n_global,
                actual: total as usize,
            }
            .into());
        }

        let xmin = DVector::zeros(n_local);
        let xmax = DVector::from_element(n_local, 1.0);
        let xval = DVector::from_element(n_local, 0.5);
        Ok(Self {
            n_local,
            n_global,
            m: 0,
            xold1: xval.clone(),
            xold2: xval.clone(),
            xval,
            asymptotes: Asymptotes::new(&xmin, &xmax),
            limits: MoveLimits {
                alfa: xmin.clone(),
                beta: xmax.clone(),
            },
            xmin,
            xmax,
            weights: ConstraintWeights::new(0),
            settings: MmaSettings::default(),
            iteration: 0,
            convergence: ConvergenceState::default(),
            last_solution: None,
            last_oc: None,
            comm,
        })
    }

    pub fn with_settings(mut self, settings: MmaSettings) -> Result<Self> {
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    /// Sets the number of constraints. The weights are reset to their
    /// defaults only when the count changes, so customised weights survive
    /// repeated calls with the same `m`.
    pub fn set_m(&mut self, m: usize) {
        if m != self.m || self.weights.len() != m {
            self.m = m;
            self.weights = ConstraintWeights::new(m);
        }
    }

    pub fn weights_mut(&mut self) -> &mut ConstraintWeights {
        &mut self.weights
    }

    pub fn set_bounds(&mut self, xmin: DVector<f64>, xmax: DVector<f64>) -> Result<()> {
        check_len("lower bounds", self.n_local, xmin.len())?;
        check_len("upper bounds", self.n_local, xmax.len())?;
        if let Some(index) = (0..self.n_local).find(|&j| !(xmin[j] < xmax[j])) {
            return Err(MmaError::InvalidBounds {
                index,
                xmin: xmin[index],
                xmax: xmax[index],
            }
            .into());
        }
        self.asymptotes = Asymptotes::new(&xmin, &xmax);
        self.limits = MoveLimits {
            alfa: xmin.clone(),
            beta: xmax.clone(),
        };
        self.xmin = xmin;
        self.xmax = xmax;
        Ok(())
    }

    /// Sets the current design and clears the iterate history.
    pub fn set_design(&mut self, x: DVector<f64>) -> Result<()> {
        check_len("design", self.n_local, x.len())?;
        let outside = |j: &usize| !(self.xmin[*j] <= x[*j] && x[*j] <= self.xmax[*j]);
        if let Some(index) = (0..self.n_local).find(outside) {
            return Err(MmaError::DesignOutOfBounds {
                index,
                value: x[index],
                xmin: self.xmin[index],
                xmax: self.xmax[index],
            }
            .into());
        }
        self.xold1 = x.clone();
        self.xold2 = x.clone();
        self.xval = x;
        Ok(())
    }

    /// Advances the design by one outer iteration and returns `Change`.
    ///
    /// `dfdx` and the rows of `dgdx` are this rank's slice; `g` holds the
    /// global constraint values. With fewer than two constraints the
    /// optimality-criteria step is used instead of an MMA subproblem.
    ///
    /// On error the design, history, asymptotes and iteration count are left
    /// as they were.
    pub fn update(
        &mut self,
        dfdx: &DVector<f64>,
        g: &DVector<f64>,
        dgdx: &DMatrix<f64>,
    ) -> Result<f64> {
        let m = g.len();
        if m == 0 {
            return Err(MmaError::NoConstraints.into());
        }
        check_len("objective gradient", self.n_local, dfdx.len())?;
        check_len("constraint gradient rows", self.n_local, dgdx.nrows())?;
        check_len("constraint gradient columns", m, dgdx.ncols())?;

        self.set_m(m);
        self.weights.validate(m)?;

        let iteration = self.iteration + 1;
        let step = if m < 2 {
            self.oc_step(dfdx, g[0], dgdx)
                .with_context(|| format!("OC update failed at iteration {iteration}"))?
        } else {
            self.subproblem_step(iteration, dfdx, g, dgdx)
                .with_context(|| format!("MMA update failed at iteration {iteration}"))?
        };
        let change = design_change(step.x(), &self.xval, &self.xmin, &self.xmax, &self.comm)?;

        self.iteration = iteration;
        self.convergence.change = change;
        let x = match step {
            Step::Oc(outcome) => {
                self.limits = outcome.limits.clone();
                self.convergence.residual_norm = 0.0;
                self.convergence.residual_max = 0.0;
                self.last_solution = None;
                let x = outcome.x.clone();
                self.last_oc = Some(outcome);
                x
            }
            Step::Subproblem {
                asymptotes,
                limits,
                solution,
            } => {
                self.asymptotes = asymptotes;
                self.limits = limits;
                self.convergence.residual_norm = solution.diagnostics.residual_norm;
                self.convergence.residual_max = solution.diagnostics.residual_max;
                let x = solution.point.x.clone();
                self.last_solution = Some(solution);
                self.last_oc = None;
                x
            }
        };
        self.xold2 = std::mem::replace(&mut self.xold1, std::mem::replace(&mut self.xval, x));

        debug!(
            iteration,
            change,
            residual = self.convergence.residual_max,
            "MMA update done"
        );
        Ok(change)
    }

    fn oc_step(&self, dfdx: &DVector<f64>, g: f64, dgdx: &DMatrix<f64>) -> Result<Step> {
        let dgdx = dgdx.column(0).into_owned();
        let problem = OcProblem {
            xold: &self.xval,
            xmin: &self.xmin,
            xmax: &self.xmax,
            dfdx,
            g,
            dgdx: &dgdx,
        };
        Ok(Step::Oc(oc_update(&problem, &self.settings.oc, &self.comm)?))
    }

    fn subproblem_step(
        &self,
        iteration: usize,
        dfdx: &DVector<f64>,
        g: &DVector<f64>,
        dgdx: &DMatrix<f64>,
    ) -> Result<Step> {
        let history = DesignHistory {
            xval: &self.xval,
            xold1: &self.xold1,
            xold2: &self.xold2,
            xmin: &self.xmin,
            xmax: &self.xmax,
        };
        let mut asymptotes = self.asymptotes.clone();
        asymptotes.update(iteration, &history, &self.settings);
        let limits = asymptotes.move_limits(&self.xval, &self.xmin, &self.xmax, &self.settings);

        let point = GradientPoint {
            xval: &self.xval,
            dfdx,
            g,
            dgdx,
        };
        let approx = Approximation::build(
            &point,
            &asymptotes,
            &limits,
            self.n_global,
            &self.settings,
            &self.comm,
        )?;

        let solver: &dyn SubproblemSolver = match self.settings.method {
            SubproblemMethod::DualNewton => &DualNewton,
            SubproblemMethod::PrimalDual => &PrimalDual,
        };
        let solution = solver
            .solve(&approx, &self.weights, &self.settings, &self.comm)
            .with_context(|| format!("{} subproblem solve failed", solver.name()))?;

        Ok(Step::Subproblem {
            asymptotes,
            limits,
            solution,
        })
    }

    /// KKT residual of the true problem at the current design, using the
    /// multipliers of the last MMA subproblem. Collective.
    pub fn kkt_check(
        &self,
        dfdx: &DVector<f64>,
        g: &DVector<f64>,
        dgdx: &DMatrix<f64>,
    ) -> Result<KktResidual> {
        let solution = self
            .last_solution
            .as_ref()
            .ok_or_else(|| anyhow!("KKT check needs a preceding MMA subproblem solve"))?;
        let problem = OriginalProblem {
            xval: &self.xval,
            xmin: &self.xmin,
            xmax: &self.xmax,
            dfdx,
            g,
            dgdx,
        };
        original_problem_residual(&problem, &self.weights, &solution.point, &self.comm)
            .context("KKT check failed")
    }

    pub fn design(&self) -> &DVector<f64> {
        &self.xval
    }

    /// Design before the last update.
    pub fn previous_design(&self) -> &DVector<f64> {
        &self.xold1
    }

    pub fn bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.xmin, &self.xmax)
    }

    pub fn asymptotes(&self) -> &Asymptotes {
        &self.asymptotes
    }

    pub fn move_limits(&self) -> &MoveLimits {
        &self.limits
    }

    pub fn weights(&self) -> &ConstraintWeights {
        &self.weights
    }

    pub fn settings(&self) -> &MmaSettings {
        &self.settings
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n_local(&self) -> usize {
        self.n_local
    }

    pub fn n_global(&self) -> usize {
        self.n_global
    }

    /// Number of completed outer iterations.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn change(&self) -> f64 {
        self.convergence.change
    }

    pub fn convergence(&self) -> ConvergenceState {
        self.convergence
    }

    pub fn last_solution(&self) -> Option<&SubproblemSolution> {
        self.last_solution.as_ref()
    }

    pub fn last_oc(&self) -> Option<&OcOutcome> {
        self.last_oc.as_ref()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadComm;
    use crate::settings::OcSettings;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    /// `min sum (x_j - t_j)^2` subject to `mean(x) <= 0.4` and
    /// `x_0 <= 0.9`, on a slice `offset..offset + n` of the full design.
    struct Quadratic {
        target: Vec<f64>,
    }

    impl Quadratic {
        fn new() -> Self {
            Self {
                target: vec![0.8, 0.7, 0.4, 0.3],
            }
        }

        fn n(&self) -> usize {
            self.target.len()
        }

        fn dfdx(&self, x: &DVector<f64>, offset: usize) -> DVector<f64> {
            DVector::from_fn(x.len(), |j, _| 2.0 * (x[j] - self.target[offset + j]))
        }

        fn g(&self, x: &DVector<f64>, offset: usize, comm: &dyn Communicator) -> DVector<f64> {
            let mut g = vec![x.sum() / self.n() as f64, 0.0];
            if offset == 0 && !x.is_empty() {
                g[1] = x[0];
            }
            comm.sum_in_place(&mut g).unwrap();
            DVector::from_vec(vec![g[0] - 0.4, g[1] - 0.9])
        }

        fn dgdx(&self, n_local: usize, offset: usize) -> DMatrix<f64> {
            DMatrix::from_fn(n_local, 2, |j, i| match i {
                0 => 1.0 / self.n() as f64,
                _ if offset + j == 0 => 1.0,
                _ => 0.0,
            })
        }
    }

    fn run<C: Communicator>(
        problem: &Quadratic,
        mma: &mut Mma<C>,
        offset: usize,
        iterations: usize,
    ) -> Vec<f64> {
        let n_local = mma.n_local();
        (0..iterations)
            .map(|_| {
                let x = mma.design().clone();
                let g = problem.g(&x, offset, mma.comm());
                mma.update(&problem.dfdx(&x, offset), &g, &problem.dgdx(n_local, offset))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn rejects_inconsistent_global_length() {
        assert_err_contains(Mma::new(3, 4, SerialComm).map(|_| ()), "global design length");
    }

    #[test]
    fn rejects_invalid_bounds_and_designs() {
        let mut mma = Mma::new(2, 2, SerialComm).unwrap();
        assert_err_contains(
            mma.set_bounds(DVector::from_vec(vec![0.0, 1.0]), DVector::from_vec(vec![1.0, 1.0])),
            "local index 1",
        );
        assert_err_contains(mma.set_design(DVector::from_vec(vec![0.5, 1.5])), "outside");
        assert_err_contains(mma.set_design(DVector::zeros(3)), "design dimension mismatch");
    }

    #[test]
    fn update_checks_gradient_shapes() {
        let mut mma = Mma::new(2, 2, SerialComm).unwrap();
        let g = DVector::from_element(2, -1.0);
        assert_err_contains(
            mma.update(&DVector::zeros(3), &g, &DMatrix::zeros(2, 2)),
            "objective gradient",
        );
        assert_err_contains(
            mma.update(&DVector::zeros(2), &g, &DMatrix::zeros(2, 3)),
            "constraint gradient columns",
        );
        assert_err_contains(
            mma.update(&DVector::zeros(2), &DVector::zeros(0), &DMatrix::zeros(2, 0)),
            "no constraints",
        );
        assert_eq!(mma.iteration(), 0);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = MmaSettings {
            mmamove: -1.0,
            ..MmaSettings::default()
        };
        assert!(Mma::new(1, 1, SerialComm).unwrap().with_settings(settings).is_err());
    }

    #[test]
    fn set_m_keeps_custom_weights_for_same_count() {
        let mut mma = Mma::new(1, 1, SerialComm).unwrap();
        mma.set_m(2);
        mma.weights_mut().c[0] = 10.0;
        mma.set_m(2);
        assert_eq!(mma.weights().c[0], 10.0);
        mma.set_m(3);
        assert_eq!(mma.weights().c[0], 1000.0);
        assert_eq!(mma.weights().len(), 3);
    }

    #[test]
    fn iterates_stay_inside_limits_and_asymptotes() {
        let problem = Quadratic::new();
        let mut mma = Mma::new(4, 4, SerialComm).unwrap();
        for _ in 0..12 {
            let xold = mma.design().clone();
            run(&problem, &mut mma, 0, 1);

            let (xmin, xmax) = mma.bounds();
            let MoveLimits { alfa, beta } = mma.move_limits();
            let Asymptotes { low, upp } = mma.asymptotes();
            let x = mma.design();
            for j in 0..4 {
                assert!(xmin[j] <= alfa[j] && alfa[j] <= x[j] && x[j] <= beta[j] && beta[j] <= xmax[j]);
                assert!(low[j] < alfa[j] && beta[j] < upp[j]);
                assert!(alfa[j] <= xold[j] && xold[j] <= beta[j]);
                if mma.iteration() >= 3 {
                    let range = xmax[j] - xmin[j];
                    assert!(low[j] >= xold[j] - 10.0 * range - 1e-12);
                    assert!(low[j] <= xold[j] - 0.01 * range + 1e-12);
                    assert!(upp[j] <= xold[j] + 10.0 * range + 1e-12);
                    assert!(upp[j] >= xold[j] + 0.01 * range - 1e-12);
                }
            }
        }
    }

    #[test]
    fn multipliers_stay_nonnegative() {
        for method in [SubproblemMethod::DualNewton, SubproblemMethod::PrimalDual] {
            let problem = Quadratic::new();
            let settings = MmaSettings {
                method,
                ..MmaSettings::default()
            };
            let mut mma = Mma::new(4, 4, SerialComm).unwrap().with_settings(settings).unwrap();
            for _ in 0..5 {
                run(&problem, &mut mma, 0, 1);
                let point = &mma.last_solution().expect("MMA path taken").point;
                assert!(point.lambda.iter().all(|&v| v >= 0.0), "{method:?}");
                assert!(point.mu.iter().all(|&v| v >= 0.0));
                assert!(point.s.iter().all(|&v| v >= 0.0));
                assert!(point.xsi.iter().chain(point.eta.iter()).all(|&v| v >= 0.0));
                assert!(point.zet >= 0.0 && point.z >= 0.0);
                let diagnostics = &mma.last_solution().expect("MMA path taken").diagnostics;
                assert!(diagnostics.min_multiplier >= 0.0, "{method:?}");
            }
        }
    }

    #[test]
    fn backends_agree_on_the_same_iteration() {
        // x_0 <= 0.9 stays inactive, so its multiplier heads to zero.
        let problem = Quadratic::new();
        let designs: Vec<DVector<f64>> = [SubproblemMethod::DualNewton, SubproblemMethod::PrimalDual]
            .into_iter()
            .map(|method| {
                let settings = MmaSettings {
                    method,
                    epsimin: 1e-9,
                    ..MmaSettings::default()
                };
                let mut mma = Mma::new(4, 4, SerialComm).unwrap().with_settings(settings).unwrap();
                run(&problem, &mut mma, 0, 1);
                mma.design().clone()
            })
            .collect();
        for j in 0..4 {
            assert!(
                (designs[0][j] - designs[1][j]).abs() <= 1e-6 * designs[1][j].abs(),
                "x[{j}]: {} vs {}",
                designs[0][j],
                designs[1][j]
            );
        }
    }

    #[test]
    fn failed_update_leaves_state_untouched() {
        let settings = MmaSettings {
            oc: OcSettings {
                require_bracket: true,
                ..OcSettings::default()
            },
            ..MmaSettings::default()
        };
        let mut mma = Mma::new(1, 1, SerialComm).unwrap().with_settings(settings).unwrap();
        let dfdx = DVector::from_element(1, -1.0);
        let dgdx = DMatrix::from_element(1, 1, 1.0);
        let limits = mma.move_limits().clone();

        assert_err_contains(
            mma.update(&dfdx, &DVector::from_element(1, 1.0), &dgdx),
            "not bracketed",
        );
        assert_eq!(mma.iteration(), 0);
        assert_eq!(mma.design()[0], 0.5);
        assert_eq!(mma.move_limits(), &limits);
        assert!(mma.last_oc().is_none());

        mma.update(&dfdx, &DVector::from_element(1, -0.1), &dgdx).unwrap();
        assert_eq!(mma.iteration(), 1);
        assert_eq!(mma.previous_design()[0], 0.5);
    }

    #[test]
    fn update_rejects_broken_weights() {
        let problem = Quadratic::new();
        let mut mma = Mma::new(4, 4, SerialComm).unwrap();
        mma.set_m(2);
        mma.weights_mut().d[0] = 0.0;
        let x = mma.design().clone();
        let g = problem.g(&x, 0, &SerialComm);
        assert_err_contains(
            mma.update(&problem.dfdx(&x, 0), &g, &problem.dgdx(4, 0)),
            "d[0]",
        );

        mma.set_m(3);
        mma.set_m(2);
        mma.weights_mut().c = DVector::from_element(1, 1000.0);
        assert_err_contains(
            mma.update(&problem.dfdx(&x, 0), &g, &problem.dgdx(4, 0)),
            "weight c",
        );
        assert_eq!(mma.iteration(), 0);
        let (xmin, xmax) = mma.bounds();
        assert_eq!(mma.asymptotes(), &Asymptotes::new(xmin, xmax));
    }

    #[test]
    fn zero_gradients_leave_design_in_place() {
        let mut mma = Mma::new(3, 3, SerialComm).unwrap();
        mma.set_design(DVector::from_vec(vec![0.2, 0.5, 0.9])).unwrap();
        let change = mma
            .update(&DVector::zeros(3), &DVector::from_element(2, -1.0), &DMatrix::zeros(3, 2))
            .unwrap();
        assert!(change < 1e-6, "change = {change}");
    }

    #[test]
    fn single_constraint_uses_oc_step() {
        let mut mma = Mma::new(1, 1, SerialComm).unwrap();
        let before = mma.asymptotes().clone();
        mma.update(
            &DVector::from_element(1, -1.0),
            &DVector::from_element(1, -0.1),
            &DMatrix::from_element(1, 1, 1.0),
        )
        .unwrap();
        assert!(mma.last_solution().is_none());
        let oc = mma.last_oc().expect("OC path taken");
        assert!(oc.bracketed);
        assert_eq!(mma.asymptotes(), &before);
        assert!((mma.design()[0] - 0.6).abs() < 1e-3);
        assert_err_contains(
            mma.kkt_check(
                &DVector::from_element(1, -1.0),
                &DVector::from_element(1, -0.1),
                &DMatrix::from_element(1, 1, 1.0),
            ),
            "subproblem",
        );
    }

    #[test]
    fn one_variable_scenario_respects_move_limit() {
        let mut mma = Mma::new(1, 1, SerialComm).unwrap();
        let change = mma
            .update(
                &DVector::from_element(1, 1.0),
                &DVector::from_element(1, 0.5),
                &DMatrix::from_element(1, 1, 0.1),
            )
            .unwrap();
        let mmamove = mma.settings().mmamove;
        let MoveLimits { alfa, beta } = mma.move_limits();
        assert!(alfa[0] <= 0.5 && 0.5 <= beta[0]);
        assert!(beta[0] - alfa[0] <= mmamove + 1e-12);
        assert!(change <= mmamove);
        assert_eq!(mma.iteration(), 1);
    }

    #[test]
    fn repeated_gradients_settle_on_bound() {
        let mut mma = Mma::new(1, 1, SerialComm).unwrap();
        mma.set_design(DVector::from_element(1, 0.05)).unwrap();
        let dfdx = DVector::from_element(1, 1.0);
        let g = DVector::from_element(2, -1.0);
        let dgdx = DMatrix::zeros(1, 2);

        let changes: Vec<f64> = (0..3).map(|_| mma.update(&dfdx, &g, &dgdx).unwrap()).collect();
        assert!((changes[0] - 0.05).abs() < 1e-9, "changes = {changes:?}");
        assert!(changes.windows(2).all(|w| w[1] <= w[0]));
        assert!(changes[2] < 1e-12);
        assert!(mma.design()[0].abs() < 1e-12);
    }

    #[test]
    fn thread_group_matches_serial_run() {
        let problem = Quadratic::new();
        let mut serial = Mma::new(4, 4, SerialComm).unwrap();
        run(&problem, &mut serial, 0, 6);

        let slices: Vec<(usize, DVector<f64>)> = std::thread::scope(|scope| {
            let problem = &problem;
            let handles: Vec<_> = ThreadComm::group(2)
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let offset = 2 * comm.rank();
                        let mut mma = Mma::new(2, 4, comm).unwrap();
                        run(problem, &mut mma, offset, 6);
                        (offset, mma.design().clone())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for (offset, x) in slices {
            for j in 0..x.len() {
                let expected = serial.design()[offset + j];
                assert!((x[j] - expected).abs() < 1e-8, "x[{}]: {} vs {expected}", offset + j, x[j]);
            }
        }
    }
}
