//! Optimality-criteria update for problems with a single constraint.

use nalgebra::DVector;
use tracing::{debug, warn};

use crate::asymptotes::MoveLimits;
use crate::error::{MmaError, Result};
use crate::settings::OcSettings;
use crate::traits::Communicator;

#[derive(Debug, Clone)]
pub struct OcOutcome {
    pub x: DVector<f64>,
    /// Move window the update was clipped to.
    pub limits: MoveLimits,
    pub multiplier: f64,
    pub bisections: usize,
    /// False when the constraint was still violated at `lambda_upper` and
    /// the step was taken there without bisecting.
    pub bracketed: bool,
}

/// Gradients of the single-constraint problem at `xold`.
pub struct OcProblem<'a> {
    pub xold: &'a DVector<f64>,
    pub xmin: &'a DVector<f64>,
    pub xmax: &'a DVector<f64>,
    pub dfdx: &'a DVector<f64>,
    pub g: f64,
    pub dgdx: &'a DVector<f64>,
}

impl OcProblem<'_> {
    fn window(&self, settings: &OcSettings) -> MoveLimits {
        let n = self.xold.len();
        let step = |j: usize| settings.move_limit * (self.xmax[j] - self.xmin[j]);
        MoveLimits {
            alfa: DVector::from_fn(n, |j, _| (self.xold[j] - step(j)).max(self.xmin[j])),
            beta: DVector::from_fn(n, |j, _| (self.xold[j] + step(j)).min(self.xmax[j])),
        }
    }

    fn candidate(&self, lambda: f64, limits: &MoveLimits, settings: &OcSettings) -> DVector<f64> {
        DVector::from_fn(self.xold.len(), |j, _| {
            let ratio = (-self.dfdx[j] / (lambda * self.dgdx[j])).abs();
            let x = self.xmin[j] + (self.xold[j] - self.xmin[j]) * ratio.powf(settings.eta);
            x.min(limits.beta[j]).max(limits.alfa[j])
        })
    }

    /// Linearised constraint `g + dgdx . (x - xold)` over the full design.
    fn violation(&self, x: &DVector<f64>, comm: &dyn Communicator) -> Result<f64> {
        let local = self.dgdx.dot(&(x - self.xold));
        Ok(self.g + comm.sum(local)?)
    }
}

/// Bisects the constraint multiplier on `[0, lambda_upper]`.
///
/// If the linearised constraint is still violated at the upper end of the
/// bracket, bisection could only creep onto that edge. The upper-end candidate
/// is returned directly instead, or [`MmaError::UnbracketedMultiplier`] when
/// `settings.require_bracket` is set.
pub fn oc_update(
    problem: &OcProblem<'_>,
    settings: &OcSettings,
    comm: &dyn Communicator,
) -> Result<OcOutcome> {
    let limits = problem.window(settings);

    let mut lo = 0.0;
    let mut hi = settings.lambda_upper;
    let mut x = problem.candidate(hi, &limits, settings);
    let violation = problem.violation(&x, comm)?;
    if violation > 0.0 {
        if settings.require_bracket {
            return Err(MmaError::UnbracketedMultiplier {
                upper: hi,
                violation,
            });
        }
        warn!(violation, upper = hi, "OC multiplier not bracketed, taking upper-end step");
        return Ok(OcOutcome {
            x,
            limits,
            multiplier: hi,
            bisections: 0,
            bracketed: false,
        });
    }

    let mut bisections = 0;
    let mut lmid = hi;
    while hi - lo > settings.bracket_tolerance {
        bisections += 1;
        lmid = 0.5 * (lo + hi);
        x = problem.candidate(lmid, &limits, settings);
        if problem.violation(&x, comm)? > 0.0 {
            lo = lmid;
        } else {
            hi = lmid;
        }
    }
    debug!(multiplier = lmid, bisections, "OC bisection done");

    Ok(OcOutcome {
        x,
        limits,
        multiplier: lmid,
        bisections,
        bracketed: true,
    })
}
