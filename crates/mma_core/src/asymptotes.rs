//! Moving asymptotes and per-iteration move limits.

use nalgebra::DVector;

use crate::settings::MmaSettings;

/// Lower and upper asymptotes, carried from one outer iteration to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Asymptotes {
    pub low: DVector<f64>,
    pub upp: DVector<f64>,
}

/// Box the subproblem solution is confined to in the current iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveLimits {
    pub alfa: DVector<f64>,
    pub beta: DVector<f64>,
}

/// Fixed problem bounds and the iterate history the asymptote rule reads.
pub struct DesignHistory<'a> {
    pub xval: &'a DVector<f64>,
    pub xold1: &'a DVector<f64>,
    pub xold2: &'a DVector<f64>,
    pub xmin: &'a DVector<f64>,
    pub xmax: &'a DVector<f64>,
}

impl Asymptotes {
    pub fn new(xmin: &DVector<f64>, xmax: &DVector<f64>) -> Self {
        Self {
            low: xmin.clone(),
            upp: xmax.clone(),
        }
    }

    /// Advances the asymptotes for the 1-based outer `iteration`.
    pub fn update(&mut self, iteration: usize, history: &DesignHistory<'_>, settings: &MmaSettings) {
        let DesignHistory {
            xval,
            xold1,
            xold2,
            xmin,
            xmax,
        } = *history;
        let n = xval.len();

        if iteration < 3 {
            for j in 0..n {
                let range = xmax[j] - xmin[j];
                self.low[j] = xval[j] - settings.asyinit * range;
                self.upp[j] = xval[j] + settings.asyinit * range;
            }
            return;
        }

        for j in 0..n {
            let range = xmax[j] - xmin[j];
            let trend = (xval[j] - xold1[j]) * (xold1[j] - xold2[j]);
            let factor = if trend > 0.0 {
                settings.asyincr
            } else if trend < 0.0 {
                settings.asydecr
            } else {
                1.0
            };

            let low = xval[j] - factor * (xold1[j] - self.low[j]);
            let upp = xval[j] + factor * (self.upp[j] - xold1[j]);
            self.low[j] = low.max(xval[j] - 10.0 * range).min(xval[j] - 0.01 * range);
            self.upp[j] = upp.min(xval[j] + 10.0 * range).max(xval[j] + 0.01 * range);
        }
    }

    pub fn move_limits(
        &self,
        xval: &DVector<f64>,
        xmin: &DVector<f64>,
        xmax: &DVector<f64>,
        settings: &MmaSettings,
    ) -> MoveLimits {
        let n = xval.len();
        let mut alfa = DVector::<f64>::zeros(n);
        let mut beta = DVector::<f64>::zeros(n);
        for j in 0..n {
            let range = xmax[j] - xmin[j];
            let asym_lo = self.low[j] + settings.albefa * (xval[j] - self.low[j]);
            let move_lo = xval[j] - settings.mmamove * range;
            alfa[j] = asym_lo.max(move_lo).max(xmin[j]);

            let asym_hi = self.upp[j] - settings.albefa * (self.upp[j] - xval[j]);
            let move_hi = xval[j] + settings.mmamove * range;
            beta[j] = asym_hi.min(move_hi).min(xmax[j]);
        }
        MoveLimits { alfa, beta }
    }
}
