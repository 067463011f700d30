use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::Communicator;

/// Signals handed back to the outer optimization loop after each update.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ConvergenceState {
    /// Largest relative design step over all ranks.
    pub change: f64,
    pub residual_norm: f64,
    pub residual_max: f64,
}

/// `max_j |x_j - xold_j| / (xmax_j - xmin_j)`, max-reduced over all ranks.
pub fn design_change(
    x: &DVector<f64>,
    xold: &DVector<f64>,
    xmin: &DVector<f64>,
    xmax: &DVector<f64>,
    comm: &dyn Communicator,
) -> Result<f64> {
    let local = (0..x.len())
        .map(|j| ((x[j] - xold[j]) / (xmax[j] - xmin[j])).abs())
        .fold(0.0, f64::max);
    comm.max(local)
}
