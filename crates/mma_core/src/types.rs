//! Result types shared by the subproblem backends.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Counters and residual measures collected during one subproblem solve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SolveDiagnostics {
    pub barrier_levels: usize,
    pub newton_iterations: usize,
    /// Barrier levels whose inner loop stopped on the iteration cap.
    pub capped_levels: usize,
    /// Newton steps whose backtracking stopped on the halving cap.
    pub exhausted_line_searches: usize,
    pub residual_norm: f64,
    pub residual_max: f64,
    /// Smallest multiplier value observed after any accepted step.
    pub min_multiplier: f64,
}

impl Default for SolveDiagnostics {
    fn default() -> Self {
        Self {
            barrier_levels: 0,
            newton_iterations: 0,
            capped_levels: 0,
            exhausted_line_searches: 0,
            residual_norm: 0.0,
            residual_max: 0.0,
            min_multiplier: f64::INFINITY,
        }
    }
}

/// Primal and dual variables of the convex subproblem.
///
/// `x`, `xsi` and `eta` are local to this rank; everything else is
/// constraint-indexed and replicated.
#[derive(Debug, Clone, PartialEq)]
pub struct KktPoint {
    pub x: DVector<f64>,
    pub y: DVector<f64>,
    pub z: f64,
    pub lambda: DVector<f64>,
    /// Multipliers of `x >= alfa`.
    pub xsi: DVector<f64>,
    /// Multipliers of `x <= beta`.
    pub eta: DVector<f64>,
    pub mu: DVector<f64>,
    pub zet: f64,
    pub s: DVector<f64>,
}

impl KktPoint {
    /// `self + step * dir`, component-wise over every variable group.
    pub fn stepped(&self, dir: &KktPoint, step: f64) -> KktPoint {
        KktPoint {
            x: &self.x + &dir.x * step,
            y: &self.y + &dir.y * step,
            z: self.z + dir.z * step,
            lambda: &self.lambda + &dir.lambda * step,
            xsi: &self.xsi + &dir.xsi * step,
            eta: &self.eta + &dir.eta * step,
            mu: &self.mu + &dir.mu * step,
            zet: self.zet + dir.zet * step,
            s: &self.s + &dir.s * step,
        }
    }
}

/// Outcome of one subproblem solve.
#[derive(Debug, Clone)]
pub struct SubproblemSolution {
    pub point: KktPoint,
    pub diagnostics: SolveDiagnostics,
}

/// Global measures of a KKT residual vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct KktResidual {
    pub norm: f64,
    pub max: f64,
}
