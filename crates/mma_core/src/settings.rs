use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{check_len, MmaError, Result};

/// Backend used for the MMA subproblem when there are at least two
/// constraints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SubproblemMethod {
    #[default]
    DualNewton,
    PrimalDual,
}

/// Process-wide algorithm parameters, set once per optimization run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MmaSettings {
    pub asyinit: f64,
    pub asyincr: f64,
    pub asydecr: f64,
    pub albefa: f64,
    pub mmamove: f64,
    pub raa0: f64,
    pub epsimin: f64,
    pub dual_max_inner: usize,
    pub primal_dual_max_inner: usize,
    pub max_backtracks: usize,
    pub method: SubproblemMethod,
    pub oc: OcSettings,
}

impl Default for MmaSettings {
    fn default() -> Self {
        Self {
            asyinit: 0.5,
            asyincr: 1.2,
            asydecr: 0.7,
            albefa: 0.1,
            mmamove: 0.5,
            raa0: 1e-5,
            epsimin: 1e-7,
            dual_max_inner: 100,
            primal_dual_max_inner: 200,
            max_backtracks: 50,
            method: SubproblemMethod::DualNewton,
            oc: OcSettings::default(),
        }
    }
}

impl MmaSettings {
    pub fn validate(&self) -> Result<()> {
        positive("asyinit", self.asyinit)?;
        positive("asyincr", self.asyincr)?;
        positive("asydecr", self.asydecr)?;
        if !(self.albefa > 0.0 && self.albefa < 1.0) {
            return Err(MmaError::InvalidSetting(format!(
                "albefa must lie in (0, 1), got {}",
                self.albefa
            )));
        }
        positive("mmamove", self.mmamove)?;
        positive("raa0", self.raa0)?;
        if !(self.epsimin > 0.0 && self.epsimin < 1.0) {
            return Err(MmaError::InvalidSetting(format!(
                "epsimin must lie in (0, 1), got {}",
                self.epsimin
            )));
        }
        if self.dual_max_inner == 0 || self.primal_dual_max_inner == 0 {
            return Err(MmaError::InvalidSetting(
                "inner iteration caps must be greater than zero".into(),
            ));
        }
        self.oc.validate()
    }
}

/// Parameters of the optimality-criteria update used for a single constraint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcSettings {
    pub eta: f64,
    pub move_limit: f64,
    pub lambda_upper: f64,
    pub bracket_tolerance: f64,
    /// Fail instead of taking the upper-bracket step when the linearised
    /// constraint cannot be met inside the move window.
    pub require_bracket: bool,
}

impl Default for OcSettings {
    fn default() -> Self {
        Self {
            eta: 0.5,
            move_limit: 0.2,
            lambda_upper: 1e6,
            bracket_tolerance: 1e-4,
            require_bracket: false,
        }
    }
}

impl OcSettings {
    fn validate(&self) -> Result<()> {
        positive("oc.eta", self.eta)?;
        positive("oc.move_limit", self.move_limit)?;
        positive("oc.lambda_upper", self.lambda_upper)?;
        positive("oc.bracket_tolerance", self.bracket_tolerance)
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(MmaError::InvalidSetting(format!(
            "{name} must be positive and finite, got {value}"
        )))
    }
}

/// Weights of the artificial variables `y` and `z` in the subproblem
///
/// `min f0 + a0*z + sum(c*y + d*y^2/2)  s.t.  f_i - a_i*z - y_i <= 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintWeights {
    pub a0: f64,
    pub b0: f64,
    pub a: DVector<f64>,
    pub c: DVector<f64>,
    pub d: DVector<f64>,
}

impl ConstraintWeights {
    pub fn new(m: usize) -> Self {
        let d = DVector::from_element(m, 1.0);
        Self {
            a0: 1.0,
            b0: 1.0,
            a: DVector::zeros(m),
            c: &d * 1000.0,
            d,
        }
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// Checks the weights against `m` constraints. `d` and `b0` divide the
    /// closed-form `y` and `z`, so they must be strictly positive.
    pub fn validate(&self, m: usize) -> Result<()> {
        check_len("weight a", m, self.a.len())?;
        check_len("weight c", m, self.c.len())?;
        check_len("weight d", m, self.d.len())?;
        positive("b0", self.b0)?;
        if let Some(i) = self.d.iter().position(|&d| !(d > 0.0 && d.is_finite())) {
            return Err(MmaError::InvalidSetting(format!(
                "d[{i}] must be positive and finite, got {}",
                self.d[i]
            )));
        }
        Ok(())
    }
}
