use crate::approximation::Approximation;
use crate::error::Result;
use crate::settings::{ConstraintWeights, MmaSettings};
use crate::types::SubproblemSolution;

/// Collective reductions across the ranks that share one partitioned design
/// vector.
///
/// Every rank must call the same sequence of reductions with buffers of the
/// same length; a rank that skips one deadlocks the group.
pub trait Communicator {
    /// Index of this rank within the group.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Element-wise sum over all ranks, written back into `values`.
    fn sum_in_place(&self, values: &mut [f64]) -> Result<()>;

    /// Element-wise maximum over all ranks, written back into `values`.
    fn max_in_place(&self, values: &mut [f64]) -> Result<()>;

    fn sum(&self, value: f64) -> Result<f64> {
        let mut buf = [value];
        self.sum_in_place(&mut buf)?;
        Ok(buf[0])
    }

    fn max(&self, value: f64) -> Result<f64> {
        let mut buf = [value];
        self.max_in_place(&mut buf)?;
        Ok(buf[0])
    }
}

/// A backend that solves the convex MMA subproblem.
pub trait SubproblemSolver {
    fn name(&self) -> &'static str;

    /// Solves the separable approximation for the local slice of `x` and the
    /// replicated constraint multipliers.
    fn solve(
        &self,
        approx: &Approximation,
        weights: &ConstraintWeights,
        settings: &MmaSettings,
        comm: &dyn Communicator,
    ) -> Result<SubproblemSolution>;
}
