//! `mma_core` is the design-update engine of a gradient-based topology
//! optimizer, built on the Method of Moving Asymptotes.
//!
//! Each outer iteration the caller supplies the objective gradient and the
//! constraint values and gradients at the current design. The solver builds a
//! separable convex approximation around that point, solves it and moves the
//! design to the solution. The design vector may be partitioned across ranks;
//! all reductions go through a [`Communicator`].
//!
//! Key components:
//! - **Mma**: owns the iterate history and asymptotes and dispatches each update.
//! - **Backends**: `DualNewton` (default) and `PrimalDual` for two or more
//!   constraints, an optimality-criteria step for a single constraint.
//! - **Diagnostics**: KKT residuals of the subproblem and of the true problem.

pub mod approximation;
pub mod asymptotes;
pub mod comm;
pub mod convergence;
pub mod dual;
pub mod error;
pub mod kkt;
pub mod mma;
pub mod oc;
pub mod primal_dual;
pub mod settings;
pub mod traits;
pub mod types;

pub use comm::{SerialComm, ThreadComm};
pub use error::MmaError;
pub use mma::Mma;
pub use settings::{ConstraintWeights, MmaSettings, OcSettings, SubproblemMethod};
pub use traits::{Communicator, SubproblemSolver};
pub use types::{KktPoint, KktResidual, SolveDiagnostics, SubproblemSolution};
