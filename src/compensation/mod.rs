/// Compensation core: spillover matrices and the solvers built on them.
///
/// Architecture:
/// ```text
///   SpilloverMatrix + Method
///            │
///            ▼
///   ┌─────────────────┐
///   │  solver          │  batch (N x C_in) → batch (N x C_out), NaN rows kept
///   └─────────────────┘
///        │         │
///        ▼         ▼
///   ┌────────┐ ┌─────────────┐
///   │ image  │ │ measurement │  reshape pixels / resolve channel columns
///   └────────┘ └─────────────┘
/// ```

pub mod image;
pub mod matrix;
pub mod measurement;
pub mod nnls;
pub mod solver;
