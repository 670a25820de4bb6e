//! **fluxfit** — multi-tissue metabolic flux fitting against mass isotopomer
//! distributions (MIDs).
//!
//! This crate implements the complete fitting pipeline:
//!
//! 1. **Constraints** (`constraints`): balance / MID / fixed-flux rows over a shared flux index.
//! 2. **Objectives** (`objectives`): cross-entropy between observed and mixed MIDs.
//! 3. **Gradients** (`gradients`): hand-coded gradient + augmented Lagrangian terms.
//! 4. **Feasible starts** (`feasible`): randomised LP vertices via `microlp`.
//! 5. **Optimiser** (`optimizer`, `transforms`): multi-start AL over L-BFGS via `argmin`,
//!    in coordinates that keep every flux inside its bounds.
//! 6. **Sweep** (`sweep`, `scenario`, `hooks`): ordered parallel solve of a parameter grid.
//! 7. **MID utilities** (`mid`): natural abundance, reshaping, prediction summaries.
//!
//! Logging goes through `tracing`; the library never installs a subscriber.

pub mod types;
pub mod constraints;
pub mod transforms;
pub mod objectives;
pub mod gradients;
pub mod feasible;
pub mod optimizer;
pub mod scenario;
pub mod hooks;
pub mod sweep;
pub mod mid;
