//! Core type definitions: enums, input records, and the shared state store.

pub(crate) mod body;
pub(crate) mod contact;
pub(crate) mod data;
pub(crate) mod enums;

pub use body::BodyState;
pub use contact::{BilateralRow, ContactPoint};
pub use data::{DataManager, SolveReport, SolverSettings, Timers};
pub use enums::{ConvergenceCriterion, IterationStat, SetupError, SolverKind, SolverMode};
