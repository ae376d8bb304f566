//! SQL gating, dry runs, execution and the repair loop.

pub mod executor;
pub mod guard;
pub mod repair;
pub mod validator;

pub use executor::{shape_rows, Executor, Row};
pub use guard::{ensure_select_only, FORBIDDEN_KEYWORDS};
pub use repair::{AttemptFailure, AttemptOutcome, RepairLoop, RepairOutcome, Stage};
pub use validator::DryRunValidator;
