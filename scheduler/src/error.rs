// error.rs — Structured error values shared across scheduler entry points
//
// Every public operation returns `Result<_, ScheduleError>`. Caller
// precondition violations (scheduling a fusion computation) and internal
// corruption (counter underflows, missing map entries) are programmer
// bugs and fail fast with `assert!`, never with a recoverable error.

use thiserror::Error;

/// Error returned by scheduling, update, and verification entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// A produced or supplied schedule breaks a structural invariant
    /// (missing or duplicated instruction, operand or control edge out of
    /// order, computation set mismatch).
    #[error("schedule invariant violated: {0}")]
    InvariantViolation(String),

    /// Buffer analysis could not be computed for the module.
    #[error("buffer analysis failed: {0}")]
    Analysis(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_and_message() {
        let e = ScheduleError::InvariantViolation("instruction 'x' missing".to_string());
        assert_eq!(
            format!("{e}"),
            "schedule invariant violated: instruction 'x' missing"
        );
        let e = ScheduleError::Analysis("computation 'f' has no root".to_string());
        assert!(format!("{e}").starts_with("buffer analysis failed:"));
    }
}
