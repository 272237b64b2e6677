use thiserror::Error;

/// Shared error taxonomy used across all upline crates.
///
/// Every engine operation surfaces one of these kinds; the HTTP layer maps
/// them to status codes via [`EngineError::status`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("plan not allowed: {0}")]
    PlanNotAllowed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: i64, available: i64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// HTTP status code the routing layer should surface for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Forbidden(_) => 403,
            Self::Conflict(_) => 409,
            Self::InvalidState(_)
            | Self::PlanNotAllowed(_)
            | Self::InsufficientFunds { .. }
            | Self::InvalidInput(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable kind for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Forbidden(_) => "forbidden",
            Self::PlanNotAllowed(_) => "plan_not_allowed",
            Self::Conflict(_) => "conflict",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_stable() {
        assert_eq!(EngineError::NotFound("x".into()).status(), 404);
        assert_eq!(EngineError::Forbidden("x".into()).status(), 403);
        assert_eq!(EngineError::Conflict("x".into()).status(), 409);
        assert_eq!(EngineError::InvalidState("x".into()).status(), 400);
        assert_eq!(EngineError::PlanNotAllowed("x".into()).status(), 400);
        assert_eq!(
            EngineError::InsufficientFunds {
                requested: 50,
                available: 40
            }
            .status(),
            400
        );
        assert_eq!(EngineError::InvalidInput("x".into()).status(), 400);
        assert_eq!(EngineError::Internal("x".into()).status(), 500);
    }
}
