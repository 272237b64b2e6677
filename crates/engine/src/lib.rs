pub mod accounts;
pub mod aggregator;
pub mod commission;
pub mod leaderboard;
pub mod plans;
pub mod withdrawal;

pub use aggregator::Period;
pub use commission::{CommissionPlan, Payout};
pub use plans::{Plan, PricingTable};

use upline_core::EngineError;
use uuid::Uuid;

/// Caller role as injected by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Authenticated caller identity, resolved by the auth layer and passed
/// through to every engine operation that needs authority checks.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub account_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Require an admin caller or fail with Forbidden.
pub(crate) fn require_admin(caller: &Caller) -> Result<(), EngineError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Forbidden("admin role required".into()))
    }
}

/// Map a storage failure onto the engine taxonomy. Unique violations become
/// Conflict so duplicate-request races surface the same way as the explicit
/// pre-checks; everything else is Internal.
pub(crate) fn db(e: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(ref d) = e {
        if d.is_unique_violation() {
            return EngineError::Conflict(d.to_string());
        }
    }
    EngineError::Internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" User ".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn admin_gate() {
        let admin = Caller {
            account_id: Uuid::nil(),
            role: Role::Admin,
        };
        let user = Caller {
            account_id: Uuid::nil(),
            role: Role::User,
        };
        assert!(require_admin(&admin).is_ok());
        assert!(matches!(
            require_admin(&user),
            Err(EngineError::Forbidden(_))
        ));
    }
}
