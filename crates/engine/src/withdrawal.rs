//! Withdrawal request state machine.
//!
//! Withdrawals draw against passive income only. Funds are checked twice:
//! once at creation and again inside the approval transaction, where the
//! guarded status flip serializes concurrent approvals.

use sqlx::PgPool;
use uuid::Uuid;

use upline_core::EngineError;
use upline_storage::models::{NewWithdrawal, WithdrawalRequest};
use upline_storage::repos;

use crate::{db, require_admin, Caller};

const STATUS_PENDING: &str = "pending";
const STATUS_APPROVED: &str = "approved";
const STATUS_REJECTED: &str = "rejected";

/// Destination bank details supplied by the account holder.
#[derive(Debug, Clone)]
pub struct BankDetails {
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
}

/// Field and threshold validation, checked before touching storage.
pub fn validate_withdrawal(
    amount: i64,
    minimum: i64,
    details: &BankDetails,
) -> Result<(), EngineError> {
    if details.bank_name.trim().is_empty()
        || details.account_name.trim().is_empty()
        || details.account_number.trim().is_empty()
    {
        return Err(EngineError::InvalidInput(
            "bank details are incomplete".into(),
        ));
    }
    if amount < minimum {
        return Err(EngineError::InvalidInput(format!(
            "amount {amount} is below the minimum withdrawal of {minimum}"
        )));
    }
    Ok(())
}

/// Create a withdrawal request for the caller's account.
pub async fn create_withdrawal(
    pool: &PgPool,
    caller: &Caller,
    details: BankDetails,
    amount: i64,
    minimum: i64,
) -> Result<WithdrawalRequest, EngineError> {
    validate_withdrawal(amount, minimum, &details)?;

    let account = repos::get_account(pool, caller.account_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("account".into()))?;

    if amount > account.passive_income {
        return Err(EngineError::InsufficientFunds {
            requested: amount,
            available: account.passive_income,
        });
    }

    if repos::get_pending_withdrawal(pool, account.id)
        .await
        .map_err(db)?
        .is_some()
    {
        return Err(EngineError::Conflict(
            "account already has a pending withdrawal".into(),
        ));
    }

    let request = repos::insert_withdrawal(
        pool,
        &NewWithdrawal {
            account_id: account.id,
            bank_name: details.bank_name,
            bank_account_name: details.account_name,
            bank_account_number: details.account_number,
            amount,
        },
    )
    .await
    .map_err(db)?;

    tracing::info!(
        request = %request.id,
        account = %account.id,
        amount,
        "Withdrawal request created"
    );

    Ok(request)
}

/// Approve a pending withdrawal: re-check funds, debit the account, and
/// append the ledger entry — one transaction.
pub async fn approve_withdrawal(
    pool: &PgPool,
    caller: &Caller,
    request_id: Uuid,
) -> Result<(), EngineError> {
    require_admin(caller)?;

    let request = repos::get_withdrawal(pool, request_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("withdrawal request".into()))?;
    if request.status != STATUS_PENDING {
        return Err(EngineError::InvalidState(
            "withdrawal request is not pending".into(),
        ));
    }

    let account = repos::get_account(pool, request.account_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("account".into()))?;

    // Balance may have moved since creation.
    if request.amount > account.passive_income {
        return Err(EngineError::InsufficientFunds {
            requested: request.amount,
            available: account.passive_income,
        });
    }

    let mut tx = pool.begin().await.map_err(db)?;

    let moved =
        repos::transition_withdrawal(&mut *tx, request.id, STATUS_PENDING, STATUS_APPROVED)
            .await
            .map_err(db)?;
    if moved == 0 {
        return Err(EngineError::InvalidState(
            "withdrawal request is not pending".into(),
        ));
    }

    repos::debit_passive_income(&mut *tx, account.id, request.amount)
        .await
        .map_err(db)?;
    repos::insert_ledger_entry(&mut *tx, account.id, "withdrawal", request.amount)
        .await
        .map_err(db)?;

    tx.commit().await.map_err(db)?;

    tracing::info!(
        request = %request.id,
        account = %account.id,
        amount = request.amount,
        "Withdrawal approved"
    );

    Ok(())
}

/// Reject a pending withdrawal. No balance effect.
pub async fn reject_withdrawal(
    pool: &PgPool,
    caller: &Caller,
    request_id: Uuid,
) -> Result<(), EngineError> {
    require_admin(caller)?;

    let request = repos::get_withdrawal(pool, request_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("withdrawal request".into()))?;
    if request.status != STATUS_PENDING {
        return Err(EngineError::InvalidState(
            "withdrawal request is not pending".into(),
        ));
    }

    let moved =
        repos::transition_withdrawal(pool, request.id, STATUS_PENDING, STATUS_REJECTED)
            .await
            .map_err(db)?;
    if moved == 0 {
        return Err(EngineError::InvalidState(
            "withdrawal request is not pending".into(),
        ));
    }

    tracing::info!(request = %request.id, "Withdrawal rejected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> BankDetails {
        BankDetails {
            bank_name: "First National".into(),
            account_name: "A Holder".into(),
            account_number: "0001112223".into(),
        }
    }

    #[test]
    fn below_minimum_is_invalid_input() {
        let err = validate_withdrawal(29, 30, &details()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(validate_withdrawal(30, 30, &details()).is_ok());
    }

    #[test]
    fn blank_bank_fields_are_invalid_input() {
        let mut d = details();
        d.account_number = "  ".into();
        assert!(matches!(
            validate_withdrawal(100, 30, &d),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
