//! Account lifecycle operations: signup, admin deletion, reconciliation.
//!
//! Accounts are only ever mutated here and by the commission/withdrawal
//! engines; nothing else writes balance fields.

use sqlx::PgPool;
use uuid::Uuid;

use upline_core::EngineError;
use upline_storage::models::{Account, NewAccount};
use upline_storage::repos;

use crate::{db, require_admin, Caller};

/// Length of issued referral codes.
const REFERRAL_CODE_LEN: usize = 12;

/// Issue a fresh referral code.
pub fn new_referral_code() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    raw[..REFERRAL_CODE_LEN].to_string()
}

/// Register a new member, optionally under a referrer's code. The account
/// starts `pending` with no plan; activation happens through the commission
/// engine.
pub async fn register(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
    referrer_code: Option<&str>,
) -> Result<Account, EngineError> {
    if name.trim().is_empty() || email.trim().is_empty() || password_hash.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "name, email and password are required".into(),
        ));
    }

    let referrer_id = match referrer_code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => {
            let referrer = repos::get_account_by_referral_code(pool, code)
                .await
                .map_err(db)?
                .ok_or_else(|| EngineError::NotFound("referral code".into()))?;
            Some(referrer.id)
        }
        None => None,
    };

    let account = repos::insert_account(
        pool,
        &NewAccount {
            name: name.trim().into(),
            email: email.trim().to_ascii_lowercase(),
            password_hash: password_hash.into(),
            role: "user".into(),
            referral_code: new_referral_code(),
            referrer_id,
        },
    )
    .await
    .map_err(db)?;

    tracing::info!(account = %account.id, referred = referrer_id.is_some(), "Account registered");
    Ok(account)
}

/// Admin deletion: detach downline accounts, then cascade the account's
/// requests, ledger entries and snapshots — one transaction.
pub async fn delete_account(pool: &PgPool, caller: &Caller, id: Uuid) -> Result<(), EngineError> {
    require_admin(caller)?;

    let account = repos::get_account(pool, id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("account".into()))?;

    let mut tx = pool.begin().await.map_err(db)?;

    let detached = repos::detach_children(&mut *tx, account.id).await.map_err(db)?;
    repos::delete_plan_requests_for_account(&mut *tx, account.id)
        .await
        .map_err(db)?;
    repos::delete_withdrawals_for_account(&mut *tx, account.id)
        .await
        .map_err(db)?;
    repos::delete_stats_for_account(&mut *tx, account.id)
        .await
        .map_err(db)?;
    repos::delete_ledger_for_account(&mut *tx, account.id)
        .await
        .map_err(db)?;
    repos::delete_account_row(&mut *tx, account.id)
        .await
        .map_err(db)?;

    tx.commit().await.map_err(db)?;

    tracing::warn!(account = %id, detached, "Account deleted by admin");
    Ok(())
}

/// Recompute the cached balance fields from the ledger and return the
/// refreshed account.
pub async fn reconcile_balance(pool: &PgPool, id: Uuid) -> Result<Account, EngineError> {
    repos::get_account(pool, id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("account".into()))?;

    repos::reconcile_account(pool, id).await.map_err(db)?;

    repos::get_account(pool, id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("account".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referral_codes_are_short_hex_and_unique() {
        let a = new_referral_code();
        let b = new_referral_code();
        assert_eq!(a.len(), REFERRAL_CODE_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
