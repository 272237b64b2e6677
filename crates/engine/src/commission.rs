//! Plan activation and upgrade state machines.
//!
//! Approval is the money-moving step: it walks the referral chain up to two
//! levels and posts ledger entries plus account credits in one transaction.
//! The guarded status flip inside that transaction is what serializes
//! concurrent approvals — the loser observes zero rows moved.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use upline_core::EngineError;
use upline_storage::models::{Account, NewPlanRequest, PlanRequest};
use upline_storage::repos;

use crate::plans::{Plan, PricingTable};
use crate::{db, require_admin, Caller};

pub const KIND_ACTIVATION: &str = "activation";
pub const KIND_UPGRADE: &str = "upgrade";

const STATUS_PENDING: &str = "pending";
const STATUS_SPONSOR_APPROVED: &str = "sponsor_approved";
const STATUS_APPROVED: &str = "approved";

// ─── Payout Computation ─────────────────────────────────────────────────────

/// A single commission credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub account_id: Uuid,
    pub amount: i64,
}

/// Who gets paid what when a request is approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CommissionPlan {
    pub direct: Option<Payout>,
    pub passive: Option<Payout>,
}

impl CommissionPlan {
    /// Distribution rules:
    /// - self-activation (sponsor == subject) pays nobody;
    /// - the sponsor earns the tier's direct commission;
    /// - the grand-sponsor, when present, earns the passive commission —
    ///   unless the request was granted at a discount.
    pub fn build(
        pricing: &PricingTable,
        plan: Plan,
        subject_id: Uuid,
        sponsor_id: Uuid,
        grand_sponsor_id: Option<Uuid>,
        discounted: bool,
    ) -> Self {
        if sponsor_id == subject_id {
            return Self::default();
        }

        let amounts = pricing.get(plan);
        let passive = match grand_sponsor_id {
            Some(grand) if !discounted => Some(Payout {
                account_id: grand,
                amount: amounts.passive,
            }),
            _ => None,
        };

        Self {
            direct: Some(Payout {
                account_id: sponsor_id,
                amount: amounts.direct,
            }),
            passive,
        }
    }
}

// ─── Activation ─────────────────────────────────────────────────────────────

/// Create an activation request for a pending subject.
///
/// The sponsor is the subject's upline when one exists (and only the upline
/// may submit); a subject with no upline self-activates, which later pays no
/// commission to anyone.
pub async fn create_activation(
    pool: &PgPool,
    caller: &Caller,
    subject_id: Uuid,
    plan: Plan,
    proof_ref: &str,
) -> Result<PlanRequest, EngineError> {
    if proof_ref.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "proof-of-payment reference is required".into(),
        ));
    }

    let subject = repos::get_account(pool, subject_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("subject account".into()))?;

    if subject.status != "pending" {
        return Err(EngineError::InvalidState(
            "subject is not awaiting activation".into(),
        ));
    }

    let sponsor_id = match subject.referrer_id {
        Some(upline_id) => {
            if caller.account_id != upline_id {
                return Err(EngineError::Forbidden(
                    "only the subject's upline may submit this activation".into(),
                ));
            }

            let sponsor = repos::get_account(pool, upline_id)
                .await
                .map_err(db)?
                .ok_or_else(|| EngineError::NotFound("sponsor account".into()))?;
            let sponsor_plan = active_plan(&sponsor).ok_or_else(|| {
                EngineError::InvalidState("sponsor has no active plan".into())
            })?;

            if !sponsor_plan.can_sponsor(plan) {
                return Err(EngineError::PlanNotAllowed(format!(
                    "a {sponsor_plan} sponsor may not gate a {plan} activation"
                )));
            }

            sponsor.id
        }
        None => {
            if caller.account_id != subject.id {
                return Err(EngineError::Forbidden(
                    "self-activation may only be submitted by the subject".into(),
                ));
            }
            subject.id
        }
    };

    ensure_no_open_request(pool, subject.id).await?;

    let request = repos::insert_plan_request(
        pool,
        &NewPlanRequest {
            kind: KIND_ACTIVATION.into(),
            subject_id: subject.id,
            sponsor_id,
            plan: plan.as_str().into(),
            proof_ref: proof_ref.into(),
            discounted: false,
        },
    )
    .await
    .map_err(db)?;

    tracing::info!(
        request = %request.id,
        subject = %subject.id,
        sponsor = %sponsor_id,
        plan = %plan,
        "Activation request created"
    );

    Ok(request)
}

/// Approve an activation request and distribute commission, atomically.
pub async fn approve_activation(
    pool: &PgPool,
    caller: &Caller,
    request_id: Uuid,
    pricing: &PricingTable,
) -> Result<CommissionPlan, EngineError> {
    require_admin(caller)?;

    let request = fetch_request(pool, request_id, KIND_ACTIVATION).await?;
    if request.status != STATUS_PENDING {
        return Err(EngineError::InvalidState(
            "activation request is not pending".into(),
        ));
    }

    let plan = parse_plan(&request.plan)?;
    let subject = repos::get_account(pool, request.subject_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("subject account".into()))?;
    let sponsor = repos::get_account(pool, request.sponsor_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("sponsor account".into()))?;

    let grand_sponsor_id = if sponsor.id != subject.id {
        sponsor.referrer_id
    } else {
        None
    };

    let payouts = CommissionPlan::build(
        pricing,
        plan,
        subject.id,
        sponsor.id,
        grand_sponsor_id,
        false,
    );

    let mut tx = pool.begin().await.map_err(db)?;

    let moved = repos::transition_plan_request(&mut *tx, request.id, STATUS_PENDING, STATUS_APPROVED)
        .await
        .map_err(db)?;
    if moved == 0 {
        return Err(EngineError::InvalidState(
            "activation request is not pending".into(),
        ));
    }

    repos::activate_account(&mut *tx, subject.id, plan.as_str())
        .await
        .map_err(db)?;

    apply_payouts(&mut tx, &payouts).await?;

    tx.commit().await.map_err(db)?;

    tracing::info!(
        request = %request.id,
        subject = %subject.id,
        plan = %plan,
        direct = payouts.direct.map(|p| p.amount).unwrap_or(0),
        passive = payouts.passive.map(|p| p.amount).unwrap_or(0),
        "Activation approved"
    );

    Ok(payouts)
}

/// Reject a pending activation request. The record is deleted; no balances
/// are touched.
pub async fn reject_activation(
    pool: &PgPool,
    caller: &Caller,
    request_id: Uuid,
) -> Result<(), EngineError> {
    require_admin(caller)?;

    let request = fetch_request(pool, request_id, KIND_ACTIVATION).await?;
    if request.status != STATUS_PENDING {
        return Err(EngineError::InvalidState(
            "activation request is not pending".into(),
        ));
    }

    let removed = repos::delete_open_plan_request(pool, request.id)
        .await
        .map_err(db)?;
    if removed == 0 {
        return Err(EngineError::InvalidState(
            "activation request is not pending".into(),
        ));
    }

    tracing::info!(request = %request.id, "Activation request rejected");
    Ok(())
}

// ─── Upgrade ────────────────────────────────────────────────────────────────

/// Create an upgrade request: the subject names a new sponsor by referral
/// code and targets a higher tier.
pub async fn create_upgrade(
    pool: &PgPool,
    caller: &Caller,
    new_sponsor_code: &str,
    plan: Plan,
    proof_ref: &str,
    discounted: bool,
) -> Result<PlanRequest, EngineError> {
    if proof_ref.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "proof-of-payment reference is required".into(),
        ));
    }

    let subject = repos::get_account(pool, caller.account_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("subject account".into()))?;
    let current_plan = active_plan(&subject).ok_or_else(|| {
        EngineError::InvalidState("only active accounts may upgrade".into())
    })?;

    if plan.rank() <= current_plan.rank() {
        return Err(EngineError::InvalidInput(format!(
            "upgrade must target a tier above {current_plan}"
        )));
    }

    let sponsor = repos::get_account_by_referral_code(pool, new_sponsor_code.trim())
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("sponsor referral code".into()))?;

    if sponsor.id == subject.id {
        return Err(EngineError::Forbidden(
            "an account cannot sponsor its own upgrade".into(),
        ));
    }

    let sponsor_plan = active_plan(&sponsor).ok_or_else(|| {
        EngineError::InvalidState("sponsor has no active plan".into())
    })?;
    if !sponsor_plan.can_sponsor(plan) {
        return Err(EngineError::PlanNotAllowed(format!(
            "a {sponsor_plan} sponsor may not gate a {plan} upgrade"
        )));
    }

    ensure_not_descendant(pool, sponsor.id, subject.id).await?;
    ensure_no_open_request(pool, subject.id).await?;

    let request = repos::insert_plan_request(
        pool,
        &NewPlanRequest {
            kind: KIND_UPGRADE.into(),
            subject_id: subject.id,
            sponsor_id: sponsor.id,
            plan: plan.as_str().into(),
            proof_ref: proof_ref.into(),
            discounted,
        },
    )
    .await
    .map_err(db)?;

    tracing::info!(
        request = %request.id,
        subject = %subject.id,
        sponsor = %sponsor.id,
        plan = %plan,
        discounted,
        "Upgrade request created"
    );

    Ok(request)
}

/// First approval step: the named sponsor confirms with uploaded proof.
pub async fn sponsor_approve_upgrade(
    pool: &PgPool,
    caller: &Caller,
    request_id: Uuid,
    proof_ref: &str,
) -> Result<(), EngineError> {
    if proof_ref.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "proof-of-payment reference is required".into(),
        ));
    }

    let request = fetch_request(pool, request_id, KIND_UPGRADE).await?;
    if caller.account_id != request.sponsor_id {
        return Err(EngineError::Forbidden(
            "only the named sponsor may approve this upgrade".into(),
        ));
    }
    if request.status != STATUS_PENDING {
        return Err(EngineError::InvalidState(
            "upgrade request is not awaiting sponsor approval".into(),
        ));
    }

    let mut tx = pool.begin().await.map_err(db)?;

    let moved = repos::transition_plan_request(
        &mut *tx,
        request.id,
        STATUS_PENDING,
        STATUS_SPONSOR_APPROVED,
    )
    .await
    .map_err(db)?;
    if moved == 0 {
        return Err(EngineError::InvalidState(
            "upgrade request is not awaiting sponsor approval".into(),
        ));
    }

    repos::set_plan_request_proof(&mut *tx, request.id, proof_ref)
        .await
        .map_err(db)?;

    tx.commit().await.map_err(db)?;

    tracing::info!(request = %request.id, "Upgrade sponsor-approved");
    Ok(())
}

/// Final admin approval: reassign the subject's upline to the new sponsor,
/// set the new plan, and distribute commission — passive suppressed for
/// discounted upgrades.
pub async fn approve_upgrade(
    pool: &PgPool,
    caller: &Caller,
    request_id: Uuid,
    pricing: &PricingTable,
) -> Result<CommissionPlan, EngineError> {
    require_admin(caller)?;

    let request = fetch_request(pool, request_id, KIND_UPGRADE).await?;
    if request.status != STATUS_SPONSOR_APPROVED {
        return Err(EngineError::InvalidState(
            "upgrade request is not awaiting admin approval".into(),
        ));
    }

    let plan = parse_plan(&request.plan)?;
    let subject = repos::get_account(pool, request.subject_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("subject account".into()))?;
    let sponsor = repos::get_account(pool, request.sponsor_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound("sponsor account".into()))?;

    // The forest may have changed since creation; re-check before rewiring.
    ensure_not_descendant(pool, sponsor.id, subject.id).await?;

    let payouts = CommissionPlan::build(
        pricing,
        plan,
        subject.id,
        sponsor.id,
        sponsor.referrer_id,
        request.discounted,
    );

    let mut tx = pool.begin().await.map_err(db)?;

    let moved = repos::transition_plan_request(
        &mut *tx,
        request.id,
        STATUS_SPONSOR_APPROVED,
        STATUS_APPROVED,
    )
    .await
    .map_err(db)?;
    if moved == 0 {
        return Err(EngineError::InvalidState(
            "upgrade request is not awaiting admin approval".into(),
        ));
    }

    repos::update_plan_and_upline(&mut *tx, subject.id, plan.as_str(), sponsor.id)
        .await
        .map_err(db)?;

    apply_payouts(&mut tx, &payouts).await?;

    tx.commit().await.map_err(db)?;

    tracing::info!(
        request = %request.id,
        subject = %subject.id,
        new_sponsor = %sponsor.id,
        plan = %plan,
        discounted = request.discounted,
        "Upgrade approved"
    );

    Ok(payouts)
}

/// Reject an upgrade request in any non-terminal state; deletes the record.
pub async fn reject_upgrade(
    pool: &PgPool,
    caller: &Caller,
    request_id: Uuid,
) -> Result<(), EngineError> {
    require_admin(caller)?;

    let request = fetch_request(pool, request_id, KIND_UPGRADE).await?;
    if request.status == STATUS_APPROVED {
        return Err(EngineError::InvalidState(
            "upgrade request is already approved".into(),
        ));
    }

    let removed = repos::delete_open_plan_request(pool, request.id)
        .await
        .map_err(db)?;
    if removed == 0 {
        return Err(EngineError::InvalidState(
            "upgrade request is already processed".into(),
        ));
    }

    tracing::info!(request = %request.id, "Upgrade request rejected");
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn parse_plan(raw: &str) -> Result<Plan, EngineError> {
    raw.parse::<Plan>()
        .map_err(|e| EngineError::Internal(format!("stored plan is invalid: {e}")))
}

/// The account's plan, if it is active and has one.
fn active_plan(account: &Account) -> Option<Plan> {
    if account.status != "active" {
        return None;
    }
    account.plan.as_deref().and_then(|p| p.parse().ok())
}

async fn fetch_request(
    pool: &PgPool,
    request_id: Uuid,
    kind: &str,
) -> Result<PlanRequest, EngineError> {
    let request = repos::get_plan_request(pool, request_id)
        .await
        .map_err(db)?
        .ok_or_else(|| EngineError::NotFound(format!("{kind} request")))?;
    if request.kind != kind {
        return Err(EngineError::InvalidState(format!(
            "request {request_id} is not an {kind} request"
        )));
    }
    Ok(request)
}

async fn ensure_no_open_request(pool: &PgPool, subject_id: Uuid) -> Result<(), EngineError> {
    if repos::get_open_plan_request(pool, subject_id)
        .await
        .map_err(db)?
        .is_some()
    {
        return Err(EngineError::Conflict(
            "subject already has an open plan request".into(),
        ));
    }
    Ok(())
}

/// Walk up from `candidate` through the referral forest; fail if `ancestor`
/// appears on the path. Keeps upline reassignment from creating a cycle.
async fn ensure_not_descendant(
    pool: &PgPool,
    candidate: Uuid,
    ancestor: Uuid,
) -> Result<(), EngineError> {
    let mut cursor = Some(candidate);
    let mut hops = 0u32;

    while let Some(id) = cursor {
        if id == ancestor {
            return Err(EngineError::Forbidden(
                "new sponsor is a descendant of the subject".into(),
            ));
        }
        hops += 1;
        if hops > 512 {
            return Err(EngineError::Internal(
                "referral chain exceeded maximum depth".into(),
            ));
        }
        cursor = repos::get_account(pool, id)
            .await
            .map_err(db)?
            .and_then(|a| a.referrer_id);
    }

    Ok(())
}

/// Post the computed payouts: account credits plus matching ledger entries,
/// inside the caller's transaction.
async fn apply_payouts(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payouts: &CommissionPlan,
) -> Result<(), EngineError> {
    if let Some(direct) = payouts.direct {
        repos::credit_direct_income(&mut **tx, direct.account_id, direct.amount)
            .await
            .map_err(db)?;
        repos::insert_ledger_entry(&mut **tx, direct.account_id, "direct", direct.amount)
            .await
            .map_err(db)?;
    }

    if let Some(passive) = payouts.passive {
        repos::credit_passive_income(&mut **tx, passive.account_id, passive.amount)
            .await
            .map_err(db)?;
        repos::insert_ledger_entry(&mut **tx, passive.account_id, "passive", passive.amount)
            .await
            .map_err(db)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid, Uuid) {
        (
            Uuid::from_u128(1),
            Uuid::from_u128(2),
            Uuid::from_u128(3),
        )
    }

    #[test]
    fn self_activation_pays_nobody() {
        let (subject, _, _) = ids();
        let payouts = CommissionPlan::build(
            &PricingTable::default(),
            Plan::Tier2,
            subject,
            subject,
            None,
            false,
        );
        assert_eq!(payouts, CommissionPlan::default());
    }

    #[test]
    fn sponsored_tier1_activation_pays_16_direct_2_passive() {
        let (subject, sponsor, grand) = ids();
        let payouts = CommissionPlan::build(
            &PricingTable::default(),
            Plan::Tier1,
            subject,
            sponsor,
            Some(grand),
            false,
        );
        assert_eq!(
            payouts.direct,
            Some(Payout {
                account_id: sponsor,
                amount: 16
            })
        );
        assert_eq!(
            payouts.passive,
            Some(Payout {
                account_id: grand,
                amount: 2
            })
        );
    }

    #[test]
    fn no_grand_sponsor_means_no_passive() {
        let (subject, sponsor, _) = ids();
        let payouts = CommissionPlan::build(
            &PricingTable::default(),
            Plan::Tier3,
            subject,
            sponsor,
            None,
            false,
        );
        assert_eq!(
            payouts.direct,
            Some(Payout {
                account_id: sponsor,
                amount: 85
            })
        );
        assert_eq!(payouts.passive, None);
    }

    #[test]
    fn discount_suppresses_passive_but_not_direct() {
        let (subject, sponsor, grand) = ids();
        let payouts = CommissionPlan::build(
            &PricingTable::default(),
            Plan::Tier2,
            subject,
            sponsor,
            Some(grand),
            true,
        );
        assert_eq!(
            payouts.direct,
            Some(Payout {
                account_id: sponsor,
                amount: 40
            })
        );
        assert_eq!(payouts.passive, None);
    }
}
