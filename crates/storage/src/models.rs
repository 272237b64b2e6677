use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ─── Account ────────────────────────────────────────────────────────────────

/// A member of the referral program.
///
/// `balance`, `direct_income` and `passive_income` are cached projections of
/// the account's ledger entries; the ledger is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub balance: i64,
    pub direct_income: i64,
    pub passive_income: i64,
    pub referral_code: String,
    pub referrer_id: Option<Uuid>,
    pub status: String,
    pub plan: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert-ready account (no `id` or `created_at`; balances start at zero).
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub referral_code: String,
    pub referrer_id: Option<Uuid>,
}

// ─── Ledger Entry ───────────────────────────────────────────────────────────

/// An immutable record of a monetary event (direct, passive, or withdrawal).
///
/// `amount` is always a positive magnitude; the sign is implied by `kind`
/// (withdrawals subtract, everything else adds).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: Uuid,
    pub kind: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

// ─── Plan Request ───────────────────────────────────────────────────────────

/// A pending activation or upgrade, awaiting approval.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlanRequest {
    pub id: Uuid,
    pub kind: String,
    pub subject_id: Uuid,
    pub sponsor_id: Uuid,
    pub plan: String,
    pub proof_ref: String,
    pub discounted: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert-ready plan request.
#[derive(Debug, Clone)]
pub struct NewPlanRequest {
    pub kind: String,
    pub subject_id: Uuid,
    pub sponsor_id: Uuid,
    pub plan: String,
    pub proof_ref: String,
    pub discounted: bool,
}

// ─── Withdrawal Request ─────────────────────────────────────────────────────

/// A request to pay out passive income to a bank account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub account_id: Uuid,
    pub bank_name: String,
    pub bank_account_name: String,
    pub bank_account_number: String,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert-ready withdrawal request.
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub account_id: Uuid,
    pub bank_name: String,
    pub bank_account_name: String,
    pub bank_account_number: String,
    pub amount: i64,
}

// ─── Leaderboard ────────────────────────────────────────────────────────────

/// A ranked snapshot row produced by the aggregator.
///
/// Unique per (account, period, anchor_date).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaderboardStat {
    pub id: i64,
    pub account_id: Uuid,
    pub period: String,
    pub anchor_date: NaiveDate,
    pub total: i64,
}

/// A leaderboard entry as served to callers, enriched with the account's
/// referral count (computed on read, never stored).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LeaderboardRow {
    pub account_id: Uuid,
    pub name: String,
    pub total: i64,
    pub referrals: i64,
}

// ─── Job Watermark ──────────────────────────────────────────────────────────

/// Last-processed cursor for the incremental aggregation job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobWatermark {
    pub job_name: String,
    pub last_processed_at: DateTime<Utc>,
}
