use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::*;

// ─── Account Queries ────────────────────────────────────────────────────────

/// Insert a new account and return the stored row.
pub async fn insert_account(pool: &PgPool, account: &NewAccount) -> Result<Account, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (name, email, password_hash, role, referral_code, referrer_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&account.name)
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(&account.role)
    .bind(&account.referral_code)
    .bind(account.referrer_id)
    .fetch_one(pool)
    .await
}

/// Get a single account by id.
pub async fn get_account<'e, E>(executor: E, id: Uuid) -> Result<Option<Account>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Get an account by its referral code.
pub async fn get_account_by_referral_code(
    pool: &PgPool,
    code: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE referral_code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await
}

/// Count accounts directly referred by the given account.
pub async fn get_referral_count(pool: &PgPool, id: Uuid) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE referrer_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Mark an account active on the given plan.
pub async fn activate_account<'e, E>(
    executor: E,
    id: Uuid,
    plan: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE accounts SET status = 'active', plan = $2 WHERE id = $1")
        .bind(id)
        .bind(plan)
        .execute(executor)
        .await?;
    Ok(())
}

/// Change an account's plan and reassign its upline (upgrade final approval).
pub async fn update_plan_and_upline<'e, E>(
    executor: E,
    id: Uuid,
    plan: &str,
    referrer_id: Uuid,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE accounts SET plan = $2, referrer_id = $3 WHERE id = $1")
        .bind(id)
        .bind(plan)
        .bind(referrer_id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Credit a direct commission: balance and direct_income both rise.
pub async fn credit_direct_income<'e, E>(
    executor: E,
    id: Uuid,
    amount: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE accounts SET balance = balance + $2, direct_income = direct_income + $2 WHERE id = $1",
    )
    .bind(id)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(())
}

/// Credit a passive commission: balance and passive_income both rise.
pub async fn credit_passive_income<'e, E>(
    executor: E,
    id: Uuid,
    amount: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE accounts SET balance = balance + $2, passive_income = passive_income + $2 WHERE id = $1",
    )
    .bind(id)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(())
}

/// Debit an approved withdrawal from passive_income and total balance.
pub async fn debit_passive_income<'e, E>(
    executor: E,
    id: Uuid,
    amount: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE accounts SET balance = balance - $2, passive_income = passive_income - $2 WHERE id = $1",
    )
    .bind(id)
    .bind(amount)
    .execute(executor)
    .await?;
    Ok(())
}

/// Null the upline pointer of every account referred by `id`.
pub async fn detach_children<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("UPDATE accounts SET referrer_id = NULL WHERE referrer_id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

/// Recompute the cached balance fields from the ledger.
///
/// The ledger is the source of truth; this realigns the projection after
/// manual intervention or suspected drift.
pub async fn reconcile_account<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE accounts a SET
            balance = COALESCE((
                SELECT SUM(CASE WHEN l.kind = 'withdrawal' THEN -l.amount ELSE l.amount END)
                FROM ledger_entries l WHERE l.account_id = a.id), 0),
            direct_income = COALESCE((
                SELECT SUM(l.amount)
                FROM ledger_entries l WHERE l.account_id = a.id AND l.kind = 'direct'), 0),
            passive_income = COALESCE((
                SELECT SUM(CASE WHEN l.kind = 'passive' THEN l.amount ELSE -l.amount END)
                FROM ledger_entries l
                WHERE l.account_id = a.id AND l.kind IN ('passive', 'withdrawal')), 0)
        WHERE a.id = $1
        "#,
    )
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Delete the account row itself (children and dependents handled first).
pub async fn delete_account_row<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM accounts WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

/// All-time ranking: top accounts by current balance, with referral counts.
pub async fn top_accounts_by_balance(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<LeaderboardRow>, sqlx::Error> {
    sqlx::query_as::<_, LeaderboardRow>(
        r#"
        SELECT a.id AS account_id, a.name, a.balance AS total,
               (SELECT COUNT(*) FROM accounts c WHERE c.referrer_id = a.id) AS referrals
        FROM accounts a
        ORDER BY a.balance DESC, a.id
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

// ─── Ledger Queries ─────────────────────────────────────────────────────────

/// Append a ledger entry. Entries are immutable once written.
pub async fn insert_ledger_entry<'e, E>(
    executor: E,
    account_id: Uuid,
    kind: &str,
    amount: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("INSERT INTO ledger_entries (account_id, kind, amount) VALUES ($1, $2, $3)")
        .bind(account_id)
        .bind(kind)
        .bind(amount)
        .execute(executor)
        .await?;
    Ok(())
}

/// Fetch ledger entries created after the watermark, oldest first.
pub async fn get_entries_after(
    pool: &PgPool,
    after: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(
        "SELECT * FROM ledger_entries WHERE created_at > $1 ORDER BY created_at, id LIMIT $2",
    )
    .bind(after)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Signed per-account ledger totals inside [start, end).
///
/// Withdrawals subtract; direct and passive entries add.
pub async fn sum_window_per_account(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<(Uuid, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (Uuid, i64)>(
        r#"
        SELECT account_id,
               COALESCE(SUM(CASE WHEN kind = 'withdrawal' THEN -amount ELSE amount END), 0)::BIGINT AS total
        FROM ledger_entries
        WHERE created_at >= $1 AND created_at < $2
        GROUP BY account_id
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

/// Delete all ledger entries owned by an account (admin cascade only).
pub async fn delete_ledger_for_account<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM ledger_entries WHERE account_id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

// ─── Plan Request Queries ───────────────────────────────────────────────────

/// Insert a plan request in `pending` state and return the stored row.
pub async fn insert_plan_request(
    pool: &PgPool,
    request: &NewPlanRequest,
) -> Result<PlanRequest, sqlx::Error> {
    sqlx::query_as::<_, PlanRequest>(
        r#"
        INSERT INTO plan_requests (kind, subject_id, sponsor_id, plan, proof_ref, discounted)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&request.kind)
    .bind(request.subject_id)
    .bind(request.sponsor_id)
    .bind(&request.plan)
    .bind(&request.proof_ref)
    .bind(request.discounted)
    .fetch_one(pool)
    .await
}

/// Get a single plan request by id.
pub async fn get_plan_request<'e, E>(
    executor: E,
    id: Uuid,
) -> Result<Option<PlanRequest>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, PlanRequest>("SELECT * FROM plan_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Any non-terminal request for the subject (pending or sponsor_approved).
pub async fn get_open_plan_request(
    pool: &PgPool,
    subject_id: Uuid,
) -> Result<Option<PlanRequest>, sqlx::Error> {
    sqlx::query_as::<_, PlanRequest>(
        "SELECT * FROM plan_requests WHERE subject_id = $1 AND status IN ('pending', 'sponsor_approved')",
    )
    .bind(subject_id)
    .fetch_optional(pool)
    .await
}

/// Guarded status transition. Returns the number of rows moved; zero means
/// the request was not in `from` — the caller lost the race or the state
/// machine was violated.
pub async fn transition_plan_request<'e, E>(
    executor: E,
    id: Uuid,
    from: &str,
    to: &str,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query(
        "UPDATE plan_requests SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .execute(executor)
    .await?;
    Ok(res.rows_affected())
}

/// Replace the proof-of-payment reference (sponsor approval step).
pub async fn set_plan_request_proof<'e, E>(
    executor: E,
    id: Uuid,
    proof_ref: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query("UPDATE plan_requests SET proof_ref = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(proof_ref)
        .execute(executor)
        .await?;
    Ok(())
}

/// Delete a non-terminal plan request (rejection removes the record).
/// Approved requests are permanent; zero rows means the caller lost a race
/// against an approval.
pub async fn delete_open_plan_request<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM plan_requests WHERE id = $1 AND status <> 'approved'")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

/// Delete every plan request naming the account as subject or sponsor.
pub async fn delete_plan_requests_for_account<'e, E>(
    executor: E,
    id: Uuid,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM plan_requests WHERE subject_id = $1 OR sponsor_id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

// ─── Withdrawal Queries ─────────────────────────────────────────────────────

/// Insert a withdrawal request in `pending` state and return the stored row.
pub async fn insert_withdrawal(
    pool: &PgPool,
    withdrawal: &NewWithdrawal,
) -> Result<WithdrawalRequest, sqlx::Error> {
    sqlx::query_as::<_, WithdrawalRequest>(
        r#"
        INSERT INTO withdrawal_requests (account_id, bank_name, bank_account_name, bank_account_number, amount)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(withdrawal.account_id)
    .bind(&withdrawal.bank_name)
    .bind(&withdrawal.bank_account_name)
    .bind(&withdrawal.bank_account_number)
    .bind(withdrawal.amount)
    .fetch_one(pool)
    .await
}

/// Get a single withdrawal request by id.
pub async fn get_withdrawal<'e, E>(
    executor: E,
    id: Uuid,
) -> Result<Option<WithdrawalRequest>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, WithdrawalRequest>("SELECT * FROM withdrawal_requests WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// The account's pending withdrawal, if any (at most one by constraint).
pub async fn get_pending_withdrawal(
    pool: &PgPool,
    account_id: Uuid,
) -> Result<Option<WithdrawalRequest>, sqlx::Error> {
    sqlx::query_as::<_, WithdrawalRequest>(
        "SELECT * FROM withdrawal_requests WHERE account_id = $1 AND status = 'pending'",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
}

/// Guarded status transition for withdrawals; zero rows means lost race.
pub async fn transition_withdrawal<'e, E>(
    executor: E,
    id: Uuid,
    from: &str,
    to: &str,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query(
        "UPDATE withdrawal_requests SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .execute(executor)
    .await?;
    Ok(res.rows_affected())
}

/// Delete every withdrawal request owned by the account (admin cascade).
pub async fn delete_withdrawals_for_account<'e, E>(
    executor: E,
    id: Uuid,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM withdrawal_requests WHERE account_id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

// ─── Leaderboard Queries ────────────────────────────────────────────────────

/// Delete the snapshot set for one (period, anchor) before re-inserting.
pub async fn delete_stats_for_anchor<'e, E>(
    executor: E,
    period: &str,
    anchor: NaiveDate,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM leaderboard_stats WHERE period = $1 AND anchor_date = $2")
        .bind(period)
        .bind(anchor)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

/// Insert a batch of snapshot rows using a single multi-value INSERT.
pub async fn insert_stats_batch<'e, E>(
    executor: E,
    period: &str,
    anchor: NaiveDate,
    totals: &[(Uuid, i64)],
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    if totals.is_empty() {
        return Ok(());
    }

    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO leaderboard_stats (account_id, period, anchor_date, total) ");

    qb.push_values(totals, |mut b, (account_id, total)| {
        b.push_bind(account_id)
            .push_bind(period)
            .push_bind(anchor)
            .push_bind(total);
    });

    qb.build().execute(executor).await?;
    Ok(())
}

/// Fold one signed contribution into a snapshot bucket (incremental path).
pub async fn increment_stat<'e, E>(
    executor: E,
    account_id: Uuid,
    period: &str,
    anchor: NaiveDate,
    delta: i64,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO leaderboard_stats (account_id, period, anchor_date, total)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (account_id, period, anchor_date) DO UPDATE
        SET total = leaderboard_stats.total + EXCLUDED.total
        "#,
    )
    .bind(account_id)
    .bind(period)
    .bind(anchor)
    .bind(delta)
    .execute(executor)
    .await?;
    Ok(())
}

/// Drop snapshots anchored before the retention cutoff.
pub async fn prune_stats<'e, E>(
    executor: E,
    period: &str,
    cutoff: NaiveDate,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM leaderboard_stats WHERE period = $1 AND anchor_date < $2")
        .bind(period)
        .bind(cutoff)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

/// Most recent anchor date stored for a period.
pub async fn latest_anchor(pool: &PgPool, period: &str) -> Result<Option<NaiveDate>, sqlx::Error> {
    let row: Option<(Option<NaiveDate>,)> =
        sqlx::query_as("SELECT MAX(anchor_date) FROM leaderboard_stats WHERE period = $1")
            .bind(period)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|r| r.0))
}

/// Top snapshot rows for one (period, anchor), referral count joined on read.
pub async fn top_stats(
    pool: &PgPool,
    period: &str,
    anchor: NaiveDate,
    limit: i64,
) -> Result<Vec<LeaderboardRow>, sqlx::Error> {
    sqlx::query_as::<_, LeaderboardRow>(
        r#"
        SELECT s.account_id, a.name, s.total,
               (SELECT COUNT(*) FROM accounts c WHERE c.referrer_id = s.account_id) AS referrals
        FROM leaderboard_stats s
        JOIN accounts a ON a.id = s.account_id
        WHERE s.period = $1 AND s.anchor_date = $2
        ORDER BY s.total DESC, s.account_id
        LIMIT $3
        "#,
    )
    .bind(period)
    .bind(anchor)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Delete every snapshot row owned by the account (admin cascade).
pub async fn delete_stats_for_account<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let res = sqlx::query("DELETE FROM leaderboard_stats WHERE account_id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}

// ─── Job Watermarks ─────────────────────────────────────────────────────────

/// Get the watermark for a job, creating it at epoch zero on first use.
pub async fn get_or_init_watermark(
    pool: &PgPool,
    job_name: &str,
) -> Result<DateTime<Utc>, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_watermarks (job_name, last_processed_at)
        VALUES ($1, TO_TIMESTAMP(0))
        ON CONFLICT (job_name) DO NOTHING
        "#,
    )
    .bind(job_name)
    .execute(pool)
    .await?;

    let row: (DateTime<Utc>,) =
        sqlx::query_as("SELECT last_processed_at FROM job_watermarks WHERE job_name = $1")
            .bind(job_name)
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Advance a job watermark. Must only be called after the whole batch
/// committed its increments; monotonicity is enforced with GREATEST.
pub async fn set_watermark<'e, E>(
    executor: E,
    job_name: &str,
    to: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE job_watermarks SET last_processed_at = GREATEST(last_processed_at, $2) WHERE job_name = $1",
    )
    .bind(job_name)
    .bind(to)
    .execute(executor)
    .await?;
    Ok(())
}
