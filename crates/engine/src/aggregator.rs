//! Leaderboard aggregation over the transaction ledger.
//!
//! Two strategies, selected per deployment by `AGGREGATION_STRATEGY`:
//!
//! - **Full recompute** (default) replaces the just-completed daily, weekly
//!   and monthly windows wholesale from the ledger. Safe to re-run; a crash
//!   mid-run leaves the previous snapshot set intact because delete + insert
//!   share one transaction.
//! - **Incremental** folds ledger entries newer than the job watermark into
//!   their period buckets with upsert-increments. The watermark advances in
//!   the same transaction as the increments, so a failed batch is replayed
//!   in full on the next run.
//!
//! The jobs runner executes exactly one strategy, serially — runs never
//! overlap.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;

use upline_core::EngineError;
use upline_storage::repos;

use crate::db;

/// Watermark row name for the incremental job.
pub const WATERMARK_JOB: &str = "leaderboard_incremental";

// ─── Periods ────────────────────────────────────────────────────────────────

/// Leaderboard period type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Daily, Period::Weekly, Period::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }

    /// How many anchors are kept before pruning.
    pub fn retention(&self) -> u32 {
        match self {
            Period::Daily => 7,
            Period::Weekly => 4,
            Period::Monthly => 12,
        }
    }

    /// Anchor of the bucket containing `date`: the date itself for daily,
    /// the week's Monday for weekly, the month's first day for monthly.
    pub fn bucket_anchor(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily => date,
            Period::Weekly => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            Period::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    /// The most recent fully-completed window as of `today`:
    /// `(anchor, start, end_exclusive)` with `anchor == start`.
    pub fn window_ending_before(&self, today: NaiveDate) -> (NaiveDate, NaiveDate, NaiveDate) {
        match self {
            Period::Daily => {
                let start = today - Duration::days(1);
                (start, start, today)
            }
            Period::Weekly => {
                let current = self.bucket_anchor(today);
                let start = current - Duration::days(7);
                (start, start, current)
            }
            Period::Monthly => {
                let current = self.bucket_anchor(today);
                let start = current.checked_sub_months(Months::new(1)).unwrap_or(current);
                (start, start, current)
            }
        }
    }

    /// Snapshots anchored before this date fall outside retention.
    pub fn retention_cutoff(&self, today: NaiveDate) -> NaiveDate {
        let current = self.bucket_anchor(today);
        match self {
            Period::Daily => current - Duration::days(self.retention() as i64),
            Period::Weekly => current - Duration::days(7 * self.retention() as i64),
            Period::Monthly => current
                .checked_sub_months(Months::new(self.retention()))
                .unwrap_or(current),
        }
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            other => Err(format!("unknown period: {other}")),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed contribution of a ledger entry: withdrawals subtract, direct and
/// passive income add.
pub fn signed_amount(kind: &str, amount: i64) -> i64 {
    if kind == "withdrawal" {
        -amount
    } else {
        amount
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

// ─── Full Recompute ─────────────────────────────────────────────────────────

/// Recompute the just-completed window for every period type and prune
/// snapshots past retention. Idempotent: re-running over the same completed
/// windows replaces the snapshots with identical rows.
pub async fn run_full_recompute(pool: &PgPool, now: DateTime<Utc>) -> Result<(), EngineError> {
    let today = now.date_naive();

    for period in Period::ALL {
        let (anchor, start, end) = period.window_ending_before(today);
        let totals = repos::sum_window_per_account(pool, day_start(start), day_start(end))
            .await
            .map_err(db)?;

        let mut tx = pool.begin().await.map_err(db)?;
        repos::delete_stats_for_anchor(&mut *tx, period.as_str(), anchor)
            .await
            .map_err(db)?;
        repos::insert_stats_batch(&mut *tx, period.as_str(), anchor, &totals)
            .await
            .map_err(db)?;
        let pruned = repos::prune_stats(&mut *tx, period.as_str(), period.retention_cutoff(today))
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;

        tracing::info!(
            period = %period,
            anchor = %anchor,
            accounts = totals.len(),
            pruned,
            "Leaderboard window recomputed"
        );
    }

    Ok(())
}

// ─── Incremental ────────────────────────────────────────────────────────────

/// Fold one batch of ledger entries past the watermark into their daily,
/// weekly and monthly buckets. Returns the number of entries folded; zero
/// means caught up.
pub async fn run_incremental(
    pool: &PgPool,
    now: DateTime<Utc>,
    batch_size: i64,
) -> Result<usize, EngineError> {
    let watermark = repos::get_or_init_watermark(pool, WATERMARK_JOB)
        .await
        .map_err(db)?;

    let entries = repos::get_entries_after(pool, watermark, batch_size)
        .await
        .map_err(db)?;
    if entries.is_empty() {
        return Ok(0);
    }

    let newest = entries.last().map(|e| e.created_at).unwrap_or(watermark);
    let today = now.date_naive();

    let mut tx = pool.begin().await.map_err(db)?;

    for entry in &entries {
        let delta = signed_amount(&entry.kind, entry.amount);
        let entry_date = entry.created_at.date_naive();
        for period in Period::ALL {
            repos::increment_stat(
                &mut *tx,
                entry.account_id,
                period.as_str(),
                period.bucket_anchor(entry_date),
                delta,
            )
            .await
            .map_err(db)?;
        }
    }

    for period in Period::ALL {
        repos::prune_stats(&mut *tx, period.as_str(), period.retention_cutoff(today))
            .await
            .map_err(db)?;
    }

    // Advancing the cursor commits with the increments; a failure above
    // leaves the watermark untouched and the batch is replayed next run.
    repos::set_watermark(&mut *tx, WATERMARK_JOB, newest)
        .await
        .map_err(db)?;

    tx.commit().await.map_err(db)?;

    tracing::info!(
        folded = entries.len(),
        watermark = %newest,
        "Incremental aggregation batch committed"
    );

    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn signed_folding_matches_ledger_semantics() {
        let entries = [("direct", 16), ("withdrawal", 5)];
        let total: i64 = entries.iter().map(|(k, a)| signed_amount(k, *a)).sum();
        assert_eq!(total, 11);
        assert_eq!(signed_amount("passive", 7), 7);
        assert_eq!(signed_amount("withdrawal", 30), -30);
    }

    #[test]
    fn bucket_anchors() {
        // 2024-05-15 is a Wednesday.
        let wed = date(2024, 5, 15);
        assert_eq!(Period::Daily.bucket_anchor(wed), wed);
        assert_eq!(Period::Weekly.bucket_anchor(wed), date(2024, 5, 13));
        assert_eq!(Period::Monthly.bucket_anchor(wed), date(2024, 5, 1));

        // A Monday anchors its own week.
        let mon = date(2024, 5, 13);
        assert_eq!(Period::Weekly.bucket_anchor(mon), mon);
    }

    #[test]
    fn completed_windows() {
        let wed = date(2024, 5, 15);

        let (anchor, start, end) = Period::Daily.window_ending_before(wed);
        assert_eq!((anchor, start, end), (date(2024, 5, 14), date(2024, 5, 14), wed));

        let (anchor, start, end) = Period::Weekly.window_ending_before(wed);
        assert_eq!(anchor, date(2024, 5, 6));
        assert_eq!(start, date(2024, 5, 6));
        assert_eq!(end, date(2024, 5, 13));

        let (anchor, start, end) = Period::Monthly.window_ending_before(wed);
        assert_eq!(anchor, date(2024, 4, 1));
        assert_eq!(start, date(2024, 4, 1));
        assert_eq!(end, date(2024, 5, 1));
    }

    #[test]
    fn window_math_is_deterministic() {
        let today = date(2024, 5, 15);
        for period in Period::ALL {
            assert_eq!(
                period.window_ending_before(today),
                period.window_ending_before(today)
            );
        }
    }

    #[test]
    fn monthly_window_handles_year_boundary() {
        let jan = date(2024, 1, 10);
        let (anchor, start, end) = Period::Monthly.window_ending_before(jan);
        assert_eq!(anchor, date(2023, 12, 1));
        assert_eq!(start, date(2023, 12, 1));
        assert_eq!(end, date(2024, 1, 1));
    }

    #[test]
    fn retention_cutoffs() {
        let wed = date(2024, 5, 15);
        assert_eq!(Period::Daily.retention_cutoff(wed), date(2024, 5, 8));
        assert_eq!(Period::Weekly.retention_cutoff(wed), date(2024, 4, 15));
        assert_eq!(Period::Monthly.retention_cutoff(wed), date(2023, 5, 1));
    }

    #[test]
    fn period_codec_round_trips() {
        for period in Period::ALL {
            assert_eq!(period.as_str().parse::<Period>().unwrap(), period);
        }
        assert!("hourly".parse::<Period>().is_err());
    }
}
