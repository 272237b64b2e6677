//! Read path over the aggregator's snapshots.

use sqlx::PgPool;

use upline_core::EngineError;
use upline_storage::models::LeaderboardRow;
use upline_storage::repos;

use crate::aggregator::Period;
use crate::db;

/// How many accounts a leaderboard serves.
pub const TOP_N: i64 = 10;

/// Top accounts from the most recent snapshot of the given period, each
/// enriched with its referral count. Empty until the aggregator has run.
pub async fn top(pool: &PgPool, period: Period) -> Result<Vec<LeaderboardRow>, EngineError> {
    let anchor = repos::latest_anchor(pool, period.as_str())
        .await
        .map_err(db)?;

    match anchor {
        Some(anchor) => repos::top_stats(pool, period.as_str(), anchor, TOP_N)
            .await
            .map_err(db),
        None => Ok(Vec::new()),
    }
}

/// All-time ranking: bypasses snapshots and ranks by current balance.
pub async fn top_all_time(pool: &PgPool) -> Result<Vec<LeaderboardRow>, EngineError> {
    repos::top_accounts_by_balance(pool, TOP_N)
        .await
        .map_err(db)
}
