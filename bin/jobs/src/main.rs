//! Upline Jobs Runner — executes the leaderboard aggregation on a schedule.
//!
//! Flow:
//! 1. Connect to PostgreSQL and apply migrations
//! 2. Run the configured strategy once at startup
//! 3. Loop: full recompute at each 00:00 UTC boundary, or incremental
//!    batches every `AGGREGATION_INTERVAL_SECS`
//!
//! Exactly one strategy runs per deployment and runs are strictly serial,
//! so a full recompute can never overlap an incremental batch for the same
//! window. Failures are logged and retried at the next tick; the incremental
//! watermark only advances inside a fully committed batch.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use eyre::Result;

use upline_core::{AggregationStrategy, Settings, telemetry};
use upline_engine::aggregator;
use upline_storage::{self as storage};

#[tokio::main]
async fn main() -> Result<()> {
    // ── Initialisation ──────────────────────────────────────────────────
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!(strategy = ?settings.aggregation_strategy, "Starting Upline Jobs Runner");

    let pool = storage::connect(&settings.database_url).await?;
    tracing::info!("Connected to database");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // First run immediately; both strategies are safe to re-run.
    run_once(&pool, &settings).await;

    match settings.aggregation_strategy {
        AggregationStrategy::Full => loop {
            let wait = until_next_midnight(Utc::now());
            tracing::info!(seconds = wait.as_secs(), "Sleeping until next window boundary");

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutting down gracefully…");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    run_once(&pool, &settings).await;
                }
            }
        },
        AggregationStrategy::Incremental => {
            let interval = std::time::Duration::from_secs(settings.aggregation_interval_secs);
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        tracing::info!("Shutting down gracefully…");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        run_once(&pool, &settings).await;
                    }
                }
            }
        }
    }

    tracing::info!("Jobs runner stopped.");
    Ok(())
}

/// Execute one scheduled run of the configured strategy. Errors are logged,
/// never fatal — the next tick retries.
async fn run_once(pool: &sqlx::PgPool, settings: &Settings) {
    match settings.aggregation_strategy {
        AggregationStrategy::Full => {
            if let Err(e) = aggregator::run_full_recompute(pool, Utc::now()).await {
                tracing::error!(error = %e, "Full recompute failed; retrying at next boundary");
            }
        }
        AggregationStrategy::Incremental => {
            // Drain until caught up; each batch commits independently.
            loop {
                match aggregator::run_incremental(pool, Utc::now(), settings.aggregation_batch_size)
                    .await
                {
                    Ok(folded) if folded as i64 >= settings.aggregation_batch_size => continue,
                    Ok(_) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Incremental aggregation failed; watermark unchanged");
                        break;
                    }
                }
            }
        }
    }
}

/// Time remaining until the next 00:00 UTC boundary.
fn until_next_midnight(now: DateTime<Utc>) -> std::time::Duration {
    let next = (now.date_naive() + ChronoDuration::days(1))
        .and_time(NaiveTime::MIN)
        .and_utc();
    (next - now).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midnight_boundary_from_midday() {
        let now = DateTime::parse_from_rfc3339("2024-05-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(until_next_midnight(now).as_secs(), 12 * 3600);
    }

    #[test]
    fn midnight_boundary_just_before_rollover() {
        let now = DateTime::parse_from_rfc3339("2024-05-15T23:59:59Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(until_next_midnight(now).as_secs(), 1);
    }
}
