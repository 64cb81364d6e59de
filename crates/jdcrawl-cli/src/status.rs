use std::collections::HashMap;

use jdcrawl_core::Cursor;
use sqlx::SqlitePool;

/// Print job counts by status, failed and unfinished pairs, and the most
/// recent crawl runs.
///
/// # Errors
///
/// Returns an error if a database query fails.
pub(crate) async fn run_status(pool: &SqlitePool, limit: i64) -> anyhow::Result<()> {
    let counts = jdcrawl_db::count_jobs_by_status(pool).await?;
    if counts.is_empty() {
        println!("no crawl jobs yet; run `jdcrawl crawl` first");
        return Ok(());
    }

    println!("{:<13}PAIRS", "STATUS");
    for (status, count) in &counts {
        println!("{status:<13}{count}");
    }

    let cursors: HashMap<(String, String), Cursor> = jdcrawl_db::list_cursors(pool)
        .await?
        .into_iter()
        .map(|c| {
            (
                (c.product_id.to_string(), c.feed_type.as_str().to_owned()),
                c,
            )
        })
        .collect();
    let next_page = |product_id: &str, feed_type: &str| {
        cursors
            .get(&(product_id.to_owned(), feed_type.to_owned()))
            .map_or(0, |c| c.next_page_index)
    };

    let failed = jdcrawl_db::list_jobs(pool, Some("failed")).await?;
    if !failed.is_empty() {
        println!();
        println!("{:<20}{:<9}{:<7}{:<10}REASON", "PRODUCT", "FEED", "PAGE", "ATTEMPTS");
        for job in &failed {
            println!(
                "{:<20}{:<9}{:<7}{:<10}{}",
                job.product_id,
                job.feed_type,
                next_page(&job.product_id, &job.feed_type),
                job.attempts,
                job.failure_reason.as_deref().unwrap_or("-")
            );
        }
    }

    let mut unfinished = jdcrawl_db::list_jobs(pool, Some("in_progress")).await?;
    unfinished.extend(
        jdcrawl_db::list_jobs(pool, Some("pending"))
            .await?
            .into_iter()
            .filter(|job| next_page(&job.product_id, &job.feed_type) > 0),
    );
    if !unfinished.is_empty() {
        println!();
        println!("resumable pairs:");
        for job in &unfinished {
            println!(
                "  {}/{} at page {} ({})",
                job.product_id,
                job.feed_type,
                next_page(&job.product_id, &job.feed_type),
                job.status
            );
        }
    }

    let runs = jdcrawl_db::list_crawl_runs(pool, limit).await?;
    if !runs.is_empty() {
        println!();
        println!(
            "{:<6}{:<11}{:<18}{:<7}{:<7}{:<7}{:<7}RECORDS",
            "RUN", "STATUS", "STARTED", "PAIRS", "DONE", "FAILED", "PAUSED"
        );
        for run in &runs {
            let started = run.started_at.map_or_else(
                || "-".to_owned(),
                |t| t.format("%Y-%m-%d %H:%M").to_string(),
            );
            println!(
                "{:<6}{:<11}{:<18}{:<7}{:<7}{:<7}{:<7}{}",
                run.id,
                run.status,
                started,
                run.pairs_total,
                run.pairs_done,
                run.pairs_failed,
                run.pairs_paused,
                run.records_emitted
            );
            if let Some(message) = &run.error_message {
                println!("      error: {message}");
            }
        }
    }

    Ok(())
}
