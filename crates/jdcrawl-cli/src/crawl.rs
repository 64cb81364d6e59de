//! `jdcrawl crawl`: feed crawling for discovered products.

use std::collections::BTreeSet;

use jdcrawl_core::{AppConfig, FeedType, ProductId};
use jdcrawl_crawler::{
    FileIdStore, JsonlRecordSink, Orchestrator, OrchestratorConfig, PairOutcome, RunSummary,
    StopSignal,
};
use jdcrawl_scraper::JdClient;
use sqlx::SqlitePool;

#[derive(Debug)]
pub(crate) struct CrawlArgs {
    pub feeds: Vec<FeedType>,
    pub keyword: Option<String>,
    pub products: Vec<String>,
    pub dry_run: bool,
}

/// Products to crawl: explicit IDs, one keyword's ID file, or the whole store.
pub(crate) async fn resolve_products(
    config: &AppConfig,
    args: &CrawlArgs,
) -> anyhow::Result<Vec<ProductId>> {
    let ids: BTreeSet<ProductId> = if args.products.is_empty() {
        let store = FileIdStore::new(&config.ids_dir);
        match &args.keyword {
            Some(keyword) => store.load(keyword).await?,
            None => store.load_all().await?,
        }
    } else {
        args.products
            .iter()
            .map(|raw| ProductId::new(raw.as_str()))
            .collect::<Result<_, _>>()?
    };

    if ids.is_empty() {
        anyhow::bail!(
            "no product ids to crawl in {}; run `jdcrawl discover` first",
            config.ids_dir.display()
        );
    }
    Ok(ids.into_iter().collect())
}

pub(crate) fn resolve_feeds(feeds: &[FeedType]) -> Vec<FeedType> {
    if feeds.is_empty() {
        FeedType::ALL.to_vec()
    } else {
        feeds.to_vec()
    }
}

/// # Errors
///
/// Returns an error if no products resolve, the client cannot be built, or
/// the run aborts on a bookkeeping or checkpoint error. Individual pairs that
/// fail are reported, not returned.
pub(crate) async fn run_crawl(
    pool: &SqlitePool,
    config: &AppConfig,
    args: CrawlArgs,
) -> anyhow::Result<()> {
    let products = resolve_products(config, &args).await?;
    let feeds = resolve_feeds(&args.feeds);

    if args.dry_run {
        let feed_names: Vec<&str> = feeds.iter().map(|f| f.as_str()).collect();
        println!(
            "dry-run: would crawl {} pair(s) ({} product(s) x [{}])",
            products.len() * feeds.len(),
            products.len(),
            feed_names.join(", ")
        );
        return Ok(());
    }

    let client = JdClient::from_config(config)
        .map_err(|e| anyhow::anyhow!("failed to build JD client: {e}"))?;
    let sink = JsonlRecordSink::new(&config.output_dir);

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handler_stop.trigger();
        }
    });

    let orchestrator = Orchestrator::new(
        &client,
        pool,
        &sink,
        OrchestratorConfig::from_app_config(config),
    )
    .with_stop_signal(stop);
    let summary = orchestrator.run(&products, &feeds, "cli").await?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    for report in &summary.reports {
        match &report.outcome {
            PairOutcome::Failed(reason) => println!("failed  {}: {reason}", report.pair),
            PairOutcome::Paused(reason) => println!("paused  {}: {reason}", report.pair),
            PairOutcome::Stopped | PairOutcome::Busy => println!("pending {}", report.pair),
            PairOutcome::Done | PairOutcome::AlreadyDone => {}
        }
    }
    println!(
        "crawl run {}: {} done, {} failed, {} paused, {} pending, {} new record(s)",
        summary
            .run_id
            .map_or_else(|| "-".to_owned(), |id| id.to_string()),
        summary.done(),
        summary.failed(),
        summary.paused(),
        summary.stopped(),
        summary.records_written()
    );
    if summary.paused() > 0 {
        println!("refresh the session cookie and run `jdcrawl crawl` again to resume paused pairs");
    }
}
