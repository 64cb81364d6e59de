//! `jdcrawl discover`: keyword search into the product ID store.
//!
//! Keywords run one after another so search requests stay paced. A keyword
//! that fails is logged and skipped; the command only fails when every
//! keyword did.

use jdcrawl_core::AppConfig;
use jdcrawl_crawler::FileIdStore;
use jdcrawl_scraper::{DiscoveryEngine, JdClient, Pacing};

/// Keywords to search: the explicit one, or every entry of the keywords file.
pub(crate) fn resolve_keywords(
    config: &AppConfig,
    keyword: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    if let Some(keyword) = keyword {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            anyhow::bail!("--keyword must not be blank");
        }
        return Ok(vec![keyword.to_owned()]);
    }
    let file = jdcrawl_core::load_keywords(&config.keywords_path)?;
    Ok(file.keywords)
}

/// # Errors
///
/// Returns an error if the keywords cannot be loaded, the HTTP client cannot
/// be built, or every keyword failed.
pub(crate) async fn run_discover(config: &AppConfig, keyword: Option<&str>) -> anyhow::Result<()> {
    let keywords = resolve_keywords(config, keyword)?;
    let client = JdClient::from_config(config)
        .map_err(|e| anyhow::anyhow!("failed to build JD client: {e}"))?;
    let store = FileIdStore::new(&config.ids_dir);
    let engine = DiscoveryEngine::new(&client, config.search_page_cap).with_pacing(
        Pacing::from_millis(config.inter_request_delay_ms, config.inter_request_jitter_ms),
    );

    let mut failed = 0usize;
    let mut total_new = 0usize;
    for keyword in &keywords {
        match engine.discover_into(keyword, &store).await {
            Ok(report) => {
                total_new += report.newly_stored;
                println!(
                    "{keyword}: {} ids over {} page(s), {} new",
                    report.ids.len(),
                    report.pages_fetched,
                    report.newly_stored
                );
                if let Some(reason) = &report.truncated {
                    println!("  partial: {reason}");
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!(keyword = %keyword, error = %e, "keyword discovery failed");
                eprintln!("error: {e}");
            }
        }
    }

    if failed == keywords.len() {
        anyhow::bail!("discovery failed for all {failed} keyword(s)");
    }
    println!(
        "discovered {total_new} new product id(s) across {} keyword(s) into {}",
        keywords.len(),
        config.ids_dir.display()
    );
    Ok(())
}
