mod crawl;
mod discover;
mod status;

use clap::{Parser, Subcommand};
use jdcrawl_core::FeedType;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jdcrawl")]
#[command(about = "Resumable JD.com review and Q&A crawler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search keywords and store the product IDs found
    Discover {
        /// Only search this keyword instead of the keywords file
        #[arg(long)]
        keyword: Option<String>,
    },
    /// Crawl review and Q&A feeds for discovered products
    Crawl {
        /// Feeds to crawl (reviews, qa); defaults to both
        #[arg(long = "feed", value_delimiter = ',')]
        feeds: Vec<FeedType>,
        /// Only crawl products discovered for this keyword
        #[arg(long, conflicts_with = "products")]
        keyword: Option<String>,
        /// Crawl these product IDs instead of the ID store
        #[arg(long = "product", value_delimiter = ',')]
        products: Vec<String>,
        /// List the pairs that would be crawled without fetching anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show crawl job counts, failed pairs, and recent runs
    Status {
        /// Number of recent runs to show
        #[arg(long, default_value = "10")]
        limit: i64,
    },
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Apply pending migrations
    Migrate,
    /// Check that the database is reachable
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("jdcrawl: use --help to list commands");
        return Ok(());
    };

    dotenvy::dotenv().ok();
    let config = jdcrawl_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match command {
        Commands::Discover { keyword } => {
            discover::run_discover(&config, keyword.as_deref()).await?;
        }
        Commands::Crawl {
            feeds,
            keyword,
            products,
            dry_run,
        } => {
            let pool = open_pool(&config).await?;
            let args = crawl::CrawlArgs {
                feeds,
                keyword,
                products,
                dry_run,
            };
            let result = crawl::run_crawl(&pool, &config, args).await;
            pool.close().await;
            result?;
        }
        Commands::Status { limit } => {
            let pool = open_pool(&config).await?;
            let result = status::run_status(&pool, limit).await;
            pool.close().await;
            result?;
        }
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let pool = connect(&config).await?;
            let applied = jdcrawl_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
            pool.close().await;
        }
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            let pool = connect(&config).await?;
            jdcrawl_db::ping(&pool).await?;
            println!("database reachable at {}", config.database_url);
            pool.close().await;
        }
    }

    Ok(())
}

async fn connect(config: &jdcrawl_core::AppConfig) -> anyhow::Result<sqlx::SqlitePool> {
    std::fs::create_dir_all(&config.data_dir)?;
    let pool =
        jdcrawl_db::connect_pool(&config.database_url, jdcrawl_db::PoolConfig::from_env()).await?;
    Ok(pool)
}

/// Connects and brings the schema up to date.
async fn open_pool(config: &jdcrawl_core::AppConfig) -> anyhow::Result<sqlx::SqlitePool> {
    let pool = connect(config).await?;
    jdcrawl_db::run_migrations(&pool).await?;
    Ok(pool)
}
